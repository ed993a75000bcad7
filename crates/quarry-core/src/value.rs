//! Positional parameter values.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A value bound to one `$n` placeholder.
///
/// The compiler decides the representation from the JSON input and the
/// column it is compared against; drivers bind it as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(Value),
    TextArray(Vec<String>),
}

impl SqlValue {
    /// Convert a JSON scalar. Objects and arrays are not scalars.
    pub fn scalar(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(SqlValue::Null),
            Value::Bool(b) => Some(SqlValue::Bool(*b)),
            Value::Number(n) => Some(number(n)),
            Value::String(s) => Some(SqlValue::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Render a JSON scalar as text, as `#>>` extraction would return it.
    pub fn text(value: &Value) -> Option<Self> {
        scalar_text(value).map(SqlValue::Text)
    }

    /// Convert a list of non-null JSON scalars into a text array.
    ///
    /// The column cast (`$1::int4[]`) turns the elements back into their type.
    pub fn text_array(values: &[Value]) -> Option<Self> {
        values
            .iter()
            .map(|v| if v.is_null() { None } else { scalar_text(v) })
            .collect::<Option<Vec<_>>>()
            .map(SqlValue::TextArray)
    }

    pub fn json(value: &Value) -> Self {
        SqlValue::Json(value.clone())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

fn number(n: &serde_json::Number) -> SqlValue {
    if let Some(i) = n.as_i64() {
        SqlValue::Int(i)
    } else if n.is_u64() {
        // Larger than i64: keep the exact digits and let the cast parse them.
        SqlValue::Text(n.to_string())
    } else {
        n.as_f64().map(SqlValue::Float).unwrap_or(SqlValue::Text(n.to_string()))
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Bool(b) => write!(f, "{}", b),
            SqlValue::Int(i) => write!(f, "{}", i),
            SqlValue::Float(x) => write!(f, "{}", x),
            SqlValue::Text(s) => write!(f, "{:?}", s),
            SqlValue::Json(v) => write!(f, "{}", v),
            SqlValue::TextArray(items) => write!(f, "{:?}", items),
        }
    }
}
