//! Criteria AST.
//!
//! Callers usually hand Quarry a loosely-typed JSON object such as
//! `{ "age >=": 21, "or": [{ "status": "active" }, { "vip": true }] }`.
//! [`Criteria::from_json`] validates its shape once and produces a closed
//! tree; field names are resolved later, against a concrete entity, by the
//! compiler.

use crate::error::{QuarryError, Result};
use serde_json::{Map, Value};

/// Comparison operators understood in criteria keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Like,
    NotLike,
    ILike,
    NotILike,
    Similar,
    NotSimilar,
    Match,
    NotMatch,
    IMatch,
    NotIMatch,
    Is,
    IsNot,
    Contains,
    ContainedBy,
    Overlaps,
    Between,
}

impl Operator {
    /// Parse the operator part of a key such as `"age >="` or `"name not ilike"`.
    pub fn from_token(token: &str) -> Option<Self> {
        let normalized = token
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase();
        let op = match normalized.as_str() {
            "=" | "eq" => Operator::Eq,
            "!=" | "<>" | "ne" | "neq" => Operator::Ne,
            ">" | "gt" => Operator::Gt,
            ">=" | "gte" => Operator::Gte,
            "<" | "lt" => Operator::Lt,
            "<=" | "lte" => Operator::Lte,
            "in" => Operator::In,
            "not in" | "nin" => Operator::NotIn,
            "like" => Operator::Like,
            "not like" | "nlike" => Operator::NotLike,
            "ilike" => Operator::ILike,
            "not ilike" | "nilike" => Operator::NotILike,
            "similar to" | "similar" => Operator::Similar,
            "not similar to" | "nsimilar" => Operator::NotSimilar,
            "~" | "match" => Operator::Match,
            "!~" | "nmatch" => Operator::NotMatch,
            "~*" | "imatch" => Operator::IMatch,
            "!~*" | "nimatch" => Operator::NotIMatch,
            "is" => Operator::Is,
            "is not" | "isnot" => Operator::IsNot,
            "@>" | "contains" => Operator::Contains,
            "<@" | "contained" => Operator::ContainedBy,
            "&&" | "overlaps" => Operator::Overlaps,
            "between" => Operator::Between,
            _ => return None,
        };
        Some(op)
    }

    /// SQL spelling of the binary operator.
    pub fn sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::ILike => "ILIKE",
            Operator::NotILike => "NOT ILIKE",
            Operator::Similar => "SIMILAR TO",
            Operator::NotSimilar => "NOT SIMILAR TO",
            Operator::Match => "~",
            Operator::NotMatch => "!~",
            Operator::IMatch => "~*",
            Operator::NotIMatch => "!~*",
            Operator::Is => "IS",
            Operator::IsNot => "IS NOT",
            Operator::Contains => "@>",
            Operator::ContainedBy => "<@",
            Operator::Overlaps => "&&",
            Operator::Between => "BETWEEN",
        }
    }

    /// Pattern operators, valid on text only.
    pub fn is_pattern(&self) -> bool {
        matches!(
            self,
            Operator::Like
                | Operator::NotLike
                | Operator::ILike
                | Operator::NotILike
                | Operator::Similar
                | Operator::NotSimilar
                | Operator::Match
                | Operator::NotMatch
                | Operator::IMatch
                | Operator::NotIMatch
        )
    }

    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte | Operator::Between
        )
    }

    /// Containment-style operators, valid on arrays and JSON.
    pub fn is_containment(&self) -> bool {
        matches!(
            self,
            Operator::Contains | Operator::ContainedBy | Operator::Overlaps
        )
    }
}

/// Characters that may form a symbolic operator suffix (`age>=`).
const OPERATOR_CHARS: &[char] = &['<', '>', '=', '!', '~', '*', '@', '&'];

/// Right-hand side of a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A JSON scalar, or an object/array compared as a whole JSON value.
    Scalar(Value),
    /// A list of values (`IN`, `BETWEEN`, array literals).
    List(Vec<Value>),
    /// Values produced by a nested select on another entity.
    SubSelect(Box<SubSelect>),
}

/// `field IN (SELECT column FROM entity WHERE criteria)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubSelect {
    pub entity: String,
    pub field: String,
    pub criteria: Criteria,
}

/// A single `field op value` test.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Column name, `alias.column`, or a dotted JSON path.
    pub field: String,
    pub op: Operator,
    pub operand: Operand,
}

/// A filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    Condition(Condition),
    And(Vec<Criteria>),
    Or(Vec<Criteria>),
    /// Match by primary key value (or list of values).
    PrimaryKey(Value),
}

impl Default for Criteria {
    fn default() -> Self {
        Criteria::all()
    }
}

impl Criteria {
    /// Matches every row.
    pub fn all() -> Self {
        Criteria::And(Vec::new())
    }

    pub fn condition(field: impl Into<String>, op: Operator, value: Value) -> Self {
        let operand = match value {
            Value::Array(items) => Operand::List(items),
            other => Operand::Scalar(other),
        };
        Criteria::Condition(Condition {
            field: field.into(),
            op,
            operand,
        })
    }

    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::condition(field, Operator::Eq, value)
    }

    pub fn and(children: impl IntoIterator<Item = Criteria>) -> Self {
        Criteria::And(children.into_iter().collect())
    }

    pub fn or(children: impl IntoIterator<Item = Criteria>) -> Self {
        Criteria::Or(children.into_iter().collect())
    }

    pub fn primary_key(value: Value) -> Self {
        Criteria::PrimaryKey(value)
    }

    /// True when the criteria place no restriction at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Criteria::And(children) => children.iter().all(Criteria::is_empty),
            _ => false,
        }
    }

    /// Validate and convert a caller-supplied JSON criteria object.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Criteria::all()),
            Value::Object(map) => parse_object(map),
            Value::Bool(_) | Value::Number(_) | Value::String(_) | Value::Array(_) => {
                Ok(Criteria::PrimaryKey(value.clone()))
            }
        }
    }
}

impl TryFrom<Value> for Criteria {
    type Error = QuarryError;

    fn try_from(value: Value) -> Result<Self> {
        Criteria::from_json(&value)
    }
}

fn parse_object(map: &Map<String, Value>) -> Result<Criteria> {
    let mut children = Vec::new();
    // serde_json maps iterate in key order, which keeps compiled SQL stable.
    for (key, value) in map {
        match key.as_str() {
            "or" => children.push(Criteria::Or(parse_group(key, value)?)),
            "and" => children.push(Criteria::And(parse_group(key, value)?)),
            _ => parse_entry(key, value, &mut children)?,
        }
    }
    Ok(Criteria::And(children))
}

fn parse_group(key: &str, value: &Value) -> Result<Vec<Criteria>> {
    let items = value.as_array().ok_or_else(|| {
        QuarryError::invalid_criteria(format!("'{}' expects an array of criteria objects", key))
    })?;
    items
        .iter()
        .map(|item| match item {
            Value::Object(map) => parse_object(map),
            _ => Err(QuarryError::invalid_criteria(format!(
                "'{}' members must be objects",
                key
            ))),
        })
        .collect()
}

fn parse_entry(key: &str, value: &Value, out: &mut Vec<Criteria>) -> Result<()> {
    let (field, op) = parse_key(key)?;

    if let Value::Object(inner) = value {
        if let Some(sub) = inner.get("$select") {
            if inner.len() != 1 {
                return Err(QuarryError::invalid_criteria(format!(
                    "'{}': a $select value must not carry other keys",
                    key
                )));
            }
            let op = match op {
                None | Some(Operator::Eq) | Some(Operator::In) => Operator::In,
                Some(Operator::Ne) | Some(Operator::NotIn) => Operator::NotIn,
                Some(other) => {
                    return Err(QuarryError::invalid_criteria(format!(
                        "'{}': operator {} cannot take a sub-select",
                        key,
                        other.sql()
                    )));
                }
            };
            out.push(Criteria::Condition(Condition {
                field,
                op,
                operand: Operand::SubSelect(Box::new(parse_sub_select(sub)?)),
            }));
            return Ok(());
        }

        if op.is_none() && !inner.is_empty() && inner.keys().all(|k| Operator::from_token(k).is_some())
        {
            for (op_key, op_value) in inner {
                // Checked by the guard above.
                if let Some(op) = Operator::from_token(op_key) {
                    parse_entry_with(field.clone(), op, op_value, out)?;
                }
            }
            return Ok(());
        }
    }

    parse_entry_with(field, op.unwrap_or(Operator::Eq), value, out)
}

fn parse_entry_with(field: String, op: Operator, value: &Value, out: &mut Vec<Criteria>) -> Result<()> {
    if let Value::Object(inner) = value
        && inner.contains_key("$select")
    {
        return Err(QuarryError::invalid_criteria(format!(
            "'{}': sub-selects are only valid as a direct field value",
            field
        )));
    }
    let operand = match value {
        Value::Array(items) => Operand::List(items.clone()),
        other => Operand::Scalar(other.clone()),
    };
    out.push(Criteria::Condition(Condition { field, op, operand }));
    Ok(())
}

fn parse_sub_select(value: &Value) -> Result<SubSelect> {
    let obj = value
        .as_object()
        .ok_or_else(|| QuarryError::invalid_criteria("$select expects an object"))?;
    let entity = obj
        .get("entity")
        .and_then(Value::as_str)
        .ok_or_else(|| QuarryError::invalid_criteria("$select requires an 'entity' string"))?
        .to_string();
    let field = obj
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| QuarryError::invalid_criteria("$select requires a 'field' string"))?
        .to_string();
    let criteria = match obj.get("criteria") {
        Some(Value::Object(map)) => parse_object(map)?,
        Some(Value::Null) | None => Criteria::all(),
        Some(_) => {
            return Err(QuarryError::invalid_criteria(
                "$select 'criteria' must be an object",
            ));
        }
    };
    Ok(SubSelect {
        entity,
        field,
        criteria,
    })
}

/// Split a key into field and optional operator.
///
/// Accepts `"field"`, `"field op"` and `"field<symbols>"`. Field names may
/// contain spaces (`"first name"`); a trailing word is only taken as the
/// operator when it names one.
pub fn parse_key(key: &str) -> Result<(String, Option<Operator>)> {
    let key = key.trim();
    if key.is_empty() {
        return Err(QuarryError::invalid_criteria("empty criteria key"));
    }

    // Leftmost split first, so `"a not in"` reads as `not in`, not `in`.
    for (i, _) in key.match_indices(char::is_whitespace) {
        let (field, rest) = key.split_at(i);
        if let Some(op) = Operator::from_token(rest) {
            return Ok((field.trim_end().to_string(), Some(op)));
        }
    }

    let split = key.trim_end_matches(OPERATOR_CHARS).len();
    if split == key.len() {
        return Ok((key.to_string(), None));
    }
    if split == 0 {
        return Err(QuarryError::invalid_criteria(format!(
            "criteria key '{}' has no field name",
            key
        )));
    }
    let (field, symbols) = key.split_at(split);
    let op = Operator::from_token(symbols).ok_or_else(|| {
        QuarryError::invalid_criteria(format!("unknown operator '{}' in key '{}'", symbols, key))
    })?;
    Ok((field.trim_end().to_string(), Some(op)))
}
