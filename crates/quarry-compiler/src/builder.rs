//! SQL text accumulator.

use quarry_core::SqlValue;
use quarry_core::ident::{quote_ident, quote_qualified};

use crate::statement::Statement;

/// Accumulates SQL text and the parameters its placeholders refer to.
///
/// Placeholders are numbered as parameters are pushed, so `$n` always
/// refers to `params[n - 1]` regardless of how the text is later split
/// into clauses with [`SqlBuilder::take_sql`].
#[derive(Debug, Default)]
pub struct SqlBuilder {
    sql: String,
    params: Vec<SqlValue>,
}

impl SqlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue numbering after parameters produced elsewhere.
    pub fn with_params(params: Vec<SqlValue>) -> Self {
        Self {
            sql: String::new(),
            params,
        }
    }

    pub fn push_str<T: AsRef<str>>(&mut self, s: T) {
        self.sql.push_str(s.as_ref());
    }

    pub fn push(&mut self, c: char) {
        self.sql.push(c);
    }

    /// Push a double-quoted identifier.
    pub fn push_identifier(&mut self, ident: &str) {
        self.sql.push_str(&quote_ident(ident));
    }

    /// Push `"schema"."name"`.
    pub fn push_qualified(&mut self, schema: &str, name: &str) {
        self.sql.push_str(&quote_qualified(schema, name));
    }

    /// Push a placeholder and record the value bound to it.
    pub fn push_param(&mut self, value: SqlValue) {
        self.params.push(value);
        self.sql.push('$');
        self.sql.push_str(&self.params.len().to_string());
    }

    /// Push a placeholder followed by `::type` when a cast is given.
    ///
    /// A null with a cast is written as `NULL::type` instead of a
    /// placeholder, so each cast placeholder always carries the same wire
    /// type for a given SQL text.
    pub fn push_cast_param(&mut self, value: SqlValue, cast: Option<&str>) {
        if value.is_null()
            && let Some(cast) = cast
        {
            self.sql.push_str("NULL::");
            self.sql.push_str(cast);
            return;
        }
        self.push_param(value);
        if let Some(cast) = cast {
            self.sql.push_str("::");
            self.sql.push_str(cast);
        }
    }

    /// Push elements separated by `sep`, stopping at the first error.
    pub fn push_iter<T, E>(
        &mut self,
        iter: impl IntoIterator<Item = T>,
        sep: &str,
        mut push_elem: impl FnMut(&mut Self, T) -> Result<(), E>,
    ) -> Result<(), E> {
        for (i, item) in iter.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(sep);
            }
            push_elem(self, item)?;
        }
        Ok(())
    }

    /// Take the text written so far, keeping the parameters.
    pub fn take_sql(&mut self) -> String {
        std::mem::take(&mut self.sql)
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn into_params(self) -> Vec<SqlValue> {
        self.params
    }

    pub fn into_statement(self) -> Statement {
        Statement::new(self.sql, self.params)
    }
}
