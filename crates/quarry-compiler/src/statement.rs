//! Complete statements built from compiled clauses.

use std::collections::BTreeSet;
use std::fmt;

use quarry_core::{
    Criteria, EntityDescriptor, QuarryError, QueryOptions, Result, SqlValue, TextSearch, TypeCategory,
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::builder::SqlBuilder;
use crate::compiler::{CriteriaCompiler, ExtraPredicate};
use crate::predicate::column_param;
use crate::resolve::Scope;

/// SQL text plus the values for its `$n` placeholders, executed verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

impl CriteriaCompiler<'_> {
    /// `SELECT ... FROM ... [WHERE] [ORDER BY] [LIMIT/OFFSET]`.
    pub fn select(&self, entity: &EntityDescriptor, criteria: &Criteria, options: &QueryOptions) -> Result<Statement> {
        let query = self.compile(entity, criteria, options)?;
        let sql = format!("SELECT {} FROM {}{}", query.projection, query.source, query.tail());
        Ok(Statement::new(sql, query.params))
    }

    /// `SELECT COUNT(*)`; ordering, paging and projection are ignored.
    pub fn count(&self, entity: &EntityDescriptor, criteria: &Criteria, options: &QueryOptions) -> Result<Statement> {
        let options = QueryOptions {
            only: options.only,
            joins: options.joins.clone(),
            ..QueryOptions::default()
        };
        let query = self.compile(entity, criteria, &options)?;
        let sql = format!("SELECT COUNT(*) AS count FROM {}{}", query.source, query.tail());
        Ok(Statement::new(sql, query.params))
    }

    /// Full-text search: `to_tsvector(fields) @@ plainto_tsquery($n)`, or the
    /// `search` column when no fields are given.
    pub fn search_text(
        &self,
        entity: &EntityDescriptor,
        search: &TextSearch,
        criteria: &Criteria,
        options: &QueryOptions,
    ) -> Result<Statement> {
        if search.term.trim().is_empty() {
            return Err(QuarryError::invalid_criteria("search term must not be empty"));
        }
        if search.fields.is_empty() && !entity.searchable {
            return Err(QuarryError::invalid_criteria(format!(
                "{} has no search column; name the fields to search",
                entity.qualified_name()
            )));
        }

        let predicate: ExtraPredicate<'_> = &|b, scope| {
            if search.fields.is_empty() {
                scope.resolve("search")?.push_column(b);
            } else {
                b.push_str("to_tsvector(concat_ws(' ', ");
                b.push_iter(&search.fields, ", ", |b, name| {
                    scope.resolve(name)?.push_expr(b);
                    Ok::<_, QuarryError>(())
                })?;
                b.push_str("))");
            }
            b.push_str(" @@ plainto_tsquery(");
            b.push_param(SqlValue::Text(search.term.clone()));
            b.push(')');
            Ok(())
        };

        let query = self.compile_with(entity, criteria, options, Some(predicate))?;
        let sql = format!("SELECT {} FROM {}{}", query.projection, query.source, query.tail());
        Ok(Statement::new(sql, query.params))
    }

    /// Multi-row `INSERT ... RETURNING *`.
    ///
    /// Columns are the sorted union of the rows' keys; a row missing one of
    /// them gets `DEFAULT`.
    pub fn insert(&self, entity: &EntityDescriptor, rows: &[Map<String, Value>]) -> Result<Statement> {
        if rows.is_empty() {
            return Err(QuarryError::invalid_criteria("nothing to insert"));
        }
        let scope = self.plain_scope(entity)?;
        let names: BTreeSet<&str> = rows.iter().flat_map(|r| r.keys().map(String::as_str)).collect();
        let columns = names
            .into_iter()
            .map(|name| scope.resolve_column(name))
            .collect::<Result<Vec<_>>>()?;

        let mut b = SqlBuilder::new();
        b.push_str("INSERT INTO ");
        b.push_str(entity.sql_name());

        if columns.is_empty() {
            if rows.len() > 1 {
                return Err(QuarryError::invalid_criteria(
                    "cannot insert several rows without any column values",
                ));
            }
            b.push_str(" DEFAULT VALUES RETURNING *");
            return Ok(b.into_statement());
        }

        b.push_str(" (");
        b.push_iter(&columns, ", ", |b, column| {
            b.push_identifier(&column.name);
            Ok::<_, QuarryError>(())
        })?;
        b.push_str(") VALUES ");
        b.push_iter(rows, ", ", |b, row| {
            b.push('(');
            b.push_iter(&columns, ", ", |b, column| {
                match row.get(&column.name) {
                    Some(value) => {
                        let (param, cast) = column_param(column, value)?;
                        b.push_cast_param(param, cast.as_deref());
                    }
                    None => b.push_str("DEFAULT"),
                }
                Ok::<_, QuarryError>(())
            })?;
            b.push(')');
            Ok::<_, QuarryError>(())
        })?;
        b.push_str(" RETURNING *");
        Ok(b.into_statement())
    }

    /// `UPDATE ... SET ... [WHERE] RETURNING *`.
    pub fn update(
        &self,
        entity: &EntityDescriptor,
        criteria: &Criteria,
        changes: &Map<String, Value>,
    ) -> Result<Statement> {
        if changes.is_empty() {
            return Err(QuarryError::invalid_criteria("no changes to apply"));
        }
        let scope = self.plain_scope(entity)?;

        let mut b = SqlBuilder::new();
        b.push_str("UPDATE ");
        b.push_str(entity.sql_name());
        b.push_str(" SET ");
        b.push_iter(changes, ", ", |b, (name, value)| {
            let column = scope.resolve_column(name)?;
            let (param, cast) = column_param(column, value)?;
            b.push_identifier(&column.name);
            b.push_str(" = ");
            b.push_cast_param(param, cast.as_deref());
            Ok::<_, QuarryError>(())
        })?;
        self.push_predicate(&mut b, entity, criteria)?;
        b.push_str(" RETURNING *");
        Ok(b.into_statement())
    }

    /// `DELETE FROM ... [WHERE] RETURNING *`.
    pub fn delete(&self, entity: &EntityDescriptor, criteria: &Criteria) -> Result<Statement> {
        let mut b = SqlBuilder::new();
        b.push_str("DELETE FROM ");
        b.push_str(entity.sql_name());
        self.push_predicate(&mut b, entity, criteria)?;
        b.push_str(" RETURNING *");
        Ok(b.into_statement())
    }

    /// Insert a document body, with an explicit key when one is given.
    pub fn insert_document(&self, entity: &EntityDescriptor, id: Option<&Value>, body: &Value) -> Result<Statement> {
        let (key, body_column) = document_columns(entity)?;
        check_body(body)?;

        let mut row = Map::new();
        if let Some(id) = id.filter(|id| !id.is_null()) {
            row.insert(key.to_string(), id.clone());
        }
        row.insert(body_column.to_string(), body.clone());
        self.insert(entity, &[row])
    }

    /// Replace the body of the document with key `id`.
    pub fn replace_document(&self, entity: &EntityDescriptor, id: &Value, body: &Value) -> Result<Statement> {
        let (_, body_column) = document_columns(entity)?;
        check_body(body)?;

        let mut changes = Map::new();
        changes.insert(body_column.to_string(), body.clone());
        self.update(entity, &Criteria::primary_key(id.clone()), &changes)
    }

    /// Merge `patch` into the body of matching documents (`body || patch`).
    pub fn modify_document(&self, entity: &EntityDescriptor, criteria: &Criteria, patch: &Value) -> Result<Statement> {
        let (_, body_column) = document_columns(entity)?;
        check_body(patch)?;
        let plain_json = entity
            .column(body_column)
            .is_some_and(|c| c.udt_name == "json");

        let mut b = SqlBuilder::new();
        b.push_str("UPDATE ");
        b.push_str(entity.sql_name());
        b.push_str(" SET ");
        b.push_identifier(body_column);
        b.push_str(" = ");
        if plain_json {
            b.push('(');
            b.push_identifier(body_column);
            b.push_str("::jsonb || ");
            b.push_cast_param(SqlValue::json(patch), Some("jsonb"));
            b.push_str(")::json");
        } else {
            b.push_identifier(body_column);
            b.push_str(" || ");
            b.push_cast_param(SqlValue::json(patch), Some("jsonb"));
        }
        self.for_documents().push_predicate(&mut b, entity, criteria)?;
        b.push_str(" RETURNING *");
        Ok(b.into_statement())
    }

    /// `SELECT * FROM "schema"."fn"($1::type, ...)`, choosing the overload by arity.
    pub fn invoke(&self, entity: &EntityDescriptor, args: &[Value]) -> Result<Statement> {
        if entity.is_relation() {
            return Err(QuarryError::invalid_criteria(format!(
                "{} is not a function",
                entity.qualified_name()
            )));
        }
        let signature = entity.signature_for(args.len()).ok_or_else(|| {
            QuarryError::invalid_criteria(format!(
                "{} has no overload taking {} argument(s)",
                entity.qualified_name(),
                args.len()
            ))
        })?;

        let mut b = SqlBuilder::new();
        b.push_str("SELECT * FROM ");
        b.push_str(entity.sql_name());
        b.push('(');
        b.push_iter(args.iter().enumerate(), ", ", |b, (i, value)| {
            let arg_type = argument_type(&signature.arg_types, signature.variadic, i)?;
            let param = argument_param(arg_type, value)?;
            b.push_cast_param(param, Some(arg_type));
            Ok::<_, QuarryError>(())
        })?;
        b.push(')');
        Ok(b.into_statement())
    }

    fn plain_scope<'a>(&self, entity: &'a EntityDescriptor) -> Result<Scope<'a>> {
        CriteriaCompiler {
            documents: false,
            ..*self
        }
        .scope(entity, &[])
    }
}

fn document_columns(entity: &EntityDescriptor) -> Result<(&str, &str)> {
    match (entity.single_primary_key(), entity.body_column()) {
        (Some(key), Some(body)) => Ok((key.name.as_str(), body.name.as_str())),
        _ => Err(QuarryError::invalid_criteria(format!(
            "{} is not a document table",
            entity.qualified_name()
        ))),
    }
}

fn check_body(body: &Value) -> Result<()> {
    if body.is_object() {
        Ok(())
    } else {
        Err(QuarryError::invalid_criteria("document bodies must be JSON objects"))
    }
}

/// Declared type of argument `i`; trailing arguments of a variadic
/// function take the element type of its last parameter.
fn argument_type(arg_types: &[String], variadic: bool, i: usize) -> Result<&str> {
    let declared = match arg_types.get(i) {
        Some(t) if !(variadic && i + 1 == arg_types.len()) => t.as_str(),
        _ if variadic => arg_types
            .last()
            .map(|t| t.strip_suffix("[]").unwrap_or(t))
            .unwrap_or_default(),
        _ => "",
    };
    if !is_type_name(declared) {
        return Err(QuarryError::invalid_criteria(format!(
            "unusable argument type '{}'",
            declared
        )));
    }
    Ok(declared)
}

/// Type names as `format_type` renders them: `integer`, `character varying`,
/// `text[]`, `app."Mood"`, `numeric(10,2)`.
fn is_type_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '.' | '"' | '[' | ']' | '(' | ')' | ',')
        })
        && s.matches('"').count() % 2 == 0
}

fn argument_param(arg_type: &str, value: &Value) -> Result<SqlValue> {
    let category = if arg_type.ends_with("[]") {
        TypeCategory::Array
    } else if matches!(arg_type, "json" | "jsonb") {
        TypeCategory::Json
    } else {
        TypeCategory::Other
    };
    let param = match (category, value) {
        (_, Value::Null) => Some(SqlValue::Null),
        (TypeCategory::Json, v) => Some(SqlValue::json(v)),
        (TypeCategory::Array, Value::Array(items)) => SqlValue::text_array(items),
        (TypeCategory::Array, _) => None,
        (_, v) => SqlValue::text(v),
    };
    param.ok_or_else(|| {
        QuarryError::invalid_criteria(format!("argument {} does not fit type {}", value, arg_type))
    })
}
