//! Entity and field resolution.

use std::sync::Arc;

use quarry_core::ident::quote_ident;
use quarry_core::{ColumnDescriptor, EntityDescriptor, QuarryError, Result, SqlValue, TypeCategory};

use crate::builder::SqlBuilder;

/// Looks up entities referenced from criteria (sub-selects) and joins.
pub trait EntityResolver {
    /// Find an entity by qualified (`schema.name`) or unqualified name.
    fn resolve_entity(&self, name: &str) -> Option<Arc<EntityDescriptor>>;
}

/// Resolver for compilations that never reference another entity.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEntities;

impl EntityResolver for NoEntities {
    fn resolve_entity(&self, _name: &str) -> Option<Arc<EntityDescriptor>> {
        None
    }
}

/// A relation joined into a query, addressed by its alias.
#[derive(Debug, Clone)]
pub(crate) struct Joined {
    pub alias: String,
    pub entity: Arc<EntityDescriptor>,
}

/// What field names may refer to while compiling one query.
pub(crate) struct Scope<'a> {
    pub entity: &'a EntityDescriptor,
    pub joins: &'a [Joined],
    /// Unknown names resolve to paths inside the document body.
    pub documents: bool,
}

impl<'a> Scope<'a> {
    pub fn new(entity: &'a EntityDescriptor, joins: &'a [Joined], documents: bool) -> Self {
        Self {
            entity,
            joins,
            documents,
        }
    }

    /// Columns are qualified once other relations are in play.
    fn qualifier(&self) -> Option<String> {
        (!self.joins.is_empty()).then(|| self.entity.sql_name())
    }

    /// Resolve a criteria or order key to a column or JSON path.
    ///
    /// Order: exact column, `alias.column` of a join, a path under a JSON
    /// column, then (for document queries) a path under the body.
    pub fn resolve(&self, field: &str) -> Result<FieldRef> {
        if let Some(column) = self.entity.column(field) {
            return Ok(FieldRef::column(field, self.qualifier(), column));
        }

        if let Some((head, rest)) = field.split_once('.') {
            if let Some(joined) = self.joins.iter().find(|j| j.alias == head) {
                return resolve_joined(field, joined, rest);
            }
            if let Some(column) = self.entity.column(head)
                && column.category == TypeCategory::Json
            {
                return Ok(FieldRef::path(field, self.qualifier(), column, split_path(field, rest)?));
            }
        }

        if self.documents
            && let Some(body) = self.entity.body_column()
        {
            return Ok(FieldRef::path(field, self.qualifier(), body, split_path(field, field)?));
        }

        Err(QuarryError::invalid_criteria(format!(
            "'{}' is not a column of {}",
            field,
            self.entity.qualified_name()
        )))
    }

    /// Resolve a plain column of the target entity (no paths, no joins).
    pub fn resolve_column(&self, field: &str) -> Result<&'a ColumnDescriptor> {
        self.entity.column(field).ok_or_else(|| {
            QuarryError::invalid_criteria(format!(
                "'{}' is not a column of {}",
                field,
                self.entity.qualified_name()
            ))
        })
    }
}

fn resolve_joined(field: &str, joined: &Joined, rest: &str) -> Result<FieldRef> {
    let qualifier = Some(quote_ident(&joined.alias));
    if let Some(column) = joined.entity.column(rest) {
        return Ok(FieldRef::column(field, qualifier, column));
    }
    if let Some((head, path)) = rest.split_once('.')
        && let Some(column) = joined.entity.column(head)
        && column.category == TypeCategory::Json
    {
        return Ok(FieldRef::path(field, qualifier, column, split_path(field, path)?));
    }
    Err(QuarryError::invalid_criteria(format!(
        "'{}' is not a column of joined relation '{}' ({})",
        rest,
        joined.alias,
        joined.entity.qualified_name()
    )))
}

fn split_path(field: &str, path: &str) -> Result<Vec<String>> {
    let segments: Vec<String> = path.split('.').map(str::to_string).collect();
    if segments.iter().any(String::is_empty) {
        return Err(QuarryError::invalid_criteria(format!(
            "'{}' contains an empty path segment",
            field
        )));
    }
    Ok(segments)
}

/// A resolved field: a column, optionally with a JSON path into it.
#[derive(Debug, Clone)]
pub(crate) struct FieldRef {
    /// The key as the caller wrote it.
    pub name: String,
    relation: Option<String>,
    pub column: ColumnDescriptor,
    pub path: Vec<String>,
}

impl FieldRef {
    fn column(name: &str, relation: Option<String>, column: &ColumnDescriptor) -> Self {
        Self {
            name: name.to_string(),
            relation,
            column: column.clone(),
            path: Vec::new(),
        }
    }

    fn path(name: &str, relation: Option<String>, column: &ColumnDescriptor, path: Vec<String>) -> Self {
        Self {
            path,
            ..Self::column(name, relation, column)
        }
    }

    pub fn is_path(&self) -> bool {
        !self.path.is_empty()
    }

    /// Category of the value the expression evaluates to.
    pub fn category(&self) -> TypeCategory {
        if self.is_path() {
            TypeCategory::Text
        } else {
            self.column.category
        }
    }

    pub fn push_column(&self, b: &mut SqlBuilder) {
        if let Some(relation) = &self.relation {
            b.push_str(relation);
            b.push('.');
        }
        b.push_identifier(&self.column.name);
    }

    /// The column, or the text at its JSON path (`("body" #>> $1)`).
    pub fn push_expr(&self, b: &mut SqlBuilder) {
        self.push_extraction(b, "#>>");
    }

    /// The column, or the JSON value at its path (`("body" #> $1)`).
    pub fn push_json_expr(&self, b: &mut SqlBuilder) {
        self.push_extraction(b, "#>");
    }

    fn push_extraction(&self, b: &mut SqlBuilder, op: &str) {
        if !self.is_path() {
            self.push_column(b);
            return;
        }
        b.push('(');
        self.push_column(b);
        b.push(' ');
        b.push_str(op);
        b.push(' ');
        b.push_param(SqlValue::TextArray(self.path.clone()));
        b.push(')');
    }
}
