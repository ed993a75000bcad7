//! Entity descriptors.
//!
//! Descriptors are built by the registry from introspected catalog rows and
//! never mutated afterwards; a reload builds fresh ones.

use crate::ident::{quote_ident, quote_qualified};
use serde::{Deserialize, Serialize};

/// Kind of queryable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Table,
    View,
    /// A table with a single-column primary key and a JSON `body` column.
    DocumentTable,
    Function,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Table => "table",
            EntityKind::View => "view",
            EntityKind::DocumentTable => "document_table",
            EntityKind::Function => "function",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse type category used to pick operator semantics and casts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeCategory {
    Text,
    Numeric,
    Boolean,
    Json,
    Array,
    DateTime,
    Other,
}

impl TypeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeCategory::Text => "text",
            TypeCategory::Numeric => "numeric",
            TypeCategory::Boolean => "boolean",
            TypeCategory::Json => "json",
            TypeCategory::Array => "array",
            TypeCategory::DateTime => "datetime",
            TypeCategory::Other => "other",
        }
    }

    /// Categorize a Postgres `udt_name` (`int4`, `_text`, `jsonb`, ...).
    pub fn from_udt(udt_name: &str) -> Self {
        if udt_name.starts_with('_') {
            return TypeCategory::Array;
        }
        match udt_name {
            "text" | "varchar" | "bpchar" | "char" | "name" | "citext" => TypeCategory::Text,
            "int2" | "int4" | "int8" | "float4" | "float8" | "numeric" | "money" | "oid" => {
                TypeCategory::Numeric
            }
            "bool" => TypeCategory::Boolean,
            "json" | "jsonb" => TypeCategory::Json,
            "date" | "time" | "timetz" | "timestamp" | "timestamptz" | "interval" => {
                TypeCategory::DateTime
            }
            _ => TypeCategory::Other,
        }
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Underlying type name as reported by `information_schema.columns.udt_name`.
    pub udt_name: String,
    /// Schema of the type; `pg_catalog` for built-ins.
    pub udt_schema: String,
    pub category: TypeCategory,
    pub nullable: bool,
    #[serde(default)]
    pub has_default: bool,
}

impl ColumnDescriptor {
    /// A nullable column of a built-in type.
    pub fn new(name: impl Into<String>, udt_name: impl Into<String>) -> Self {
        let udt_name = udt_name.into();
        Self {
            name: name.into(),
            category: TypeCategory::from_udt(&udt_name),
            udt_name,
            udt_schema: "pg_catalog".to_string(),
            nullable: true,
            has_default: false,
        }
    }

    /// A column whose type lives in a user schema (enums, domains, composites).
    pub fn user_defined(
        name: impl Into<String>,
        udt_schema: impl Into<String>,
        udt_name: impl Into<String>,
    ) -> Self {
        let mut column = Self::new(name, udt_name);
        column.udt_schema = udt_schema.into();
        column
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    pub fn is_builtin_type(&self) -> bool {
        self.udt_schema.is_empty() || self.udt_schema == "pg_catalog"
    }

    /// SQL spelling of the column type, usable after `::`.
    ///
    /// `int4`, `_text` -> `text[]`, user types quoted and qualified.
    pub fn sql_type(&self) -> String {
        let (base, array) = match self.udt_name.strip_prefix('_') {
            Some(element) => (element, true),
            None => (self.udt_name.as_str(), false),
        };
        let mut out = if !self.is_builtin_type() {
            quote_qualified(&self.udt_schema, base)
        } else if is_plain_word(base) {
            base.to_string()
        } else {
            quote_ident(base)
        };
        if array {
            out.push_str("[]");
        }
        out
    }

    /// Whether parameters compared to this column need an explicit cast.
    pub fn needs_cast(&self) -> bool {
        self.category != TypeCategory::Text
    }

    /// Category of the elements of an array column.
    pub fn element_category(&self) -> Option<TypeCategory> {
        self.udt_name.strip_prefix('_').map(TypeCategory::from_udt)
    }
}

fn is_plain_word(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Signature of one overload of a database function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSignature {
    /// Argument types as rendered by `format_type` (`integer`, `text[]`).
    pub arg_types: Vec<String>,
    pub return_type: String,
    pub returns_set: bool,
    #[serde(default)]
    pub variadic: bool,
}

impl FunctionSignature {
    /// Whether a call with `arity` arguments can bind to this overload.
    pub fn accepts(&self, arity: usize) -> bool {
        if self.variadic {
            arity + 1 >= self.arg_types.len()
        } else {
            arity == self.arg_types.len()
        }
    }
}

/// A queryable entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub schema: String,
    pub name: String,
    pub kind: EntityKind,
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Whether INSERT/UPDATE/DELETE may target this relation.
    #[serde(default)]
    pub insertable: bool,
    /// Document tables with a `search` tsvector column.
    #[serde(default)]
    pub searchable: bool,
    /// Overloads, for functions only.
    #[serde(default)]
    pub signatures: Vec<FunctionSignature>,
}

impl EntityDescriptor {
    fn relation(schema: impl Into<String>, name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            kind,
            columns: Vec::new(),
            primary_key: Vec::new(),
            insertable: !matches!(kind, EntityKind::View | EntityKind::Function),
            searchable: false,
            signatures: Vec::new(),
        }
    }

    pub fn table(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self::relation(schema, name, EntityKind::Table)
    }

    pub fn view(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self::relation(schema, name, EntityKind::View)
    }

    /// A document table with an `id` primary key and a `body` jsonb column.
    pub fn document_table(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self::relation(schema, name, EntityKind::DocumentTable)
            .with_column(ColumnDescriptor::new("id", "int4").not_null().with_default())
            .with_column(ColumnDescriptor::new("body", "jsonb").not_null())
            .with_primary_key(["id"])
    }

    pub fn function(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self::relation(schema, name, EntityKind::Function)
    }

    pub fn with_column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_insertable(mut self, insertable: bool) -> Self {
        self.insertable = insertable;
        self
    }

    pub fn with_signature(mut self, signature: FunctionSignature) -> Self {
        self.signatures.push(signature);
        self
    }

    /// `schema.name`, the registry key.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Quoted `"schema"."name"` for SQL text.
    pub fn sql_name(&self) -> String {
        quote_qualified(&self.schema, &self.name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_document(&self) -> bool {
        self.kind == EntityKind::DocumentTable
    }

    pub fn is_relation(&self) -> bool {
        self.kind != EntityKind::Function
    }

    /// The JSON body column of a document table.
    pub fn body_column(&self) -> Option<&ColumnDescriptor> {
        if !self.is_document() {
            return None;
        }
        self.column("body")
    }

    /// The primary key column when the key is a single column.
    pub fn single_primary_key(&self) -> Option<&ColumnDescriptor> {
        match self.primary_key.as_slice() {
            [only] => self.column(only),
            _ => None,
        }
    }

    /// Pick the overload that accepts `arity` arguments.
    pub fn signature_for(&self, arity: usize) -> Option<&FunctionSignature> {
        let mut candidates = self.signatures.iter().filter(|s| s.accepts(arity));
        let first = candidates.next()?;
        // Prefer an exact arity match over a variadic one.
        if first.variadic {
            return self
                .signatures
                .iter()
                .find(|s| !s.variadic && s.arg_types.len() == arity)
                .or(Some(first));
        }
        Some(first)
    }
}
