//! Catalog introspection.
//!
//! Four catalog queries run through the [`Driver`]: relations, their
//! columns, primary keys and functions. Each is ordered by schema then name
//! so the registry sees objects in a stable order. System schemas are
//! excluded.

use crate::driver::{Driver, Row};
use quarry_compiler::Statement;
use quarry_core::{ColumnDescriptor, EntityDescriptor, EntityKind, FunctionSignature, QuarryError, Result, TypeCategory};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

pub const RELATIONS_SQL: &str = r#"
select n.nspname as schema,
       c.relname as name,
       c.relkind::text as kind,
       (c.relkind in ('r', 'p') or (pg_relation_is_updatable(c.oid::regclass, true) & 8) = 8) as insertable
from pg_class c
join pg_namespace n on n.oid = c.relnamespace
where c.relkind in ('r', 'p', 'v', 'm', 'f')
  and not c.relispartition
  and n.nspname not in ('pg_catalog', 'information_schema')
  and n.nspname not like 'pg\_toast%'
  and n.nspname not like 'pg\_temp%'
order by n.nspname, c.relname
"#;

pub const COLUMNS_SQL: &str = r#"
select n.nspname as schema,
       c.relname as relation,
       a.attname as name,
       t.typname as udt_name,
       tn.nspname as udt_schema,
       not a.attnotnull as nullable,
       a.atthasdef as has_default
from pg_attribute a
join pg_class c on c.oid = a.attrelid
join pg_namespace n on n.oid = c.relnamespace
join pg_type t on t.oid = a.atttypid
join pg_namespace tn on tn.oid = t.typnamespace
where c.relkind in ('r', 'p', 'v', 'm', 'f')
  and not c.relispartition
  and a.attnum > 0
  and not a.attisdropped
  and n.nspname not in ('pg_catalog', 'information_schema')
  and n.nspname not like 'pg\_toast%'
  and n.nspname not like 'pg\_temp%'
order by n.nspname, c.relname, a.attnum
"#;

pub const PRIMARY_KEYS_SQL: &str = r#"
select n.nspname as schema,
       c.relname as relation,
       a.attname as name
from pg_index i
join pg_class c on c.oid = i.indrelid
join pg_namespace n on n.oid = c.relnamespace
cross join lateral unnest(i.indkey::int2[]) with ordinality as k(attnum, position)
join pg_attribute a on a.attrelid = c.oid and a.attnum = k.attnum
where i.indisprimary
  and n.nspname not in ('pg_catalog', 'information_schema')
  and n.nspname not like 'pg\_toast%'
order by n.nspname, c.relname, k.position
"#;

pub const FUNCTIONS_SQL: &str = r#"
select n.nspname as schema,
       p.proname as name,
       coalesce(
         (select json_agg(format_type(arg.type_oid, null) order by arg.position)
          from unnest(p.proargtypes::oid[]) with ordinality as arg(type_oid, position)),
         '[]'::json
       ) as arg_types,
       format_type(p.prorettype, null) as return_type,
       p.proretset as returns_set,
       p.provariadic <> 0 as variadic
from pg_proc p
join pg_namespace n on n.oid = p.pronamespace
where p.prokind = 'f'
  and p.prorettype not in ('trigger'::regtype, 'event_trigger'::regtype, 'internal'::regtype)
  and n.nspname not in ('pg_catalog', 'information_schema')
  and n.nspname not like 'pg\_toast%'
  and n.nspname not like 'pg\_temp%'
  and not exists (
    select 1 from pg_depend d
    where d.classid = 'pg_proc'::regclass and d.objid = p.oid and d.deptype = 'e'
  )
order by n.nspname, p.proname, p.oid
"#;

/// Everything the catalog reported, before filtering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCatalog {
    pub relations: Vec<RawRelation>,
    pub functions: Vec<RawFunction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawRelation {
    pub schema: String,
    pub name: String,
    pub kind: EntityKind,
    pub insertable: bool,
    pub columns: Vec<ColumnDescriptor>,
    pub primary_key: Vec<String>,
    pub searchable: bool,
}

impl RawRelation {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn into_descriptor(self) -> EntityDescriptor {
        EntityDescriptor {
            schema: self.schema,
            name: self.name,
            kind: self.kind,
            columns: self.columns,
            primary_key: self.primary_key,
            insertable: self.insertable,
            searchable: self.searchable,
            signatures: Vec::new(),
        }
    }
}

/// One function overload.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFunction {
    pub schema: String,
    pub name: String,
    pub signature: FunctionSignature,
}

impl RawFunction {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Deserialize)]
struct RelationRow {
    schema: String,
    name: String,
    kind: String,
    insertable: bool,
}

#[derive(Debug, Deserialize)]
struct ColumnRow {
    schema: String,
    relation: String,
    name: String,
    udt_name: String,
    udt_schema: String,
    nullable: bool,
    #[serde(default)]
    has_default: bool,
}

#[derive(Debug, Deserialize)]
struct KeyRow {
    schema: String,
    relation: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct FunctionRow {
    schema: String,
    name: String,
    #[serde(default)]
    arg_types: Vec<String>,
    return_type: String,
    returns_set: bool,
    #[serde(default)]
    variadic: bool,
}

type RelationKey = (String, String);

/// Read the catalog into a [`RawCatalog`].
pub async fn introspect(driver: &dyn Driver) -> Result<RawCatalog> {
    let relations: Vec<RelationRow> = fetch(driver, "relations", RELATIONS_SQL).await?;
    let columns: Vec<ColumnRow> = fetch(driver, "columns", COLUMNS_SQL).await?;
    let keys: Vec<KeyRow> = fetch(driver, "primary_keys", PRIMARY_KEYS_SQL).await?;
    let functions: Vec<FunctionRow> = fetch(driver, "functions", FUNCTIONS_SQL).await?;

    let mut columns_by_relation: HashMap<RelationKey, Vec<ColumnDescriptor>> = HashMap::new();
    for row in columns {
        let mut column = ColumnDescriptor::user_defined(row.name, row.udt_schema, row.udt_name);
        column.nullable = row.nullable;
        column.has_default = row.has_default;
        columns_by_relation
            .entry((row.schema, row.relation))
            .or_default()
            .push(column);
    }

    let mut keys_by_relation: HashMap<RelationKey, Vec<String>> = HashMap::new();
    for row in keys {
        keys_by_relation
            .entry((row.schema, row.relation))
            .or_default()
            .push(row.name);
    }

    let relations = relations
        .into_iter()
        .map(|row| {
            let key = (row.schema, row.name);
            let columns = columns_by_relation.remove(&key).unwrap_or_default();
            let primary_key = keys_by_relation.remove(&key).unwrap_or_default();
            let (schema, name) = key;
            let table = matches!(row.kind.as_str(), "r" | "p" | "f");
            let kind = if !table {
                EntityKind::View
            } else if is_document(&columns, &primary_key) {
                EntityKind::DocumentTable
            } else {
                EntityKind::Table
            };
            let searchable = kind == EntityKind::DocumentTable
                && columns.iter().any(|c| c.name == "search" && c.udt_name == "tsvector");
            RawRelation {
                schema,
                name,
                kind,
                insertable: row.insertable,
                columns,
                primary_key,
                searchable,
            }
        })
        .collect::<Vec<_>>();

    let functions = functions
        .into_iter()
        .map(|row| RawFunction {
            schema: row.schema,
            name: row.name,
            signature: FunctionSignature {
                arg_types: row.arg_types,
                return_type: row.return_type,
                returns_set: row.returns_set,
                variadic: row.variadic,
            },
        })
        .collect::<Vec<_>>();

    tracing::debug!(
        relations = relations.len(),
        functions = functions.len(),
        "Catalog introspected"
    );

    Ok(RawCatalog { relations, functions })
}

/// A single-column primary key plus a json/jsonb `body` column.
fn is_document(columns: &[ColumnDescriptor], primary_key: &[String]) -> bool {
    primary_key.len() == 1
        && columns
            .iter()
            .any(|c| c.name == "body" && c.category == TypeCategory::Json)
}

async fn fetch<T: DeserializeOwned>(driver: &dyn Driver, step: &str, sql: &str) -> Result<Vec<T>> {
    let rows = driver
        .execute(&Statement::new(sql, Vec::new()))
        .await
        .map_err(|e| QuarryError::introspection(step, e))?;
    rows.into_iter()
        .map(|row| decode(step, row))
        .collect()
}

fn decode<T: DeserializeOwned>(step: &str, row: Row) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(row))
        .map_err(|e| QuarryError::introspection(step, format!("unexpected catalog row: {}", e)))
}
