//! `quarry entities` and `quarry describe`.

use anyhow::{Context, Result};
use quarry_core::{EntityDescriptor, EntityKind};
use quarry_runtime::Database;
use serde_json::Value;

pub fn entities(db: &Database, kind: Option<&str>) -> Result<()> {
    let kind = kind.map(parse_kind).transpose()?;
    let registry = db.registry();
    for entity in registry.entities() {
        if kind.is_some_and(|k| k != entity.kind) {
            continue;
        }
        println!("{}", summary_line(entity));
    }
    Ok(())
}

pub fn describe(db: &Database, name: &str) -> Result<()> {
    let entity = db.registry().lookup(name)?;
    super::print_json(&*entity)
}

fn parse_kind(kind: &str) -> Result<EntityKind> {
    serde_json::from_value(Value::String(kind.to_string()))
        .with_context(|| format!("Unknown entity kind '{}'", kind))
}

fn summary_line(entity: &EntityDescriptor) -> String {
    let detail = match entity.kind {
        EntityKind::Function => format!("{} signature(s)", entity.signatures.len()),
        _ if entity.primary_key.is_empty() => format!("{} column(s)", entity.columns.len()),
        _ => format!(
            "{} column(s), key ({})",
            entity.columns.len(),
            entity.primary_key.join(", ")
        ),
    };
    format!("{:<15} {:<40} {}", entity.kind.as_str(), entity.qualified_name(), detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::ColumnDescriptor;

    #[test]
    fn kinds_parse_from_their_snake_case_names() {
        assert_eq!(parse_kind("document_table").unwrap(), EntityKind::DocumentTable);
        assert!(parse_kind("sequence").is_err());
    }

    #[test]
    fn summary_mentions_the_key() {
        let users = EntityDescriptor::table("public", "users")
            .with_column(ColumnDescriptor::new("id", "int4"))
            .with_column(ColumnDescriptor::new("name", "text"))
            .with_primary_key(["id"]);
        let line = summary_line(&users);
        assert!(line.starts_with("table"));
        assert!(line.contains("public.users"));
        assert!(line.ends_with("2 column(s), key (id)"));
    }
}
