//! Query commands: `find`, `count`, `search`, `sql` and `call`.

use super::{QueryArgs, parse_criteria, print_json};
use anyhow::Result;
use futures::TryStreamExt;
use quarry_core::TextSearch;
use quarry_runtime::Database;
use serde_json::{Value, json};

pub async fn find(db: &Database, entity: &str, query: &QueryArgs) -> Result<()> {
    let rows = db
        .entity(entity)?
        .find(&query.criteria()?, &query.options()?)
        .await?;
    print_json(&rows)
}

pub async fn stream(db: &Database, entity: &str, query: &QueryArgs) -> Result<()> {
    let handle = db.entity(entity)?;
    let mut rows = handle.stream(&query.criteria()?, &query.options()?)?;
    let mut count = 0u64;
    while let Some(row) = rows.try_next().await? {
        println!("{}", serde_json::to_string(&row)?);
        count += 1;
    }
    tracing::debug!(rows = count, "Stream finished");
    Ok(())
}

pub async fn count(db: &Database, entity: &str, criteria: &str) -> Result<()> {
    let criteria = parse_criteria(criteria)?;
    let mut handle = db.entity(entity)?;
    let total = if handle.descriptor().is_document() {
        handle.count_doc(&criteria).await?
    } else {
        handle.count(&criteria, &Default::default()).await?
    };
    println!("{}", total);
    Ok(())
}

pub async fn search(
    db: &Database,
    entity: &str,
    term: &str,
    fields: Vec<String>,
    query: &QueryArgs,
) -> Result<()> {
    let search = TextSearch::new(term).in_fields(fields);
    let docs = db
        .entity(entity)?
        .search_doc(&search, &query.criteria()?, &query.options()?)
        .await?;
    print_json(&docs)
}

/// Print the statement a `find` would run, with its parameters.
pub fn sql(db: &Database, entity: &str, query: &QueryArgs) -> Result<()> {
    let statement = db
        .entity(entity)?
        .build_find(&query.criteria()?, &query.options()?)?;
    print_json(&json!({
        "sql": statement.sql,
        "params": statement.params,
    }))
}

pub async fn call(db: &Database, function: &str, args: &[String]) -> Result<()> {
    let args: Vec<Value> = args.iter().map(String::as_str).map(parse_argument).collect();
    let rows = db.entity(function)?.invoke(&args).await?;
    print_json(&rows)
}

/// JSON when it parses, text otherwise, so `quarry call f hello` works unquoted.
fn parse_argument(arg: &str) -> Value {
    serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.to_string()))
}
