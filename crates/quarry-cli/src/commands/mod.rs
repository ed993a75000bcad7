//! Command implementations for the `quarry` binary.

pub mod catalog;
pub mod query;

use anyhow::{Context, Result};
use clap::Args;
use quarry_core::{Criteria, OrderItem, QuarryConfig, QueryOptions};
use quarry_runtime::Database;
use serde_json::Value;
use std::path::Path;

const DEFAULT_CONFIG: &str = "quarry.yaml";

/// Criteria and read options shared by the query commands.
#[derive(Args, Debug, Clone, Default)]
pub struct QueryArgs {
    /// Criteria as a JSON object, e.g. '{"age >=": 18}'.
    #[arg(long, default_value = "{}")]
    pub criteria: String,

    /// Ordering, e.g. "name desc nulls last". Repeatable.
    #[arg(long)]
    pub order: Vec<String>,

    #[arg(long)]
    pub limit: Option<u64>,

    #[arg(long)]
    pub offset: Option<u64>,

    /// Columns to select. Repeatable; defaults to every column.
    #[arg(long = "column")]
    pub columns: Vec<String>,
}

impl QueryArgs {
    pub fn criteria(&self) -> Result<Criteria> {
        parse_criteria(&self.criteria)
    }

    pub fn options(&self) -> Result<QueryOptions> {
        let mut options = QueryOptions::new().fields(self.columns.iter().cloned());
        for expr in &self.order {
            let item: OrderItem = serde_json::from_value(Value::String(expr.clone()))
                .with_context(|| format!("Invalid --order '{}'", expr))?;
            options = options.order_by(item);
        }
        if let Some(limit) = self.limit {
            options = options.limit(limit);
        }
        if let Some(offset) = self.offset {
            options = options.offset(offset);
        }
        Ok(options)
    }
}

pub fn parse_criteria(text: &str) -> Result<Criteria> {
    let value: Value = serde_json::from_str(text).context("--criteria is not valid JSON")?;
    Ok(Criteria::from_json(&value)?)
}

/// Load the configuration file and apply the command-line URL on top.
///
/// Without `--config`, `./quarry.yaml` is used when it exists.
pub fn load_config(path: Option<&Path>, database_url: Option<String>) -> Result<QuarryConfig> {
    let mut config = match path {
        Some(path) => QuarryConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None if Path::new(DEFAULT_CONFIG).exists() => QuarryConfig::from_file(DEFAULT_CONFIG)
            .with_context(|| format!("Failed to load {}", DEFAULT_CONFIG))?,
        None => QuarryConfig::default(),
    };

    if let Some(url) = database_url {
        config.connection.database_url_env = None;
        config.connection.database_url = Some(url);
    }
    Ok(config)
}

pub async fn open(config: &QuarryConfig) -> Result<Database> {
    quarry_adapter_pg::connect(config)
        .await
        .context("Failed to open database")
}

pub(crate) fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
