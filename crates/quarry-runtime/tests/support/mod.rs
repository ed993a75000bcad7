//! In-memory driver that answers catalog queries from a scripted catalog and
//! everything else from a test-supplied handler, journaling what it runs.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use quarry_compiler::Statement;
use quarry_core::{QuarryError, Result};
use quarry_runtime::introspect::{COLUMNS_SQL, FUNCTIONS_SQL, PRIMARY_KEYS_SQL, RELATIONS_SQL};
use quarry_runtime::{Driver, DriverTransaction, Row, RowStream};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

/// Catalog rows shaped like the introspection queries' results.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    relations: Vec<Row>,
    columns: Vec<Row>,
    keys: Vec<Row>,
    functions: Vec<Row>,
}

impl Catalog {
    /// users, orders, docs (searchable), a reporting view and an `add` function.
    pub fn standard() -> Self {
        Catalog::default()
            .table(
                "public",
                "users",
                &[("id", "int4"), ("name", "text"), ("age", "int4"), ("status", "text")],
                &["id"],
            )
            .table(
                "public",
                "orders",
                &[("id", "int4"), ("user_id", "int4"), ("total", "numeric")],
                &["id"],
            )
            .table(
                "public",
                "docs",
                &[("id", "int4"), ("body", "jsonb"), ("search", "tsvector")],
                &["id"],
            )
            .view("reporting", "summary", &[("status", "text"), ("total", "int8")])
            .function("public", "add", &["integer", "integer"], "integer")
    }

    pub fn table(mut self, schema: &str, name: &str, columns: &[(&str, &str)], pk: &[&str]) -> Self {
        self.relation(schema, name, "r", true, columns);
        for key in pk {
            self.keys.push(row(json!({"schema": schema, "relation": name, "name": key})));
        }
        self
    }

    pub fn view(mut self, schema: &str, name: &str, columns: &[(&str, &str)]) -> Self {
        self.relation(schema, name, "v", false, columns);
        self
    }

    pub fn function(mut self, schema: &str, name: &str, args: &[&str], returns: &str) -> Self {
        self.functions.push(row(json!({
            "schema": schema,
            "name": name,
            "arg_types": args,
            "return_type": returns,
            "returns_set": false,
            "variadic": false,
        })));
        self
    }

    fn relation(&mut self, schema: &str, name: &str, kind: &str, insertable: bool, columns: &[(&str, &str)]) {
        self.relations.push(row(json!({
            "schema": schema,
            "name": name,
            "kind": kind,
            "insertable": insertable,
        })));
        for (column, udt) in columns {
            self.columns.push(row(json!({
                "schema": schema,
                "relation": name,
                "name": column,
                "udt_name": udt,
                "udt_schema": "pg_catalog",
                "nullable": *column != "id",
                "has_default": *column == "id",
            })));
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Execute { sql: String, in_transaction: bool },
    Begin,
    Commit,
    Rollback,
}

type Handler = Arc<dyn Fn(&Statement) -> Result<Vec<Row>> + Send + Sync>;

struct State {
    catalog: Catalog,
    failing_step: Option<&'static str>,
    introspection_delay: Option<Duration>,
    journal: Vec<Event>,
}

#[derive(Clone)]
pub struct ScriptedDriver {
    state: Arc<Mutex<State>>,
    handler: Handler,
    delay: Option<Duration>,
}

impl ScriptedDriver {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                catalog,
                failing_step: None,
                introspection_delay: None,
                journal: Vec::new(),
            })),
            handler: Arc::new(|_| Ok(Vec::new())),
            delay: None,
        }
    }

    pub fn with_handler(mut self, handler: impl Fn(&Statement) -> Result<Vec<Row>> + Send + Sync + 'static) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Delay every non-catalog statement.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_catalog(&self, catalog: Catalog) {
        self.state.lock().unwrap().catalog = catalog;
    }

    /// Make the catalog query for `step` fail until cleared.
    pub fn fail_step(&self, step: Option<&'static str>) {
        self.state.lock().unwrap().failing_step = step;
    }

    pub fn slow_introspection(&self, delay: Duration) {
        self.state.lock().unwrap().introspection_delay = Some(delay);
    }

    pub fn journal(&self) -> Vec<Event> {
        self.state.lock().unwrap().journal.clone()
    }

    /// SQL of every non-catalog statement, in order.
    pub fn statements(&self) -> Vec<String> {
        self.journal()
            .into_iter()
            .filter_map(|e| match e {
                Event::Execute { sql, .. } => Some(sql),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: Event) {
        self.state.lock().unwrap().journal.push(event);
    }

    fn catalog_rows(&self, sql: &str) -> Option<Result<Vec<Row>>> {
        let step = match sql {
            s if s == RELATIONS_SQL => "relations",
            s if s == COLUMNS_SQL => "columns",
            s if s == PRIMARY_KEYS_SQL => "primary_keys",
            s if s == FUNCTIONS_SQL => "functions",
            _ => return None,
        };
        let state = self.state.lock().unwrap();
        if state.failing_step == Some(step) {
            return Some(Err(QuarryError::Connection("connection reset by peer".into())));
        }
        let rows = match step {
            "relations" => &state.catalog.relations,
            "columns" => &state.catalog.columns,
            "primary_keys" => &state.catalog.keys,
            _ => &state.catalog.functions,
        };
        Some(Ok(rows.clone()))
    }

    async fn run(&self, statement: &Statement, in_transaction: bool) -> Result<Vec<Row>> {
        if let Some(rows) = self.catalog_rows(&statement.sql) {
            let delay = self.state.lock().unwrap().introspection_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            return rows;
        }
        self.record(Event::Execute {
            sql: statement.sql.clone(),
            in_transaction,
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.handler)(statement)
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn execute(&self, statement: &Statement) -> Result<Vec<Row>> {
        self.run(statement, false).await
    }

    fn stream(&self, statement: Statement) -> RowStream<'_> {
        futures::stream::once(async move { self.run(&statement, false).await })
            .flat_map(|result| match result {
                Ok(rows) => futures::stream::iter(rows.into_iter().map(Ok).collect::<Vec<_>>()),
                Err(err) => futures::stream::iter(vec![Err(err)]),
            })
            .boxed()
    }

    async fn begin(&self) -> Result<Box<dyn DriverTransaction>> {
        self.record(Event::Begin);
        Ok(Box::new(ScriptedTransaction {
            driver: self.clone(),
        }))
    }
}

pub struct ScriptedTransaction {
    driver: ScriptedDriver,
}

#[async_trait]
impl DriverTransaction for ScriptedTransaction {
    async fn execute(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        self.driver.run(statement, true).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.driver.record(Event::Commit);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.driver.record(Event::Rollback);
        Ok(())
    }
}
