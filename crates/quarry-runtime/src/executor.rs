//! Entity-level operations.
//!
//! An [`EntityHandle`] pairs one entity with the registry snapshot it was
//! looked up in and a place to run statements: the pool, or an open
//! transaction. Every operation compiles first and only then touches the
//! driver, so invalid criteria never reach the database.

use crate::driver::{Driver, DriverTransaction, Row, RowStream};
use crate::registry::Registry;
use quarry_compiler::{CriteriaCompiler, Statement};
use quarry_core::{ConnectionConfig, Criteria, EntityDescriptor, QuarryError, QueryOptions, Result, TextSearch};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Execution settings shared by every statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Settings {
    /// Abandon a driver call after this long and report [`QuarryError::Cancelled`].
    pub statement_timeout: Option<Duration>,
}

impl Settings {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            statement_timeout: config.statement_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Bound a driver call by the statement timeout, if one is set.
    ///
    /// Dropping the driver future on timeout abandons the in-flight query.
    pub(crate) async fn limit<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        match self.statement_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                QuarryError::Cancelled(format!("statement exceeded {}ms", limit.as_millis()))
            })?,
            None => call.await,
        }
    }
}

/// Where statements run.
pub(crate) enum Target<'a> {
    Pool(&'a dyn Driver),
    Transaction(&'a mut dyn DriverTransaction),
}

/// Run one statement on the pool.
pub(crate) async fn run_on_pool(driver: &dyn Driver, settings: Settings, statement: &Statement) -> Result<Vec<Row>> {
    tracing::debug!(sql = %statement.sql, params = statement.params.len(), "Executing statement");
    settings.limit(driver.execute(statement)).await
}

/// Run one statement inside a transaction.
pub(crate) async fn run_in(
    tx: &mut dyn DriverTransaction,
    settings: Settings,
    statement: &Statement,
) -> Result<Vec<Row>> {
    tracing::debug!(sql = %statement.sql, params = statement.params.len(), "Executing statement in transaction");
    settings.limit(tx.execute(statement)).await
}

/// Commit on success, roll back on failure. The original error wins over a
/// failed rollback.
pub(crate) async fn finish<T>(tx: Box<dyn DriverTransaction>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(error = %rollback, "Rollback failed");
            }
            Err(err)
        }
    }
}

/// Operations on one entity.
pub struct EntityHandle<'a> {
    entity: Arc<EntityDescriptor>,
    registry: Arc<Registry>,
    settings: Settings,
    target: Target<'a>,
}

impl<'a> EntityHandle<'a> {
    pub(crate) fn new(
        entity: Arc<EntityDescriptor>,
        registry: Arc<Registry>,
        settings: Settings,
        target: Target<'a>,
    ) -> Self {
        Self {
            entity,
            registry,
            settings,
            target,
        }
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.entity
    }

    fn compiler(&self) -> CriteriaCompiler<'_> {
        CriteriaCompiler::new(self.registry.as_ref())
    }

    async fn run(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        match &mut self.target {
            Target::Pool(driver) => run_on_pool(*driver, self.settings, statement).await,
            Target::Transaction(tx) => run_in(&mut **tx, self.settings, statement).await,
        }
    }

    /// Run `update` (when given) and fall back to `insert` if it touched
    /// nothing, atomically.
    async fn upsert(&mut self, update: Option<Statement>, insert: Statement) -> Result<Row> {
        let settings = self.settings;
        match &mut self.target {
            Target::Transaction(tx) => upsert_in(&mut **tx, settings, update.as_ref(), &insert).await,
            Target::Pool(driver) => {
                let mut tx = driver.begin().await?;
                let result = upsert_in(tx.as_mut(), settings, update.as_ref(), &insert).await;
                finish(tx, result).await
            }
        }
    }

    fn unsupported(&self, operation: &str) -> QuarryError {
        QuarryError::unsupported(self.entity.qualified_name(), operation)
    }

    fn require_relation(&self, operation: &str) -> Result<()> {
        if self.entity.is_relation() {
            Ok(())
        } else {
            Err(self.unsupported(operation))
        }
    }

    fn require_writable(&self, operation: &str) -> Result<()> {
        if self.entity.is_relation() && self.entity.insertable {
            Ok(())
        } else {
            Err(self.unsupported(operation))
        }
    }

    fn require_document(&self, operation: &str) -> Result<()> {
        if self.entity.is_document() {
            Ok(())
        } else {
            Err(self.unsupported(operation))
        }
    }

    // Relations

    pub fn build_find(&self, criteria: &Criteria, options: &QueryOptions) -> Result<Statement> {
        self.require_relation("find")?;
        self.compiler().select(&self.entity, criteria, options)
    }

    pub async fn find(&mut self, criteria: &Criteria, options: &QueryOptions) -> Result<Vec<Row>> {
        let statement = self.build_find(criteria, options)?;
        self.run(&statement).await
    }

    /// First matching row. Adds `LIMIT 1` unless the options page already.
    pub async fn find_one(&mut self, criteria: &Criteria, options: &QueryOptions) -> Result<Option<Row>> {
        let mut options = options.clone();
        if options.limit.is_none() && options.page_size.is_none() {
            options.limit = Some(1);
        }
        Ok(self.find(criteria, &options).await?.into_iter().next())
    }

    pub fn build_count(&self, criteria: &Criteria, options: &QueryOptions) -> Result<Statement> {
        self.require_relation("count")?;
        self.compiler().count(&self.entity, criteria, options)
    }

    pub async fn count(&mut self, criteria: &Criteria, options: &QueryOptions) -> Result<u64> {
        let statement = self.build_count(criteria, options)?;
        let rows = self.run(&statement).await?;
        read_count(&rows)
    }

    /// Stream matching rows from a pooled connection.
    ///
    /// Not available inside a transaction. The statement timeout does not
    /// apply; drop the stream to stop fetching.
    pub fn stream(&self, criteria: &Criteria, options: &QueryOptions) -> Result<RowStream<'a>> {
        let statement = self.build_find(criteria, options)?;
        match &self.target {
            Target::Pool(driver) => {
                let driver: &'a dyn Driver = *driver;
                tracing::debug!(sql = %statement.sql, params = statement.params.len(), "Streaming statement");
                Ok(driver.stream(statement))
            }
            Target::Transaction(_) => Err(self.unsupported("stream inside a transaction")),
        }
    }

    pub fn build_insert(&self, rows: &[Row]) -> Result<Statement> {
        self.require_writable("insert")?;
        self.compiler().insert(&self.entity, rows)
    }

    /// Insert rows with one statement, returning them as stored.
    pub async fn insert(&mut self, rows: &[Row]) -> Result<Vec<Row>> {
        let statement = self.build_insert(rows)?;
        self.run(&statement).await
    }

    pub async fn insert_one(&mut self, row: &Row) -> Result<Row> {
        self.insert(std::slice::from_ref(row))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| QuarryError::execution("insert returned no rows"))
    }

    pub fn build_update(&self, criteria: &Criteria, changes: &Row) -> Result<Statement> {
        self.require_writable("update")?;
        self.compiler().update(&self.entity, criteria, changes)
    }

    pub async fn update(&mut self, criteria: &Criteria, changes: &Row) -> Result<Vec<Row>> {
        let statement = self.build_update(criteria, changes)?;
        self.run(&statement).await
    }

    pub fn build_destroy(&self, criteria: &Criteria) -> Result<Statement> {
        self.require_writable("destroy")?;
        self.compiler().delete(&self.entity, criteria)
    }

    /// Delete matching rows, returning them.
    pub async fn destroy(&mut self, criteria: &Criteria) -> Result<Vec<Row>> {
        let statement = self.build_destroy(criteria)?;
        self.run(&statement).await
    }

    /// Update the row with this primary key, or insert it when there is none.
    pub async fn save(&mut self, row: &Row) -> Result<Row> {
        self.require_writable("save")?;
        if self.entity.primary_key.is_empty() {
            return Err(self.unsupported("save without a primary key"));
        }
        let (update, insert) = {
            let compiler = self.compiler();
            let update = match key_criteria(&self.entity, row) {
                Some(key) => Some(compiler.update(&self.entity, &key, row)?),
                None => None,
            };
            (update, compiler.insert(&self.entity, std::slice::from_ref(row))?)
        };
        self.upsert(update, insert).await
    }

    // Documents

    pub fn build_find_doc(&self, id: &Value) -> Result<Statement> {
        self.require_document("find_doc")?;
        self.compiler()
            .for_documents()
            .select(&self.entity, &Criteria::primary_key(id.clone()), &QueryOptions::new())
    }

    /// The document with this key.
    pub async fn find_doc(&mut self, id: &Value) -> Result<Option<Row>> {
        let statement = self.build_find_doc(id)?;
        let rows = self.run(&statement).await?;
        rows.into_iter().next().map(|row| self.document(row)).transpose()
    }

    pub fn build_search(&self, criteria: &Criteria, options: &QueryOptions) -> Result<Statement> {
        self.require_document("search")?;
        self.compiler().for_documents().select(&self.entity, criteria, options)
    }

    /// Documents matching criteria over body fields.
    pub async fn search(&mut self, criteria: &Criteria, options: &QueryOptions) -> Result<Vec<Row>> {
        let statement = self.build_search(criteria, options)?;
        let rows = self.run(&statement).await?;
        self.documents(rows)
    }

    pub fn build_search_doc(
        &self,
        search: &TextSearch,
        criteria: &Criteria,
        options: &QueryOptions,
    ) -> Result<Statement> {
        self.require_document("search_doc")?;
        self.compiler()
            .for_documents()
            .search_text(&self.entity, search, criteria, options)
    }

    /// Full-text search over body fields or the `search` column.
    pub async fn search_doc(
        &mut self,
        search: &TextSearch,
        criteria: &Criteria,
        options: &QueryOptions,
    ) -> Result<Vec<Row>> {
        let statement = self.build_search_doc(search, criteria, options)?;
        let rows = self.run(&statement).await?;
        self.documents(rows)
    }

    pub fn build_count_doc(&self, criteria: &Criteria) -> Result<Statement> {
        self.require_document("count_doc")?;
        self.compiler()
            .for_documents()
            .count(&self.entity, criteria, &QueryOptions::new())
    }

    pub async fn count_doc(&mut self, criteria: &Criteria) -> Result<u64> {
        let statement = self.build_count_doc(criteria)?;
        let rows = self.run(&statement).await?;
        read_count(&rows)
    }

    /// Store a document. A document carrying its key replaces the stored
    /// body (or is inserted under that key); one without a key is inserted.
    /// The key is not stored inside the body.
    pub async fn save_doc(&mut self, doc: &Value) -> Result<Row> {
        self.require_document("save_doc")?;
        let Value::Object(fields) = doc else {
            return Err(QuarryError::invalid_criteria("document bodies must be JSON objects"));
        };
        let key = self.document_key()?.to_string();
        let mut body = fields.clone();
        let id = body.remove(&key).filter(|id| !id.is_null());
        let body = Value::Object(body);

        let (update, insert) = {
            let compiler = self.compiler();
            let update = match &id {
                Some(id) => Some(compiler.replace_document(&self.entity, id, &body)?),
                None => None,
            };
            (update, compiler.insert_document(&self.entity, id.as_ref(), &body)?)
        };
        let row = self.upsert(update, insert).await?;
        self.document(row)
    }

    pub fn build_modify(&self, criteria: &Criteria, patch: &Value) -> Result<Statement> {
        self.require_document("modify")?;
        self.compiler().modify_document(&self.entity, criteria, patch)
    }

    /// Merge `patch` into the body of matching documents.
    pub async fn modify(&mut self, criteria: &Criteria, patch: &Value) -> Result<Vec<Row>> {
        let statement = self.build_modify(criteria, patch)?;
        let rows = self.run(&statement).await?;
        self.documents(rows)
    }

    fn document_key(&self) -> Result<&str> {
        self.entity
            .single_primary_key()
            .map(|c| c.name.as_str())
            .ok_or_else(|| self.unsupported("document access"))
    }

    /// The body object with the key injected under its column name.
    fn document(&self, mut row: Row) -> Result<Row> {
        let key = self.document_key()?;
        let id = row.remove(key).unwrap_or(Value::Null);
        let mut doc = match row.remove("body") {
            Some(Value::Object(body)) => body,
            Some(other) => {
                let mut wrapped = Row::new();
                wrapped.insert("body".to_string(), other);
                wrapped
            }
            None => Row::new(),
        };
        doc.insert(key.to_string(), id);
        Ok(doc)
    }

    fn documents(&self, rows: Vec<Row>) -> Result<Vec<Row>> {
        rows.into_iter().map(|row| self.document(row)).collect()
    }

    // Functions

    pub fn build_invoke(&self, args: &[Value]) -> Result<Statement> {
        if self.entity.is_relation() {
            return Err(self.unsupported("invoke"));
        }
        self.compiler().invoke(&self.entity, args)
    }

    /// Call the function. Set-returning functions yield one row per element.
    pub async fn invoke(&mut self, args: &[Value]) -> Result<Vec<Row>> {
        let statement = self.build_invoke(args)?;
        self.run(&statement).await
    }
}

async fn upsert_in(
    tx: &mut dyn DriverTransaction,
    settings: Settings,
    update: Option<&Statement>,
    insert: &Statement,
) -> Result<Row> {
    if let Some(update) = update
        && let Some(row) = run_in(tx, settings, update).await?.into_iter().next()
    {
        return Ok(row);
    }
    run_in(tx, settings, insert)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| QuarryError::execution("insert returned no rows"))
}

/// Equality on every primary key column, when the row carries them all.
fn key_criteria(entity: &EntityDescriptor, row: &Row) -> Option<Criteria> {
    let conditions = entity
        .primary_key
        .iter()
        .map(|column| match row.get(column) {
            Some(value) if !value.is_null() && !value.is_array() => {
                Some(Criteria::eq(column.clone(), value.clone()))
            }
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    Some(Criteria::and(conditions))
}

fn read_count(rows: &[Row]) -> Result<u64> {
    let value = rows
        .first()
        .and_then(|row| row.get("count"))
        .ok_or_else(|| QuarryError::execution("count returned no rows"))?;
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| QuarryError::execution(format!("unexpected count value {}", value)))
}
