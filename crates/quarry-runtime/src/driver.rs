//! Driver abstraction.
//!
//! Quarry never speaks the wire protocol itself. A [`Driver`] runs complete
//! statements (SQL text plus positional parameters) on a pooled connection
//! and hands back rows as JSON objects keyed by column name.

use async_trait::async_trait;
use futures::stream::BoxStream;
use quarry_compiler::Statement;
use quarry_core::Result;
use serde_json::{Map, Value};

/// One result row, keyed by column name.
pub type Row = Map<String, Value>;

/// Lazily fetched rows. Dropping the stream releases the connection.
pub type RowStream<'a> = BoxStream<'a, Result<Row>>;

#[async_trait]
pub trait Driver: Send + Sync {
    /// Run a statement on a pooled connection and collect its rows.
    async fn execute(&self, statement: &Statement) -> Result<Vec<Row>>;

    /// Run a statement and yield rows as they arrive.
    fn stream(&self, statement: Statement) -> RowStream<'_>;

    /// Acquire a connection and open a transaction on it.
    async fn begin(&self) -> Result<Box<dyn DriverTransaction>>;
}

/// A transaction bound to one connection.
///
/// Dropping it without calling [`commit`](DriverTransaction::commit) rolls
/// it back.
#[async_trait]
pub trait DriverTransaction: Send {
    async fn execute(&mut self, statement: &Statement) -> Result<Vec<Row>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
