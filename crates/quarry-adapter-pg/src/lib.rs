//! # quarry-adapter-pg
//!
//! PostgreSQL [`Driver`] for Quarry, built on a `sqlx` connection pool.

mod bind;
mod decode;
mod error;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use quarry_compiler::Statement;
use quarry_core::{ConnectionConfig, QuarryConfig, Result};
use quarry_runtime::{Database, Driver, DriverTransaction, Row, RowStream};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;

use bind::arguments;
use decode::decode_row;
use error::map_error;

/// Connect a pool from `config` and load the registry.
pub async fn connect(config: &QuarryConfig) -> Result<Database> {
    let driver = PostgresDriver::connect(&config.connection).await?;
    Database::open(config, Arc::new(driver)).await
}

pub struct PostgresDriver {
    pool: PgPool,
    acquire_timeout: Duration,
}

impl PostgresDriver {
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let url = config.connection_string()?;
        let acquire_timeout = Duration::from_secs(config.pool.acquire_timeout_seconds);
        let pool = PgPoolOptions::new()
            .max_connections(config.pool.max_connections)
            .min_connections(config.pool.min_connections)
            .acquire_timeout(acquire_timeout)
            .idle_timeout(Some(Duration::from_secs(config.pool.idle_timeout_seconds)))
            .connect(&url)
            .await
            .map_err(|e| map_error(e, acquire_timeout))?;
        tracing::info!(
            max_connections = config.pool.max_connections,
            "Connected to PostgreSQL"
        );
        Ok(Self::from_pool(pool, acquire_timeout))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, acquire_timeout: Duration) -> Self {
        Self {
            pool,
            acquire_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn fetch_rows(&self, statement: Statement) -> impl Stream<Item = Result<Row>> + Send + '_ {
        try_stream! {
            let args = arguments(&statement.params)?;
            let mut rows = sqlx::query_with(&statement.sql, args).fetch(&self.pool);
            while let Some(row) = rows.try_next().await.map_err(|e| map_error(e, self.acquire_timeout))? {
                yield decode_row(&row)?;
            }
        }
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    async fn execute(&self, statement: &Statement) -> Result<Vec<Row>> {
        let args = arguments(&statement.params)?;
        let rows = sqlx::query_with(&statement.sql, args)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_error(e, self.acquire_timeout))?;
        rows.iter().map(decode_row).collect()
    }

    fn stream(&self, statement: Statement) -> RowStream<'_> {
        Box::pin(self.fetch_rows(statement))
    }

    async fn begin(&self) -> Result<Box<dyn DriverTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_error(e, self.acquire_timeout))?;
        Ok(Box::new(PostgresTransaction {
            tx,
            acquire_timeout: self.acquire_timeout,
        }))
    }
}

struct PostgresTransaction {
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
    acquire_timeout: Duration,
}

#[async_trait]
impl DriverTransaction for PostgresTransaction {
    async fn execute(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        let args = arguments(&statement.params)?;
        let rows = sqlx::query_with(&statement.sql, args)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_error(e, self.acquire_timeout))?;
        rows.iter().map(decode_row).collect()
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let acquire_timeout = self.acquire_timeout;
        self.tx.commit().await.map_err(|e| map_error(e, acquire_timeout))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let acquire_timeout = self.acquire_timeout;
        self.tx.rollback().await.map_err(|e| map_error(e, acquire_timeout))
    }
}
