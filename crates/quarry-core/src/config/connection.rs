//! Database connection configuration.
//!
//! The target database can be given three ways (in order of precedence):
//! 1. `database_url_env` - name of an environment variable holding the URL
//! 2. `database_url` - the URL itself
//! 3. `database` - a bare database name on `localhost:5432`

use crate::error::{QuarryError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Environment variable name containing the PostgreSQL connection URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url_env: Option<String>,

    /// Full PostgreSQL connection URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    /// Shorthand for a local database, also accepted as `db`.
    #[serde(default, alias = "db", skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Connection pool configuration.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Abandon any single statement after this many milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_timeout_ms: Option<u64>,
}

impl ConnectionConfig {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            database_url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Resolve the connection string.
    pub fn connection_string(&self) -> Result<String> {
        if let Some(var) = &self.database_url_env {
            match std::env::var(var) {
                Ok(url) if !url.trim().is_empty() => return Ok(url),
                _ => {
                    tracing::warn!(variable = %var, "Connection URL variable is not set, falling back");
                }
            }
        }
        if let Some(url) = &self.database_url
            && !url.trim().is_empty()
        {
            return Ok(url.clone());
        }
        if let Some(db) = &self.database
            && !db.trim().is_empty()
        {
            return Ok(format!("postgres://localhost:5432/{}", db.trim()));
        }
        Err(QuarryError::Config(
            "No connection information specified.".to_string(),
        ))
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Minimum number of connections to maintain.
    #[serde(default)]
    pub min_connections: u32,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Timeout in seconds when acquiring a connection.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,

    /// How long a connection can remain idle before being closed.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 0,
            max_connections: default_max_connections(),
            acquire_timeout_seconds: default_acquire_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}
