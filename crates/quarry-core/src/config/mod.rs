//! Configuration types for Quarry.
//!
//! A single YAML file (`quarry.yaml` by convention) carries the connection
//! target and the loader lists:
//!
//! ```yaml
//! connection:
//!   database_url_env: DATABASE_URL
//!   pool:
//!     max_connections: 10
//!     acquire_timeout_seconds: 5
//! loader:
//!   allowed_schemas: [public, reporting]
//!   blacklist: "reporting.*"
//!   exceptions: [reporting.summary]
//! ```

pub mod connection;
pub mod loader;

use crate::error::{QuarryError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub use connection::{ConnectionConfig, PoolConfig};
pub use loader::LoaderConfig;

/// Complete Quarry configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuarryConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub loader: LoaderConfig,
}

impl QuarryConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| QuarryError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| QuarryError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&content)
    }
}
