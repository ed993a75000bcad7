//! Error types shared across Quarry crates.

use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, QuarryError>;

/// Errors surfaced by the data mapper.
#[derive(Debug, Clone, Error)]
pub enum QuarryError {
    /// Driver-level failure (connect, IO, protocol). Not retried internally.
    #[error("connection error: {0}")]
    Connection(String),

    /// A catalog query failed while building or reloading the registry.
    #[error("introspection failed during {step}: {reason}")]
    IntrospectionFailed { step: String, reason: String },

    /// Criteria or options do not fit the target entity. Nothing was executed.
    #[error("invalid criteria: {0}")]
    InvalidCriteria(String),

    /// The database rejected a statement.
    #[error("execution failed: {message}")]
    Execution {
        message: String,
        /// SQLSTATE reported by the server, if any.
        code: Option<String>,
        detail: Option<String>,
    },

    /// No pooled connection became available in time.
    #[error("connection pool exhausted after waiting {timeout_ms}ms")]
    PoolExhausted { timeout_ms: u64 },

    /// A loader name pattern is malformed.
    #[error("invalid schema filter: {0}")]
    SchemaFilter(String),

    /// No entity with this name is registered.
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    /// The entity kind does not support the requested operation.
    #[error("operation {operation} is not supported on {entity}")]
    UnsupportedOperation { entity: String, operation: String },

    /// Another reload is running and the caller asked not to wait.
    #[error("reload already in progress")]
    ReloadInProgress,

    /// The operation was abandoned before the driver finished.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Configuration could not be loaded or is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
}

impl QuarryError {
    pub fn invalid_criteria(message: impl Into<String>) -> Self {
        Self::InvalidCriteria(message.into())
    }

    pub fn introspection(step: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::IntrospectionFailed {
            step: step.into(),
            reason: reason.to_string(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            code: None,
            detail: None,
        }
    }

    pub fn unsupported(entity: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            entity: entity.into(),
            operation: operation.into(),
        }
    }

    /// Whether a caller-side retry policy may reasonably retry this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::PoolExhausted { .. } | Self::ReloadInProgress
        )
    }
}
