use quarry_core::QuarryError;
use sqlx::postgres::PgDatabaseError;
use std::time::Duration;

/// Translate a sqlx error into the Quarry taxonomy.
pub(crate) fn map_error(err: sqlx::Error, acquire_timeout: Duration) -> QuarryError {
    match err {
        sqlx::Error::PoolTimedOut => QuarryError::PoolExhausted {
            timeout_ms: u64::try_from(acquire_timeout.as_millis()).unwrap_or(u64::MAX),
        },
        sqlx::Error::Database(db) => {
            let detail = db
                .try_downcast_ref::<PgDatabaseError>()
                .and_then(|pg| pg.detail())
                .map(str::to_string);
            QuarryError::Execution {
                message: db.message().to_string(),
                code: db.code().map(|c| c.into_owned()),
                detail,
            }
        }
        sqlx::Error::Io(e) => QuarryError::Connection(e.to_string()),
        sqlx::Error::Tls(e) => QuarryError::Connection(e.to_string()),
        sqlx::Error::PoolClosed => QuarryError::Connection("connection pool is closed".to_string()),
        sqlx::Error::Protocol(message) => QuarryError::Connection(message),
        sqlx::Error::Configuration(e) => QuarryError::Config(e.to_string()),
        other => QuarryError::execution(other.to_string()),
    }
}
