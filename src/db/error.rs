use thiserror::Error;

/// Failures surfaced by the session provider.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Timed out waiting for a pooled connection")]
    PoolExhausted,

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Connection failure: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("Query error: {0}")]
    Query(#[source] sqlx::Error),

    #[error("Commit failed: {0}")]
    Commit(#[source] sqlx::Error),

    #[error("Session already closed")]
    SessionClosed,

    #[error("Invalid database configuration: {0}")]
    Configuration(String),
}

impl DbError {
    /// True when the pool could not hand out a connection at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DbError::PoolExhausted | DbError::PoolClosed)
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => DbError::PoolClosed,
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::Configuration(_) => DbError::Connection(err),
            other => DbError::Query(other),
        }
    }
}
