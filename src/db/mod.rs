pub mod error;
pub mod request;
pub mod schema;
pub mod session;

pub use error::DbError;
pub use request::{RequestSession, session_layer};
pub use schema::{Metadata, TableDefinition};
pub use session::Session;

use crate::config::DatabaseConfig;
use futures::future::BoxFuture;
use serde::Serialize;
use sqlx::{
    ConnectOptions, PgPool,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Process-wide connection pool and the sessions handed out from it.
///
/// Cloning is cheap; every clone shares the same pool. Build one at startup,
/// pass it around (or keep it in application state) and call
/// [`Database::shutdown`] once during teardown.
#[derive(Clone, Debug)]
pub struct Database {
    pool: PgPool,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub size: u32,
    pub idle: usize,
    pub checked_out: u32,
    pub closed: bool,
}

impl Database {
    /// Build the pool from configuration.
    ///
    /// Connections are opened on first use, not here. Must be called from
    /// within a Tokio runtime.
    ///
    /// # Errors
    /// Returns `DbError::Configuration` if the URL does not parse, the pool
    /// would allow no connections, or the acquire timeout is zero.
    pub fn connect(config: &DatabaseConfig) -> Result<Self, DbError> {
        let (pool_options, connect_options) = pool_options(config)?;

        tracing::info!(
            host = connect_options.get_host(),
            port = connect_options.get_port(),
            database = connect_options.get_database().unwrap_or_default(),
            pool_size = config.pool_size,
            max_overflow = config.max_overflow,
            pool_timeout_secs = config.pool_timeout.as_secs(),
            pre_ping = config.pre_ping,
            echo = config.echo,
            "Initializing database connection pool"
        );

        let pool = pool_options.connect_lazy_with(connect_options);

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn status(&self) -> PoolStatus {
        let size = self.pool.size();
        let idle = self.pool.num_idle();

        PoolStatus {
            size,
            idle,
            checked_out: size.saturating_sub(idle as u32),
            closed: self.pool.is_closed(),
        }
    }

    /// Acquire a session for use outside of a request.
    ///
    /// Most callers want [`Database::session`], which also ends it.
    pub async fn begin(&self) -> Result<Session, DbError> {
        Session::begin(&self.pool).await
    }

    /// Run `work` inside a session.
    ///
    /// # Flow
    /// 1. Acquire a pooled connection and begin a transaction
    /// 2. Run `work` with the live session
    /// 3. `Ok`: commit; `Err`: roll back and log
    /// 4. Release the connection back to the pool
    ///
    /// # Errors
    /// Returns the error produced by `work` unchanged. Acquisition and commit
    /// failures are converted with `E::from(DbError)`.
    ///
    /// # Examples
    /// ```no_run
    /// # async fn example(db: sessionpool::db::Database) -> Result<(), sessionpool::db::DbError> {
    /// let count: i64 = db
    ///     .session(|s| {
    ///         Box::pin(async move {
    ///             let (n,): (i64,) = sqlx::query_as("SELECT count(*) FROM jobs")
    ///                 .fetch_one(&mut **s)
    ///                 .await?;
    ///             Ok::<_, sessionpool::db::DbError>(n)
    ///         })
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn session<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T, E>>,
        E: From<DbError> + Display,
    {
        let mut session = self.begin().await?;
        let result = work(&mut session).await;

        session::complete(session, result).await
    }

    /// Run a trivial query through a standalone session.
    ///
    /// Never fails: any error is logged and reported as unhealthy.
    pub async fn check_health(&self) -> bool {
        let result = self
            .session(|s| {
                Box::pin(async move {
                    sqlx::query("SELECT 1").execute(&mut **s).await?;
                    Ok::<_, DbError>(())
                })
            })
            .await;

        match result {
            Ok(()) => {
                tracing::info!("Database health check: OK");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Database health check failed");
                false
            }
        }
    }

    /// Create every registered table that does not exist yet.
    ///
    /// Runs in one transaction on a pool connection. Safe to call repeatedly.
    pub async fn initialize_schema(&self, metadata: &Metadata) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        for table in metadata.tables() {
            tracing::debug!(table = table.name(), "Creating table if not exists");
            sqlx::query(&table.create_statement())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await.map_err(DbError::Commit)?;

        tracing::info!(tables = metadata.len(), "Database tables created successfully");
        Ok(())
    }

    /// Close the pool and every connection in it.
    ///
    /// Waits for checked-out connections to be returned. Later acquisitions
    /// fail with `DbError::PoolClosed`.
    pub async fn shutdown(&self) {
        self.pool.close().await;
        tracing::info!("Database connections closed");
    }
}

fn pool_options(config: &DatabaseConfig) -> Result<(PgPoolOptions, PgConnectOptions), DbError> {
    let max_connections = config.max_connections();
    if max_connections == 0 {
        return Err(DbError::Configuration(
            "pool_size + max_overflow must allow at least one connection".to_string(),
        ));
    }

    if config.pool_timeout.is_zero() {
        return Err(DbError::Configuration(
            "pool_timeout must be greater than zero".to_string(),
        ));
    }

    let connect_options = PgConnectOptions::from_str(&config.url)
        .map_err(|e| DbError::Configuration(format!("invalid database URL: {}", e)))?;

    let connect_options = if config.echo {
        connect_options.log_statements(log::LevelFilter::Info)
    } else {
        connect_options.disable_statement_logging()
    };

    let pool_options = PgPoolOptions::new()
        .min_connections(config.pool_size.min(max_connections))
        .max_connections(max_connections)
        .acquire_timeout(config.pool_timeout)
        .test_before_acquire(config.pre_ping)
        .max_lifetime(non_zero(config.pool_recycle))
        .idle_timeout(non_zero(config.overflow_idle_timeout));

    Ok((pool_options, connect_options))
}

/// Zero disables the limit.
fn non_zero(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}
