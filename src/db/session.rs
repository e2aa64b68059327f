use crate::db::DbError;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::fmt::Display;
use std::ops::{Deref, DerefMut};
use uuid::Uuid;

/// A unit-of-work bound to one pooled connection.
///
/// Dereferences to the underlying connection, so queries run against it with
/// `.execute(&mut **session)`. Dropping a session without ending it rolls back
/// the open transaction and returns the connection to the pool.
pub struct Session {
    id: Uuid,
    tx: Transaction<'static, Postgres>,
}

impl Session {
    pub(crate) async fn begin(pool: &PgPool) -> Result<Self, DbError> {
        let tx = pool.begin().await.map_err(|e| {
            let err = DbError::from(e);
            tracing::error!(error = %err, "Failed to acquire database session");
            err
        })?;

        let id = Uuid::new_v4();
        tracing::debug!(session_id = %id, "Database session opened");

        Ok(Self { id, tx })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Deref for Session {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.tx
    }
}

impl DerefMut for Session {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.tx
    }
}

/// Transaction boundary of a session.
///
/// Both operations consume the unit-of-work; releasing it closes the session.
pub(crate) trait UnitOfWork: Send {
    fn id(&self) -> Uuid;

    fn commit(self) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    fn rollback(self) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
}

impl UnitOfWork for Session {
    fn id(&self) -> Uuid {
        self.id
    }

    fn commit(self) -> impl Future<Output = Result<(), sqlx::Error>> + Send {
        self.tx.commit()
    }

    fn rollback(self) -> impl Future<Output = Result<(), sqlx::Error>> + Send {
        self.tx.rollback()
    }
}

/// Which entry point a session came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scope {
    Standalone,
    Request,
}

impl Scope {
    fn as_str(self) -> &'static str {
        match self {
            Scope::Standalone => "standalone",
            Scope::Request => "request",
        }
    }
}

/// Finish a unit-of-work: commit on `Ok`, roll back and log on `Err`.
///
/// The session is released on every path. Only a failed commit produces an
/// error; a failed rollback is logged and the caller keeps its own error.
/// Request failures are already logged by `AppError`, so they only get a
/// debug line here.
pub(crate) async fn end<U, C>(session: U, outcome: Result<(), &C>, scope: Scope) -> Result<(), DbError>
where
    U: UnitOfWork,
    C: Display + ?Sized,
{
    let session_id = session.id();
    let scope_name = scope.as_str();

    match outcome {
        Ok(()) => {
            session.commit().await.map_err(|e| {
                tracing::error!(session_id = %session_id, scope = scope_name, error = %e, "Commit failed");
                DbError::Commit(e)
            })?;
            tracing::debug!(session_id = %session_id, scope = scope_name, "Database session committed");
        }
        Err(cause) => {
            match scope {
                Scope::Standalone => tracing::error!(
                    session_id = %session_id,
                    scope = scope_name,
                    error = %cause,
                    "Database error, rolling back"
                ),
                Scope::Request => tracing::debug!(
                    session_id = %session_id,
                    scope = scope_name,
                    status = %cause,
                    "Request failed, rolling back"
                ),
            }
            if let Err(e) = session.rollback().await {
                tracing::warn!(session_id = %session_id, scope = scope_name, error = %e, "Rollback failed");
            }
        }
    }

    Ok(())
}

/// End a standalone unit-of-work given what `work` returned.
///
/// `Ok` values come back after a successful commit; `Err` values come back
/// unchanged after the rollback.
pub(crate) async fn complete<U, T, E>(session: U, result: Result<T, E>) -> Result<T, E>
where
    U: UnitOfWork,
    E: From<DbError> + Display,
{
    match result {
        Ok(value) => {
            end::<_, E>(session, Ok(()), Scope::Standalone).await?;
            Ok(value)
        }
        Err(err) => {
            end(session, Err(&err), Scope::Standalone).await?;
            Err(err)
        }
    }
}
