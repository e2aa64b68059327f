use crate::db::session::{self, Scope, Session, UnitOfWork};
use crate::db::{Database, DbError};
use crate::error::AppError;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{StatusCode, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

enum Slot {
    /// No handler has asked for a session yet
    Pending,
    Open(Session),
    Ended,
}

impl Slot {
    fn session_mut(&mut self) -> Option<&mut Session> {
        match self {
            Slot::Open(session) => Some(session),
            Slot::Pending | Slot::Ended => None,
        }
    }
}

/// Placed in request extensions by [`session_layer`].
#[derive(Clone)]
struct SessionSlot {
    db: Database,
    slot: Arc<Mutex<Slot>>,
}

/// Session shared between [`session_layer`] and the handler of one request.
///
/// Extracting it opens the session, so handlers that do not take it never
/// touch the pool. Every extraction within one request yields the same
/// session.
///
/// Must not outlive the handler: [`session_layer`] locks the session after
/// the handler returns to commit or roll back, and waits for any clone still
/// holding the lock (for example one moved into a spawned task).
#[derive(Clone)]
pub struct RequestSession {
    slot: Arc<Mutex<Slot>>,
}

impl RequestSession {
    /// Lock the session for running queries.
    ///
    /// # Errors
    /// Returns `DbError::SessionClosed` once the request's unit-of-work has
    /// ended.
    pub async fn lock(&self) -> Result<MappedMutexGuard<'_, Session>, DbError> {
        MutexGuard::try_map(self.slot.lock().await, Slot::session_mut)
            .map_err(|_| DbError::SessionClosed)
    }
}

impl<S> FromRequestParts<S> for RequestSession
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let pending = parts.extensions.get::<SessionSlot>().cloned().ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!(
                "RequestSession used on a route without session_layer"
            ))
        })?;

        {
            let mut slot = pending.slot.lock().await;
            if matches!(*slot, Slot::Pending) {
                *slot = Slot::Open(pending.db.begin().await?);
            }
        }

        Ok(Self { slot: pending.slot })
    }
}

/// Middleware giving each request its own session.
///
/// # Flow
/// 1. Make a session available to the handler; it is opened only when the
///    handler extracts [`RequestSession`] (503 if the pool is exhausted or
///    closed)
/// 2. Run the rest of the stack
/// 3. If a session was opened: commit on a success response, roll back on
///    status >= 400, then release the connection back to the pool
///
/// The handler's response is returned unchanged unless the commit fails,
/// in which case the client gets a 500.
///
/// # Examples
/// ```no_run
/// use axum::{Router, middleware, routing::post};
/// use sessionpool::db::{Database, session_layer};
///
/// # fn build(db: Database) -> Router {
/// # async fn create_job() {}
/// Router::new()
///     .route("/jobs", post(create_job))
///     .route_layer(middleware::from_fn_with_state(db, session_layer))
/// # }
/// ```
pub async fn session_layer(State(db): State<Database>, mut request: Request, next: Next) -> Response {
    let slot = Arc::new(Mutex::new(Slot::Pending));
    request.extensions_mut().insert(SessionSlot {
        db,
        slot: slot.clone(),
    });

    let response = next.run(request).await;

    let state = std::mem::replace(&mut *slot.lock().await, Slot::Ended);
    match state {
        Slot::Open(session) => finish(session, response).await,
        Slot::Pending | Slot::Ended => response,
    }
}

/// Responses that roll the request's session back.
fn is_failure(status: StatusCode) -> bool {
    status.is_client_error() || status.is_server_error()
}

async fn finish<U: UnitOfWork>(session: U, response: Response) -> Response {
    let status = response.status();
    let outcome = if is_failure(status) { Err(&status) } else { Ok(()) };

    match session::end(session, outcome, Scope::Request).await {
        Ok(()) => response,
        Err(err) => AppError::from(err).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::session::fake::{Counters, FakeSession};

    fn response(status: StatusCode) -> Response {
        (status, "body").into_response()
    }

    #[test]
    fn test_failure_statuses() {
        assert!(!is_failure(StatusCode::OK));
        assert!(!is_failure(StatusCode::CREATED));
        assert!(!is_failure(StatusCode::NO_CONTENT));
        assert!(!is_failure(StatusCode::SEE_OTHER));
        assert!(!is_failure(StatusCode::NOT_MODIFIED));
        assert!(is_failure(StatusCode::BAD_REQUEST));
        assert!(is_failure(StatusCode::NOT_FOUND));
        assert!(is_failure(StatusCode::CONFLICT));
        assert!(is_failure(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_failure(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[tokio::test]
    async fn test_success_response_commits() {
        let counters = Arc::new(Counters::default());
        let session = FakeSession::new(counters.clone());

        let result = finish(session, response(StatusCode::CREATED)).await;

        assert_eq!(result.status(), StatusCode::CREATED);
        assert_eq!(counters.snapshot(), (1, 0, 1));
    }

    #[tokio::test]
    async fn test_redirect_commits() {
        let counters = Arc::new(Counters::default());
        let session = FakeSession::new(counters.clone());

        let result = finish(session, response(StatusCode::SEE_OTHER)).await;

        assert_eq!(result.status(), StatusCode::SEE_OTHER);
        assert_eq!(counters.snapshot(), (1, 0, 1));
    }

    #[tokio::test]
    async fn test_client_error_rolls_back_and_passes_through() {
        let counters = Arc::new(Counters::default());
        let session = FakeSession::new(counters.clone());

        let result = finish(session, response(StatusCode::UNPROCESSABLE_ENTITY)).await;

        assert_eq!(result.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = axum::body::to_bytes(result.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"body");
        assert_eq!(counters.snapshot(), (0, 1, 1));
    }

    #[tokio::test]
    async fn test_server_error_rolls_back() {
        let counters = Arc::new(Counters::default());
        let session = FakeSession::new(counters.clone());

        let result = finish(session, response(StatusCode::INTERNAL_SERVER_ERROR)).await;

        assert_eq!(result.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(counters.snapshot(), (0, 1, 1));
    }

    #[tokio::test]
    async fn test_commit_failure_becomes_500() {
        let counters = Arc::new(Counters::default());
        let mut session = FakeSession::new(counters.clone());
        session.fail_commit = true;

        let result = finish(session, response(StatusCode::OK)).await;

        assert_eq!(result.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(counters.snapshot(), (1, 0, 1));
    }
}
