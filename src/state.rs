use std::{
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex},
};

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::Key;
use diesel::{
    SqliteConnection,
    connection::TransactionManager,
    r2d2::{ConnectionManager, Pool, PooledConnection},
};

use crate::{storage::ObjectStore, util_resp::FailureResponse};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

type PooledConn = PooledConnection<ConnectionManager<SqliteConnection>>;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub pool: DbPool,
    pub key: Key,
    pub storage: ObjectStore,
}

/// Slot through which the request's connection (if one was checked out) is
/// handed back to [`tx_commit`] once the handler has run.
#[derive(Clone, Default)]
struct TxSlot(Arc<Mutex<Option<ThreadSafeConn>>>);

/// Commits the transaction opened for this request if the response was
/// successful, and rolls it back otherwise.
pub async fn tx_commit(mut req: Request, next: Next) -> Response {
    let slot = TxSlot::default();
    req.extensions_mut().insert(slot.clone());

    let res = next.run(req).await;

    let conn = match slot.0.lock() {
        Ok(mut guard) => guard.take(),
        Err(_) => None,
    };

    if let Some(conn) = conn {
        let mut conn = conn.inner.lock().await;

        let ok = res.status().is_success()
            || res.status().is_redirection()
            || res.status().is_informational();

        let outcome = if ok {
            <PooledConn as diesel::Connection>::TransactionManager::commit_transaction(&mut *conn)
        } else {
            <PooledConn as diesel::Connection>::TransactionManager::rollback_transaction(&mut *conn)
        };

        if let Err(e) = outcome {
            return FailureResponse::ServerError(format!(
                "failed to finish transaction: {e}"
            ))
            .into_response();
        }
    }

    res
}

#[derive(Clone)]
pub struct ThreadSafeConn {
    pub inner: Arc<tokio::sync::Mutex<PooledConn>>,
}

#[async_trait]
impl<S> FromRequestParts<S> for ThreadSafeConn
where
    S: Send + Sync,
    DbPool: FromRef<S>,
{
    type Rejection = FailureResponse;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let slot = parts.extensions.get::<TxSlot>().cloned().ok_or_else(|| {
            FailureResponse::ServerError(
                "transaction middleware is not installed".to_string(),
            )
        })?;

        let existing = slot
            .0
            .lock()
            .map_err(|_| {
                FailureResponse::ServerError("poisoned tx slot".to_string())
            })?
            .clone();
        if let Some(existing) = existing {
            return Ok(existing);
        }

        let pool = DbPool::from_ref(state);
        let mut conn = tokio::task::spawn_blocking(move || pool.get())
            .await
            .map_err(|e| {
                FailureResponse::ServerError(format!(
                    "connection task failed: {e}"
                ))
            })??;

        <PooledConn as diesel::Connection>::TransactionManager::begin_transaction(&mut conn)?;

        let conn = ThreadSafeConn {
            inner: Arc::new(tokio::sync::Mutex::new(conn)),
        };

        *slot.0.lock().map_err(|_| {
            FailureResponse::ServerError("poisoned tx slot".to_string())
        })? = Some(conn.clone());

        Ok(conn)
    }
}

/// A locked, transactional connection for the lifetime of a handler.
pub struct Conn {
    inner: tokio::sync::OwnedMutexGuard<PooledConn>,
}

impl Deref for Conn {
    type Target = PooledConn;

    fn deref(&self) -> &Self::Target {
        self.inner.deref()
    }
}

impl DerefMut for Conn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.deref_mut()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Conn
where
    S: Send + Sync,
    DbPool: FromRef<S>,
{
    type Rejection = FailureResponse;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let conn = ThreadSafeConn::from_request_parts(parts, state).await?;
        let inner = conn.inner.try_lock_owned().map_err(|_| {
            FailureResponse::ServerError(
                "request connection is already locked".to_string(),
            )
        })?;
        Ok(Conn { inner })
    }
}
