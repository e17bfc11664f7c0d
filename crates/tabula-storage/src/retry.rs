//! Bounded retry around session store writes.
//!
//! Reads pass straight through. Writes get `write_retries` extra attempts,
//! each capped by `write_timeout_ms`, before surfacing
//! [`TabulaError::PersistenceWriteFailure`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use tabula_core::config::StorageConfig;
use tabula_core::error::TabulaError;
use tabula_core::types::{DatasetRef, Session, SessionId, SessionSummary, Turn};

use crate::store::SessionStore;

/// Wraps any [`SessionStore`] with the configured write retry policy.
#[derive(Debug)]
pub struct RetryingStore<S> {
    inner: S,
    retries: u32,
    delay: Duration,
    timeout: Duration,
}

impl<S: SessionStore> RetryingStore<S> {
    pub fn new(inner: S, config: &StorageConfig) -> Self {
        Self {
            inner,
            retries: config.write_retries,
            delay: Duration::from_millis(config.retry_delay_ms),
            timeout: Duration::from_millis(config.write_timeout_ms),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn with_retry<F, Fut, T>(&self, op: &str, mut attempt: F) -> Result<T, TabulaError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TabulaError>>,
    {
        let attempts = self.retries + 1;
        let mut last_err = String::new();

        for n in 1..=attempts {
            match tokio::time::timeout(self.timeout, attempt()).await {
                Ok(Ok(value)) => return Ok(value),
                // Not transient; retrying cannot help.
                Ok(Err(e @ (TabulaError::SessionNotFound(_) | TabulaError::TurnConflict { .. }))) => {
                    return Err(e)
                }
                Ok(Err(e)) => last_err = e.to_string(),
                Err(_) => last_err = format!("timed out after {}ms", self.timeout.as_millis()),
            }

            warn!(op = op, attempt = n, of = attempts, error = %last_err, "Session write failed");
            if n < attempts {
                tokio::time::sleep(self.delay).await;
            }
        }

        Err(TabulaError::PersistenceWriteFailure {
            attempts,
            reason: last_err,
        })
    }
}

#[async_trait]
impl<S: SessionStore> SessionStore for RetryingStore<S> {
    async fn create(&self, session: &Session) -> Result<(), TabulaError> {
        self.with_retry("create", || self.inner.create(session)).await
    }

    async fn read(&self, id: SessionId) -> Result<Option<Session>, TabulaError> {
        self.inner.read(id).await
    }

    async fn append(&self, id: SessionId, turn: &Turn) -> Result<(), TabulaError> {
        self.with_retry("append", || self.inner.append(id, turn)).await
    }

    async fn set_dataset(&self, id: SessionId, dataset: &DatasetRef) -> Result<(), TabulaError> {
        self.with_retry("set_dataset", || self.inner.set_dataset(id, dataset))
            .await
    }

    async fn evict(&self, id: SessionId) -> Result<bool, TabulaError> {
        self.inner.evict(id).await
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, TabulaError> {
        self.inner.list().await
    }
}
