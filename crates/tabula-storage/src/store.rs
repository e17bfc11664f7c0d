//! Async session store seam.
//!
//! The orchestrator only sees [`SessionStore`]. [`SqliteSessionStore`] runs the
//! blocking repository calls on tokio's blocking pool.

use std::sync::Arc;

use async_trait::async_trait;

use tabula_core::error::TabulaError;
use tabula_core::types::{DatasetRef, Session, SessionId, SessionSummary, Turn};

use crate::db::Database;
use crate::repository::SessionRepository;

/// Durable per-session memory.
///
/// Each call is atomic: it either completes entirely or leaves the stored
/// session unchanged.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a brand-new session.
    async fn create(&self, session: &Session) -> Result<(), TabulaError>;

    /// Full snapshot, or `None` when the id is unknown.
    async fn read(&self, id: SessionId) -> Result<Option<Session>, TabulaError>;

    /// Append a turn and set the active role to `turn.role` in one write.
    async fn append(&self, id: SessionId, turn: &Turn) -> Result<(), TabulaError>;

    /// Replace the session's dataset reference.
    async fn set_dataset(&self, id: SessionId, dataset: &DatasetRef) -> Result<(), TabulaError>;

    /// Remove a session. Returns whether it existed.
    async fn evict(&self, id: SessionId) -> Result<bool, TabulaError>;

    async fn list(&self) -> Result<Vec<SessionSummary>, TabulaError>;
}

/// SQLite implementation of [`SessionStore`].
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    repo: SessionRepository,
}

impl SqliteSessionStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            repo: SessionRepository::new(db),
        }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, TabulaError>
    where
        F: FnOnce(SessionRepository) -> Result<T, TabulaError> + Send + 'static,
        T: Send + 'static,
    {
        let repo = self.repo.clone();
        tokio::task::spawn_blocking(move || f(repo))
            .await
            .map_err(|e| TabulaError::Storage(format!("Storage task panicked: {}", e)))?
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create(&self, session: &Session) -> Result<(), TabulaError> {
        let session = session.clone();
        self.blocking(move |repo| repo.create(&session)).await
    }

    async fn read(&self, id: SessionId) -> Result<Option<Session>, TabulaError> {
        self.blocking(move |repo| repo.find(id)).await
    }

    async fn append(&self, id: SessionId, turn: &Turn) -> Result<(), TabulaError> {
        let turn = turn.clone();
        self.blocking(move |repo| repo.append_turn(id, &turn)).await
    }

    async fn set_dataset(&self, id: SessionId, dataset: &DatasetRef) -> Result<(), TabulaError> {
        let dataset = dataset.clone();
        self.blocking(move |repo| repo.set_dataset(id, &dataset))
            .await
    }

    async fn evict(&self, id: SessionId) -> Result<bool, TabulaError> {
        self.blocking(move |repo| repo.delete(id)).await
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, TabulaError> {
        self.blocking(|repo| repo.list()).await
    }
}
