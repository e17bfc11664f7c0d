//! Tabula Storage crate - durable session memory.
//!
//! Provides a WAL-mode SQLite database with migrations, a repository for
//! sessions and their turn logs, the async [`SessionStore`] seam used by the
//! orchestrator, and a retrying wrapper for writes.

pub mod db;
pub mod migrations;
pub mod repository;
pub mod retry;
pub mod store;

pub use db::Database;
pub use repository::SessionRepository;
pub use retry::RetryingStore;
pub use store::{SessionStore, SqliteSessionStore};
