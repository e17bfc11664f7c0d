use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the Tabula system.
///
/// Subsystem crates define their own error types and implement
/// `From<TabulaError>` so that `?` works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TabulaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Turn conflict in session {session}: expected index {expected}, got {got}")]
    TurnConflict { session: Uuid, expected: i64, got: i64 },

    #[error("Persistence write failed after {attempts} attempts: {reason}")]
    PersistenceWriteFailure { attempts: u32, reason: String },
}

impl From<toml::de::Error> for TabulaError {
    fn from(err: toml::de::Error) -> Self {
        TabulaError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for TabulaError {
    fn from(err: toml::ser::Error) -> Self {
        TabulaError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for TabulaError {
    fn from(err: serde_json::Error) -> Self {
        TabulaError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Tabula operations.
pub type Result<T> = std::result::Result<T, TabulaError>;
