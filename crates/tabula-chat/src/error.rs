//! Error types for the conversational engine.

use tabula_core::error::TabulaError;
use tabula_core::types::{RoleName, ToolErrorKind};

/// Errors surfaced by the chat engine to its callers.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("chat is disabled")]
    Disabled,
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("session not found: {0}")]
    SessionNotFound(uuid::Uuid),
    #[error("unknown role: {0}")]
    UnknownRole(String),
    #[error("the assistant could not produce an answer ({0}); please try again")]
    UpstreamInferenceFailure(String),
    #[error("persistence write failed: {0}")]
    PersistenceWriteFailure(String),
    #[error("{0}")]
    Dataset(ToolErrorKind),
    #[error("storage error: {0}")]
    StorageError(String),
}

impl From<TabulaError> for ChatError {
    fn from(err: TabulaError) -> Self {
        match err {
            TabulaError::SessionNotFound(id) => ChatError::SessionNotFound(id),
            TabulaError::UnknownRole(name) => ChatError::UnknownRole(name),
            e @ TabulaError::PersistenceWriteFailure { .. } => {
                ChatError::PersistenceWriteFailure(e.to_string())
            }
            other => ChatError::StorageError(other.to_string()),
        }
    }
}

impl From<ToolErrorKind> for ChatError {
    fn from(kind: ToolErrorKind) -> Self {
        ChatError::Dataset(kind)
    }
}

/// Routing failures. Recovered inside the router and never shown raw.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("unknown role: {0}")]
    UnknownRole(String),
    #[error("{from} cannot hand off to {to}")]
    InvalidHandoffTarget { from: RoleName, to: RoleName },
    #[error("role {0} registered twice")]
    DuplicateRole(RoleName),
    #[error("invalid trigger for role {role}: {message}")]
    InvalidTrigger { role: RoleName, message: String },
}
