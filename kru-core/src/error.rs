//! Error types for the session and persistence layers

use llm::LlmError;
use thiserror::Error;

use crate::storage::SnapshotId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Snapshot name must not be blank")]
    BlankName,

    #[error("Cannot save an empty conversation")]
    EmptyConversation,

    #[error("Saved conversation not found: {0}")]
    SnapshotNotFound(SnapshotId),

    #[error("Storage quota exceeded: {needed} bytes needed, {limit} allowed")]
    QuotaExceeded { needed: usize, limit: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Nothing to send: enter a message or attach a file")]
    EmptySubmission,

    #[error("A response is still streaming")]
    SubmissionInProgress,

    #[error("The submission was cancelled")]
    Cancelled,

    #[error(transparent)]
    Collaborator(#[from] LlmError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
