//! Error types for livesync

use thiserror::Error;

use crate::types::{MutationId, SourceId};

/// Main error type for livesync operations
///
/// Only configuration mistakes and misuse of the session API surface here.
/// Source failures never become a `LiveSyncError`; they are absorbed by the
/// poller's backoff and reported as [`SessionEvent`](crate::SessionEvent)s.
#[derive(Error, Debug)]
pub enum LiveSyncError {
    /// Two sources were registered under the same id
    #[error("Duplicate source id: {0}")]
    DuplicateSource(SourceId),

    /// A session was built without any source
    #[error("Session {0} has no sources")]
    NoSources(String),

    /// A source id that the session does not know about
    #[error("Source not found: {0}")]
    SourceNotFound(SourceId),

    /// Rollback or lookup of a mutation that is not pending
    #[error("Mutation not found: {0}")]
    MutationNotFound(MutationId),

    /// Invalid poller or session configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The session has not been started yet
    #[error("Session not started: {0}")]
    NotStarted(String),

    /// The session has been shut down
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using LiveSyncError
pub type LiveSyncResult<T> = Result<T, LiveSyncError>;

/// Failure reported by a source's fetch function.
///
/// The poller treats every `FetchError` the same way (backoff, no data), the
/// message only ends up in logs and health reports.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Fetch failed: {message}")]
pub struct FetchError {
    /// Human-readable cause
    pub message: String,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}
