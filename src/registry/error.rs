//! Registry error types

use thiserror::Error;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Another session already publishes on this path
    #[error("stream already has a publisher: {0}")]
    AlreadyPublishing(String),

    /// No publisher on this path
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// The path is published by a different session
    #[error("publisher mismatch on {path}: expected session {expected}")]
    PublisherMismatch { path: String, expected: u64 },
}
