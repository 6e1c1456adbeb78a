//! Storage error types for the search execution seam.

use thiserror::Error;

/// Errors surfaced by the execution delegate and the store catalog.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to reach the storage backend.
    #[error("Connection error: {message}")]
    ConnectionError {
        /// Description of the connection error.
        message: String,
    },

    /// The store rejected or failed the query.
    #[error("Query failed: {message}")]
    QueryFailed {
        /// Description of the query failure.
        message: String,
    },

    /// The query was cancelled before completion.
    #[error("Query cancelled")]
    Cancelled,

    /// An internal storage error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StorageError {
    /// Creates a new `ConnectionError`.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::ConnectionError {
            message: message.into(),
        }
    }

    /// Creates a new `QueryFailed` error.
    #[must_use]
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the condition is transient and worth retrying at a higher layer.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionError { .. } | Self::Cancelled)
    }
}
