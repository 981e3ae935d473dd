//! Object storage error types

use thiserror::Error;

/// Errors from object storage backends (local filesystem, MinIO)
#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Invalid object key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("Storage type '{0}' is not configured")]
    NotConfigured(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}
