// src/error.rs
//
// Error taxonomy shared by the adapter, the registry and every backend.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = StorageError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Missing or malformed configuration. Fatal at construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The object does not exist in the bucket.
    #[error("object not found: {0}")]
    NotFound(String),

    /// Anything the object store reported: network, auth, permissions.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StorageError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        StorageError::Configuration(msg.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        StorageError::NotFound(key.into())
    }

    pub fn backend(msg: impl std::fmt::Display) -> Self {
        StorageError::Backend(anyhow::anyhow!("{msg}"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, StorageError::Configuration(_))
    }
}
