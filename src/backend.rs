// src/backend.rs
//
// Object-store client contract. The adapter only ever talks to a backend through
// these traits; the S3 and in-memory implementations live in their own modules.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;

use crate::error::Result;
use crate::registry::ConnectionParameters;

/// Metadata returned by a stat (HEAD) call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Object size in bytes
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub content_type: Option<String>,
    pub e_tag: Option<String>,
}

/// One entry of a non-recursive listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    /// `None` for directory-like common prefixes
    pub last_modified: Option<DateTime<Utc>>,
    /// True when `key` is a common prefix ending in `/`
    pub is_dir: bool,
}

/// Live byte stream of an object body. Dropping it returns the connection.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Lazy, forward-only listing. Each call to `list` starts a fresh query.
pub type ObjectInfoStream = Pin<Box<dyn Stream<Item = Result<ObjectInfo>> + Send>>;

/// Operations the adapter needs from an S3-compatible object store.
///
/// Implementations must report a missing object as `StorageError::NotFound`
/// from `stat` and `get`; every other failure is `StorageError::Backend`.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Upload `body` as the full content of `key`.
    async fn put(&self, bucket: &str, key: &str, body: Bytes, content_type: Option<&str>) -> Result<()>;

    /// Open a streaming read of `key`.
    async fn get(&self, bucket: &str, key: &str) -> Result<ObjectReader>;

    /// Remove `key`. Removing a missing key is not an error unless the store says so.
    async fn remove(&self, bucket: &str, key: &str) -> Result<()>;

    /// Stat a single object (HEAD-like).
    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectMetadata>;

    /// Immediate children of `prefix`, using `/` as delimiter.
    fn list(&self, bucket: &str, prefix: &str) -> ObjectInfoStream;

    /// Signed GET URL valid for `expires_in`.
    async fn presigned_get_url(&self, bucket: &str, key: &str, expires_in: Duration) -> Result<String>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    async fn make_bucket(&self, bucket: &str) -> Result<()>;

    /// Apply a JSON policy document to `bucket`.
    async fn set_bucket_policy(&self, bucket: &str, policy: &str) -> Result<()>;
}

/// Builds backend clients for the registry.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(&self, params: &ConnectionParameters) -> Result<Arc<dyn ObjectBackend>>;
}
