// src/lib.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Crate root: module declarations plus the public re-exports.

pub mod backend;
pub mod blocking;
pub mod config;
pub mod constants;
pub mod error;
pub mod memory_backend;
pub mod metadata_cache;
pub mod naming;
pub mod registry;
pub mod runtime;
pub mod s3_backend;
pub mod storage;
pub mod url;

pub use backend::{BackendConnector, ObjectBackend, ObjectInfo, ObjectInfoStream, ObjectMetadata, ObjectReader};
pub use blocking::BlockingStorage;
pub use config::StorageConfig;
pub use error::{Result, StorageError};
pub use memory_backend::{MemoryBackend, MemoryConnector};
pub use metadata_cache::{CacheStats, MetadataCache};
pub use registry::{ClientRegistry, ConnectionParameters, Shared};
pub use s3_backend::{S3Backend, S3Connector};
pub use storage::{BucketStorage, StorageFile};
pub use url::{UrlIssuer, UrlPolicy};
