// src/blocking.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Synchronous façade over `BucketStorage` for non-async callers.
//!
//! Every method hops onto the global runtime and blocks the calling thread.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use std::sync::Arc;

use crate::backend::{ObjectInfo, ObjectMetadata};
use crate::config::StorageConfig;
use crate::error::Result;
use crate::registry::ClientRegistry;
use crate::runtime::run_on_global_rt;
use crate::storage::BucketStorage;

#[derive(Debug, Clone)]
pub struct BlockingStorage {
    inner: Arc<BucketStorage>,
}

impl BlockingStorage {
    pub fn connect(config: StorageConfig, registry: Arc<ClientRegistry>) -> Result<Self> {
        let storage = run_on_global_rt(async move { BucketStorage::connect(&config, &registry).await })?;
        Ok(Self::from_async(Arc::new(storage)))
    }

    pub fn from_async(inner: Arc<BucketStorage>) -> Self {
        Self { inner }
    }

    /// The async adapter underneath, sharing the same cache.
    pub fn as_async(&self) -> &Arc<BucketStorage> {
        &self.inner
    }

    fn run<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<BucketStorage>) -> Fut,
        Fut: std::future::Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        run_on_global_rt(f(Arc::clone(&self.inner)))
    }

    pub fn stat(&self, name: &str) -> Result<ObjectMetadata> {
        let name = name.to_string();
        self.run(|s| async move { s.stat(&name).await })
    }

    pub fn exists(&self, name: &str) -> bool {
        let name = name.to_string();
        self.run(|s| async move { Ok(s.exists(&name).await) }).unwrap_or(false)
    }

    pub fn try_exists(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.run(|s| async move { s.try_exists(&name).await })
    }

    pub fn size(&self, name: &str) -> Result<u64> {
        let name = name.to_string();
        self.run(|s| async move { s.size(&name).await })
    }

    pub fn accessed_time(&self, name: &str) -> Result<DateTime<Utc>> {
        let name = name.to_string();
        self.run(|s| async move { s.accessed_time(&name).await })
    }

    pub fn created_time(&self, name: &str) -> Result<DateTime<Utc>> {
        let name = name.to_string();
        self.run(|s| async move { s.created_time(&name).await })
    }

    pub fn modified_time(&self, name: &str) -> Result<DateTime<Utc>> {
        let name = name.to_string();
        self.run(|s| async move { s.modified_time(&name).await })
    }

    /// Whole object body. The connection is released before returning.
    pub fn read(&self, name: &str) -> Result<Bytes> {
        let name = name.to_string();
        self.run(|s| async move { s.open(&name).await?.read_all().await })
    }

    pub fn save(&self, name: &str, content: impl Into<Bytes>) -> Result<String> {
        let name = name.to_string();
        let content = content.into();
        self.run(|s| async move { s.save(&name, content).await })
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.run(|s| async move { s.delete(&name).await })
    }

    pub fn url(&self, name: &str) -> Result<String> {
        let name = name.to_string();
        self.run(|s| async move { s.url(&name).await })
    }

    /// Full listing of `path`, collected.
    pub fn listdir(&self, path: &str) -> Result<Vec<ObjectInfo>> {
        let path = path.to_string();
        self.run(|s| async move { s.listdir(&path).try_collect().await })
    }

    pub fn get_available_name(&self, name: &str, max_length: Option<usize>) -> Result<String> {
        let name = name.to_string();
        self.run(move |s| async move { s.get_available_name(&name, max_length).await })
    }
}
