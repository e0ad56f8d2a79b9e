// src/storage.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! `BucketStorage`: a filesystem-like view of one bucket.
//!
//! Ties together the shared client from the registry, the per-adapter metadata
//! cache, collision-free naming and URL issuance.

use anyhow::Context;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, ReadBuf};
use tracing::{debug, info, trace};

use crate::backend::{ObjectBackend, ObjectInfoStream, ObjectMetadata, ObjectReader};
use crate::config::StorageConfig;
use crate::constants::DEFAULT_MAX_NAME_LENGTH;
use crate::error::{Result, StorageError};
use crate::metadata_cache::MetadataCache;
use crate::naming::{self, NameResolver};
use crate::registry::{ClientRegistry, ConnectionParameters};
use crate::url::{UrlIssuer, UrlPolicy};

/// An open object body.
///
/// Reads stream from the store. The underlying connection goes back to the
/// pool on `close` or when the file is dropped, whichever comes first.
pub struct StorageFile {
    name: String,
    reader: Option<ObjectReader>,
}

impl StorageFile {
    fn new(name: String, reader: ObjectReader) -> Self {
        Self {
            name,
            reader: Some(reader),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }

    /// Release the connection. Further reads return EOF.
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            trace!("Closed {}", self.name);
        }
    }

    /// Read the remainder of the object, then close.
    pub async fn read_all(mut self) -> Result<Bytes> {
        let mut buf = Vec::new();
        if let Err(e) = self.read_to_end(&mut buf).await {
            return Err(anyhow::Error::new(e).context(format!("reading {} failed", self.name)).into());
        }
        self.close();
        Ok(Bytes::from(buf))
    }
}

impl AsyncRead for StorageFile {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.reader.as_mut() {
            Some(reader) => reader.as_mut().poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl Drop for StorageFile {
    fn drop(&mut self) {
        if self.reader.is_some() {
            trace!("Releasing unclosed {}", self.name);
        }
    }
}

impl std::fmt::Debug for StorageFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageFile")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Storage adapter for a single bucket.
pub struct BucketStorage {
    params: ConnectionParameters,
    client: Arc<dyn ObjectBackend>,
    bucket: String,
    overwrite_files: bool,
    urls: UrlIssuer,
    names: NameResolver,
    cache: MetadataCache,
}

impl BucketStorage {
    /// Validate `config`, resolve the shared client, make sure the bucket exists
    /// and apply the configured bucket policy.
    pub async fn connect(config: &StorageConfig, registry: &ClientRegistry) -> Result<Self> {
        let params = config.connection_parameters()?;
        let bucket = config.bucket()?.to_string();
        let client = registry.get_or_create(&params).await?;

        if !client.bucket_exists(&bucket).await? {
            info!("Bucket {} does not exist, creating it", bucket);
            client.make_bucket(&bucket).await?;
        }

        if let Some(policy) = config.bucket_policy.as_ref().filter(|p| !is_empty_policy(p)) {
            let document = serde_json::to_string(policy).context("serializing bucket policy failed")?;
            client.set_bucket_policy(&bucket, &document).await?;
        }

        let urls = UrlIssuer::new(config.url_policy(), params.scheme(), params.endpoint.clone(), bucket.clone());
        Ok(Self {
            params,
            client,
            bucket,
            overwrite_files: config.overwrite_files,
            urls,
            names: NameResolver::new(config.name_seed, config.max_name_attempts),
            cache: MetadataCache::with_ttl(config.metadata_ttl),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn connection(&self) -> &ConnectionParameters {
        &self.params
    }

    pub fn client(&self) -> &Arc<dyn ObjectBackend> {
        &self.client
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn overwrite_files(&self) -> bool {
        self.overwrite_files
    }

    pub fn url_policy(&self) -> UrlPolicy {
        self.urls.policy()
    }

    // -------------------------------------------------------------------------
    // Read / stat
    // -------------------------------------------------------------------------

    /// Metadata for `name`, served from the cache when possible.
    pub async fn stat(&self, name: &str) -> Result<ObjectMetadata> {
        if let Some(metadata) = self.cache.get(name).await {
            return Ok(metadata);
        }
        let ticket = self.cache.ticket().await;
        let metadata = self.client.stat(&self.bucket, name).await?;
        self.cache.fill(name, metadata.clone(), ticket).await;
        Ok(metadata)
    }

    /// True if a stat of `name` succeeds.
    ///
    /// Any failure counts as "does not exist", including network and
    /// permission errors. Use `try_exists` to tell those apart.
    pub async fn exists(&self, name: &str) -> bool {
        match self.stat(name).await {
            Ok(_) => true,
            Err(StorageError::NotFound(_)) => false,
            Err(e) => {
                debug!("exists({}) treating error as absent: {:#}", name, e);
                false
            }
        }
    }

    /// Like `exists`, but only a missing object is `Ok(false)`.
    pub async fn try_exists(&self, name: &str) -> Result<bool> {
        match self.stat(name).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Size in bytes.
    pub async fn size(&self, name: &str) -> Result<u64> {
        Ok(self.stat(name).await?.size)
    }

    /// The store keeps no access time; this is the last-modified time.
    pub async fn accessed_time(&self, name: &str) -> Result<DateTime<Utc>> {
        self.modified_time(name).await
    }

    /// The store keeps no creation time; this is the last-modified time.
    pub async fn created_time(&self, name: &str) -> Result<DateTime<Utc>> {
        self.modified_time(name).await
    }

    pub async fn modified_time(&self, name: &str) -> Result<DateTime<Utc>> {
        Ok(self.stat(name).await?.last_modified)
    }

    /// Open `name` for streaming reads.
    pub async fn open(&self, name: &str) -> Result<StorageFile> {
        let reader = self.client.get(&self.bucket, name).await?;
        Ok(StorageFile::new(name.to_string(), reader))
    }

    /// Immediate children of `path`, used verbatim as the key prefix.
    ///
    /// Pass `"dir/"` to list inside a directory; `"dir"` also matches `dir.txt`.
    pub fn listdir(&self, path: &str) -> ObjectInfoStream {
        self.client.list(&self.bucket, path)
    }

    // -------------------------------------------------------------------------
    // Naming
    // -------------------------------------------------------------------------

    /// A name derived from `name` that is free in the bucket and no longer than
    /// `max_length` characters.
    ///
    /// Returns `name` itself when it is already free and short enough. Gives
    /// up with a backend error after the configured number of candidates.
    pub async fn get_available_name(&self, name: &str, max_length: Option<usize>) -> Result<String> {
        let mut candidate = name.to_string();
        let mut attempts = 0usize;

        while self.exists(&candidate).await || naming::exceeds(&candidate, max_length) {
            if let Some(limit) = self.names.max_attempts() {
                if attempts >= limit {
                    return Err(StorageError::backend(format!(
                        "no available name for {name} after {attempts} attempts"
                    )));
                }
            }
            attempts += 1;
            candidate = self.names.next_candidate(&candidate, max_length);
            trace!("Trying {} for {}", candidate, name);
        }

        if attempts > 0 {
            debug!("Resolved {} to {} after {} attempts", name, candidate, attempts);
        }
        Ok(candidate)
    }

    // -------------------------------------------------------------------------
    // Write / delete
    // -------------------------------------------------------------------------

    /// Store `content` under `name`, or under a fresh name when `name` is
    /// taken and overwriting is off. Returns the name actually written.
    pub async fn save(&self, name: &str, content: Bytes) -> Result<String> {
        let name = if self.exists(name).await && !self.overwrite_files {
            self.get_available_name(name, Some(DEFAULT_MAX_NAME_LENGTH)).await?
        } else {
            name.to_string()
        };

        let content_type = mime_guess::from_path(&name).first_raw();
        let size = content.len();
        self.client.put(&self.bucket, &name, content, content_type).await?;
        self.cache.invalidate(&name).await;

        debug!("Saved {} ({} bytes, {:?})", name, size, content_type);
        Ok(name)
    }

    /// `save` from a seekable source, read from its start.
    pub async fn save_reader<R>(&self, name: &str, mut reader: R) -> Result<String>
    where
        R: AsyncRead + AsyncSeek + Unpin,
    {
        reader
            .seek(SeekFrom::Start(0))
            .await
            .with_context(|| format!("rewinding source for {name} failed"))?;
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .with_context(|| format!("reading source for {name} failed"))?;
        self.save(name, Bytes::from(buf)).await
    }

    /// Remove `name`. The cache entry is dropped whether or not the remove succeeded.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let result = self.client.remove(&self.bucket, name).await;
        self.cache.invalidate(name).await;
        result
    }

    // -------------------------------------------------------------------------
    // URLs
    // -------------------------------------------------------------------------

    /// Presigned or public URL for `name`, depending on configuration.
    pub async fn url(&self, name: &str) -> Result<String> {
        self.urls.issue(self.client.as_ref(), name).await
    }
}

/// `null`, `{}`, `[]` and `""` carry no statements and are not sent.
fn is_empty_policy(policy: &serde_json::Value) -> bool {
    match policy {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        serde_json::Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

impl std::fmt::Debug for BucketStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketStorage")
            .field("endpoint", &self.params.endpoint)
            .field("bucket", &self.bucket)
            .field("overwrite_files", &self.overwrite_files)
            .field("urls", &self.urls.policy())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_backend::{MemoryBackend, MemoryConnector, Op};
    use futures::StreamExt;
    use std::io::Cursor;
    use std::time::Duration;

    async fn setup(tweak: impl FnOnce(&mut StorageConfig)) -> (BucketStorage, MemoryBackend) {
        let backend = MemoryBackend::new();
        let registry = ClientRegistry::new(MemoryConnector::with_backend(backend.clone()));
        let mut config = StorageConfig::new("test.minio.server", "access", "secret", "test-bucket");
        config.name_seed = Some(7);
        tweak(&mut config);
        let storage = BucketStorage::connect(&config, &registry).await.unwrap();
        backend.reset_calls();
        (storage, backend)
    }

    #[tokio::test]
    async fn test_connect_creates_missing_bucket() {
        let (storage, backend) = setup(|_| {}).await;
        assert!(backend.has_bucket("test-bucket"));
        assert_eq!(storage.bucket(), "test-bucket");
        assert!(storage.cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_connect_keeps_existing_bucket() {
        let backend = MemoryBackend::new();
        backend.create_bucket("test-bucket");
        backend.insert("test-bucket", "keep.txt", "kept");
        let registry = ClientRegistry::new(MemoryConnector::with_backend(backend.clone()));
        let config = StorageConfig::new("test.minio.server", "access", "secret", "test-bucket");

        BucketStorage::connect(&config, &registry).await.unwrap();
        assert_eq!(backend.calls().make_bucket, 0);
        assert!(backend.object("test-bucket", "keep.txt").is_some());
    }

    #[tokio::test]
    async fn test_connect_applies_policy() {
        let (_storage, backend) = setup(|c| {
            c.bucket_policy = Some(serde_json::json!({"Version": "2012-10-17", "Statement": []}));
        })
        .await;
        let applied: serde_json::Value = serde_json::from_str(&backend.bucket_policy("test-bucket").unwrap()).unwrap();
        assert_eq!(applied["Version"], "2012-10-17");
    }

    #[tokio::test]
    async fn test_connect_fails_on_policy_error() {
        let backend = MemoryBackend::new();
        backend.fail(Op::SetBucketPolicy, "access denied");
        let registry = ClientRegistry::new(MemoryConnector::with_backend(backend));
        let mut config = StorageConfig::new("test.minio.server", "access", "secret", "test-bucket");
        config.bucket_policy = Some(serde_json::json!({"Version": "2012-10-17", "Statement": []}));

        let err = BucketStorage::connect(&config, &registry).await.unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
    }

    #[tokio::test]
    async fn test_connect_skips_empty_policy() {
        for empty in [serde_json::json!({}), serde_json::json!(null), serde_json::json!([]), serde_json::json!("")] {
            let backend = MemoryBackend::new();
            // would fail the connect if anything were sent
            backend.fail(Op::SetBucketPolicy, "MalformedPolicy");
            let registry = ClientRegistry::new(MemoryConnector::with_backend(backend.clone()));
            let mut config = StorageConfig::new("test.minio.server", "access", "secret", "test-bucket");
            config.bucket_policy = Some(empty.clone());

            BucketStorage::connect(&config, &registry).await.unwrap();
            assert_eq!(backend.calls().set_bucket_policy, 0, "{empty}");
            assert!(backend.bucket_policy("test-bucket").is_none());
        }
    }

    #[tokio::test]
    async fn test_connect_requires_bucket() {
        let registry = ClientRegistry::new(MemoryConnector::new());
        let mut config = StorageConfig::new("test.minio.server", "access", "secret", "");
        config.bucket_name = None;
        let err = BucketStorage::connect(&config, &registry).await.unwrap_err();
        assert!(err.is_configuration());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_stat_is_cached() {
        let (storage, backend) = setup(|_| {}).await;
        backend.insert("test-bucket", "a.txt", "hello");

        assert_eq!(storage.size("a.txt").await.unwrap(), 5);
        assert!(storage.exists("a.txt").await);
        storage.modified_time("a.txt").await.unwrap();
        assert_eq!(backend.calls().stat, 1);
    }

    #[tokio::test]
    async fn test_time_queries_agree() {
        let (storage, backend) = setup(|_| {}).await;
        backend.insert("test-bucket", "a.txt", "hello");
        let modified = storage.modified_time("a.txt").await.unwrap();
        assert_eq!(storage.accessed_time("a.txt").await.unwrap(), modified);
        assert_eq!(storage.created_time("a.txt").await.unwrap(), modified);
    }

    #[tokio::test]
    async fn test_missing_objects_are_not_cached() {
        let (storage, backend) = setup(|_| {}).await;
        assert!(!storage.exists("ghost.txt").await);
        assert!(!storage.exists("ghost.txt").await);
        assert_eq!(backend.calls().stat, 2);
        assert!(storage.stat("ghost.txt").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_exists_collapses_errors_but_try_exists_does_not() {
        let (storage, backend) = setup(|_| {}).await;
        backend.insert("test-bucket", "a.txt", "hello");
        backend.fail(Op::Stat, "connection reset");

        assert!(!storage.exists("a.txt").await);
        assert!(matches!(storage.try_exists("a.txt").await, Err(StorageError::Backend(_))));

        backend.recover(Op::Stat);
        assert!(storage.try_exists("a.txt").await.unwrap());
        assert!(!storage.try_exists("b.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_save_invalidates_cache() {
        let (storage, backend) = setup(|c| c.overwrite_files = true).await;
        storage.save("a.txt", Bytes::from_static(b"one")).await.unwrap();
        assert_eq!(storage.size("a.txt").await.unwrap(), 3);

        storage.save("a.txt", Bytes::from_static(b"three")).await.unwrap();
        assert_eq!(storage.size("a.txt").await.unwrap(), 5);
        assert_eq!(backend.object("test-bucket", "a.txt").unwrap().data, Bytes::from_static(b"three"));
    }

    #[tokio::test]
    async fn test_save_sets_content_type() {
        let (storage, backend) = setup(|_| {}).await;
        storage.save("test_file.txt", Bytes::from_static(b"x")).await.unwrap();
        storage.save("blob.unknownext", Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(
            backend.object("test-bucket", "test_file.txt").unwrap().content_type.as_deref(),
            Some("text/plain")
        );
        assert_eq!(backend.object("test-bucket", "blob.unknownext").unwrap().content_type, None);
    }

    #[tokio::test]
    async fn test_save_without_overwrite_picks_new_name() {
        let (storage, backend) = setup(|_| {}).await;
        backend.insert("test-bucket", "report.txt", "original");

        let saved = storage.save("report.txt", Bytes::from_static(b"new")).await.unwrap();
        assert_ne!(saved, "report.txt");
        assert!(saved.starts_with("report_") && saved.ends_with(".txt"), "{saved}");
        assert_eq!(backend.object("test-bucket", "report.txt").unwrap().data, Bytes::from_static(b"original"));
        assert_eq!(backend.object("test-bucket", &saved).unwrap().data, Bytes::from_static(b"new"));
    }

    #[tokio::test]
    async fn test_save_reader_rewinds() {
        let (storage, backend) = setup(|_| {}).await;
        let mut source = Cursor::new(b"payload".to_vec());
        source.set_position(4);
        let name = storage.save_reader("p.bin", source).await.unwrap();
        assert_eq!(backend.object("test-bucket", &name).unwrap().data, Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn test_delete_invalidates_even_on_failure() {
        let (storage, backend) = setup(|_| {}).await;
        backend.insert("test-bucket", "a.txt", "hello");
        assert!(storage.exists("a.txt").await);

        backend.fail(Op::Remove, "denied");
        assert!(storage.delete("a.txt").await.is_err());
        assert!(storage.cache().get("a.txt").await.is_none());

        backend.recover(Op::Remove);
        storage.delete("a.txt").await.unwrap();
        assert!(!storage.exists("a.txt").await);
    }

    #[tokio::test]
    async fn test_open_and_read_all() {
        let (storage, backend) = setup(|_| {}).await;
        backend.insert("test-bucket", "a.txt", "hello world");

        let file = storage.open("a.txt").await.unwrap();
        assert_eq!(file.name(), "a.txt");
        assert_eq!(backend.open_readers(), 1);
        assert_eq!(file.read_all().await.unwrap(), Bytes::from_static(b"hello world"));
        assert_eq!(backend.open_readers(), 0);

        assert!(storage.open("missing.txt").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_close_releases_reader() {
        let (storage, backend) = setup(|_| {}).await;
        backend.insert("test-bucket", "a.txt", "hello");

        let mut file = storage.open("a.txt").await.unwrap();
        let mut head = [0u8; 2];
        file.read_exact(&mut head).await.unwrap();
        file.close();
        assert!(file.is_closed());
        assert_eq!(backend.open_readers(), 0);

        let mut rest = Vec::new();
        file.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        let dropped = storage.open("a.txt").await.unwrap();
        drop(dropped);
        assert_eq!(backend.open_readers(), 0);
    }

    #[tokio::test]
    async fn test_listdir_is_shallow() {
        let (storage, backend) = setup(|_| {}).await;
        backend.insert("test-bucket", "docs/b.txt", "b");
        backend.insert("test-bucket", "docs/a.txt", "a");
        backend.insert("test-bucket", "docs/img/c.png", "c");
        backend.insert("test-bucket", "top.txt", "t");

        let keys: Vec<String> = storage
            .listdir("docs/")
            .map(|r| r.map(|info| info.key))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(keys, vec!["docs/a.txt", "docs/b.txt", "docs/img/"]);
    }

    #[tokio::test]
    async fn test_available_name_unchanged_when_free() {
        let (storage, backend) = setup(|_| {}).await;
        assert_eq!(storage.get_available_name("free.txt", Some(100)).await.unwrap(), "free.txt");
        assert_eq!(backend.calls().stat, 1);
    }

    #[tokio::test]
    async fn test_available_name_gives_up() {
        let (storage, backend) = setup(|c| c.max_name_attempts = Some(5)).await;
        backend.set_phantom_objects(true);

        let err = storage.get_available_name("taken.txt", None).await.unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
        assert!(err.to_string().contains("after 5 attempts"));
        assert_eq!(backend.calls().stat, 6);
    }

    #[tokio::test]
    async fn test_url_modes() {
        let (storage, _) = setup(|c| {
            c.secure = false;
            c.presigned_url = false;
        })
        .await;
        assert_eq!(
            storage.url("test.txt").await.unwrap(),
            "http://test.minio.server/test-bucket/test.txt"
        );

        let (storage, backend) = setup(|c| c.presigned_expiration = Duration::from_secs(600)).await;
        backend.set_presigned_url("https://signed/test.txt?sig=1");
        assert_eq!(storage.url("test.txt").await.unwrap(), "https://signed/test.txt?sig=1");
        assert_eq!(backend.last_presign().map(|(_, _, ttl)| ttl), Some(Duration::from_secs(600)));
    }
}
