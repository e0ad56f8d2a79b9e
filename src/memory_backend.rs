// src/memory_backend.rs
//
// In-process ObjectBackend. Keeps buckets and objects in memory, counts every
// call and can be told to fail specific operations. Used by the test suites and
// handy for host applications that want a storage double.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Cursor;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};

use crate::backend::{BackendConnector, ObjectBackend, ObjectInfo, ObjectInfoStream, ObjectMetadata, ObjectReader};
use crate::error::{Result, StorageError};
use crate::registry::ConnectionParameters;

/// Backend operations, used to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Put,
    Get,
    Remove,
    Stat,
    List,
    Presign,
    BucketExists,
    MakeBucket,
    SetBucketPolicy,
}

/// Number of calls per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub put: usize,
    pub get: usize,
    pub remove: usize,
    pub stat: usize,
    pub list: usize,
    pub presign: usize,
    pub bucket_exists: usize,
    pub make_bucket: usize,
    pub set_bucket_policy: usize,
}

impl CallCounts {
    fn bump(&mut self, op: Op) {
        let slot = match op {
            Op::Put => &mut self.put,
            Op::Get => &mut self.get,
            Op::Remove => &mut self.remove,
            Op::Stat => &mut self.stat,
            Op::List => &mut self.list,
            Op::Presign => &mut self.presign,
            Op::BucketExists => &mut self.bucket_exists,
            Op::MakeBucket => &mut self.make_bucket,
            Op::SetBucketPolicy => &mut self.set_bucket_policy,
        };
        *slot += 1;
    }
}

/// An object as stored by `MemoryBackend`.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: Option<String>,
    pub metadata: ObjectMetadata,
}

#[derive(Debug, Default)]
struct MemoryState {
    buckets: BTreeSet<String>,
    objects: HashMap<String, BTreeMap<String, StoredObject>>,
    policies: HashMap<String, String>,
    failures: HashMap<Op, String>,
    calls: CallCounts,
    presigned_url: Option<String>,
    last_presign: Option<(String, String, Duration)>,
    phantom_objects: bool,
    version: u64,
}

/// Thread-safe in-memory object store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    open_readers: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a call to `op` and return the injected failure, if any.
    fn enter(&self, op: Op) -> Result<MutexGuard<'_, MemoryState>> {
        let mut state = self.state();
        state.calls.bump(op);
        if let Some(msg) = state.failures.get(&op) {
            return Err(StorageError::backend(msg));
        }
        Ok(state)
    }

    /// Make every call to `op` fail with a backend error carrying `msg`.
    pub fn fail(&self, op: Op, msg: impl Into<String>) {
        self.state().failures.insert(op, msg.into());
    }

    pub fn recover(&self, op: Op) {
        self.state().failures.remove(&op);
    }

    /// Report every key as existing on stat, whatever is stored.
    pub fn set_phantom_objects(&self, enabled: bool) {
        self.state().phantom_objects = enabled;
    }

    /// Fixed string returned by `presigned_get_url`.
    pub fn set_presigned_url(&self, url: impl Into<String>) {
        self.state().presigned_url = Some(url.into());
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    pub fn reset_calls(&self) {
        self.state().calls = CallCounts::default();
    }

    pub fn last_presign(&self) -> Option<(String, String, Duration)> {
        self.state().last_presign.clone()
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.state().buckets.insert(bucket.to_string());
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.state().buckets.contains(bucket)
    }

    pub fn bucket_policy(&self, bucket: &str) -> Option<String> {
        self.state().policies.get(bucket).cloned()
    }

    /// Store an object directly, bypassing call counting.
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        let mut state = self.state();
        state.buckets.insert(bucket.to_string());
        Self::store(&mut state, bucket, key, data.into(), None);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.state().objects.get(bucket).and_then(|objects| objects.get(key)).cloned()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.state()
            .objects
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Readers handed out by `get` that have not been dropped yet.
    pub fn open_readers(&self) -> usize {
        self.open_readers.load(Ordering::SeqCst)
    }

    fn store(state: &mut MemoryState, bucket: &str, key: &str, data: Bytes, content_type: Option<String>) {
        state.version += 1;
        let metadata = ObjectMetadata {
            size: data.len() as u64,
            last_modified: Utc::now(),
            content_type: content_type.clone(),
            e_tag: Some(format!("\"{:x}-{}\"", state.version, data.len())),
        };
        state
            .objects
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), StoredObject { data, content_type, metadata });
    }

    fn require_bucket(state: &MemoryState, bucket: &str) -> Result<()> {
        if state.buckets.contains(bucket) {
            Ok(())
        } else {
            Err(StorageError::backend(format!("NoSuchBucket: {bucket}")))
        }
    }

    /// Immediate children of `prefix`, files and common prefixes merged by key.
    fn children(state: &MemoryState, bucket: &str, prefix: &str) -> Vec<ObjectInfo> {
        let mut out: BTreeMap<String, ObjectInfo> = BTreeMap::new();
        let Some(objects) = state.objects.get(bucket) else {
            return Vec::new();
        };
        for (key, object) in objects.range(prefix.to_string()..) {
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };
            match rest.find('/') {
                Some(idx) => {
                    let dir = format!("{prefix}{}", &rest[..=idx]);
                    out.entry(dir.clone()).or_insert(ObjectInfo {
                        key: dir,
                        size: 0,
                        last_modified: None,
                        is_dir: true,
                    });
                }
                None => {
                    out.insert(
                        key.clone(),
                        ObjectInfo {
                            key: key.clone(),
                            size: object.metadata.size,
                            last_modified: Some(object.metadata.last_modified),
                            is_dir: false,
                        },
                    );
                }
            }
        }
        out.into_values().collect()
    }
}

/// Reader that tracks how many object bodies are still open.
struct TrackedReader {
    inner: Cursor<Bytes>,
    open: Arc<AtomicUsize>,
}

impl TrackedReader {
    fn new(data: Bytes, open: Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self { inner: Cursor::new(data), open }
    }
}

impl AsyncRead for TrackedReader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl Drop for TrackedReader {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn put(&self, bucket: &str, key: &str, body: Bytes, content_type: Option<&str>) -> Result<()> {
        let mut state = self.enter(Op::Put)?;
        Self::require_bucket(&state, bucket)?;
        Self::store(&mut state, bucket, key, body, content_type.map(str::to_owned));
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<ObjectReader> {
        let state = self.enter(Op::Get)?;
        let object = state
            .objects
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .ok_or_else(|| StorageError::not_found(key))?;
        let reader = TrackedReader::new(object.data.clone(), Arc::clone(&self.open_readers));
        Ok(Box::pin(reader))
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<()> {
        let mut state = self.enter(Op::Remove)?;
        Self::require_bucket(&state, bucket)?;
        if let Some(objects) = state.objects.get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        let state = self.enter(Op::Stat)?;
        if let Some(object) = state.objects.get(bucket).and_then(|objects| objects.get(key)) {
            return Ok(object.metadata.clone());
        }
        if state.phantom_objects {
            return Ok(ObjectMetadata {
                size: 0,
                last_modified: Utc::now(),
                content_type: None,
                e_tag: None,
            });
        }
        Err(StorageError::not_found(key))
    }

    fn list(&self, bucket: &str, prefix: &str) -> ObjectInfoStream {
        let backend = self.clone();
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();
        Box::pin(async_stream::stream! {
            // The query runs on first poll, not when the stream is built.
            let listed = backend
                .enter(Op::List)
                .map(|state| MemoryBackend::children(&state, &bucket, &prefix));
            match listed {
                Ok(page) => {
                    for info in page {
                        yield Ok(info);
                    }
                }
                Err(e) => yield Err(e),
            }
        })
    }

    async fn presigned_get_url(&self, bucket: &str, key: &str, expires_in: Duration) -> Result<String> {
        let mut state = self.enter(Op::Presign)?;
        state.last_presign = Some((bucket.to_string(), key.to_string(), expires_in));
        Ok(match &state.presigned_url {
            Some(url) => url.clone(),
            None => format!("memory://{bucket}/{key}?expires={}", expires_in.as_secs()),
        })
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let state = self.enter(Op::BucketExists)?;
        Ok(state.buckets.contains(bucket))
    }

    async fn make_bucket(&self, bucket: &str) -> Result<()> {
        let mut state = self.enter(Op::MakeBucket)?;
        state.buckets.insert(bucket.to_string());
        Ok(())
    }

    async fn set_bucket_policy(&self, bucket: &str, policy: &str) -> Result<()> {
        let mut state = self.enter(Op::SetBucketPolicy)?;
        Self::require_bucket(&state, bucket)?;
        state.policies.insert(bucket.to_string(), policy.to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ConnectorState {
    connects: usize,
    last_params: Option<ConnectionParameters>,
    failure: Option<String>,
}

/// Connector producing `MemoryBackend`s.
///
/// By default each connect builds a fresh, empty backend. `with_backend` makes
/// every connect hand out clones of one shared backend instead.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    shared: Option<MemoryBackend>,
    state: Arc<Mutex<ConnectorState>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(backend: MemoryBackend) -> Self {
        Self {
            shared: Some(backend),
            state: Arc::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    pub fn last_params(&self) -> Option<ConnectionParameters> {
        self.state().last_params.clone()
    }

    /// Make every subsequent connect fail.
    pub fn fail(&self, msg: impl Into<String>) {
        self.state().failure = Some(msg.into());
    }

    pub fn recover(&self) {
        self.state().failure = None;
    }
}

#[async_trait]
impl BackendConnector for MemoryConnector {
    async fn connect(&self, params: &ConnectionParameters) -> Result<Arc<dyn ObjectBackend>> {
        {
            let mut state = self.state();
            state.connects += 1;
            state.last_params = Some(params.clone());
            if let Some(msg) = &state.failure {
                return Err(StorageError::backend(msg));
            }
        }
        // Widen the window for racing connects in tests.
        tokio::task::yield_now().await;
        let backend = self.shared.clone().unwrap_or_default();
        Ok(Arc::new(backend))
    }
}
