// Integration tests for the synchronous BlockingStorage wrapper
//
// These run on plain test threads, with no runtime of their own.

use anyhow::Result;
use bytes::Bytes;
use s3filestore::{BlockingStorage, ClientRegistry, MemoryBackend, MemoryConnector, StorageConfig};
use std::sync::Arc;

fn blocking_storage(tweak: impl FnOnce(&mut StorageConfig)) -> Result<(BlockingStorage, MemoryBackend)> {
    let backend = MemoryBackend::new();
    let registry = Arc::new(ClientRegistry::new(MemoryConnector::with_backend(backend.clone())));
    let mut config = StorageConfig::new("test.minio.server", "minioadmin", "minioadmin", "sync-bucket");
    tweak(&mut config);
    Ok((BlockingStorage::connect(config, registry)?, backend))
}

#[test]
fn test_blocking_roundtrip() -> Result<()> {
    let (storage, backend) = blocking_storage(|_| {})?;
    assert!(backend.has_bucket("sync-bucket"));

    let name = storage.save("dir/file.txt", "contents")?;
    assert_eq!(name, "dir/file.txt");
    assert!(storage.exists(&name));
    assert_eq!(storage.size(&name)?, 8);
    assert_eq!(storage.read(&name)?, Bytes::from_static(b"contents"));
    assert_eq!(backend.open_readers(), 0);

    let modified = storage.modified_time(&name)?;
    assert_eq!(storage.accessed_time(&name)?, modified);
    assert_eq!(storage.created_time(&name)?, modified);

    storage.delete(&name)?;
    assert!(!storage.exists(&name));
    assert!(!storage.try_exists(&name)?);
    Ok(())
}

#[test]
fn test_blocking_listing_and_urls() -> Result<()> {
    let (storage, backend) = blocking_storage(|c| {
        c.secure = false;
        c.presigned_url = false;
    })?;
    backend.insert("sync-bucket", "a/1.txt", "1");
    backend.insert("sync-bucket", "a/2.txt", "2");
    backend.insert("sync-bucket", "a/b/3.txt", "3");

    let keys: Vec<String> = storage.listdir("a/")?.into_iter().map(|e| e.key).collect();
    assert_eq!(keys, ["a/1.txt", "a/2.txt", "a/b/"]);

    assert_eq!(storage.url("a/1.txt")?, "http://test.minio.server/sync-bucket/a/1.txt");
    Ok(())
}

#[test]
fn test_blocking_shares_cache_with_async_view() -> Result<()> {
    let (storage, backend) = blocking_storage(|_| {})?;
    backend.insert("sync-bucket", "x.bin", "abc");
    backend.reset_calls();

    storage.stat("x.bin")?;
    let name = storage.get_available_name("x.bin", Some(20))?;
    assert_ne!(name, "x.bin");
    assert!(storage.as_async().bucket() == "sync-bucket");
    // the second existence check of x.bin came from the cache
    assert_eq!(backend.calls().stat, 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_from_inside_runtime() -> Result<()> {
    let handle = tokio::task::spawn_blocking(|| -> Result<bool> {
        let (storage, _) = blocking_storage(|_| {})?;
        storage.save("k.txt", "v")?;
        Ok(storage.exists("k.txt"))
    });
    assert!(handle.await??);
    Ok(())
}
