// src/url.rs
//
// URL issuance: presigned GET URLs or static public URLs, chosen by configuration.

use std::time::Duration;

use crate::backend::ObjectBackend;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlPolicy {
    /// Time-limited signed URLs issued by the backend
    Presigned { expires_in: Duration },
    /// `scheme://endpoint/bucket/name`, for buckets readable without credentials
    Public,
}

#[derive(Debug, Clone)]
pub struct UrlIssuer {
    policy: UrlPolicy,
    scheme: &'static str,
    endpoint: String,
    bucket: String,
}

impl UrlIssuer {
    pub fn new(policy: UrlPolicy, scheme: &'static str, endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            policy,
            scheme,
            endpoint: endpoint.into(),
            bucket: bucket.into(),
        }
    }

    pub fn policy(&self) -> UrlPolicy {
        self.policy
    }

    /// URL for `name` according to the configured policy.
    pub async fn issue(&self, backend: &dyn ObjectBackend, name: &str) -> Result<String> {
        match self.policy {
            UrlPolicy::Presigned { expires_in } => backend.presigned_get_url(&self.bucket, name, expires_in).await,
            UrlPolicy::Public => Ok(self.public_url(name)),
        }
    }

    /// Static URL. `name` is used as-is and must already be a valid path.
    pub fn public_url(&self, name: &str) -> String {
        format!("{}://{}/{}/{}", self.scheme, self.endpoint, self.bucket, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_backend::MemoryBackend;

    #[test]
    fn test_public_url_layout() {
        let issuer = UrlIssuer::new(UrlPolicy::Public, "http", "test.minio.server", "test-bucket");
        assert_eq!(issuer.public_url("test.txt"), "http://test.minio.server/test-bucket/test.txt");
        assert_eq!(issuer.public_url("a/b c.txt"), "http://test.minio.server/test-bucket/a/b c.txt");
    }

    #[tokio::test]
    async fn test_presigned_url_comes_from_backend() {
        let backend = MemoryBackend::new();
        backend.set_presigned_url("https://signed.example/test.txt?X-Amz-Signature=abc");
        let issuer = UrlIssuer::new(
            UrlPolicy::Presigned { expires_in: Duration::from_secs(60) },
            "https",
            "minio:9000",
            "bucket",
        );

        let url = issuer.issue(&backend, "test.txt").await.unwrap();
        assert_eq!(url, "https://signed.example/test.txt?X-Amz-Signature=abc");
        assert_eq!(backend.calls().presign, 1);
        assert_eq!(
            backend.last_presign(),
            Some(("bucket".to_string(), "test.txt".to_string(), Duration::from_secs(60)))
        );
    }
}
