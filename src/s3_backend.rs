// src/s3_backend.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! `ObjectBackend` over the AWS Rust SDK, for MinIO and other S3-compatible stores.
//!
//! Clients are built from explicit `ConnectionParameters` rather than the
//! ambient AWS environment, and always use path-style addressing.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::{ByteStream, DateTime as AwsDateTime};
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::{Client, config::Credentials};
use aws_smithy_http_client::tls;
use aws_smithy_http_client::tls::rustls_provider::CryptoMode;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{env, fs};
use tracing::{debug, info, warn};

use crate::backend::{BackendConnector, ObjectBackend, ObjectInfo, ObjectInfoStream, ObjectMetadata, ObjectReader};
use crate::constants::{
    CREDENTIALS_PROVIDER_NAME, DEFAULT_CONNECT_TIMEOUT, DEFAULT_OPERATION_TIMEOUT_SECS, DEFAULT_REGION, LIST_DELIMITER,
};
use crate::error::{Result, StorageError};
use crate::registry::ConnectionParameters;

// -----------------------------------------------------------------------------
// TLS helper, for CA bundle
// -----------------------------------------------------------------------------

/// Create a TLS context using a CA bundle file
fn tls_context_from_pem(filename: impl AsRef<Path>) -> anyhow::Result<tls::TlsContext> {
    let pem_contents = fs::read(&filename)
        .with_context(|| format!("Failed to read CA bundle file: {}", filename.as_ref().display()))?;

    let trust_store = tls::TrustStore::empty().with_pem_certificate(pem_contents.as_slice());

    tls::TlsContext::builder()
        .with_trust_store(trust_store)
        .build()
        .with_context(|| format!("Failed to build TLS context from PEM {}", filename.as_ref().display()))
}

/// Get operation timeout for a single request
fn get_operation_timeout() -> Duration {
    env::var("S3FS_OPERATION_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS))
}

fn to_chrono(ts: &AwsDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos()).unwrap_or_default()
}

/// True when the store answered "no such key / no such bucket".
fn is_missing<E: ProvideErrorMetadata>(err: &SdkError<E, HttpResponse>) -> bool {
    if let Some(response) = err.raw_response() {
        if response.status().as_u16() == 404 {
            return true;
        }
    }
    matches!(err.code(), Some("NoSuchKey" | "NotFound" | "NoSuchBucket"))
}

fn backend_error<E>(err: SdkError<E, HttpResponse>, what: String) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::Backend(anyhow::Error::new(err).context(what))
}

// -----------------------------------------------------------------------------
// Connector
// -----------------------------------------------------------------------------

/// Builds `aws-sdk-s3` clients for the registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct S3Connector;

#[async_trait]
impl BackendConnector for S3Connector {
    async fn connect(&self, params: &ConnectionParameters) -> Result<Arc<dyn ObjectBackend>> {
        Ok(Arc::new(S3Backend::connect(params).await?))
    }
}

// -----------------------------------------------------------------------------
// Backend
// -----------------------------------------------------------------------------

/// S3-compatible backend. Cloning shares the underlying connection pool.
#[derive(Debug, Clone)]
pub struct S3Backend {
    client: Client,
    region: String,
}

impl S3Backend {
    /// Wrap an already configured client.
    pub fn from_client(client: Client, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Build a client for `params`.
    pub async fn connect(params: &ConnectionParameters) -> Result<Self> {
        let region = params.region.clone().unwrap_or_else(|| DEFAULT_REGION.to_string());

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .endpoint_url(params.endpoint_url());

        loader = match &params.credentials {
            Some(provider) => loader.credentials_provider(provider.get().clone()),
            None => loader.credentials_provider(Credentials::new(
                params.access_key.clone(),
                params.secret_key.clone(),
                params.session_token.clone(),
                None,
                CREDENTIALS_PROVIDER_NAME,
            )),
        };

        if !params.cert_check && params.ca_bundle.is_none() {
            // The rustls provider has no switch for skipping verification.
            warn!(
                "cert_check=false for {}: certificate verification stays on; \
                 supply a ca_bundle to trust a self-signed endpoint",
                params.endpoint
            );
        }

        match (&params.http_client, &params.ca_bundle) {
            (Some(http_client), _) => {
                loader = loader.http_client(http_client.get().clone());
            }
            (None, Some(ca_bundle)) if params.secure => {
                info!("Loading CA bundle from: {}", ca_bundle.display());
                let tls_context = tls_context_from_pem(ca_bundle)?;
                loader = loader.http_client(
                    aws_smithy_http_client::Builder::new()
                        .tls_provider(tls::Provider::Rustls(CryptoMode::AwsLc))
                        .tls_context(tls_context)
                        .build_https(),
                );
            }
            _ => {}
        }

        let timeout_config = TimeoutConfig::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .operation_timeout(get_operation_timeout())
            .build();

        let cfg = loader.timeout_config(timeout_config).load().await;

        // Path-style (endpoint/bucket) is what S3-compatible services expect.
        let s3_config = aws_sdk_s3::config::Builder::from(&cfg).force_path_style(true).build();

        debug!("Built S3 client for {} (region {})", params.endpoint_url(), region);
        Ok(Self::from_client(Client::from_conf(s3_config), region))
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn put(&self, bucket: &str, key: &str, body: Bytes, content_type: Option<&str>) -> Result<()> {
        let started = Instant::now();
        let size = body.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(size as i64)
            .set_content_type(content_type.map(str::to_owned))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| backend_error(e, format!("put_object {bucket}/{key} failed")))?;
        debug!("PUT {}/{} ({} bytes) in {:?}", bucket, key, size, started.elapsed());
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<ObjectReader> {
        let started = Instant::now();
        match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => {
                debug!("GET {}/{} first byte in {:?}", bucket, key, started.elapsed());
                Ok(Box::pin(output.body.into_async_read()))
            }
            Err(e) if is_missing(&e) => Err(StorageError::not_found(key)),
            Err(e) => Err(backend_error(e, format!("get_object {bucket}/{key} failed"))),
        }
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<()> {
        let started = Instant::now();
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| backend_error(e, format!("delete_object {bucket}/{key} failed")))?;
        debug!("DELETE {}/{} in {:?}", bucket, key, started.elapsed());
        Ok(())
    }

    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        let started = Instant::now();
        let output = match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(e) if is_missing(&e) => return Err(StorageError::not_found(key)),
            Err(e) => return Err(backend_error(e, format!("head_object {bucket}/{key} failed"))),
        };
        debug!("STAT {}/{} in {:?}", bucket, key, started.elapsed());
        Ok(ObjectMetadata {
            size: output.content_length().unwrap_or_default().max(0) as u64,
            last_modified: output.last_modified().map(to_chrono).unwrap_or_default(),
            content_type: output.content_type().map(str::to_owned),
            e_tag: output.e_tag().map(str::to_owned),
        })
    }

    fn list(&self, bucket: &str, prefix: &str) -> ObjectInfoStream {
        let client = self.client.clone();
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();
        Box::pin(async_stream::stream! {
            debug!("LIST STREAM: bucket={}, prefix={:?}", bucket, prefix);
            let mut continuation: Option<String> = None;

            loop {
                let response = match client
                    .list_objects_v2()
                    .bucket(&bucket)
                    .prefix(&prefix)
                    .delimiter(LIST_DELIMITER)
                    .set_continuation_token(continuation.take())
                    .send()
                    .await
                {
                    Ok(r) => r,
                    Err(e) => {
                        yield Err(backend_error(e, format!("list_objects_v2 {bucket}/{prefix} failed")));
                        return;
                    }
                };

                // Files and sub-"directories" come back separately; merge by key.
                let mut page: Vec<ObjectInfo> = response
                    .contents()
                    .iter()
                    .filter_map(|obj| {
                        obj.key().map(|key| ObjectInfo {
                            key: key.to_owned(),
                            size: obj.size().unwrap_or_default().max(0) as u64,
                            last_modified: obj.last_modified().map(to_chrono),
                            is_dir: false,
                        })
                    })
                    .chain(response.common_prefixes().iter().filter_map(|cp| {
                        cp.prefix().map(|p| ObjectInfo {
                            key: p.to_owned(),
                            size: 0,
                            last_modified: None,
                            is_dir: true,
                        })
                    }))
                    .collect();
                page.sort_by(|a, b| a.key.cmp(&b.key));

                for info in page {
                    yield Ok(info);
                }

                match response.next_continuation_token() {
                    Some(token) if response.is_truncated() == Some(true) => continuation = Some(token.to_owned()),
                    _ => break,
                }
            }

            debug!("LIST STREAM complete");
        })
    }

    async fn presigned_get_url(&self, bucket: &str, key: &str, expires_in: Duration) -> Result<String> {
        let config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::Backend(anyhow!(e).context("invalid presigned expiration")))?;
        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| backend_error(e, format!("presign get_object {bucket}/{key} failed")))?;
        Ok(request.uri().to_string())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(backend_error(e, format!("head_bucket {bucket} failed"))),
        }
    }

    /// Create an S3 bucket. A bucket we already own is not an error.
    async fn make_bucket(&self, bucket: &str) -> Result<()> {
        let mut request = self.client.create_bucket().bucket(bucket);
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        match request.send().await {
            Ok(_) => {
                info!("Created bucket {}", bucket);
                Ok(())
            }
            Err(e) if e.code() == Some("BucketAlreadyOwnedByYou") => Ok(()),
            Err(e) => Err(backend_error(e, format!("create_bucket {bucket} failed"))),
        }
    }

    async fn set_bucket_policy(&self, bucket: &str, policy: &str) -> Result<()> {
        self.client
            .put_bucket_policy()
            .bucket(bucket)
            .policy(policy)
            .send()
            .await
            .map_err(|e| backend_error(e, format!("put_bucket_policy {bucket} failed")))?;
        info!("Applied bucket policy to {}", bucket);
        Ok(())
    }
}
