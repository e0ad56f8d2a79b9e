// src/config.rs
//
// Adapter configuration: a plain struct with defaults, plus loading from
// MINIO_* environment variables (and a `.env` file when present).

use aws_credential_types::provider::SharedCredentialsProvider;
use aws_smithy_runtime_api::client::http::SharedHttpClient;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{DEFAULT_MAX_NAME_ATTEMPTS, DEFAULT_PRESIGNED_EXPIRATION};
use crate::error::{Result, StorageError};
use crate::registry::{ConnectionParameters, REDACTED, Shared};
use crate::url::UrlPolicy;

/// Configuration for one `BucketStorage`.
///
/// `Debug` output hides the secret key and session token.
#[derive(Clone)]
pub struct StorageConfig {
    /// `host[:port]` of the object store. Required.
    pub endpoint: Option<String>,
    /// Required.
    pub access_key: Option<String>,
    /// Required.
    pub secret_key: Option<String>,
    pub secure: bool,
    /// Required.
    pub bucket_name: Option<String>,
    pub session_token: Option<String>,
    pub region: Option<String>,
    pub http_client: Option<Shared<SharedHttpClient>>,
    pub credentials: Option<Shared<SharedCredentialsProvider>>,
    /// Not supported by the rustls transport; `false` logs a warning and
    /// certificates are still checked. Trust a self-signed endpoint through
    /// `ca_bundle` instead.
    pub cert_check: bool,
    pub ca_bundle: Option<PathBuf>,
    /// Applied to the bucket at construction when set
    pub bucket_policy: Option<serde_json::Value>,
    pub presigned_url: bool,
    pub overwrite_files: bool,
    pub presigned_expiration: Duration,
    /// Candidates tried by `get_available_name` before giving up. `None` never gives up.
    pub max_name_attempts: Option<usize>,
    /// Fixed seed for name suffixes; OS entropy when unset
    pub name_seed: Option<u64>,
    /// Age limit for cached metadata. `None` keeps entries until invalidated.
    pub metadata_ttl: Option<Duration>,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hidden = |v: &Option<String>| v.as_ref().map(|_| REDACTED);
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &hidden(&self.secret_key))
            .field("secure", &self.secure)
            .field("bucket_name", &self.bucket_name)
            .field("session_token", &hidden(&self.session_token))
            .field("region", &self.region)
            .field("http_client", &self.http_client)
            .field("credentials", &self.credentials)
            .field("cert_check", &self.cert_check)
            .field("ca_bundle", &self.ca_bundle)
            .field("bucket_policy", &self.bucket_policy)
            .field("presigned_url", &self.presigned_url)
            .field("overwrite_files", &self.overwrite_files)
            .field("presigned_expiration", &self.presigned_expiration)
            .field("max_name_attempts", &self.max_name_attempts)
            .field("name_seed", &self.name_seed)
            .field("metadata_ttl", &self.metadata_ttl)
            .finish()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            access_key: None,
            secret_key: None,
            secure: true,
            bucket_name: None,
            session_token: None,
            region: None,
            http_client: None,
            credentials: None,
            cert_check: true,
            ca_bundle: None,
            bucket_policy: None,
            presigned_url: true,
            overwrite_files: false,
            presigned_expiration: DEFAULT_PRESIGNED_EXPIRATION,
            max_name_attempts: Some(DEFAULT_MAX_NAME_ATTEMPTS),
            name_seed: None,
            metadata_ttl: None,
        }
    }
}

fn required<'a>(value: &'a Option<String>, what: &str) -> Result<&'a str> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(StorageError::configuration(format!("{what} is required"))),
    }
}

fn parse_bool(var: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "enable" => Ok(true),
        "false" | "0" | "no" | "off" | "disable" => Ok(false),
        other => Err(StorageError::configuration(format!("{var}: expected a boolean, got {other:?}"))),
    }
}

impl StorageConfig {
    /// Config with the four required settings filled in.
    pub fn new(
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        bucket_name: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            access_key: Some(access_key.into()),
            secret_key: Some(secret_key.into()),
            bucket_name: Some(bucket_name.into()),
            ..Self::default()
        }
    }

    /// Connection parameters, or `Configuration` if a required setting is missing.
    pub fn connection_parameters(&self) -> Result<ConnectionParameters> {
        let mut params = ConnectionParameters::new(
            required(&self.endpoint, "endpoint")?,
            required(&self.access_key, "access_key")?,
            required(&self.secret_key, "secret_key")?,
        );
        params.secure = self.secure;
        params.session_token = self.session_token.clone();
        params.region = self.region.clone();
        params.http_client = self.http_client.clone();
        params.credentials = self.credentials.clone();
        params.cert_check = self.cert_check;
        params.ca_bundle = self.ca_bundle.clone();
        Ok(params)
    }

    pub fn bucket(&self) -> Result<&str> {
        required(&self.bucket_name, "bucket_name")
    }

    pub fn url_policy(&self) -> UrlPolicy {
        if self.presigned_url {
            UrlPolicy::Presigned {
                expires_in: self.presigned_expiration,
            }
        } else {
            UrlPolicy::Public
        }
    }

    /// Load from the process environment, reading `.env` first if there is one.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary variable source. Unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let flag = |var: &str, default: bool| get(var).map_or(Ok(default), |raw| parse_bool(var, &raw));

        let mut cfg = Self {
            endpoint: get("MINIO_ENDPOINT"),
            access_key: get("MINIO_ROOT_USER"),
            secret_key: get("MINIO_ROOT_PASSWORD"),
            bucket_name: get("MINIO_BUCKET_NAME"),
            session_token: get("MINIO_SESSION_TOKEN"),
            region: get("MINIO_REGION"),
            ca_bundle: get("MINIO_CA_BUNDLE").map(PathBuf::from),
            ..Self::default()
        };

        cfg.secure = flag("MINIO_USE_HTTPS", cfg.secure)?;
        cfg.cert_check = flag("MINIO_CERT_CHECK", cfg.cert_check)?;
        cfg.presigned_url = flag("MINIO_PRESIGNED_URL", cfg.presigned_url)?;
        cfg.overwrite_files = flag("MINIO_OVERWRITE_FILES", cfg.overwrite_files)?;

        if let Some(raw) = get("MINIO_PRESIGNED_EXPIRATION") {
            cfg.presigned_expiration = humantime::parse_duration(raw.trim())
                .map_err(|e| StorageError::configuration(format!("MINIO_PRESIGNED_EXPIRATION: {e}")))?;
        }

        if let Some(raw) = get("MINIO_BUCKET_POLICY") {
            let policy = serde_json::from_str(&raw)
                .map_err(|e| StorageError::configuration(format!("MINIO_BUCKET_POLICY is not valid JSON: {e}")))?;
            cfg.bucket_policy = Some(policy);
        }

        Ok(cfg)
    }
}
