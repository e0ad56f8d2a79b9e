// src/registry.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Shared client connections, keyed by connection parameters.
//!
//! A `ClientRegistry` is created once by the application and handed to every
//! `BucketStorage` it builds. Adapters configured with identical parameters get
//! the same client; the first one to ask pays for the connection.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

use aws_credential_types::provider::SharedCredentialsProvider;
use aws_smithy_runtime_api::client::http::SharedHttpClient;
use tokio::sync::Mutex;
use tracing::debug;

use crate::backend::{BackendConnector, ObjectBackend};
use crate::error::Result;
use crate::s3_backend::S3Connector;

/// A shared handle compared by identity rather than by value.
///
/// Two `Shared` values are equal only when they point at the same allocation,
/// so cloning a handle keeps it equal while building a second, identical value
/// does not.
pub struct Shared<T: ?Sized>(Arc<T>);

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Shared(Arc::new(value))
    }
}

impl<T: ?Sized> Shared<T> {
    pub fn from_arc(inner: Arc<T>) -> Self {
        Shared(inner)
    }

    pub fn get(&self) -> &T {
        &self.0
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Shared(Arc::clone(&self.0))
    }
}

impl<T: ?Sized> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl<T: ?Sized> Eq for Shared<T> {}

impl<T: ?Sized> Hash for Shared<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl<T: ?Sized> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shared({:#x})", self.addr())
    }
}

/// Everything that distinguishes one client connection from another.
///
/// `Debug` output hides the secret key and session token.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionParameters {
    /// `host[:port]`, without scheme
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    /// https when true, http otherwise
    pub secure: bool,
    pub session_token: Option<String>,
    pub region: Option<String>,
    /// Custom transport for the SDK
    pub http_client: Option<Shared<SharedHttpClient>>,
    /// Alternate credential provider; wins over the static keys
    pub credentials: Option<Shared<SharedCredentialsProvider>>,
    /// Not supported by the rustls transport: `false` only logs a warning
    /// and certificates are still verified. Use `ca_bundle` for self-signed
    /// endpoints.
    pub cert_check: bool,
    /// PEM bundle used as the only trust root
    pub ca_bundle: Option<PathBuf>,
}

pub(crate) const REDACTED: &str = "<redacted>";

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &REDACTED)
            .field("secure", &self.secure)
            .field("session_token", &self.session_token.as_ref().map(|_| REDACTED))
            .field("region", &self.region)
            .field("http_client", &self.http_client)
            .field("credentials", &self.credentials)
            .field("cert_check", &self.cert_check)
            .field("ca_bundle", &self.ca_bundle)
            .finish()
    }
}

impl ConnectionParameters {
    pub fn new(endpoint: impl Into<String>, access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            secure: true,
            session_token: None,
            region: None,
            http_client: None,
            credentials: None,
            cert_check: true,
            ca_bundle: None,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure { "https" } else { "http" }
    }

    /// `scheme://endpoint`
    pub fn endpoint_url(&self) -> String {
        format!("{}://{}", self.scheme(), self.endpoint)
    }
}

/// Process-level cache of backend clients.
pub struct ClientRegistry {
    connector: Arc<dyn BackendConnector>,
    clients: Mutex<HashMap<ConnectionParameters, Arc<dyn ObjectBackend>>>,
}

impl ClientRegistry {
    pub fn new(connector: impl BackendConnector + 'static) -> Self {
        Self::with_connector(Arc::new(connector))
    }

    pub fn with_connector(connector: Arc<dyn BackendConnector>) -> Self {
        Self {
            connector,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Registry that builds `aws-sdk-s3` clients.
    pub fn s3() -> Self {
        Self::new(S3Connector)
    }

    /// Return the client for `params`, connecting on first use.
    ///
    /// The lock is held across `connect`, so concurrent callers with the same
    /// parameters wait for the first connection instead of racing to build a
    /// second one. A failed connect leaves the registry untouched.
    pub async fn get_or_create(&self, params: &ConnectionParameters) -> Result<Arc<dyn ObjectBackend>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(params) {
            debug!("Reusing client for endpoint {}", params.endpoint);
            return Ok(Arc::clone(client));
        }

        debug!("Connecting new client for endpoint {}", params.endpoint);
        let client = self.connector.connect(params).await?;
        clients.insert(params.clone(), Arc::clone(&client));
        Ok(client)
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }

    /// Drop every cached client. Adapters already holding one keep it alive.
    pub async fn clear(&self) {
        self.clients.lock().await.clear();
    }
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry").finish_non_exhaustive()
    }
}
