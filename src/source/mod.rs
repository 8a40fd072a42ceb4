//! Image sources.
//!
//! A source knows how to pull the input image out of one kind of request: the
//! request body, a file under the mount directory, a remote URL, or an object
//! in S3 or Azure blob storage.
//!
//! Sources are registered once at startup through a [`SourceRegistry`] and
//! frozen into an immutable [`Sources`] set that is shared by every request.
//! Resolution picks the first source whose `matches` predicate accepts the
//! request; predicates are mutually exclusive so the order never matters.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use imagegate::source::{SourceConfig, SourceRegistry};
//!
//! let sources = SourceRegistry::with_defaults().load_all(Arc::new(SourceConfig::default()));
//! if let Some(source) = sources.resolve(&request) {
//!     let bytes = source.get_image(request).await?;
//! }
//! ```

mod azure;
mod azure_sas;
mod body;
mod fs;
mod origin;
mod remote;
mod s3;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use bytes::Bytes;

use crate::error::SourceError;

pub use azure::{AzureSource, AZURE_SOURCE};
pub use azure_sas::{AzureSasSource, AZURE_SAS_SOURCE};
pub use body::{BodySource, BODY_SOURCE, MAX_BODY_SIZE};
pub use fs::{resolve_mount_path, FileSystemSource, FILE_SYSTEM_SOURCE};
pub use origin::{is_origin_allowed, parse_origins, AllowedOrigin};
pub use remote::{fetch_image, HttpSource, HTTP_SOURCE, USER_AGENT};
pub use s3::{S3Source, S3_SOURCE};

// =============================================================================
// ImageSource Trait
// =============================================================================

/// A strategy for obtaining the input image bytes from a request.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Whether this source can serve the request.
    fn matches(&self, request: &Request) -> bool;

    /// Read the image bytes for the request.
    async fn get_image(&self, request: Request) -> Result<Bytes, SourceError>;
}

// =============================================================================
// Configuration
// =============================================================================

/// S3 connection settings.
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// Custom endpoint for S3-compatible services (MinIO, etc.)
    pub endpoint: Option<String>,

    /// Region used when a request does not name one
    pub default_region: String,
}

/// Azure blob storage settings for the client-credentials flow.
#[derive(Debug, Clone)]
pub struct AzureSettings {
    pub account_name: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,

    /// Token endpoint host, `https://login.microsoftonline.com` by default
    pub authority_host: String,

    /// Blob service endpoint; derived from the account name when `None`
    pub blob_endpoint: Option<String>,
}

impl AzureSettings {
    /// Base URL of the blob service, without a trailing slash.
    pub fn blob_endpoint(&self) -> String {
        match &self.blob_endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}.blob.core.windows.net", self.account_name),
        }
    }
}

/// Static configuration handed to every source at startup.
#[derive(Debug, Clone, Default)]
pub struct SourceConfig {
    /// Directory served by the file system source
    pub mount_path: Option<PathBuf>,

    /// Enable fetching images from remote URLs
    pub enable_url_source: bool,

    /// Allowed remote origins; empty allows every origin
    pub allowed_origins: Vec<AllowedOrigin>,

    /// Maximum remote payload size in bytes (0 = unlimited)
    pub max_allowed_size: u64,

    /// Forward the inbound Authorization header to remote servers
    pub auth_forwarding: bool,

    /// Static Authorization header sent to remote servers
    pub authorization: Option<String>,

    /// Inbound header names copied onto remote requests
    pub forward_headers: Vec<String>,

    /// S3 source settings; `None` disables the source
    pub s3: Option<S3Settings>,

    /// Azure source settings; `None` disables the source
    pub azure: Option<AzureSettings>,
}

// =============================================================================
// Registry
// =============================================================================

type SourceFactory = Box<dyn Fn(Arc<SourceConfig>) -> Arc<dyn ImageSource> + Send + Sync>;

/// Builder collecting source factories before the server starts.
#[derive(Default)]
pub struct SourceRegistry {
    factories: Vec<(&'static str, SourceFactory)>,
}

impl SourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in source.
    pub fn with_defaults() -> Self {
        Self::new()
            .register(BODY_SOURCE, |_| Arc::new(BodySource))
            .register(FILE_SYSTEM_SOURCE, |config| {
                Arc::new(FileSystemSource::new(config))
            })
            .register(HTTP_SOURCE, |config| Arc::new(HttpSource::new(config)))
            .register(S3_SOURCE, |config| Arc::new(S3Source::new(config)))
            .register(AZURE_SOURCE, |config| Arc::new(AzureSource::new(config)))
            .register(AZURE_SAS_SOURCE, |config| {
                Arc::new(AzureSasSource::new(config))
            })
    }

    /// Register a factory under a name. A later registration replaces an
    /// earlier one with the same name.
    pub fn register<F>(mut self, name: &'static str, factory: F) -> Self
    where
        F: Fn(Arc<SourceConfig>) -> Arc<dyn ImageSource> + Send + Sync + 'static,
    {
        self.factories.retain(|(existing, _)| *existing != name);
        self.factories.push((name, Box::new(factory)));
        self
    }

    /// Names of the registered sources, in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.factories.iter().map(|(name, _)| *name).collect()
    }

    /// Instantiate every registered source with the shared configuration.
    pub fn load_all(self, config: Arc<SourceConfig>) -> Sources {
        let sources = self
            .factories
            .iter()
            .map(|(_, factory)| factory(config.clone()))
            .collect();

        Sources {
            inner: Arc::new(SourcesInner { config, sources }),
        }
    }
}

struct SourcesInner {
    config: Arc<SourceConfig>,
    sources: Vec<Arc<dyn ImageSource>>,
}

/// The frozen, shareable set of active sources.
#[derive(Clone)]
pub struct Sources {
    inner: Arc<SourcesInner>,
}

impl Sources {
    /// First source that accepts the request.
    pub fn resolve(&self, request: &Request) -> Option<Arc<dyn ImageSource>> {
        self.inner
            .sources
            .iter()
            .find(|source| source.matches(request))
            .cloned()
    }

    /// Whether any GET-capable source is enabled.
    pub fn allows_get(&self) -> bool {
        let config = &self.inner.config;
        config.mount_path.is_some()
            || config.enable_url_source
            || config.s3.is_some()
            || config.azure.is_some()
    }

    pub fn config(&self) -> &SourceConfig {
        &self.inner.config
    }

    pub fn len(&self) -> usize {
        self.inner.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sources.is_empty()
    }
}

/// First value of a query parameter, percent-decoded once.
pub(crate) fn query_value(request: &Request, name: &str) -> Option<String> {
    let query = request.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Like [`query_value`] but treats an empty value as absent.
pub(crate) fn non_empty_query_value(request: &Request, name: &str) -> Option<String> {
    query_value(request, name).filter(|value| !value.is_empty())
}
