//! Configuration management for imagegate.
//!
//! This module provides the command-line interface:
//! - `imagegate serve [flags]` runs the HTTP server (the default command)
//! - `imagegate sign [flags]` prints a signed query for a request
//!
//! Every serve flag can also be set through an `IMAGEGATE_*` environment
//! variable. `PORT` and `URL_SIGNATURE_KEY` are honoured as fallbacks, and
//! the Azure credentials are read from `AZURE_*`.
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use imagegate::config::{Cli, Command};
//!
//! match Cli::parse().into_command() {
//!     Command::Serve(config) => println!("listening on {}", config.bind_address()),
//!     Command::Sign(config) => println!("signing {}", config.path),
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `IMAGEGATE_HOST` - Server bind address (default: 0.0.0.0)
//! - `IMAGEGATE_PORT` / `PORT` - Server port (default: 8088)
//! - `IMAGEGATE_MOUNT` - Local directory served by the file system source
//! - `IMAGEGATE_ENABLE_URL_SOURCE` - Fetch images from remote URLs
//! - `IMAGEGATE_KEY` - Required API key
//! - `IMAGEGATE_URL_SIGNATURE_KEY` / `URL_SIGNATURE_KEY` - URL signature key
//! - `IMAGEGATE_HTTP_CACHE_TTL` - Cache TTL in seconds (default: -1, disabled)
//! - `AZURE_ACCOUNT_NAME`, `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`,
//!   `AZURE_CLIENT_SECRET` - Azure blob storage credentials

use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::http::StatusCode;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::engine::ImageEngine;
use crate::server::middleware::MAX_CACHE_TTL;
use crate::server::{Placeholder, RouterConfig, MIN_SIGNATURE_KEY_LEN};
use crate::source::{parse_origins, AzureSettings, S3Settings, SourceConfig};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 8088;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default Azure token authority.
pub const DEFAULT_AZURE_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Default HTTP read and write timeouts in seconds.
pub const DEFAULT_HTTP_TIMEOUT: u64 = 60;

// =============================================================================
// CLI Arguments
// =============================================================================

/// imagegate - An HTTP image transformation gateway.
///
/// Resizes, crops, converts and watermarks images posted to it or fetched
/// from a local directory, remote URLs, S3 or Azure blob storage.
#[derive(Parser, Debug, Clone)]
#[command(name = "imagegate")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Server flags used when no subcommand is given
    #[command(flatten)]
    pub serve: ServeConfig,
}

impl Cli {
    /// The selected command, defaulting to `serve`.
    pub fn into_command(self) -> Command {
        match self.command {
            Some(Command::Serve(config)) => Command::Serve(config.with_legacy_env()),
            Some(command) => command,
            None => Command::Serve(self.serve.with_legacy_env()),
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP server
    Serve(ServeConfig),

    /// Sign a request path and query for URL signature checks
    Sign(SignConfig),
}

// =============================================================================
// Serve Configuration
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "IMAGEGATE_HOST")]
    pub host: String,

    /// Port to listen on. `PORT` is used when this is not set.
    #[arg(short, long, env = "IMAGEGATE_PORT")]
    pub port: Option<u16>,

    /// URL path prefix the routes are mounted under.
    #[arg(long, default_value = "/", env = "IMAGEGATE_PATH_PREFIX")]
    pub path_prefix: String,

    /// Send permissive CORS headers.
    #[arg(long, default_value_t = false, env = "IMAGEGATE_CORS")]
    pub cors: bool,

    /// Comma-separated endpoints answered with 501 (e.g. form,crop,health).
    #[arg(long, env = "IMAGEGATE_DISABLE_ENDPOINTS", value_delimiter = ',')]
    pub disable_endpoints: Vec<String>,

    /// HTTP read timeout in seconds, applied while fetching the input image.
    #[arg(long, default_value_t = DEFAULT_HTTP_TIMEOUT, env = "IMAGEGATE_HTTP_READ_TIMEOUT")]
    pub http_read_timeout: u64,

    /// HTTP write timeout in seconds, applied to the whole request.
    #[arg(long, default_value_t = DEFAULT_HTTP_TIMEOUT, env = "IMAGEGATE_HTTP_WRITE_TIMEOUT")]
    pub http_write_timeout: u64,

    /// Cache TTL in seconds for image replies (-1 disables cache headers).
    #[arg(
        long,
        default_value_t = -1,
        allow_hyphen_values = true,
        env = "IMAGEGATE_HTTP_CACHE_TTL"
    )]
    pub http_cache_ttl: i64,

    /// Requests per second allowed per HTTP method (0 disables throttling).
    #[arg(long, default_value_t = 0, env = "IMAGEGATE_CONCURRENCY")]
    pub concurrency: u32,

    /// Throttle burst capacity.
    #[arg(long, default_value_t = 100, env = "IMAGEGATE_BURST")]
    pub burst: u32,

    /// Add Image-Width and Image-Height headers to image replies.
    #[arg(long, default_value_t = false, env = "IMAGEGATE_RETURN_SIZE")]
    pub return_size: bool,

    /// Largest accepted input image in megapixels (0 = unlimited).
    #[arg(long, default_value_t = 18.0, env = "IMAGEGATE_MAX_ALLOWED_RESOLUTION")]
    pub max_allowed_resolution: f64,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// API key required on every request (`API-Key` header or `key` parameter).
    #[arg(long, env = "IMAGEGATE_KEY")]
    pub key: Option<String>,

    /// Verify the `sign` parameter of image requests.
    #[arg(long, default_value_t = false, env = "IMAGEGATE_ENABLE_URL_SIGNATURE")]
    pub enable_url_signature: bool,

    /// URL signature key (32 characters minimum). `URL_SIGNATURE_KEY` is
    /// used when this is not set.
    #[arg(long, env = "IMAGEGATE_URL_SIGNATURE_KEY")]
    pub url_signature_key: Option<String>,

    // =========================================================================
    // Source Configuration
    // =========================================================================
    /// Local directory served by the file system source.
    #[arg(long, env = "IMAGEGATE_MOUNT")]
    pub mount: Option<PathBuf>,

    /// Fetch images from remote URLs (`url` parameter).
    #[arg(long, default_value_t = false, env = "IMAGEGATE_ENABLE_URL_SOURCE")]
    pub enable_url_source: bool,

    /// Comma-separated origins remote images may come from. Matched against
    /// host and path; `*.example.com` matches subdomains.
    #[arg(long, env = "IMAGEGATE_ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Largest remote image in bytes (0 = unlimited).
    #[arg(long, default_value_t = 0, env = "IMAGEGATE_MAX_ALLOWED_SIZE")]
    pub max_allowed_size: u64,

    /// Forward `X-Forward-Authorization` or `Authorization` to remote servers.
    #[arg(long, default_value_t = false, env = "IMAGEGATE_ENABLE_AUTH_FORWARDING")]
    pub enable_auth_forwarding: bool,

    /// Constant Authorization header sent to remote servers.
    #[arg(long, env = "IMAGEGATE_AUTHORIZATION")]
    pub authorization: Option<String>,

    /// Comma-separated inbound headers copied onto remote requests.
    #[arg(long, env = "IMAGEGATE_FORWARD_HEADERS", value_delimiter = ',')]
    pub forward_headers: Vec<String>,

    /// Fetch images from S3 (`s3key` and `bucket` parameters).
    #[arg(long, default_value_t = false, env = "IMAGEGATE_ENABLE_S3_SOURCE")]
    pub enable_s3_source: bool,

    /// Custom S3 endpoint for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "IMAGEGATE_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// Region used when a request does not name one.
    #[arg(long, default_value = DEFAULT_REGION, env = "IMAGEGATE_S3_REGION")]
    pub s3_region: String,

    /// Fetch images from Azure blob storage (`azureBlobKey` and
    /// `azureContainer` parameters).
    #[arg(long, default_value_t = false, env = "IMAGEGATE_ENABLE_AZURE_SOURCE")]
    pub enable_azure_source: bool,

    #[arg(long, env = "AZURE_ACCOUNT_NAME")]
    pub azure_account_name: Option<String>,

    #[arg(long, env = "AZURE_TENANT_ID")]
    pub azure_tenant_id: Option<String>,

    #[arg(long, env = "AZURE_CLIENT_ID")]
    pub azure_client_id: Option<String>,

    #[arg(long, env = "AZURE_CLIENT_SECRET", hide_env_values = true)]
    pub azure_client_secret: Option<String>,

    /// Token authority for the Azure client-credentials flow.
    #[arg(long, default_value = DEFAULT_AZURE_AUTHORITY, env = "AZURE_AUTHORITY_HOST", hide = true)]
    pub azure_authority_host: String,

    /// Blob service endpoint; derived from the account name when unset.
    #[arg(long, env = "AZURE_BLOB_ENDPOINT", hide = true)]
    pub azure_blob_endpoint: Option<String>,

    // =========================================================================
    // Placeholder Configuration
    // =========================================================================
    /// Reply with a generated placeholder image on errors.
    #[arg(long, default_value_t = false, env = "IMAGEGATE_ENABLE_PLACEHOLDER")]
    pub enable_placeholder: bool,

    /// Image used as the error placeholder (implies --enable-placeholder).
    #[arg(long, env = "IMAGEGATE_PLACEHOLDER")]
    pub placeholder: Option<PathBuf>,

    /// Status code of placeholder replies (default: the error's own status).
    #[arg(long, env = "IMAGEGATE_PLACEHOLDER_STATUS")]
    pub placeholder_status: Option<u16>,

    // =========================================================================
    // Engine Configuration
    // =========================================================================
    /// TrueType/OpenType font used for text watermarks.
    #[arg(long, env = "IMAGEGATE_FONT")]
    pub font: Option<PathBuf>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Fill unset values from `PORT` and `URL_SIGNATURE_KEY`.
    pub fn with_legacy_env(mut self) -> Self {
        if self.port.is_none() {
            self.port = std::env::var("PORT")
                .ok()
                .and_then(|port| port.parse().ok())
                .filter(|port| *port > 0);
        }
        if self.url_signature_key.is_none() {
            self.url_signature_key = std::env::var("URL_SIGNATURE_KEY")
                .ok()
                .filter(|key| !key.is_empty());
        }
        self
    }

    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.enable_url_signature {
            let key = self.url_signature_key.as_deref().unwrap_or("");
            if key.is_empty() {
                return Err("URL signature key is required. Set --url-signature-key or \
                            URL_SIGNATURE_KEY"
                    .to_string());
            }
            if key.len() < MIN_SIGNATURE_KEY_LEN {
                return Err(format!(
                    "URL signature key must be a minimum of {} characters",
                    MIN_SIGNATURE_KEY_LEN
                ));
            }
        }

        if let Some(ref mount) = self.mount {
            check_mount_directory(mount)?;
        }

        if self.http_cache_ttl != -1
            && !(0..=MAX_CACHE_TTL as i64).contains(&self.http_cache_ttl)
        {
            return Err(format!(
                "http_cache_ttl only accepts a value from 0 to {} (or -1 to disable)",
                MAX_CACHE_TTL
            ));
        }

        if let Some(status) = self.placeholder_status {
            if !(400..=599).contains(&status) {
                return Err("placeholder_status must be between 400 and 599".to_string());
            }
        }

        if let Some(ref path) = self.placeholder {
            std::fs::metadata(path)
                .map_err(|e| format!("cannot read placeholder {}: {}", path.display(), e))?;
        }

        if self.concurrency > 0 && self.burst == 0 {
            return Err("burst must be greater than 0 when concurrency is set".to_string());
        }

        if self.http_read_timeout == 0 || self.http_write_timeout == 0 {
            return Err("HTTP timeouts must be greater than 0".to_string());
        }

        if self.max_allowed_resolution < 0.0 {
            return Err("max_allowed_resolution cannot be negative".to_string());
        }

        if self.enable_azure_source {
            let missing: Vec<&str> = [
                ("AZURE_ACCOUNT_NAME", &self.azure_account_name),
                ("AZURE_TENANT_ID", &self.azure_tenant_id),
                ("AZURE_CLIENT_ID", &self.azure_client_id),
                ("AZURE_CLIENT_SECRET", &self.azure_client_secret),
            ]
            .into_iter()
            .filter(|(_, value)| value.as_deref().map_or(true, str::is_empty))
            .map(|(name, _)| name)
            .collect();

            if !missing.is_empty() {
                return Err(format!(
                    "Azure source is enabled but credentials are missing: {}",
                    missing.join(", ")
                ));
            }
        }

        Ok(())
    }

    /// Effective port, after the `PORT` fallback.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port())
    }

    /// Cache TTL for the router; `None` when disabled.
    pub fn cache_ttl(&self) -> Option<u32> {
        u32::try_from(self.http_cache_ttl).ok()
    }

    /// Whether error replies use a placeholder image.
    pub fn placeholder_enabled(&self) -> bool {
        self.enable_placeholder || self.placeholder.is_some()
    }

    /// Load the configured placeholder, if any.
    pub fn load_placeholder(&self, engine: &dyn ImageEngine) -> Result<Option<Placeholder>, String> {
        match (&self.placeholder, self.enable_placeholder) {
            (Some(path), _) => Placeholder::from_file(path, engine).map(Some),
            (None, true) => Placeholder::generated().map(Some),
            (None, false) => Ok(None),
        }
    }

    /// Settings shared by every image source.
    pub fn source_config(&self) -> SourceConfig {
        let s3 = self.enable_s3_source.then(|| S3Settings {
            endpoint: self.s3_endpoint.clone(),
            default_region: self.s3_region.clone(),
        });

        let azure = if self.enable_azure_source {
            Some(AzureSettings {
                account_name: self.azure_account_name.clone().unwrap_or_default(),
                tenant_id: self.azure_tenant_id.clone().unwrap_or_default(),
                client_id: self.azure_client_id.clone().unwrap_or_default(),
                client_secret: self.azure_client_secret.clone().unwrap_or_default(),
                authority_host: self.azure_authority_host.clone(),
                blob_endpoint: self.azure_blob_endpoint.clone(),
            })
        } else {
            None
        };

        SourceConfig {
            mount_path: self.mount.clone(),
            enable_url_source: self.enable_url_source,
            allowed_origins: parse_origins(&self.allowed_origins.join(",")),
            max_allowed_size: self.max_allowed_size,
            auth_forwarding: self.enable_auth_forwarding,
            authorization: self.authorization.clone().filter(|value| !value.is_empty()),
            forward_headers: trimmed_list(&self.forward_headers),
            s3,
            azure,
        }
    }

    /// Router settings. The placeholder is attached separately because
    /// loading it needs the engine.
    pub fn router_config(&self) -> RouterConfig {
        let mut config = RouterConfig::new()
            .with_path_prefix(self.path_prefix.clone())
            .with_cors(self.cors)
            .with_disabled_endpoints(
                trimmed_list(&self.disable_endpoints)
                    .into_iter()
                    .map(|endpoint| endpoint.to_ascii_lowercase())
                    .collect(),
            )
            .with_http_cache_ttl(self.cache_ttl())
            .with_rate_limit(self.concurrency, self.burst)
            .with_max_allowed_resolution(self.max_allowed_resolution)
            .with_return_size(self.return_size)
            .with_timeouts(
                Duration::from_secs(self.http_read_timeout),
                Duration::from_secs(self.http_write_timeout),
            )
            .with_tracing(!self.no_tracing);

        if let Some(key) = self.key.as_deref().filter(|key| !key.is_empty()) {
            config = config.with_api_key(key);
        }
        if self.enable_url_signature {
            if let Some(ref key) = self.url_signature_key {
                config = config.with_url_signature_key(key.clone());
            }
        }
        config
    }

    /// Placeholder reply status, when overridden.
    pub fn placeholder_status_code(&self) -> Option<StatusCode> {
        self.placeholder_status
            .and_then(|status| StatusCode::from_u16(status).ok())
    }
}

fn check_mount_directory(path: &Path) -> Result<(), String> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| format!("error while mounting directory {}: {}", path.display(), e))?;
    if !metadata.is_dir() {
        return Err(format!("mount path is not a directory: {}", path.display()));
    }
    if path == Path::new("/") {
        return Err("cannot mount the root directory".to_string());
    }
    Ok(())
}

fn trimmed_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

// =============================================================================
// Sign Configuration
// =============================================================================

/// Output format of the `sign` command.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutputFormat {
    /// The query string with the `sign` parameter appended
    Query,
    /// The bare signature
    Raw,
    /// A JSON object with path, query and signature
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct SignConfig {
    /// URL signature key (32 characters minimum).
    #[arg(long, env = "IMAGEGATE_URL_SIGNATURE_KEY")]
    pub key: String,

    /// Request path, including any path prefix (e.g. /resize).
    #[arg(long)]
    pub path: String,

    /// Raw query string to sign (e.g. "url=https://...&width=300").
    #[arg(long, default_value = "")]
    pub query: String,

    /// Output format.
    #[arg(long, value_enum, default_value_t = SignOutputFormat::Query)]
    pub format: SignOutputFormat,
}

impl SignConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.key.len() < MIN_SIGNATURE_KEY_LEN {
            return Err(format!(
                "URL signature key must be a minimum of {} characters",
                MIN_SIGNATURE_KEY_LEN
            ));
        }
        if !self.path.starts_with('/') {
            return Err("path must start with '/'".to_string());
        }
        Ok(())
    }

    /// Query with any leading `?` removed.
    pub fn query(&self) -> &str {
        self.query.trim_start_matches('?')
    }
}

// =============================================================================
// Tests
// =============================================================================
