//! Router configuration for imagegate.
//!
//! This module defines the HTTP routes and the order of the gating middleware.
//!
//! # Route Structure
//!
//! ```text
//! /                      - Service info (public)
//! /health                - Health check (public)
//! /form                  - HTML upload forms (public)
//! /resize, /crop, ...    - Image operations (GET with a remote source, or POST)
//! /pipeline              - Chained operations
//! ```
//!
//! # Middleware Order
//!
//! Requests pass the gates in this order, each installed only when its
//! feature is configured: endpoint filter, rate limiter, CORS, API key,
//! cache headers, method validation, GET-source validation and URL
//! signature. The last three only guard image routes.
//!
//! # Example
//!
//! ```ignore
//! use imagegate::server::{create_router, AppState, RouterConfig};
//!
//! let config = RouterConfig::new()
//!     .with_cors(true)
//!     .with_http_cache_ttl(Some(3600));
//!
//! let router = create_router(AppState::new(ctx, sources, config));
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8088").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{Method, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    routing::any,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::auth::{api_key_middleware, url_signature_middleware};
use super::handlers::{form_handler, health_handler, image_handler, index_handler, not_found_handler};
use super::middleware::{
    cache_headers, default_headers, filter_endpoint, rate_limit, validate_image_source,
    validate_method,
};
use super::placeholder::Placeholder;
use super::AppState;
use crate::operations::Operation;
use crate::source::MAX_BODY_SIZE;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default maximum input resolution in megapixels.
pub const DEFAULT_MAX_RESOLUTION: f64 = 18.0;

/// Default rate limiter burst.
pub const DEFAULT_BURST: u32 = 100;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Clone)]
pub struct RouterConfig {
    /// Prefix the whole route table is mounted under
    pub path_prefix: String,

    /// Send permissive CORS headers
    pub cors: bool,

    /// Required API key, from the `API-Key` header or `key` query parameter
    pub api_key: Option<String>,

    /// Key for URL signature checks; `None` disables them
    pub url_signature_key: Option<String>,

    /// Endpoint names answered with 501
    pub disabled_endpoints: Vec<String>,

    /// Cache TTL in seconds for GET image replies; `None` sends no cache headers
    pub http_cache_ttl: Option<u32>,

    /// Requests per second per HTTP method (0 = unlimited)
    pub concurrency: u32,

    /// Rate limiter burst capacity
    pub burst: u32,

    /// Deadline for fetching the input image
    pub read_timeout: Duration,

    /// Deadline for the whole request
    pub write_timeout: Duration,

    /// Largest input image in megapixels (0 = unlimited)
    pub max_allowed_resolution: f64,

    /// Add `Image-Width` / `Image-Height` headers to image replies
    pub return_size: bool,

    /// Image sent in place of JSON error replies
    pub placeholder: Option<Placeholder>,

    /// Status used for placeholder replies instead of the error's own
    pub placeholder_status: Option<StatusCode>,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            path_prefix: "/".to_string(),
            cors: false,
            api_key: None,
            url_signature_key: None,
            disabled_endpoints: Vec::new(),
            http_cache_ttl: None,
            concurrency: 0,
            burst: DEFAULT_BURST,
            read_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            write_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_allowed_resolution: DEFAULT_MAX_RESOLUTION,
            return_size: false,
            placeholder: None,
            placeholder_status: None,
            enable_tracing: true,
        }
    }
}

impl RouterConfig {
    /// Configuration with every optional gate disabled.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = prefix.into();
        self
    }

    pub fn with_cors(mut self, enabled: bool) -> Self {
        self.cors = enabled;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_url_signature_key(mut self, key: impl Into<String>) -> Self {
        self.url_signature_key = Some(key.into());
        self
    }

    pub fn with_disabled_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.disabled_endpoints = endpoints;
        self
    }

    pub fn with_http_cache_ttl(mut self, ttl: Option<u32>) -> Self {
        self.http_cache_ttl = ttl;
        self
    }

    /// Limit each HTTP method to `rate` requests per second.
    pub fn with_rate_limit(mut self, rate: u32, burst: u32) -> Self {
        self.concurrency = rate;
        self.burst = burst;
        self
    }

    pub fn with_max_allowed_resolution(mut self, megapixels: f64) -> Self {
        self.max_allowed_resolution = megapixels;
        self
    }

    pub fn with_return_size(mut self, enabled: bool) -> Self {
        self.return_size = enabled;
        self
    }

    pub fn with_placeholder(mut self, placeholder: Placeholder, status: Option<StatusCode>) -> Self {
        self.placeholder = Some(placeholder);
        self.placeholder_status = status;
        self
    }

    pub fn with_timeouts(mut self, read: Duration, write: Duration) -> Self {
        self.read_timeout = read;
        self.write_timeout = write;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }

    /// Prefix without its trailing slash; empty for the root.
    pub fn normalized_prefix(&self) -> String {
        let trimmed = self.path_prefix.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        }
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let config = state.config.clone();

    let public_routes = Router::new()
        .route("/", any(index_handler))
        .route("/health", any(health_handler))
        .route("/form", any(form_handler))
        .layer(from_fn_with_state(state.clone(), validate_method))
        .with_state(state.clone());

    let image_routes = build_image_router(state.clone());

    let mut app = Router::new()
        .merge(public_routes)
        .merge(image_routes)
        .fallback(not_found_handler);

    // Gates shared by every route, innermost first
    if config.api_key.is_some() {
        app = app.layer(from_fn_with_state(state.clone(), api_key_middleware));
    }
    if config.cors {
        app = app.layer(build_cors_layer());
    }
    if state.rate_limiter.is_some() {
        app = app.layer(from_fn_with_state(state.clone(), rate_limit));
    }
    if !config.disabled_endpoints.is_empty() {
        app = app.layer(from_fn_with_state(state.clone(), filter_endpoint));
    }

    let prefix = config.normalized_prefix();
    let app = if prefix.is_empty() {
        app
    } else {
        Router::new().nest(&prefix, app).fallback(not_found_handler)
    };

    let app = app
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(TimeoutLayer::new(config.write_timeout));

    let app = if config.enable_tracing {
        app.layer(TraceLayer::new_for_http())
    } else {
        app
    };

    app.layer(from_fn(default_headers))
}

/// Image operation routes with their own gates.
fn build_image_router(state: AppState) -> Router {
    let mut router = Router::new();
    for operation in Operation::ALL {
        router = router.route(
            operation.route(),
            any(move |State(state): State<AppState>, request: Request| {
                image_handler(state, operation, request)
            }),
        );
    }

    // Innermost first: signature, GET-source, method, cache headers
    if state.signer.is_some() {
        router = router.layer(from_fn_with_state(state.clone(), url_signature_middleware));
    }
    router = router
        .layer(from_fn_with_state(state.clone(), validate_image_source))
        .layer(from_fn_with_state(state.clone(), validate_method));
    if state.config.http_cache_ttl.is_some() {
        router = router.layer(from_fn_with_state(state.clone(), cache_headers));
    }

    router.with_state(state)
}

/// Permissive CORS for browser clients.
fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(Duration::from_secs(86400)) // 24 hours
}

// =============================================================================
// Tests
// =============================================================================
