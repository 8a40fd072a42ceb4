//! Request gating middleware.
//!
//! Each stage is an independent gate that either passes the request on or
//! replies with an error. Stages are only installed when their feature is
//! configured (see [`create_router`](super::routes::create_router)).

use std::num::NonZeroU32;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use chrono::{TimeZone, Utc};
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter,
};
use tracing::debug;

use super::handlers::error_reply;
use super::AppState;
use crate::error::ApiError;

/// Value of the `Server` header on every response.
pub const SERVER_HEADER: &str = concat!("imagegate ", env!("CARGO_PKG_VERSION"));

/// Longest accepted cache TTL, one year in seconds.
pub const MAX_CACHE_TTL: u32 = 31_556_926;

/// Paths that never carry cache headers.
pub fn is_public_path(path: &str) -> bool {
    matches!(path, "/" | "/health" | "/form")
}

// =============================================================================
// Endpoint filter
// =============================================================================

/// Whether the last path segment is in the disabled list.
pub fn is_endpoint_disabled(path: &str, disabled: &[String]) -> bool {
    let endpoint = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    disabled
        .iter()
        .any(|name| name.trim_matches('/').eq_ignore_ascii_case(endpoint))
}

pub async fn filter_endpoint(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if is_endpoint_disabled(request.uri().path(), &state.config.disabled_endpoints) {
        return error_reply(&state, request.uri(), ApiError::NotImplemented).await;
    }
    next.run(request).await
}

// =============================================================================
// Rate limiting
// =============================================================================

/// Rate limit bucket for a request method.
///
/// Extension methods share one bucket so the store stays bounded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MethodKey {
    Standard(Method),
    Extension,
}

impl MethodKey {
    fn of(method: &Method) -> Self {
        match *method {
            Method::GET
            | Method::POST
            | Method::PUT
            | Method::DELETE
            | Method::HEAD
            | Method::OPTIONS
            | Method::PATCH
            | Method::CONNECT
            | Method::TRACE => MethodKey::Standard(method.clone()),
            _ => MethodKey::Extension,
        }
    }
}

/// GCRA rate limiter keyed by HTTP method.
///
/// State is process-local and shared by every request of the same method.
pub struct MethodRateLimiter {
    limiter: RateLimiter<MethodKey, DefaultKeyedStateStore<MethodKey>, DefaultClock>,
    clock: DefaultClock,
}

impl MethodRateLimiter {
    /// `rate` requests per second with `burst` extra capacity.
    ///
    /// Returns `None` when `rate` is zero.
    pub fn new(rate: u32, burst: u32) -> Option<Self> {
        let rate = NonZeroU32::new(rate)?;
        let burst = NonZeroU32::new(burst).unwrap_or(rate);
        let quota = Quota::per_second(rate).allow_burst(burst);

        Some(Self {
            limiter: RateLimiter::keyed(quota),
            clock: DefaultClock::default(),
        })
    }

    /// Take one cell for `method`, or return how long to wait.
    pub fn check(&self, method: &Method) -> Result<(), Duration> {
        self.limiter
            .check_key(&MethodKey::of(method))
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    /// Number of buckets currently held.
    pub fn buckets(&self) -> usize {
        self.limiter.len()
    }
}

pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(limiter) = state.rate_limiter.as_ref() else {
        return next.run(request).await;
    };

    match limiter.check(request.method()) {
        Ok(()) => next.run(request).await,
        Err(wait) => {
            let retry_after = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            debug!(method = %request.method(), retry_after, "rate limit exceeded");
            let err = ApiError::TooManyRequests {
                retry_after: retry_after.max(1),
            };
            error_reply(&state, request.uri(), err).await
        }
    }
}

// =============================================================================
// Cache headers
// =============================================================================

/// `Cache-Control` value for a TTL in seconds.
pub fn cache_control(ttl: u32) -> String {
    if ttl == 0 {
        "private, no-cache, no-store, must-revalidate".to_string()
    } else {
        format!("public, s-maxage={ttl}, max-age={ttl}, no-transform")
    }
}

/// `Expires` value for a TTL in seconds, in RFC 1123 GMT form.
pub fn expires(ttl: u32) -> String {
    let at = if ttl == 0 {
        Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now)
    } else {
        Utc::now() + chrono::Duration::seconds(i64::from(ttl))
    };
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Set `Cache-Control` and `Expires` on GET requests to non-public paths.
pub async fn cache_headers(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let ttl = match state.config.http_cache_ttl {
        Some(ttl) if request.method() == Method::GET && !is_public_path(request.uri().path()) => ttl,
        _ => return next.run(request).await,
    };

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&cache_control(ttl)) {
        headers.insert(header::CACHE_CONTROL, value);
    }
    if let Ok(value) = HeaderValue::from_str(&expires(ttl)) {
        headers.insert(header::EXPIRES, value);
    }
    response
}

// =============================================================================
// Method validation
// =============================================================================

/// Only GET and POST are served.
pub async fn validate_method(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if request.method() != Method::GET && request.method() != Method::POST {
        return error_reply(&state, request.uri(), ApiError::MethodNotAllowed).await;
    }
    next.run(request).await
}

/// GET on image routes needs a source that can serve it.
pub async fn validate_image_source(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::GET && !state.sources.allows_get() {
        return error_reply(&state, request.uri(), ApiError::GetMethodNotAllowed).await;
    }
    next.run(request).await
}

// =============================================================================
// Default headers
// =============================================================================

pub async fn default_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(header::SERVER, HeaderValue::from_static(SERVER_HEADER));
    response
}
