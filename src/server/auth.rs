//! Request authentication: API keys and signed URLs.
//!
//! # URL Signing Scheme
//!
//! A signed URL carries a `sign` query parameter holding an unpadded,
//! URL-safe base64 HMAC-SHA256 over the request path immediately followed by
//! the canonical query (no `?` separator):
//!
//! ```text
//! sign = base64url(HMAC-SHA256(key, "{path}{canonical_query}"))
//! ```
//!
//! The canonical query is every parameter except `sign`, sorted by key
//! (values of a repeated key keep their order) and re-encoded with `+` for
//! spaces. Changing any parameter after signing invalidates the signature.
//!
//! # Example
//!
//! ```rust
//! use imagegate::server::auth::UrlSigner;
//!
//! let signer = UrlSigner::new("0123456789abcdef0123456789abcdef");
//! let query = "width=300&url=https%3A%2F%2Fexample.com%2Fa.jpg";
//! let signature = signer.sign("/resize", query);
//!
//! let signed = format!("{}&sign={}", query, signature);
//! assert!(signer.verify("/resize", &signed).is_ok());
//! ```

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use url::form_urlencoded;

use super::handlers::error_reply;
use super::AppState;
use crate::error::ApiError;

/// HMAC-SHA256 type alias
type HmacSha256 = Hmac<Sha256>;

/// Shortest accepted URL signature key.
pub const MIN_SIGNATURE_KEY_LEN: usize = 32;

/// Header carrying the API key; the `key` query parameter is the fallback.
pub const API_KEY_HEADER: &str = "api-key";

// =============================================================================
// URL Signer
// =============================================================================

/// Signs and verifies request URLs with HMAC-SHA256.
#[derive(Clone)]
pub struct UrlSigner {
    /// Secret key for HMAC computation
    key: Vec<u8>,
}

impl UrlSigner {
    /// Create a signer. Keys shorter than [`MIN_SIGNATURE_KEY_LEN`] are
    /// rejected at configuration time, not here.
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
        }
    }

    /// Signature for `path` and a raw query string.
    ///
    /// Any `sign` parameter already present in `query` is ignored.
    pub fn sign(&self, path: &str, query: &str) -> String {
        URL_SAFE_NO_PAD.encode(self.digest(path, query))
    }

    /// Append the signature to `query`, returning the signed query string.
    pub fn signed_query(&self, path: &str, query: &str) -> String {
        let signature = self.sign(path, query);
        let base = strip_sign(query);
        if base.is_empty() {
            format!("sign={}", signature)
        } else {
            format!("{}&sign={}", base, signature)
        }
    }

    /// Verify the `sign` parameter of a raw query string.
    pub fn verify(&self, path: &str, query: &str) -> Result<(), ApiError> {
        let provided = form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "sign")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();

        let provided = URL_SAFE_NO_PAD
            .decode(provided.as_bytes())
            .map_err(|_| ApiError::InvalidUrlSignature)?;

        let expected = self.digest(path, query);
        if provided.ct_eq(&expected).into() {
            Ok(())
        } else {
            Err(ApiError::UrlSignatureMismatch)
        }
    }

    fn digest(&self, path: &str, query: &str) -> Vec<u8> {
        // HMAC accepts keys of any length
        let mut mac = match HmacSha256::new_from_slice(&self.key) {
            Ok(mac) => mac,
            Err(_) => return Vec::new(),
        };
        mac.update(path.as_bytes());
        mac.update(canonical_query(query).as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

/// Query string without `sign`, sorted by key and re-encoded.
pub fn canonical_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .filter(|(key, _)| key != "sign")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    // Stable sort keeps repeated keys in their original order
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    pairs
        .iter()
        .map(|(key, value)| format!("{}={}", query_escape(key), query_escape(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encode everything but unreserved characters, spaces as `+`.
fn query_escape(value: &str) -> String {
    urlencoding::encode(value).replace("%20", "+")
}

fn strip_sign(query: &str) -> String {
    query
        .split('&')
        .filter(|pair| !pair.is_empty() && !pair.starts_with("sign=") && *pair != "sign")
        .collect::<Vec<_>>()
        .join("&")
}

// =============================================================================
// Axum Middleware
// =============================================================================

/// Reject requests without the configured API key.
pub async fn api_key_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.api_key.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| {
            request.uri().query().and_then(|query| {
                form_urlencoded::parse(query.as_bytes())
                    .find(|(key, _)| key == "key")
                    .map(|(_, value)| value.into_owned())
            })
        })
        .unwrap_or_default();

    if provided.as_bytes().ct_eq(expected.as_bytes()).into() {
        next.run(request).await
    } else {
        debug!(path = request.uri().path(), "rejected request with invalid API key");
        error_reply(&state, request.uri(), ApiError::InvalidApiKey).await
    }
}

/// Verify the `sign` parameter against the full request path.
pub async fn url_signature_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(signer) = state.signer.as_ref() else {
        return next.run(request).await;
    };

    let uri = original_uri(&request);
    let query = uri.query().unwrap_or("");

    match signer.verify(uri.path(), query) {
        Ok(()) => next.run(request).await,
        Err(err) => {
            warn!(path = uri.path(), code = err.code(), "URL signature check failed");
            error_reply(&state, &uri, err).await
        }
    }
}

/// The URI as sent by the client, before any path-prefix nesting.
fn original_uri(request: &Request) -> http::Uri {
    request
        .extensions()
        .get::<axum::extract::OriginalUri>()
        .map(|original| original.0.clone())
        .unwrap_or_else(|| request.uri().clone())
}

// =============================================================================
// Tests
// =============================================================================
