//! HTTP server layer for imagegate.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │        GET|POST /resize, /crop, ..., /pipeline, /info           │
//! │                                                                 │
//! │  ┌────────────┐ ┌────────────┐ ┌──────────┐ ┌───────────────┐   │
//! │  │ middleware │ │    auth    │ │ handlers │ │    routes     │   │
//! │  │ (gating)   │ │ (key, sig) │ │ (replies)│ │ (route table) │   │
//! │  └────────────┘ └────────────┘ └──────────┘ └───────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//!                │                    │
//!          source::Sources    operations::Operation
//! ```

pub mod auth;
pub mod form;
pub mod handlers;
pub mod middleware;
pub mod placeholder;
pub mod routes;

use std::sync::Arc;
use std::time::Instant;

pub use auth::{canonical_query, UrlSigner, MIN_SIGNATURE_KEY_LEN};
pub use handlers::{error_reply, ErrorResponse, HealthResponse, IndexResponse};
pub use middleware::MethodRateLimiter;
pub use placeholder::Placeholder;
pub use routes::{create_router, RouterConfig};

use crate::operations::OperationContext;
use crate::source::Sources;

// =============================================================================
// Application State
// =============================================================================

/// Shared state handed to every handler and middleware.
#[derive(Clone)]
pub struct AppState {
    /// Engine and HTTP client used by operations
    pub ctx: OperationContext,

    /// Active image sources
    pub sources: Sources,

    /// Router configuration
    pub config: Arc<RouterConfig>,

    /// URL signer, when signature checks are enabled
    pub signer: Option<UrlSigner>,

    /// Per-method rate limiter, when throttling is enabled
    pub rate_limiter: Option<Arc<MethodRateLimiter>>,

    /// Server start time, for `/health`
    pub started: Instant,
}

impl AppState {
    pub fn new(ctx: OperationContext, sources: Sources, config: RouterConfig) -> Self {
        let signer = config.url_signature_key.as_deref().map(UrlSigner::new);
        let rate_limiter = MethodRateLimiter::new(config.concurrency, config.burst).map(Arc::new);

        Self {
            ctx,
            sources,
            config: Arc::new(config),
            signer,
            rate_limiter,
            started: Instant::now(),
        }
    }
}
