//! # imagegate
//!
//! An HTTP image transformation gateway.
//!
//! Clients send an image (as the request body, or by naming a file under a
//! mounted directory, a remote URL, an S3 object or an Azure blob) to an
//! operation endpoint such as `/resize` or `/crop`, and receive the
//! transformed image back.
//!
//! ## Features
//!
//! - **Seventeen operations**: resize, fit, enlarge, extract, crop, smartcrop,
//!   rotate, flip, flop, thumbnail, zoom, convert, text and image watermarks,
//!   blur, info and multi-step pipelines
//! - **Pluggable sources**: request body, local mount, HTTP(S), S3, Azure blob
//!   storage (client credentials or SAS URLs)
//! - **Gating**: API keys, HMAC-signed URLs, per-method rate limiting,
//!   disabled endpoints, CORS and cache headers
//! - **Placeholder replies**: errors can be answered with a resized image
//!
//! ## Architecture
//!
//! - [`options`] - Query and JSON parameter coercion into [`TransformOptions`]
//! - [`source`] - Image sources and the source registry
//! - [`engine`] - The pixel engine contract and the bundled raster engine
//! - [`operations`] - Operation catalog and pipeline execution
//! - [`server`] - Axum-based HTTP server, middleware and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use imagegate::{
//!     create_router, AppState, OperationContext, RasterEngine, RouterConfig, SourceConfig,
//!     SourceRegistry,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let ctx = OperationContext::new(Arc::new(RasterEngine::new()), reqwest::Client::new());
//!     let sources = SourceRegistry::with_defaults().load_all(Arc::new(SourceConfig::default()));
//!     let router = create_router(AppState::new(ctx, sources, RouterConfig::new()));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8088").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod operations;
pub mod options;
pub mod server;
pub mod source;

// Re-export commonly used types
pub use config::{Cli, Command, ServeConfig, SignConfig, SignOutputFormat};
pub use engine::{
    load_font, Image, ImageEngine, ImageMetadata, ImageType, EngineOptions, RasterEngine,
};
pub use error::{ApiError, CoerceError, EngineError, OperationError, SourceError};
pub use operations::{Operation, OperationContext, MAX_PIPELINE_STEPS};
pub use options::{PipelineStep, TransformOptions};
pub use server::{
    create_router, AppState, ErrorResponse, HealthResponse, Placeholder, RouterConfig, UrlSigner,
};
pub use source::{ImageSource, SourceConfig, SourceRegistry, Sources};
