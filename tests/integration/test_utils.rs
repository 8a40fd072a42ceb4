//! Test utilities for integration tests.
//!
//! This module provides mock engine and source implementations, in-memory
//! image fixtures, router builders and a helper that spawns real upstream
//! HTTP servers on a random local port.

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{Method, Response};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use image::codecs::jpeg::JpegEncoder;
use image::{GenericImageView, ImageFormat, Rgb, RgbImage};

use imagegate::engine::{EngineOptions, Image, ImageEngine, ImageMetadata, ImageType};
use imagegate::error::{EngineError, SourceError};
use imagegate::operations::OperationContext;
use imagegate::server::{create_router, AppState, RouterConfig};
use imagegate::source::{ImageSource, SourceConfig, SourceRegistry};

pub const SIGNATURE_KEY: &str = "4f46feebafc4b5e988f131c4ff8b5997";

// =============================================================================
// Image Fixtures
// =============================================================================

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
}

/// Create a test RGB JPEG image.
pub fn create_test_jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, 90);
    gradient(width, height).write_with_encoder(encoder).unwrap();
    buf
}

/// Create a test RGB PNG image.
pub fn create_test_png(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    gradient(width, height)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

/// Decode `data` and return its format and dimensions.
pub fn decode(data: &[u8]) -> (ImageFormat, u32, u32) {
    let format = image::guess_format(data).expect("unknown image format");
    let img = image::load_from_memory(data).expect("cannot decode image");
    let (w, h) = img.dimensions();
    (format, w, h)
}

pub fn is_valid_jpeg(data: &[u8]) -> bool {
    data.starts_with(&[0xFF, 0xD8])
        && image::load_from_memory_with_format(data, ImageFormat::Jpeg).is_ok()
}

// =============================================================================
// Mock Engine
// =============================================================================

/// Engine that records every call and returns a fixed payload.
///
/// Lets tests check the instructions an operation sends without decoding
/// pixels.
#[derive(Clone, Default)]
pub struct MockEngine {
    width: u32,
    height: u32,
    calls: Arc<Mutex<Vec<EngineOptions>>>,
}

impl MockEngine {
    /// Engine reporting every input as `width`x`height`.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Vec<EngineOptions> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_call(&self) -> Option<EngineOptions> {
        self.calls.lock().unwrap().last().cloned()
    }
}

impl ImageEngine for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn transform(&self, input: &[u8], options: &EngineOptions) -> Result<Image, EngineError> {
        self.calls.lock().unwrap().push(options.clone());
        let output = options.output.unwrap_or_else(|| self.detect_type(input));
        if !output.is_known() {
            return Err(EngineError::UnsupportedType);
        }
        Ok(Image::new(input.to_vec(), output.mime()))
    }

    fn metadata(&self, input: &[u8]) -> Result<ImageMetadata, EngineError> {
        Ok(ImageMetadata {
            width: self.width,
            height: self.height,
            image_type: self.detect_type(input).name(),
            space: "srgb",
            channels: 3,
            has_alpha: false,
            has_profile: false,
            orientation: 0,
        })
    }

    fn detect_type(&self, input: &[u8]) -> ImageType {
        match input {
            [0xFF, 0xD8, ..] => ImageType::Jpeg,
            [0x89, b'P', b'N', b'G', ..] => ImageType::Png,
            _ => ImageType::Unknown,
        }
    }
}

// =============================================================================
// Mock Source
// =============================================================================

pub const MOCK_SOURCE: &str = "mock";

/// Source serving fixed bytes for GET requests carrying `mock=1`.
#[derive(Clone)]
pub struct MockSource {
    data: Bytes,
    requests: Arc<AtomicUsize>,
}

impl MockSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Bytes::from(data),
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageSource for MockSource {
    fn name(&self) -> &'static str {
        MOCK_SOURCE
    }

    fn matches(&self, request: &Request) -> bool {
        request.method() == Method::GET
            && request.uri().query().is_some_and(|q| q.contains("mock=1"))
    }

    async fn get_image(&self, _request: Request) -> Result<Bytes, SourceError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.data.clone())
    }
}

// =============================================================================
// Router Builders
// =============================================================================

/// Router backed by the raster engine and the built-in sources.
pub fn test_router(router: RouterConfig, sources: SourceConfig) -> Router {
    router_with_engine(Arc::new(imagegate::RasterEngine::new()), router, sources)
}

/// Router with the default configuration.
pub fn default_router() -> Router {
    test_router(RouterConfig::new(), SourceConfig::default())
}

pub fn router_with_engine(
    engine: Arc<dyn ImageEngine>,
    router: RouterConfig,
    sources: SourceConfig,
) -> Router {
    let ctx = OperationContext::new(engine, reqwest::Client::new());
    let sources = SourceRegistry::with_defaults().load_all(Arc::new(sources));
    create_router(AppState::new(ctx, sources, router))
}

/// Router with the mock engine and a mock GET source registered.
///
/// GET needs some configured source to pass method validation, so the
/// mount is pointed at the system temp directory.
pub fn mock_router(engine: MockEngine, source: MockSource, router: RouterConfig) -> Router {
    let ctx = OperationContext::new(Arc::new(engine), reqwest::Client::new());
    let config = SourceConfig {
        mount_path: Some(std::env::temp_dir()),
        ..Default::default()
    };
    let sources = SourceRegistry::with_defaults()
        .register(MOCK_SOURCE, move |_| Arc::new(source.clone()))
        .load_all(Arc::new(config));
    create_router(AppState::new(ctx, sources, router))
}

// =============================================================================
// Requests
// =============================================================================

pub fn get(uri: impl AsRef<str>) -> Request {
    Request::builder()
        .uri(uri.as_ref())
        .body(Body::empty())
        .unwrap()
}

pub fn post(uri: impl AsRef<str>, body: impl Into<Body>) -> Request {
    Request::builder()
        .method(Method::POST)
        .uri(uri.as_ref())
        .body(body.into())
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

// =============================================================================
// Upstream Servers
// =============================================================================

/// Serve `router` on a random local port and return its address.
pub async fn spawn_upstream(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}
