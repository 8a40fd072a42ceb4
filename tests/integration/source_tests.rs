//! Image source integration tests.
//!
//! Remote sources are exercised against real HTTP servers bound to a random
//! local port. Tests verify:
//! - Mounted directory reads and path traversal rejection
//! - Remote URL fetching, origin allow-lists and size limits
//! - Header forwarding and authorization
//! - Azure blob reads with the client-credentials token flow
//! - Azure SAS URLs and S3 parameter validation

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get as get_route, post as post_route};
use axum::{Json, Router};
use bytes::Bytes;
use image::ImageFormat;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tower::ServiceExt;

use imagegate::source::{parse_origins, AzureSettings, S3Settings};
use imagegate::{RouterConfig, SourceConfig};

use super::test_utils::{
    body_bytes, body_json, create_test_jpeg, decode, get, spawn_upstream, test_router,
};

// =============================================================================
// Upstream Server
// =============================================================================

const TENANT: &str = "tenant-1";
const ACCESS_TOKEN: &str = "token-1";

#[derive(Clone)]
struct Upstream {
    image: Bytes,
    image_gets: Arc<AtomicUsize>,
    token_requests: Arc<AtomicUsize>,
}

impl Upstream {
    fn new() -> Self {
        Self {
            image: Bytes::from(create_test_jpeg(200, 100)),
            image_gets: Arc::new(AtomicUsize::new(0)),
            token_requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn image_response(&self) -> Response {
        (
            [
                (header::CONTENT_TYPE, "image/jpeg".to_string()),
                (header::CONTENT_LENGTH, self.image.len().to_string()),
            ],
            self.image.clone(),
        )
            .into_response()
    }
}

async fn image(State(up): State<Upstream>, method: Method) -> Response {
    if method == Method::GET {
        up.image_gets.fetch_add(1, Ordering::SeqCst);
    }
    up.image_response()
}

async fn private_image(State(up): State<Upstream>, headers: HeaderMap) -> Response {
    match headers.get(header::AUTHORIZATION) {
        Some(value) if value == "Basic abc" => up.image_response(),
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn custom_header_image(State(up): State<Upstream>, headers: HeaderMap) -> Response {
    match headers.get("x-custom") {
        Some(value) if value == "yes" => up.image_response(),
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn token(State(up): State<Upstream>, body: String) -> Response {
    up.token_requests.fetch_add(1, Ordering::SeqCst);
    if !body.contains("grant_type=client_credentials") || !body.contains("client_secret=shh") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(serde_json::json!({
        "token_type": "Bearer",
        "access_token": ACCESS_TOKEN,
        "expires_in": 3600,
    }))
    .into_response()
}

async fn blob(
    State(up): State<Upstream>,
    Path((container, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .is_some_and(|value| value == format!("Bearer {}", ACCESS_TOKEN).as_str());
    if !authorized || !headers.contains_key("x-ms-version") {
        return StatusCode::FORBIDDEN.into_response();
    }
    if container != "photos" || key != "2024/cat.jpg" {
        return StatusCode::NOT_FOUND.into_response();
    }
    up.image_response()
}

async fn spawn(up: Upstream) -> SocketAddr {
    let router = Router::new()
        .route("/image.jpg", get_route(image))
        .route("/private.jpg", get_route(private_image))
        .route("/custom.jpg", get_route(custom_header_image))
        .route("/missing.jpg", get_route(|| async { StatusCode::NOT_FOUND }))
        .route(&format!("/{}/oauth2/v2.0/token", TENANT), post_route(token))
        .route("/blobs/{container}/{*key}", get_route(blob))
        .with_state(up);
    spawn_upstream(router).await
}

fn url_sources() -> SourceConfig {
    SourceConfig {
        enable_url_source: true,
        ..Default::default()
    }
}

fn url_param(addr: SocketAddr, path: &str) -> String {
    urlencoding::encode(&format!("http://{}{}", addr, path)).into_owned()
}

// =============================================================================
// File System
// =============================================================================

#[tokio::test]
async fn test_mount_source() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("sub/a.jpg"), create_test_jpeg(80, 40)).unwrap();
    let router = test_router(
        RouterConfig::new(),
        SourceConfig {
            mount_path: Some(dir.path().to_path_buf()),
            ..Default::default()
        },
    );

    let response = router
        .clone()
        .oneshot(get("/resize?file=sub/a.jpg&width=40"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(decode(&body_bytes(response).await), (ImageFormat::Jpeg, 40, 20));

    let response = router
        .clone()
        .oneshot(get("/resize?file=../../etc/passwd&width=40"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_file_path");

    let response = router
        .clone()
        .oneshot(get("/resize?file=nope.jpg&width=40"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // No source accepts a GET without any source parameter
    let response = router.oneshot(get("/resize?width=40")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "missing_image_source");
}

// =============================================================================
// Remote URLs
// =============================================================================

#[tokio::test]
async fn test_url_source() {
    let addr = spawn(Upstream::new()).await;
    let router = test_router(RouterConfig::new(), url_sources());

    let response = router
        .oneshot(get(format!("/resize?url={}&width=50", url_param(addr, "/image.jpg"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(decode(&body_bytes(response).await), (ImageFormat::Jpeg, 50, 25));
}

#[tokio::test]
async fn test_url_source_upstream_errors() {
    let addr = spawn(Upstream::new()).await;
    let router = test_router(RouterConfig::new(), url_sources());

    let response = router
        .clone()
        .oneshot(get(format!("/resize?url={}&width=50", url_param(addr, "/missing.jpg"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Upstream rejects the request without credentials
    let response = router
        .clone()
        .oneshot(get(format!("/resize?url={}&width=50", url_param(addr, "/private.jpg"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let response = router
        .oneshot(get("/resize?url=ftp%3A%2F%2Fexample.com%2Fa.jpg&width=50"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_image_url");
}

#[tokio::test]
async fn test_allowed_origins() {
    let addr = spawn(Upstream::new()).await;

    let denied = SourceConfig {
        allowed_origins: parse_origins("https://images.example.com"),
        ..url_sources()
    };
    let response = test_router(RouterConfig::new(), denied)
        .oneshot(get(format!("/resize?url={}&width=50", url_param(addr, "/image.jpg"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"], "origin_not_allowed");

    let allowed = SourceConfig {
        allowed_origins: parse_origins(&format!("http://{}", addr)),
        ..url_sources()
    };
    let response = test_router(RouterConfig::new(), allowed)
        .oneshot(get(format!("/resize?url={}&width=50", url_param(addr, "/image.jpg"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

fn size_limited(max_allowed_size: u64) -> SourceConfig {
    SourceConfig {
        max_allowed_size,
        ..url_sources()
    }
}

#[tokio::test]
async fn test_max_allowed_size_boundary() {
    let up = Upstream::new();
    let size = up.image.len() as u64;
    let gets = up.image_gets.clone();
    let addr = spawn(up).await;
    let uri = format!("/resize?url={}&width=50", url_param(addr, "/image.jpg"));

    // One byte over the limit is rejected by the HEAD request alone
    let response = test_router(RouterConfig::new(), size_limited(size - 1))
        .oneshot(get(&uri))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(gets.load(Ordering::SeqCst), 0);

    let response = test_router(RouterConfig::new(), size_limited(size))
        .oneshot(get(&uri))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(gets.load(Ordering::SeqCst), 1);
}

/// Upstream answering with chunked bodies, so HEAD carries no Content-Length.
async fn spawn_chunked(body: Bytes) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let body = body.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let mut reply = b"HTTP/1.1 200 OK\r\ncontent-type: image/jpeg\r\n\
                    transfer-encoding: chunked\r\nconnection: close\r\n\r\n"
                    .to_vec();
                if request.starts_with(b"GET") {
                    for chunk in body.chunks(256) {
                        reply.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
                        reply.extend_from_slice(chunk);
                        reply.extend_from_slice(b"\r\n");
                    }
                    reply.extend_from_slice(b"0\r\n\r\n");
                }
                let _ = stream.write_all(&reply).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    addr
}

#[tokio::test]
async fn test_max_allowed_size_caps_streamed_body() {
    let body = Bytes::from(create_test_jpeg(200, 100));
    let size = body.len() as u64;
    let addr = spawn_chunked(body).await;
    let uri = format!("/resize?url={}&width=50", url_param(addr, "/image.jpg"));

    let response = test_router(RouterConfig::new(), size_limited(size - 1))
        .oneshot(get(&uri))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let message = body_json(response).await["message"].as_str().unwrap().to_string();
    assert!(message.contains(&(size - 1).to_string()), "{}", message);

    let response = test_router(RouterConfig::new(), size_limited(size))
        .oneshot(get(&uri))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_forward_headers() {
    let addr = spawn(Upstream::new()).await;
    let config = SourceConfig {
        forward_headers: vec!["X-Custom".into()],
        ..url_sources()
    };
    let router = test_router(RouterConfig::new(), config);

    let request = Request::builder()
        .uri(format!("/resize?url={}&width=50", url_param(addr, "/custom.jpg")))
        .header("X-Custom", "yes")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(get(format!("/resize?url={}&width=50", url_param(addr, "/custom.jpg"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_authorization() {
    let addr = spawn(Upstream::new()).await;
    let uri = format!("/resize?url={}&width=50", url_param(addr, "/private.jpg"));

    let fixed = SourceConfig {
        authorization: Some("Basic abc".into()),
        ..url_sources()
    };
    let response = test_router(RouterConfig::new(), fixed)
        .oneshot(get(&uri))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let forwarding = SourceConfig {
        auth_forwarding: true,
        ..url_sources()
    };
    let request = Request::builder()
        .uri(&uri)
        .header("X-Forward-Authorization", "Basic abc")
        .body(Body::empty())
        .unwrap();
    let response = test_router(RouterConfig::new(), forwarding)
        .oneshot(request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Azure
// =============================================================================

fn azure_sources(addr: SocketAddr) -> SourceConfig {
    SourceConfig {
        azure: Some(AzureSettings {
            account_name: "account".into(),
            tenant_id: TENANT.into(),
            client_id: "client".into(),
            client_secret: "shh".into(),
            authority_host: format!("http://{}", addr),
            blob_endpoint: Some(format!("http://{}/blobs", addr)),
        }),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_azure_source() {
    let up = Upstream::new();
    let token_requests = up.token_requests.clone();
    let addr = spawn(up).await;
    let router = test_router(RouterConfig::new(), azure_sources(addr));

    for _ in 0..2 {
        let response = router
            .clone()
            .oneshot(get(
                "/resize?azureBlobKey=2024/cat.jpg&azureContainer=photos&width=50",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(decode(&body_bytes(response).await), (ImageFormat::Jpeg, 50, 25));
    }

    // The token is acquired once and shared by later requests
    assert_eq!(token_requests.load(Ordering::SeqCst), 1);

    let response = router
        .oneshot(get(
            "/resize?azureBlobKey=2024/dog.jpg&azureContainer=photos&width=50",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_azure_requires_container() {
    let addr = spawn(Upstream::new()).await;
    let response = test_router(RouterConfig::new(), azure_sources(addr))
        .oneshot(get("/resize?azureBlobKey=2024/cat.jpg&width=50"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_azure_sas_source() {
    let addr = spawn(Upstream::new()).await;
    let sas = url_param(addr, "/image.jpg?sv=2021-08-06&sig=abc");

    let response = test_router(RouterConfig::new(), url_sources())
        .oneshot(get(format!("/resize?azureSASBlobURL={}&width=50", sas)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// S3
// =============================================================================

#[tokio::test]
async fn test_s3_requires_bucket() {
    let config = SourceConfig {
        s3: Some(S3Settings {
            endpoint: Some("http://127.0.0.1:9".into()),
            default_region: "us-east-1".into(),
        }),
        ..Default::default()
    };
    let response = test_router(RouterConfig::new(), config)
        .oneshot(get("/resize?s3key=cat.jpg&width=50"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["message"]
        .as_str()
        .unwrap()
        .contains("bucket"));
}

#[tokio::test]
async fn test_s3_disabled_rejects_get() {
    let response = test_router(RouterConfig::new(), SourceConfig::default())
        .oneshot(get("/resize?s3key=cat.jpg&bucket=b"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
