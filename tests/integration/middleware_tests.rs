//! Middleware integration tests.
//!
//! Tests verify:
//! - Disabled endpoints answer 501
//! - Per-method rate limiting with Retry-After
//! - Cache headers on GET image replies only
//! - CORS preflight handling
//! - Path prefix mounting
//! - Placeholder images in place of JSON errors

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use image::ImageFormat;
use tempfile::TempDir;
use tower::ServiceExt;

use imagegate::server::Placeholder;
use imagegate::{RouterConfig, SourceConfig};

use super::test_utils::{
    body_bytes, body_json, create_test_jpeg, decode, get, post, test_router,
};

fn mounted() -> (TempDir, SourceConfig) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("photo.jpg"), create_test_jpeg(64, 64)).unwrap();
    let config = SourceConfig {
        mount_path: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    (dir, config)
}

// =============================================================================
// Endpoint Filter
// =============================================================================

#[tokio::test]
async fn test_disabled_endpoints() {
    let router = test_router(
        RouterConfig::new().with_disabled_endpoints(vec!["crop".into(), "health".into()]),
        SourceConfig::default(),
    );

    let response = router
        .clone()
        .oneshot(post("/crop?width=10", create_test_jpeg(20, 20)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body_json(response).await["error"], "not_implemented");

    let response = router.clone().oneshot(get("/HEALTH")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);

    let response = router
        .oneshot(post("/resize?width=10", create_test_jpeg(20, 20)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Rate Limiting
// =============================================================================

#[tokio::test]
async fn test_rate_limit_per_method() {
    let router = test_router(RouterConfig::new().with_rate_limit(1, 1), SourceConfig::default());

    let response = router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1);
    assert_eq!(body_json(response).await["error"], "rate_limited");

    // POST has its own bucket
    let response = router
        .oneshot(post("/resize?width=10", create_test_jpeg(20, 20)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Cache Headers
// =============================================================================

#[tokio::test]
async fn test_cache_headers_with_ttl() {
    let (_dir, sources) = mounted();
    let router = test_router(RouterConfig::new().with_http_cache_ttl(Some(3600)), sources);

    let response = router
        .clone()
        .oneshot(get("/resize?file=photo.jpg&width=32"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "public, s-maxage=3600, max-age=3600, no-transform"
    );
    let expires = response.headers()[header::EXPIRES].to_str().unwrap();
    assert!(expires.ends_with(" GMT"));

    let response = router
        .clone()
        .oneshot(post("/resize?width=32", create_test_jpeg(64, 64)))
        .await
        .unwrap();
    assert!(!response.headers().contains_key(header::CACHE_CONTROL));

    let response = router.oneshot(get("/health")).await.unwrap();
    assert!(!response.headers().contains_key(header::CACHE_CONTROL));
}

#[tokio::test]
async fn test_cache_headers_with_zero_ttl() {
    let (_dir, sources) = mounted();
    let router = test_router(RouterConfig::new().with_http_cache_ttl(Some(0)), sources);

    let response = router
        .oneshot(get("/resize?file=photo.jpg&width=32"))
        .await
        .unwrap();
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "private, no-cache, no-store, must-revalidate"
    );
    assert_eq!(
        response.headers()[header::EXPIRES],
        "Thu, 01 Jan 1970 00:00:00 GMT"
    );
}

#[tokio::test]
async fn test_no_cache_headers_by_default() {
    let (_dir, sources) = mounted();
    let router = test_router(RouterConfig::new(), sources);
    let response = router
        .oneshot(get("/resize?file=photo.jpg&width=32"))
        .await
        .unwrap();
    assert!(!response.headers().contains_key(header::CACHE_CONTROL));
    assert!(!response.headers().contains_key(header::EXPIRES));
}

// =============================================================================
// CORS
// =============================================================================

#[tokio::test]
async fn test_cors_preflight() {
    let router = test_router(RouterConfig::new().with_cors(true), SourceConfig::default());

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/resize")
        .header(header::ORIGIN, "https://app.example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

#[tokio::test]
async fn test_no_cors_headers_when_disabled() {
    let request = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "https://app.example.com")
        .body(Body::empty())
        .unwrap();

    let response = test_router(RouterConfig::new(), SourceConfig::default())
        .oneshot(request)
        .await
        .unwrap();
    assert!(!response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}

// =============================================================================
// Path Prefix
// =============================================================================

#[tokio::test]
async fn test_path_prefix() {
    let router = test_router(
        RouterConfig::new().with_path_prefix("/api/v1/"),
        SourceConfig::default(),
    );

    let response = router
        .clone()
        .oneshot(post("/api/v1/resize?width=10", create_test_jpeg(20, 20)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router.clone().oneshot(get("/api/v1/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(post("/resize?width=10", create_test_jpeg(20, 20)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().contains_key(header::SERVER));
}

// =============================================================================
// Placeholder
// =============================================================================

#[tokio::test]
async fn test_placeholder_replaces_error_body() {
    let placeholder = Placeholder::generated().unwrap();
    let router = test_router(
        RouterConfig::new().with_placeholder(placeholder, None),
        SourceConfig::default(),
    );

    let response = router
        .oneshot(post(
            "/resize?width=80&height=60",
            b"not an image at all".to_vec(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

    let error: serde_json::Value =
        serde_json::from_str(response.headers()["error"].to_str().unwrap()).unwrap();
    assert_eq!(error["error"], "unsupported_media_type");
    assert_eq!(error["status"], 415);

    assert_eq!(decode(&body_bytes(response).await), (ImageFormat::Png, 80, 60));
}

#[tokio::test]
async fn test_placeholder_status_override_and_type() {
    let placeholder = Placeholder::generated().unwrap();
    let router = test_router(
        RouterConfig::new().with_placeholder(placeholder, Some(StatusCode::OK)),
        SourceConfig::default(),
    );

    let response = router
        .oneshot(post("/rotate?width=40&height=40&type=jpeg", create_test_jpeg(20, 20)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    assert!(response.headers().contains_key("error"));
    assert_eq!(decode(&body_bytes(response).await), (ImageFormat::Jpeg, 40, 40));
}
