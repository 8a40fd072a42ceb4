//! Pipeline integration tests.
//!
//! Tests verify:
//! - Steps run in order, each on the previous step's output
//! - `ignore_failure` keeps the previous image
//! - Invalid pipelines are rejected before any step runs

use axum::http::{header, StatusCode};
use image::ImageFormat;
use serde_json::json;
use tower::ServiceExt;

use imagegate::RouterConfig;

use super::test_utils::{
    body_bytes, body_json, create_test_jpeg, decode, default_router, mock_router, post,
    MockEngine, MockSource,
};

fn pipeline_uri(operations: serde_json::Value) -> String {
    format!(
        "/pipeline?operations={}",
        urlencoding::encode(&operations.to_string())
    )
}

#[tokio::test]
async fn test_crop_then_convert() {
    let uri = pipeline_uri(json!([
        {"operation": "crop", "params": {"width": 300, "height": 260}},
        {"operation": "convert", "params": {"type": "webp"}},
    ]));

    let response = default_router()
        .oneshot(post(uri, create_test_jpeg(640, 480)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/webp");
    assert_eq!(decode(&body_bytes(response).await), (ImageFormat::WebP, 300, 260));
}

#[tokio::test]
async fn test_steps_see_previous_output() {
    let uri = pipeline_uri(json!([
        {"operation": "resize", "params": {"width": 100}},
        {"operation": "rotate", "params": {"rotate": 90}},
    ]));

    let response = default_router()
        .oneshot(post(uri, create_test_jpeg(400, 200)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(decode(&body_bytes(response).await), (ImageFormat::Jpeg, 50, 100));
}

#[tokio::test]
async fn test_ignore_failure_keeps_previous_image() {
    let uri = pipeline_uri(json!([
        {"operation": "resize", "params": {"width": 100}},
        {"operation": "rotate", "params": {}, "ignore_failure": true},
    ]));

    let response = default_router()
        .oneshot(post(uri, create_test_jpeg(400, 200)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(decode(&body_bytes(response).await), (ImageFormat::Jpeg, 100, 50));
}

#[tokio::test]
async fn test_failing_step_fails_pipeline() {
    let uri = pipeline_uri(json!([
        {"operation": "resize", "params": {"width": 100}},
        {"operation": "rotate", "params": {}},
    ]));

    let response = default_router()
        .oneshot(post(uri, create_test_jpeg(400, 200)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let message = body_json(response).await["message"].as_str().unwrap().to_string();
    assert!(message.contains("rotate"), "{}", message);
}

#[tokio::test]
async fn test_invalid_pipelines_run_nothing() {
    let engine = MockEngine::new(100, 100);
    let router = mock_router(engine.clone(), MockSource::new(vec![]), RouterConfig::new());
    let jpeg = create_test_jpeg(8, 8);

    let too_many: Vec<_> = (0..11)
        .map(|_| json!({"operation": "flip"}))
        .collect();

    let cases = [
        ("/pipeline".to_string(), "Missing or invalid pipeline operations JSON"),
        (pipeline_uri(json!([])), "Missing or invalid pipeline operations JSON"),
        (pipeline_uri(json!(too_many)), "Maximum allowed pipeline operations exceeded"),
        (
            pipeline_uri(json!([{"operation": "explode"}])),
            "Unsupported operation name: explode",
        ),
        (
            pipeline_uri(json!([{"operation": "resize", "params": {"wdith": 10}}])),
            "wdith",
        ),
    ];

    for (uri, expected) in cases {
        let response = router.clone().oneshot(post(&uri, jpeg.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        let message = body_json(response).await["message"].as_str().unwrap().to_string();
        assert!(message.contains(expected), "{}: {}", uri, message);
    }

    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_ten_steps_allowed() {
    let engine = MockEngine::new(100, 100);
    let router = mock_router(engine.clone(), MockSource::new(vec![]), RouterConfig::new());

    let steps: Vec<_> = (0..10).map(|_| json!({"operation": "flop"})).collect();
    let response = router
        .oneshot(post(pipeline_uri(json!(steps)), create_test_jpeg(8, 8)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(engine.calls().len(), 10);
}
