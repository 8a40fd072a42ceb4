//! HTTP request handlers.
//!
//! # Endpoints
//!
//! - `GET|POST /{operation}` - Transform an image (see [`Operation::route`])
//! - `GET /` - Service name and version
//! - `GET /health` - Health check
//! - `GET /form` - HTML upload forms

use axum::{
    body::Body,
    extract::{OriginalUri, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error, warn};

use super::form::render_form;
use super::placeholder::Placeholder;
use super::AppState;
use crate::engine::{Image, ImageType};
use crate::error::{ApiError, OperationError};
use crate::operations::Operation;
use crate::options::TransformOptions;
use crate::source::BODY_SOURCE;

/// Response header holding the JSON error when a placeholder is sent.
pub const ERROR_HEADER: &str = "error";

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "bad_request")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    pub status: u16,
}

impl From<&ApiError> for ErrorResponse {
    fn from(err: &ApiError) -> Self {
        Self {
            error: err.code().to_string(),
            message: err.to_string(),
            status: err.status().as_u16(),
        }
    }
}

/// Service identification returned by `/`.
#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub engine: &'static str,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,

    /// Service version
    pub version: &'static str,

    /// Seconds since the server started
    pub uptime: u64,

    /// Available parallelism
    pub cpus: usize,
}

// =============================================================================
// Error Replies
// =============================================================================

fn log_error(err: &ApiError) {
    let status = err.status();
    if status.is_server_error() {
        error!(code = err.code(), status = status.as_u16(), "Server error: {}", err);
    } else if status == StatusCode::NOT_FOUND || status == StatusCode::TOO_MANY_REQUESTS {
        debug!(code = err.code(), status = status.as_u16(), "Client error: {}", err);
    } else {
        warn!(code = err.code(), status = status.as_u16(), "Client error: {}", err);
    }
}

/// Convert ApiError to a JSON HTTP response.
///
/// 4xx errors are logged at WARN (or DEBUG for the noisy ones), 5xx at ERROR.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        log_error(&self);

        let status = self.status();
        let mut response = (status, Json(ErrorResponse::from(&self))).into_response();

        if let ApiError::TooManyRequests { retry_after } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
        response
    }
}

/// Reply with `err`, as the placeholder image when one is configured.
///
/// The placeholder is resized to the request's `width`/`height` and converted
/// to its `type`. If rendering fails the JSON reply is sent instead.
pub async fn error_reply(state: &AppState, uri: &Uri, err: ApiError) -> Response {
    let Some(placeholder) = state.config.placeholder.clone() else {
        return err.into_response();
    };

    let options = match Placeholder::render_options(uri.query().unwrap_or("")) {
        Ok(options) => options,
        Err(message) => {
            debug!(error = %message, "cannot parse placeholder parameters");
            return err.into_response();
        }
    };

    let engine = state.ctx.engine.clone();
    let rendered =
        tokio::task::spawn_blocking(move || placeholder.render(engine.as_ref(), &options)).await;

    let image = match rendered {
        Ok(Ok(image)) => image,
        Ok(Err(e)) => {
            warn!(error = %e, "cannot render placeholder image");
            return err.into_response();
        }
        Err(e) => {
            error!(error = %e, "placeholder task failed");
            return err.into_response();
        }
    };

    log_error(&err);
    let status = state.config.placeholder_status.unwrap_or_else(|| err.status());
    let mut response = image_response(image, status);

    if let Ok(payload) = serde_json::to_string(&ErrorResponse::from(&err)) {
        if let Ok(value) = HeaderValue::from_str(&payload) {
            response.headers_mut().insert(ERROR_HEADER, value);
        }
    }
    if let ApiError::TooManyRequests { retry_after } = err {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    }
    response
}

fn image_response(image: Image, status: StatusCode) -> Response {
    let length = image.body.len();
    let mut response = Response::new(Body::from(image.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(image.mime));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    response
}

// =============================================================================
// Output Negotiation
// =============================================================================

/// Pick an output type from an `Accept` header.
pub fn negotiate_type(accept: &str) -> Option<ImageType> {
    let accept = accept.to_ascii_lowercase();
    [ImageType::Webp, ImageType::Png, ImageType::Jpeg]
        .into_iter()
        .find(|candidate| accept.contains(candidate.mime()))
}

/// Resolve the requested `type`, rewriting `auto` from the `Accept` header.
///
/// Returns whether the reply depends on `Accept`.
pub fn resolve_output_type(
    options: &mut TransformOptions,
    headers: &HeaderMap,
) -> Result<bool, ApiError> {
    if options.image_type.is_empty() {
        return Ok(false);
    }

    if options.image_type.eq_ignore_ascii_case("auto") {
        let accept = headers
            .get(header::ACCEPT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        options.image_type = negotiate_type(accept)
            .map(|t| t.name().to_string())
            .unwrap_or_default();
        return Ok(true);
    }

    if !ImageType::from_name(&options.image_type).is_known() {
        return Err(ApiError::OutputFormat);
    }
    Ok(false)
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle an image operation request.
///
/// Resolves the image source, validates the input, runs the operation and
/// replies with the encoded result. Errors go through [`error_reply`].
pub async fn image_handler(state: AppState, operation: Operation, request: Request) -> Response {
    let uri = request.uri().clone();
    match process_image(&state, operation, request).await {
        Ok(response) => response,
        Err(err) => error_reply(&state, &uri, err).await,
    }
}

async fn process_image(
    state: &AppState,
    operation: Operation,
    request: Request,
) -> Result<Response, ApiError> {
    let source = state
        .sources
        .resolve(&request)
        .ok_or(ApiError::MissingImageSource)?;

    let query = request.uri().query().unwrap_or("").to_string();
    let headers = request.headers().clone();

    debug!(source = source.name(), operation = operation.name(), "fetching image");
    let buf = tokio::time::timeout(state.config.read_timeout, source.get_image(request))
        .await
        .map_err(|_| {
            let message = format!("Timed out reading the image from {}", source.name());
            if source.name() == BODY_SOURCE {
                ApiError::BadRequest(message)
            } else {
                ApiError::BadGateway(message)
            }
        })??;
    if buf.is_empty() {
        return Err(ApiError::EmptyBody);
    }

    let input_type = state.ctx.engine.detect_type(&buf);
    if !input_type.is_known() {
        return Err(ApiError::UnsupportedMedia);
    }

    let mut options = TransformOptions::from_query(&query)
        .map_err(|e| ApiError::BadRequest(format!("Error while processing parameters, {}", e)))?;
    let vary_accept = resolve_output_type(&mut options, &headers)?;

    let max_resolution = state.config.max_allowed_resolution;
    if max_resolution > 0.0 {
        let meta = state
            .ctx
            .metadata(buf.clone())
            .await
            .map_err(|e| ApiError::from(OperationError::from(e)))?;
        let megapixels = (meta.width as f64 * meta.height as f64) / 1_000_000.0;
        if megapixels > max_resolution {
            return Err(ApiError::ResolutionTooBig);
        }
    }

    let image = operation.run(&state.ctx, buf, &options).await?;

    let size = if state.config.return_size && image.mime != "application/json" {
        state.ctx.metadata(image.body.clone()).await.ok()
    } else {
        None
    };

    let mut response = image_response(image, StatusCode::OK);
    let headers = response.headers_mut();
    if let Some(meta) = size {
        headers.insert("image-width", HeaderValue::from(meta.width));
        headers.insert("image-height", HeaderValue::from(meta.height));
    }
    if vary_accept {
        headers.insert(header::VARY, HeaderValue::from_static("Accept"));
    }
    Ok(response)
}

/// Handle `/`.
pub async fn index_handler(State(state): State<AppState>) -> Json<IndexResponse> {
    Json(IndexResponse {
        name: "imagegate",
        version: env!("CARGO_PKG_VERSION"),
        engine: state.ctx.engine.name(),
    })
}

/// Handle `/health`.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started.elapsed().as_secs(),
        cpus: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    })
}

/// Handle `/form`.
pub async fn form_handler(State(state): State<AppState>) -> Html<String> {
    Html(render_form(&state.config.path_prefix))
}

/// Fallback for unknown paths.
pub async fn not_found_handler(OriginalUri(uri): OriginalUri) -> Response {
    ApiError::NotFound(format!("Not found: {}", uri.path())).into_response()
}

// =============================================================================
// Tests
// =============================================================================
