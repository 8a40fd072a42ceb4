use http::StatusCode;
use thiserror::Error;

/// Errors raised while coercing raw request parameters into typed options.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoerceError {
    /// A recognized parameter carried a value of the wrong shape
    #[error("error while processing parameter \"{key}\" with value \"{value}\", error: {reason}")]
    InvalidParam {
        key: String,
        value: String,
        reason: String,
    },

    /// Strict decoding met a parameter name it does not know
    #[error("unknown parameter \"{0}\"")]
    UnknownParam(String),
}

/// Errors that can occur while fetching image bytes from a source.
///
/// Messages carry the object key, bucket or URL involved but never credentials.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// A query parameter the source needs is absent
    #[error("Missing required param: {0}")]
    MissingParam(&'static str),

    /// Requested path escapes the mount directory or cannot be read
    #[error("Invalid file path")]
    InvalidFilePath,

    /// Requested file does not exist under the mount directory
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Remote URL could not be parsed or uses an unsupported scheme
    #[error("Invalid image URL")]
    InvalidUrl,

    /// Remote URL does not match any allowed origin
    #[error("not allowed remote URL origin: {0}")]
    OriginNotAllowed(String),

    /// Remote payload is bigger than the configured limit
    #[error("Content-Length {size} exceeds maximum allowed {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    /// Upstream server answered with a non-success status
    #[error("error fetching remote http image: (status={status}) (url={url})")]
    UpstreamStatus { status: u16, url: String },

    /// Network error while talking to an upstream server
    #[error("error downloading image: {0}")]
    Fetch(String),

    /// Request carried no image bytes
    #[error("Empty or unreadable image")]
    EmptyBody,

    /// Request body could not be read
    #[error("Unable to read request body: {0}")]
    UnreadableBody(String),

    /// Object not found in cloud storage
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Error from Azure blob storage or its token endpoint
    #[error("Azure error: {0}")]
    Azure(String),
}

/// Errors reported by an image engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Input bytes are not an image type the engine can read
    #[error("Unsupported image type")]
    UnsupportedType,

    /// Failed to decode the input image
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// Failed to encode the output image
    #[error("Failed to encode image: {0}")]
    Encode(String),

    /// Requested geometry cannot be applied to the image
    #[error("Invalid geometry: {0}")]
    Geometry(String),

    /// Feature not available in this engine or configuration
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Engine task failed to complete
    #[error("Engine failure: {0}")]
    Internal(String),
}

/// Errors raised by a named operation or by the pipeline.
#[derive(Debug, Clone, Error)]
pub enum OperationError {
    /// Operation-specific parameter is missing
    #[error("Missing required param: {0}")]
    MissingParam(&'static str),

    /// Output type is not a known image type
    #[error("Invalid image type: {0}")]
    InvalidType(String),

    /// Computed geometry cannot be honoured
    #[error("{0}")]
    NotAcceptable(String),

    /// Overlay image for watermarkImage could not be fetched
    #[error("Unable to retrieve watermark image. {0}")]
    Overlay(String),

    /// Pipeline carried no operations
    #[error("Missing or invalid pipeline operations JSON")]
    EmptyPipeline,

    /// Pipeline carried more operations than allowed
    #[error("Maximum allowed pipeline operations exceeded")]
    TooManySteps,

    /// Pipeline step names an operation that does not exist
    #[error("Unsupported operation name: {0}")]
    UnknownOperation(String),

    /// Pipeline step parameters failed strict coercion
    #[error("Invalid params for operation \"{operation}\": {source}")]
    StepParams {
        operation: String,
        #[source]
        source: CoerceError,
    },

    /// Error from the image engine
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// HTTP-facing error taxonomy.
///
/// Every error leaving the server is one of these, each mapped to a fixed
/// status code and a machine-readable code.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Malformed or missing parameters, invalid image bytes
    #[error("{0}")]
    BadRequest(String),

    #[error("Empty or unreadable image")]
    EmptyBody,

    #[error("Cannot process the image due to missing or invalid params")]
    MissingImageSource,

    #[error("Invalid file path")]
    InvalidFilePath,

    #[error("Invalid image URL")]
    InvalidImageUrl,

    #[error("Unsupported output image format")]
    OutputFormat,

    #[error("Invalid URL signature")]
    InvalidUrlSignature,

    #[error("Invalid or missing API key")]
    InvalidApiKey,

    #[error("URL signature mismatch")]
    UrlSignatureMismatch,

    /// Disallowed remote origin
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("HTTP method not allowed. Try with a POST or GET method")]
    MethodNotAllowed,

    #[error("GET method not allowed. Make sure a mount directory or a remote URL source is enabled")]
    GetMethodNotAllowed,

    #[error("{0}")]
    NotAcceptable(String),

    #[error("Unsupported media type")]
    UnsupportedMedia,

    #[error("Image resolution is too big")]
    ResolutionTooBig,

    #[error("Rate limit exceeded, retry in {retry_after}s")]
    TooManyRequests { retry_after: u64 },

    #[error("{0}")]
    Internal(String),

    #[error("Not implemented endpoint")]
    NotImplemented,

    /// Upstream or storage failure
    #[error("{0}")]
    BadGateway(String),
}

impl ApiError {
    /// HTTP status code for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_)
            | ApiError::EmptyBody
            | ApiError::MissingImageSource
            | ApiError::InvalidFilePath
            | ApiError::InvalidImageUrl
            | ApiError::OutputFormat
            | ApiError::InvalidUrlSignature => StatusCode::BAD_REQUEST,
            ApiError::InvalidApiKey => StatusCode::UNAUTHORIZED,
            ApiError::UrlSignatureMismatch | ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed | ApiError::GetMethodNotAllowed => {
                StatusCode::METHOD_NOT_ALLOWED
            }
            ApiError::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            ApiError::UnsupportedMedia => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::ResolutionTooBig => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::EmptyBody => "empty_body",
            ApiError::MissingImageSource => "missing_image_source",
            ApiError::InvalidFilePath => "invalid_file_path",
            ApiError::InvalidImageUrl => "invalid_image_url",
            ApiError::OutputFormat => "unsupported_output_format",
            ApiError::InvalidUrlSignature => "invalid_url_signature",
            ApiError::InvalidApiKey => "invalid_api_key",
            ApiError::UrlSignatureMismatch => "url_signature_mismatch",
            ApiError::Forbidden(_) => "origin_not_allowed",
            ApiError::NotFound(_) => "not_found",
            ApiError::MethodNotAllowed | ApiError::GetMethodNotAllowed => "method_not_allowed",
            ApiError::NotAcceptable(_) => "not_acceptable",
            ApiError::UnsupportedMedia => "unsupported_media_type",
            ApiError::ResolutionTooBig => "resolution_too_big",
            ApiError::TooManyRequests { .. } => "rate_limited",
            ApiError::Internal(_) => "internal_error",
            ApiError::NotImplemented => "not_implemented",
            ApiError::BadGateway(_) => "upstream_error",
        }
    }
}

impl From<SourceError> for ApiError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::InvalidFilePath => ApiError::InvalidFilePath,
            SourceError::InvalidUrl => ApiError::InvalidImageUrl,
            SourceError::EmptyBody => ApiError::EmptyBody,
            SourceError::OriginNotAllowed(_) => ApiError::Forbidden(err.to_string()),
            SourceError::FileNotFound(_) | SourceError::NotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            SourceError::UpstreamStatus { status: 404, .. } => ApiError::NotFound(err.to_string()),
            SourceError::MissingParam(_)
            | SourceError::TooLarge { .. }
            | SourceError::UnreadableBody(_) => ApiError::BadRequest(err.to_string()),
            SourceError::UpstreamStatus { .. }
            | SourceError::Fetch(_)
            | SourceError::S3(_)
            | SourceError::Azure(_) => ApiError::BadGateway(err.to_string()),
        }
    }
}

impl From<OperationError> for ApiError {
    fn from(err: OperationError) -> Self {
        match err {
            OperationError::NotAcceptable(message) => ApiError::NotAcceptable(message),
            OperationError::Engine(EngineError::Internal(message)) => ApiError::Internal(message),
            other => ApiError::BadRequest(format!("Error while processing the image: {}", other)),
        }
    }
}
