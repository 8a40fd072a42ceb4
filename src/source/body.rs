use async_trait::async_trait;
use axum::extract::{FromRequest, Multipart, Request};
use bytes::Bytes;
use http::{header, Method};

use super::ImageSource;
use crate::error::SourceError;

pub const BODY_SOURCE: &str = "payload";

/// Upper bound for an uploaded image, raw or multipart.
pub const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Multipart field holding the uploaded image.
const FORM_FIELD_NAME: &str = "file";

/// Reads the image from a POST/PUT body, raw or as a multipart form.
#[derive(Debug, Clone, Copy, Default)]
pub struct BodySource;

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/"))
}

async fn read_form_body(request: Request) -> Result<Bytes, SourceError> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| SourceError::UnreadableBody(e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| SourceError::UnreadableBody(e.body_text()))?
    {
        if field.name() != Some(FORM_FIELD_NAME) {
            continue;
        }
        return field
            .bytes()
            .await
            .map_err(|e| SourceError::UnreadableBody(e.body_text()));
    }

    Err(SourceError::MissingParam(FORM_FIELD_NAME))
}

async fn read_raw_body(request: Request) -> Result<Bytes, SourceError> {
    axum::body::to_bytes(request.into_body(), MAX_BODY_SIZE)
        .await
        .map_err(|e| SourceError::UnreadableBody(e.to_string()))
}

#[async_trait]
impl ImageSource for BodySource {
    fn name(&self) -> &'static str {
        BODY_SOURCE
    }

    fn matches(&self, request: &Request) -> bool {
        request.method() == Method::POST || request.method() == Method::PUT
    }

    async fn get_image(&self, request: Request) -> Result<Bytes, SourceError> {
        let buf = if is_multipart(&request) {
            read_form_body(request).await?
        } else {
            read_raw_body(request).await?
        };

        if buf.is_empty() {
            return Err(SourceError::EmptyBody);
        }
        Ok(buf)
    }
}
