use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use bytes::{Bytes, BytesMut};
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use tracing::debug;
use url::Url;

use super::{is_origin_allowed, non_empty_query_value, ImageSource, SourceConfig};
use crate::error::SourceError;

pub const HTTP_SOURCE: &str = "http";

pub const USER_AGENT: &str = concat!("imagegate/", env!("CARGO_PKG_VERSION"));

const FORWARD_AUTHORIZATION: &str = "x-forward-authorization";

/// Fetches images from remote HTTP(S) URLs given by the `url` query parameter.
pub struct HttpSource {
    config: Arc<SourceConfig>,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(config: Arc<SourceConfig>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Headers sent upstream: forwarded inbound headers first, then authorization.
    pub(crate) fn outbound_headers(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for name in &self.config.forward_headers {
            let Ok(name) = HeaderName::try_from(name.trim()) else {
                continue;
            };
            if let Some(value) = inbound.get(&name) {
                headers.insert(name, value.clone());
            }
        }

        let authorization = match &self.config.authorization {
            Some(value) => HeaderValue::from_str(value).ok(),
            None if self.config.auth_forwarding => inbound
                .get(FORWARD_AUTHORIZATION)
                .or_else(|| inbound.get(header::AUTHORIZATION))
                .cloned(),
            None => None,
        };
        if let Some(value) = authorization {
            headers.insert(header::AUTHORIZATION, value);
        }

        headers
    }
}

/// Parse an image URL, accepting only http and https.
pub(crate) fn parse_image_url(raw: &str) -> Result<Url, SourceError> {
    let url = Url::parse(raw).map_err(|_| SourceError::InvalidUrl)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(SourceError::InvalidUrl),
    }
}

/// URL without userinfo, safe to put in logs and error messages.
pub(crate) fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.to_string()
}

fn fetch_error(err: reqwest::Error, url: &Url) -> SourceError {
    SourceError::Fetch(format!("{} (url={})", err.without_url(), redacted(url)))
}

/// Download an image over HTTP.
///
/// When `max_size` is non-zero, a HEAD request is sent first and the download
/// is refused if the advertised length is too big; the body itself is also
/// capped while streaming.
pub async fn fetch_image(
    client: &reqwest::Client,
    url: &Url,
    headers: HeaderMap,
    max_size: u64,
) -> Result<Bytes, SourceError> {
    if max_size > 0 {
        let head = client
            .head(url.clone())
            .headers(headers.clone())
            .header(header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|e| fetch_error(e, url))?;

        if head.status().is_success() {
            let advertised = head
                .headers()
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());

            if let Some(size) = advertised.filter(|size| *size > max_size) {
                return Err(SourceError::TooLarge {
                    size,
                    limit: max_size,
                });
            }
        }
    }

    let mut response = client
        .get(url.clone())
        .headers(headers)
        .header(header::USER_AGENT, USER_AGENT)
        .send()
        .await
        .map_err(|e| fetch_error(e, url))?;

    if response.status() != StatusCode::OK {
        return Err(SourceError::UpstreamStatus {
            status: response.status().as_u16(),
            url: redacted(url),
        });
    }

    let mut buf = BytesMut::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| fetch_error(e, url))? {
        buf.extend_from_slice(&chunk);
        if max_size > 0 && buf.len() as u64 > max_size {
            return Err(SourceError::TooLarge {
                size: buf.len() as u64,
                limit: max_size,
            });
        }
    }

    Ok(buf.freeze())
}

#[async_trait]
impl ImageSource for HttpSource {
    fn name(&self) -> &'static str {
        HTTP_SOURCE
    }

    fn matches(&self, request: &Request) -> bool {
        self.config.enable_url_source
            && request.method() == Method::GET
            && non_empty_query_value(request, "url").is_some()
    }

    async fn get_image(&self, request: Request) -> Result<Bytes, SourceError> {
        let raw = non_empty_query_value(&request, "url").ok_or(SourceError::MissingParam("url"))?;
        let url = parse_image_url(&raw)?;

        if !is_origin_allowed(&url, &self.config.allowed_origins) {
            let host = url.host_str().unwrap_or_default().to_string();
            return Err(SourceError::OriginNotAllowed(host));
        }

        debug!(url = %redacted(&url), "fetching remote image");
        let headers = self.outbound_headers(request.headers());
        fetch_image(&self.client, &url, headers, self.config.max_allowed_size).await
    }
}
