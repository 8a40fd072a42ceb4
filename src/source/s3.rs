use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use axum::extract::Request;
use bytes::Bytes;
use http::Method;
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::debug;

use super::{non_empty_query_value, ImageSource, S3Settings, SourceConfig};
use crate::error::SourceError;

pub const S3_SOURCE: &str = "s3";

/// Number of per-region clients kept alive.
const CLIENT_CACHE_CAPACITY: usize = 8;

/// Reads images from S3 or S3-compatible storage.
///
/// Query parameters: `s3key` and `bucket` are required, `region` falls back
/// to the configured default. One client is built per region on first use.
pub struct S3Source {
    config: Arc<SourceConfig>,
    clients: Mutex<LruCache<String, Client>>,
}

impl S3Source {
    pub fn new(config: Arc<SourceConfig>) -> Self {
        let capacity = NonZeroUsize::new(CLIENT_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            clients: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Cached client for `region`. A missing client is built without holding the lock.
    async fn client_for(&self, settings: &S3Settings, region: &str) -> Client {
        if let Some(client) = self.clients.lock().await.get(region) {
            return client.clone();
        }

        let built = settings.client(region).await;
        self.clients
            .lock()
            .await
            .get_or_insert(region.to_string(), || built)
            .clone()
    }
}

#[async_trait]
impl ImageSource for S3Source {
    fn name(&self) -> &'static str {
        S3_SOURCE
    }

    fn matches(&self, request: &Request) -> bool {
        self.config.s3.is_some()
            && request.method() == Method::GET
            && non_empty_query_value(request, "s3key").is_some()
    }

    async fn get_image(&self, request: Request) -> Result<Bytes, SourceError> {
        let settings = self
            .config
            .s3
            .as_ref()
            .ok_or_else(|| SourceError::S3("S3 source is not enabled".to_string()))?;

        let key = non_empty_query_value(&request, "s3key").ok_or(SourceError::MissingParam("s3key"))?;
        let bucket =
            non_empty_query_value(&request, "bucket").ok_or(SourceError::MissingParam("bucket"))?;
        let region = non_empty_query_value(&request, "region")
            .unwrap_or_else(|| settings.default_region.clone());

        debug!(bucket = %bucket, key = %key, region = %region, "fetching image from S3");
        let client = self.client_for(settings, &region).await;

        let object = client
            .get_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let is_no_such_key = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);

                let status_is_404 = e
                    .raw_response()
                    .map(|r| r.status().as_u16() == 404)
                    .unwrap_or(false);

                if is_no_such_key || status_is_404 {
                    return SourceError::NotFound(format!("s3://{}/{}", bucket, key));
                }

                SourceError::S3(format!("s3://{}/{}: {}", bucket, key, e))
            })?;

        let data = object
            .body
            .collect()
            .await
            .map_err(|e| SourceError::S3(format!("s3://{}/{}: {}", bucket, key, e)))?
            .into_bytes();

        Ok(data)
    }
}

impl S3Settings {
    /// Build a client for `region` against the configured endpoint.
    ///
    /// Custom endpoints (MinIO and other S3-compatible stores) use path-style
    /// addressing:
    /// ```ignore
    /// let settings = S3Settings {
    ///     endpoint: Some("http://localhost:9000".into()),
    ///     default_region: "us-east-1".into(),
    /// };
    /// let client = settings.client("eu-west-1").await;
    /// ```
    pub async fn client(&self, region: &str) -> Client {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()));
        if let Some(endpoint) = &self.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let shared = loader.load().await;
        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(self.endpoint.is_some())
            .build();
        Client::from_conf(config)
    }
}
