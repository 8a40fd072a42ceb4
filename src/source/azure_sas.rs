use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use bytes::Bytes;
use http::{HeaderMap, Method};
use tracing::debug;

use super::remote::{fetch_image, parse_image_url, redacted};
use super::{non_empty_query_value, ImageSource, SourceConfig};
use crate::error::SourceError;

pub const AZURE_SAS_SOURCE: &str = "azure-sas";

/// Reads a blob through a pre-signed SAS URL given in `azureSASBlobURL`.
///
/// The SAS token already carries the authorization, so the request is anonymous.
pub struct AzureSasSource {
    config: Arc<SourceConfig>,
    client: reqwest::Client,
}

impl AzureSasSource {
    pub fn new(config: Arc<SourceConfig>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ImageSource for AzureSasSource {
    fn name(&self) -> &'static str {
        AZURE_SAS_SOURCE
    }

    fn matches(&self, request: &Request) -> bool {
        (self.config.enable_url_source || self.config.azure.is_some())
            && request.method() == Method::GET
            && non_empty_query_value(request, "azureSASBlobURL").is_some()
    }

    async fn get_image(&self, request: Request) -> Result<Bytes, SourceError> {
        let raw = non_empty_query_value(&request, "azureSASBlobURL")
            .ok_or(SourceError::MissingParam("azureSASBlobURL"))?;
        let url = parse_image_url(&raw)?;

        debug!(url = %redacted(&url), "fetching image from Azure SAS URL");
        fetch_image(
            &self.client,
            &url,
            HeaderMap::new(),
            self.config.max_allowed_size,
        )
        .await
        .map_err(|e| match e {
            SourceError::UpstreamStatus { status: 404, .. } => {
                SourceError::NotFound(format!("azure blob {}", url.path()))
            }
            other => other,
        })
    }
}
