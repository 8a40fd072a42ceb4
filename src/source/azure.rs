//! Azure blob storage source.
//!
//! Authenticates with the OAuth2 client-credentials flow and keeps the access
//! token fresh from a background task, so requests only ever read the current
//! token and never wait on a refresh.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Request;
use bytes::Bytes;
use http::{header, Method, StatusCode};
use serde::Deserialize;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::{non_empty_query_value, AzureSettings, ImageSource, SourceConfig};
use crate::error::SourceError;

pub const AZURE_SOURCE: &str = "azure";

/// Blob service REST API version sent with every request.
pub const AZURE_STORAGE_VERSION: &str = "2021-08-06";

const STORAGE_SCOPE: &str = "https://storage.azure.com/.default";

/// Refresh this long before the token expires.
const REFRESH_MARGIN: Duration = Duration::from_secs(120);

/// Lower bound between two refreshes, also used after a failed refresh.
const MIN_REFRESH_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Delay before the next refresh of a token valid for `expires_in`.
pub(crate) fn refresh_delay(expires_in: Duration) -> Duration {
    expires_in
        .saturating_sub(REFRESH_MARGIN)
        .max(MIN_REFRESH_DELAY)
}

// =============================================================================
// Token credential
// =============================================================================

struct CredentialState {
    http: reqwest::Client,
    settings: AzureSettings,
    token: RwLock<String>,
    refresh_lock: Mutex<()>,
}

impl CredentialState {
    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.settings.authority_host.trim_end_matches('/'),
            self.settings.tenant_id
        )
    }

    /// Fetch a new token and store it. Returns how long it stays valid.
    async fn refresh(&self) -> Result<Duration, SourceError> {
        let _guard = self.refresh_lock.lock().await;

        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("client_secret", &self.settings.client_secret)
            .append_pair("scope", STORAGE_SCOPE)
            .finish();

        let response = self
            .http
            .post(self.token_url())
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await
            .map_err(|e| SourceError::Azure(format!("token request failed: {}", e.without_url())))?;

        if !response.status().is_success() {
            return Err(SourceError::Azure(format!(
                "token request rejected for tenant {} (status={})",
                self.settings.tenant_id,
                response.status().as_u16()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Azure(format!("invalid token response: {}", e.without_url())))?;

        *self.token.write().await = token.access_token;
        Ok(Duration::from_secs(token.expires_in))
    }
}

/// Shared bearer-token credential with a background refresh task.
pub(crate) struct TokenCredential {
    state: Arc<CredentialState>,
    refresher: JoinHandle<()>,
}

impl TokenCredential {
    /// Acquire the first token and start refreshing ahead of expiry.
    pub(crate) async fn start(
        settings: AzureSettings,
        http: reqwest::Client,
    ) -> Result<Self, SourceError> {
        let state = Arc::new(CredentialState {
            http,
            settings,
            token: RwLock::new(String::new()),
            refresh_lock: Mutex::new(()),
        });

        let expires_in = state.refresh().await?;
        info!(
            account = %state.settings.account_name,
            expires_in_secs = expires_in.as_secs(),
            "Azure token acquired"
        );

        let background = state.clone();
        let refresher = tokio::spawn(async move {
            let mut delay = refresh_delay(expires_in);
            loop {
                tokio::time::sleep(delay).await;
                delay = match background.refresh().await {
                    Ok(expires_in) => {
                        debug!(expires_in_secs = expires_in.as_secs(), "Azure token refreshed");
                        refresh_delay(expires_in)
                    }
                    Err(e) => {
                        warn!(error = %e, "Azure token refresh failed, retrying");
                        MIN_REFRESH_DELAY
                    }
                };
            }
        });

        Ok(Self { state, refresher })
    }

    /// Current access token.
    pub(crate) async fn token(&self) -> String {
        self.state.token.read().await.clone()
    }
}

impl Drop for TokenCredential {
    fn drop(&mut self) {
        self.refresher.abort();
    }
}

// =============================================================================
// Source
// =============================================================================

/// Reads blobs named by `azureBlobKey` and `azureContainer`.
pub struct AzureSource {
    config: Arc<SourceConfig>,
    http: reqwest::Client,
    credential: OnceCell<TokenCredential>,
}

impl AzureSource {
    pub fn new(config: Arc<SourceConfig>) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            credential: OnceCell::new(),
        }
    }
}

/// `{endpoint}/{container}/{key}` with each path segment escaped.
pub(crate) fn blob_url(endpoint: &str, container: &str, key: &str) -> Result<Url, SourceError> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| SourceError::Azure(format!("invalid blob endpoint: {}", e)))?;
    url.path_segments_mut()
        .map_err(|_| SourceError::Azure("invalid blob endpoint".to_string()))?
        .pop_if_empty()
        .push(container)
        .extend(key.split('/'));
    Ok(url)
}

#[async_trait]
impl ImageSource for AzureSource {
    fn name(&self) -> &'static str {
        AZURE_SOURCE
    }

    fn matches(&self, request: &Request) -> bool {
        self.config.azure.is_some()
            && request.method() == Method::GET
            && non_empty_query_value(request, "azureBlobKey").is_some()
    }

    async fn get_image(&self, request: Request) -> Result<Bytes, SourceError> {
        let settings = self
            .config
            .azure
            .as_ref()
            .ok_or_else(|| SourceError::Azure("Azure source is not enabled".to_string()))?;

        let key = non_empty_query_value(&request, "azureBlobKey")
            .ok_or(SourceError::MissingParam("azureBlobKey"))?;
        let container = non_empty_query_value(&request, "azureContainer")
            .ok_or(SourceError::MissingParam("azureContainer"))?;

        let credential = self
            .credential
            .get_or_try_init(|| TokenCredential::start(settings.clone(), self.http.clone()))
            .await?;

        let url = blob_url(&settings.blob_endpoint(), &container, &key)?;
        debug!(container = %container, key = %key, "fetching image from Azure");

        let response = self
            .http
            .get(url)
            .bearer_auth(credential.token().await)
            .header("x-ms-version", AZURE_STORAGE_VERSION)
            .send()
            .await
            .map_err(|e| {
                SourceError::Azure(format!(
                    "azure://{}/{}: {}",
                    container,
                    key,
                    e.without_url()
                ))
            })?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                return Err(SourceError::NotFound(format!("azure://{}/{}", container, key)))
            }
            status => {
                return Err(SourceError::Azure(format!(
                    "azure://{}/{}: status {}",
                    container,
                    key,
                    status.as_u16()
                )))
            }
        }

        response.bytes().await.map_err(|e| {
            SourceError::Azure(format!(
                "azure://{}/{}: {}",
                container,
                key,
                e.without_url()
            ))
        })
    }
}
