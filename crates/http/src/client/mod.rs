//! Storefront API client

pub mod auth;
pub mod error;
pub mod executor;
pub mod renewal;
pub mod request;

use error::ClientError;
use request::ApiRequest;
use reqwest::{Client, ClientBuilder, header};
use std::time::Duration;
use storefront_core::SessionConfig;
use url::Url;

const DEFAULT_USER_AGENT: &str = concat!("storefront-client/", env!("CARGO_PKG_VERSION"));

/// Unauthenticated storefront API client
///
/// Holds the connection pool and the API base URL. Authentication is layered
/// on top by [`executor::AuthenticatedClient`].
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new client with default configuration
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::builder().base_url(base_url).build()
    }

    /// Create a new client builder
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    /// Client for `config.api_base_url` with the configured timeout
    pub fn from_config(config: &SessionConfig) -> Result<Self, ClientError> {
        Self::builder()
            .base_url(&config.api_base_url)
            .timeout(config.request_timeout())
            .build()
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Underlying connection pool, shared with the auth endpoints
    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Absolute URL for an API path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Create a plain request builder
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client.request(method, self.url(path))
    }

    /// Turn an [`ApiRequest`] into a request builder without credentials
    pub fn prepare(&self, request: &ApiRequest) -> Result<reqwest::RequestBuilder, ClientError> {
        let mut url = Url::parse(&self.url(request.path()))?;
        if !request.query_pairs().is_empty() {
            url.query_pairs_mut().extend_pairs(request.query_pairs());
        }

        let mut headers = request.headers().clone();
        headers.remove(header::AUTHORIZATION);

        let mut builder = self
            .client
            .request(request.method().clone(), url)
            .headers(headers);
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }
        Ok(builder)
    }

    /// Execute a request and map error statuses
    pub async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request.send().await?;
        decode_json(response).await
    }
}

/// Deserialize a successful response or turn the status into an error
pub(crate) async fn decode_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        Ok(response.json().await?)
    } else {
        let message = response.text().await.unwrap_or_else(|_| status.to_string());
        Err(ClientError::from_status(status, message))
    }
}

/// Builder for ApiClient
#[derive(Default)]
pub struct ApiClientBuilder {
    base_url: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl ApiClientBuilder {
    /// Set the base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build the client
    pub fn build(self) -> Result<ApiClient, ClientError> {
        let base_url = self
            .base_url
            .ok_or_else(|| ClientError::Configuration("base_url is required".into()))?;

        // Ensure base_url ends without a trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)?;

        let mut client_builder = ClientBuilder::new()
            .user_agent(self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT));
        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        let client = client_builder.build()?;

        Ok(ApiClient { client, base_url })
    }
}
