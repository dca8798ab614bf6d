//! Network side of token renewal

use super::ApiClient;
use crate::types::{RefreshRequest, RefreshResponse};
use async_trait::async_trait;
use reqwest::Client;
use storefront_core::{SessionConfig, TokenPair};
use storefront_session::{RenewalError, TokenRenewer};
use tracing::{debug, warn};

/// Renews tokens with `POST <auth-base><refresh_path>`
///
/// 4xx answers mean the server refused the refresh token. 5xx answers and
/// transport failures are network errors. A 2xx without a usable pair is
/// malformed.
#[derive(Clone)]
pub struct HttpTokenRenewer {
    client: Client,
    url: String,
}

impl HttpTokenRenewer {
    /// Renewer posting to `url`, sharing `client`'s connection pool
    pub fn new(client: &ApiClient, url: impl Into<String>) -> Self {
        Self {
            client: client.http().clone(),
            url: url.into(),
        }
    }

    /// Renewer for the configured refresh endpoint
    pub fn from_config(client: &ApiClient, config: &SessionConfig) -> Self {
        Self::new(client, config.refresh_url())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TokenRenewer for HttpTokenRenewer {
    async fn renew(&self, refresh_token: &str) -> Result<TokenPair, RenewalError> {
        debug!(url = %self.url, "Requesting token renewal");

        let response = self
            .client
            .post(&self.url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| RenewalError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            warn!(status = status.as_u16(), "Renewal endpoint failed");
            return Err(RenewalError::Network(format!("server returned {status}")));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| status.to_string());
            return Err(RenewalError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RenewalError::Network(e.to_string()))?;
        serde_json::from_slice::<RefreshResponse>(&body)
            .map_err(|e| RenewalError::Malformed(e.to_string()))?
            .into_pair()
            .ok_or_else(|| RenewalError::Malformed("empty token in renewal response".into()))
    }
}
