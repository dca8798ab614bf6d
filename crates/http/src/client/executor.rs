//! Authenticated request executor
//!
//! Attaches a valid bearer token to every call. Each call gets at most one
//! renewal: on a 401 with a token that was just renewed the session ends;
//! otherwise the token is renewed once and the call retried once, and a
//! second 401 ends the session. Other failures are returned unchanged.

use super::request::ApiRequest;
use super::{ApiClient, decode_json};
use crate::client::error::ClientError;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use storefront_session::{AuthFailureReason, SessionManager, TokenOrigin};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct AuthenticatedClient {
    api: ApiClient,
    manager: SessionManager,
}

impl AuthenticatedClient {
    pub fn new(api: ApiClient, manager: SessionManager) -> Self {
        Self { api, manager }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Dispatch `request` with credentials.
    ///
    /// Any response other than a 401 is returned as is, whatever its status.
    /// Errors with [`ClientError::Session`] when no valid token could be
    /// obtained and [`ClientError::RetryExhausted`] when the call is rejected
    /// with a renewed token. In both cases the session is gone.
    pub async fn execute(&self, request: &ApiRequest) -> Result<reqwest::Response, ClientError> {
        let (token, origin) = self.manager.valid_access_token_with_origin().await?;
        let response = self.send(request, &token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        if origin == TokenOrigin::Renewed {
            // This call already spent its one renewal
            return Err(self.exhausted(request));
        }

        info!(
            method = %request.method(),
            path = request.path(),
            "Request unauthorized, renewing token and retrying once"
        );
        // A failed renewal has already torn the session down
        let token = self.manager.renew_rejected(&token).await?;
        let response = self.send(request, &token).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(self.exhausted(request));
        }

        Ok(response)
    }

    fn exhausted(&self, request: &ApiRequest) -> ClientError {
        warn!(
            method = %request.method(),
            path = request.path(),
            "Request still unauthorized after renewal, ending session"
        );
        self.manager
            .force_invalidate(AuthFailureReason::RetryExhausted);
        ClientError::RetryExhausted
    }

    /// Dispatch `request` and deserialize a successful JSON body
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
    ) -> Result<T, ClientError> {
        let response = self.execute(request).await?;
        decode_json(response).await
    }

    /// Authenticated GET returning JSON
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.execute_json(&ApiRequest::get(path)).await
    }

    async fn send(
        &self,
        request: &ApiRequest,
        token: &str,
    ) -> Result<reqwest::Response, ClientError> {
        debug!(method = %request.method(), path = request.path(), "Sending authenticated request");
        Ok(self.api.prepare(request)?.bearer_auth(token).send().await?)
    }
}
