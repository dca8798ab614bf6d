//! Wire types for the authentication endpoints

use serde::{Deserialize, Serialize};
use storefront_core::TokenPair;

/// Body of the renewal call
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Successful renewal response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    #[serde(alias = "token")]
    pub access_token: String,
    pub refresh_token: String,
}

impl RefreshResponse {
    /// The new pair, or `None` when either token is empty
    pub fn into_pair(self) -> Option<TokenPair> {
        if self.access_token.is_empty() || self.refresh_token.is_empty() {
            return None;
        }
        Some(TokenPair::new(self.access_token, self.refresh_token))
    }
}

/// Credentials for the login call
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Successful login response
///
/// `user` is kept as raw JSON: the backend's user document carries more than
/// the session needs, and an unexpected shape must not fail the login.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(alias = "token")]
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub user: Option<serde_json::Value>,
}
