//! Session creation

use super::{ApiClient, decode_json};
use crate::client::error::ClientError;
use crate::types::{LoginRequest, LoginResponse};
use reqwest::Client;
use storefront_core::{SessionConfig, SessionIdentity, TokenPair};
use storefront_session::{AuthFailureReason, SessionManager};
use tracing::{debug, info};

/// Login and logout against the auth endpoints
///
/// Login is the only place outside the session manager where a token pair
/// enters the system, and it hands the pair straight to
/// [`SessionManager::establish`].
#[derive(Clone)]
pub struct AuthApi {
    client: Client,
    login_url: String,
    manager: SessionManager,
}

impl AuthApi {
    pub fn new(client: &ApiClient, login_url: impl Into<String>, manager: SessionManager) -> Self {
        Self {
            client: client.http().clone(),
            login_url: login_url.into(),
            manager,
        }
    }

    pub fn from_config(client: &ApiClient, config: &SessionConfig, manager: SessionManager) -> Self {
        Self::new(client, config.login_url(), manager)
    }

    /// Sign in with email and password and start a session.
    ///
    /// Returns the cached identity of the new session.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<SessionIdentity>, ClientError> {
        debug!(url = %self.login_url, "Logging in");
        let response = self
            .client
            .post(&self.login_url)
            .json(&LoginRequest { email, password })
            .send()
            .await?;
        let login: LoginResponse = decode_json(response).await?;

        let identity = login.user.and_then(|user| {
            serde_json::from_value::<SessionIdentity>(user)
                .inspect_err(|e| debug!("Login response user not usable, using token claims: {e}"))
                .ok()
        });
        self.manager
            .establish(TokenPair::new(login.access_token, login.refresh_token), identity)?;

        let identity = self.manager.identity();
        info!(
            subject = identity.as_ref().map(|i| i.subject_id.as_str()),
            "Logged in"
        );
        Ok(identity)
    }

    /// Sign out locally
    pub fn logout(&self) {
        self.manager.force_invalidate(AuthFailureReason::Logout);
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }
}
