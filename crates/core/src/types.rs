use serde::{Deserialize, Serialize};
use std::fmt;

/// Access/refresh token pair, always persisted and replaced as one unit.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

// Bearer strings must not leak into logs through `{:?}`.
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Client-side copy of who the session belongs to.
///
/// This is a read-through cache filled from the login response or from the
/// decoded access token. It may be stale and must never drive an access
/// decision; the backend authorizes every request on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    #[serde(rename = "id", alias = "subjectId", alias = "_id")]
    pub subject_id: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl SessionIdentity {
    pub fn new(subject_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            role: role.into(),
            name: None,
            email: None,
        }
    }
}

pub(crate) fn default_role() -> String {
    "user".to_string()
}

/// Observable authentication state, derived from the credential store and
/// the renewal slot rather than stored on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticated,
    Refreshing,
}

impl SessionState {
    /// Whether a session exists (possibly mid-renewal)
    pub fn has_session(self) -> bool {
        !matches!(self, Self::Unauthenticated)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated => "authenticated",
            Self::Refreshing => "refreshing",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_pair_uses_camel_case_keys() {
        let pair = TokenPair::new("a", "r");
        let json = serde_json::to_value(&pair).unwrap();
        assert_eq!(json["accessToken"], "a");
        assert_eq!(json["refreshToken"], "r");
    }

    #[test]
    fn token_pair_debug_is_redacted() {
        let pair = TokenPair::new("secret-access", "secret-refresh");
        let debug = format!("{pair:?}");
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn identity_accepts_backend_user_shape() {
        let identity: SessionIdentity = serde_json::from_str(
            r#"{"_id":"u-1","role":"admin","name":"Ada","email":"ada@example.com"}"#,
        )
        .unwrap();
        assert_eq!(identity.subject_id, "u-1");
        assert_eq!(identity.role, "admin");
        assert_eq!(identity.email.as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn identity_role_defaults_to_user() {
        let identity: SessionIdentity = serde_json::from_str(r#"{"id":"u-2"}"#).unwrap();
        assert_eq!(identity.role, "user");
    }

    #[test]
    fn state_display() {
        assert_eq!(SessionState::Refreshing.to_string(), "refreshing");
        assert!(SessionState::Refreshing.has_session());
        assert!(!SessionState::default().has_session());
    }
}
