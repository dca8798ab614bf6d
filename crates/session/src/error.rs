//! Session error types

use crate::renewer::RenewalError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a session was torn down, carried by the `AuthFailure` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailureReason {
    /// No refresh token to renew with
    NoRefreshToken,
    /// The server refused the refresh token (revoked, expired, reused)
    RefreshRejected,
    /// Renewal could not reach the server or the server failed
    RefreshNetworkError,
    /// An authenticated call was rejected again after a renewal
    RetryExhausted,
    /// The credential store could not be read or written
    StorageFailure,
    /// Application-requested invalidation, e.g. the server flagged the session
    Invalidated,
    /// Explicit sign-out
    Logout,
}

impl AuthFailureReason {
    /// Stable reason code for subscribers
    pub fn code(self) -> &'static str {
        match self {
            Self::NoRefreshToken => "no_refresh_token",
            Self::RefreshRejected => "refresh_rejected",
            Self::RefreshNetworkError => "refresh_network_error",
            Self::RetryExhausted => "retry_exhausted",
            Self::StorageFailure => "storage_failure",
            Self::Invalidated => "invalidated",
            Self::Logout => "logout",
        }
    }

    /// Whether the user has to sign in again (anything but a voluntary logout)
    pub fn requires_reauth(self) -> bool {
        !matches!(self, Self::Logout)
    }
}

impl fmt::Display for AuthFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Errors returned by the session manager
///
/// `Clone` because one renewal result is handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Refresh token rejected by server ({status}): {message}")]
    RefreshRejected { status: u16, message: String },

    #[error("Token renewal failed: {0}")]
    RefreshNetwork(String),

    #[error("Request still unauthorized after token renewal")]
    RetryExhausted,

    #[error("Session was invalidated during renewal")]
    Invalidated,

    #[error("Credential store error: {0}")]
    Storage(String),
}

impl SessionError {
    /// Reason code reported when this error tears the session down
    pub fn reason(&self) -> AuthFailureReason {
        match self {
            Self::NoRefreshToken => AuthFailureReason::NoRefreshToken,
            Self::RefreshRejected { .. } => AuthFailureReason::RefreshRejected,
            Self::RefreshNetwork(_) => AuthFailureReason::RefreshNetworkError,
            Self::RetryExhausted => AuthFailureReason::RetryExhausted,
            Self::Storage(_) => AuthFailureReason::StorageFailure,
            Self::Invalidated => AuthFailureReason::Invalidated,
        }
    }
}

impl From<RenewalError> for SessionError {
    fn from(err: RenewalError) -> Self {
        match err {
            RenewalError::Rejected { status, message } => Self::RefreshRejected { status, message },
            RenewalError::Malformed(message) => Self::RefreshRejected {
                status: 200,
                message: format!("malformed renewal response: {message}"),
            },
            RenewalError::Network(message) => Self::RefreshNetwork(message),
        }
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Credential store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
