//! Token renewal transport seam
//!
//! The session manager only knows how to coordinate renewals; the network
//! call itself goes through [`TokenRenewer`] so the coordination logic can
//! be exercised without a server.

use async_trait::async_trait;
use storefront_core::TokenPair;
use thiserror::Error;

/// Renewal failures as seen by the transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenewalError {
    /// The server answered with a client error; the refresh token is unusable
    #[error("Refresh token rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Connectivity failure, timeout or server-side error
    #[error("Renewal request failed: {0}")]
    Network(String),

    /// A 2xx response whose body is not a token pair
    #[error("Malformed renewal response: {0}")]
    Malformed(String),
}

/// Exchanges a refresh token for a new token pair
#[async_trait]
pub trait TokenRenewer: Send + Sync {
    async fn renew(&self, refresh_token: &str) -> Result<TokenPair, RenewalError>;
}
