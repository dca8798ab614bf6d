//! Storefront HTTP client
//!
//! Every authenticated API call should go through [`AuthenticatedClient`],
//! which attaches a valid bearer token and applies the retry-once-on-401
//! contract. [`HttpTokenRenewer`] is the network side of token renewal and
//! [`AuthApi`] starts sessions.

pub mod client;
pub mod types;

pub use client::auth::AuthApi;
pub use client::error::ClientError;
pub use client::executor::AuthenticatedClient;
pub use client::renewal::HttpTokenRenewer;
pub use client::request::ApiRequest;
pub use client::{ApiClient, ApiClientBuilder};
