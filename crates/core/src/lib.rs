//! Storefront core types and utilities
//!
//! Everything in here is free of I/O beyond configuration loading: the
//! session data model, the token inspector and the shared error type.

pub mod config;
pub mod error;
pub mod token;
pub mod types;
pub mod validation;

#[cfg(any(test, feature = "tests"))]
pub mod testing;

pub use config::SessionConfig;
pub use error::{CoreError, CoreResult};
pub use token::{JwtInspector, TokenClaims, TokenError, TokenInspector};
pub use types::{SessionIdentity, SessionState, TokenPair};
pub use validation::{ValidateConfig, validators};
