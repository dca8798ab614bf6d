//! Authenticated-session layer for the storefront client
//!
//! The [`SessionManager`] owns the access/refresh token pair held in a
//! [`CredentialStore`], renews the access token at most once per expiry no
//! matter how many callers need it, and broadcasts [`SessionEvent`]s so every
//! consumer converges on the same view of the session. The
//! [`SessionObserver`] is the UI-facing end of that broadcast.

pub mod error;
pub mod events;
pub mod manager;
pub mod observer;
pub mod renewer;
pub mod store;

pub use error::{AuthFailureReason, SessionError, StoreError};
pub use events::SessionEvent;
pub use manager::{RefreshInfo, SessionManager, SessionManagerBuilder, TokenOrigin};
pub use observer::{SessionObserver, SessionView};
pub use renewer::{RenewalError, TokenRenewer};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore, StoredCredentials};

pub use storefront_core::{SessionIdentity, SessionState, TokenPair};
