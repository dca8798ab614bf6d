//! In-process session event fan-out

use crate::error::AuthFailureReason;
use storefront_core::SessionIdentity;
use tokio::sync::broadcast;
use tracing::trace;

/// Events published by the session manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session was created through the login path
    Established { identity: Option<SessionIdentity> },
    /// The token pair was replaced by a successful renewal
    Renewed,
    /// The session was torn down
    AuthFailure { reason: AuthFailureReason },
}

impl SessionEvent {
    /// Topic name, mirroring the `session:*` event names UI code listens for
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Established { .. } => "session:established",
            Self::Renewed => "session:renewed",
            Self::AuthFailure { .. } => "session:authFailure",
        }
    }
}

/// Broadcast channel wrapper; sending with no subscribers is not an error
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let topic = event.topic();
        match self.tx.send(event) {
            Ok(receivers) => trace!(topic, receivers, "session event published"),
            Err(_) => trace!(topic, "session event dropped, no subscribers"),
        }
    }
}
