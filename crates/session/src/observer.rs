//! UI-facing session observer
//!
//! Folds the manager's events into a [`SessionView`] that a UI can render
//! directly, and runs a periodic liveness probe so an expired refresh token
//! is noticed even while the user is idle. The probe goes through the same
//! `valid_access_token` path as every other caller, so its failures reach
//! subscribers through the same teardown broadcast.

use crate::error::{AuthFailureReason, SessionError};
use crate::events::SessionEvent;
use crate::manager::SessionManager;
use std::time::Duration;
use storefront_core::{SessionIdentity, SessionState};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Message shown when the session ends involuntarily
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";

/// Render-ready session state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionView {
    pub state: SessionState,
    /// Cached identity, for personalization only
    pub identity: Option<SessionIdentity>,
    /// Set when the session ended without the user asking; drives the
    /// "please log in again" prompt
    pub auth_expired: bool,
    pub error: Option<String>,
}

impl SessionView {
    /// Apply one session event
    pub fn reduce(&self, event: &SessionEvent) -> Self {
        match event {
            SessionEvent::Established { identity } => Self {
                state: SessionState::Authenticated,
                identity: identity.clone(),
                auth_expired: false,
                error: None,
            },
            SessionEvent::Renewed => Self {
                state: SessionState::Authenticated,
                auth_expired: false,
                error: None,
                ..self.clone()
            },
            SessionEvent::AuthFailure { reason } if reason.requires_reauth() => Self {
                state: SessionState::Unauthenticated,
                identity: None,
                auth_expired: true,
                error: Some(SESSION_EXPIRED_MESSAGE.to_string()),
            },
            SessionEvent::AuthFailure { .. } => Self::default(),
        }
    }

    /// Same view with a new state
    fn with_state(&self, state: SessionState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }
}

/// Observes a [`SessionManager`] on behalf of the UI layer
pub struct SessionObserver {
    manager: SessionManager,
    view_tx: watch::Sender<SessionView>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionObserver {
    /// Start the event loop and, if `probe_interval` is non-zero, the probe.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(manager: SessionManager, probe_interval: Duration) -> Self {
        let initial = SessionView {
            state: manager.state(),
            identity: manager.identity(),
            auth_expired: false,
            error: None,
        };
        let (view_tx, _) = watch::channel(initial);
        let cancel = CancellationToken::new();

        let mut observer = Self {
            manager,
            view_tx,
            cancel,
            tasks: Vec::with_capacity(2),
        };
        let event_loop = observer.spawn_event_loop();
        observer.tasks.push(event_loop);
        if !probe_interval.is_zero() {
            let probe = observer.spawn_probe(probe_interval);
            observer.tasks.push(probe);
        }
        observer
    }

    fn spawn_event_loop(&self) -> JoinHandle<()> {
        let manager = self.manager.clone();
        let mut events = manager.subscribe();
        let mut state_rx = manager.subscribe_state();
        let view_tx = self.view_tx.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(event) => {
                            debug!(topic = event.topic(), "Observer received session event");
                            let mut next = view_tx.borrow().reduce(&event);
                            if event == SessionEvent::Renewed {
                                // Renewal may have refreshed the cached role
                                next.identity = manager.identity();
                            }
                            view_tx.send_replace(next);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Observer fell behind on session events");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *state_rx.borrow_and_update();
                        view_tx.send_if_modified(|view| {
                            if view.state == state {
                                return false;
                            }
                            *view = view.with_state(state);
                            true
                        });
                    }
                }
            }
            debug!("Session observer event loop stopped");
        })
    }

    fn spawn_probe(&self, period: Duration) -> JoinHandle<()> {
        let manager = self.manager.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the first probe is one period out
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = probe_once(&manager).await {
                            debug!("Session probe failed: {e}");
                        }
                    }
                }
            }
            debug!("Session probe stopped");
        })
    }

    /// Run one liveness probe now
    pub async fn probe(&self) -> Result<(), SessionError> {
        probe_once(&self.manager).await
    }

    /// Current view
    pub fn view(&self) -> SessionView {
        self.view_tx.borrow().clone()
    }

    /// Subscribe to view changes
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.manager.state()
    }

    pub fn identity(&self) -> Option<SessionIdentity> {
        self.view_tx.borrow().identity.clone()
    }

    /// Dismiss the "please log in again" prompt
    pub fn acknowledge_expiry(&self) {
        self.view_tx.send_if_modified(|view| {
            let modified = view.auth_expired || view.error.is_some();
            view.auth_expired = false;
            view.error = None;
            modified
        });
    }

    /// Sign out: tear down the session, then reset the view
    pub fn logout(&self) {
        info!("Logging out");
        self.manager.force_invalidate(AuthFailureReason::Logout);
        self.view_tx.send_replace(SessionView::default());
    }

    /// Stop the event loop and the probe
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Session observer task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for SessionObserver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn probe_once(manager: &SessionManager) -> Result<(), SessionError> {
    if !manager.is_authenticated() {
        return Ok(());
    }
    manager.valid_access_token().await.map(|_| ())
}
