//! Session manager: token renewal coordination
//!
//! At most one renewal is in flight at any moment. Every caller that needs a
//! fresh access token while a renewal is running awaits the same shared
//! future, so N concurrent callers at expiry produce exactly one network call
//! and all observe the same outcome.
//!
//! The shared renewal future does its own bookkeeping (persist the new pair,
//! clear the slot, publish state and events) before it resolves, so by the
//! time any waiter wakes up the store already reflects the result.

use crate::error::{AuthFailureReason, SessionError};
use crate::events::{EventBus, SessionEvent};
use crate::renewer::{RenewalError, TokenRenewer};
use crate::store::{CredentialStore, StoredCredentials};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use storefront_core::{
    JwtInspector, SessionConfig, SessionIdentity, SessionState, TokenInspector, TokenPair,
};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

type SharedRenewal = Shared<BoxFuture<'static, Result<String, SessionError>>>;

/// The one in-flight renewal
struct RefreshOperation {
    id: u64,
    started_at: Instant,
    future: SharedRenewal,
}

/// Public view of an in-flight renewal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshInfo {
    pub id: u64,
    pub started_at: Instant,
}

/// Where a token handed out by the manager came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOrigin {
    /// The stored token, still outside the skew window
    Stored,
    /// Produced by a renewal this call started or joined
    Renewed,
}

/// What the locked section decided
enum Next {
    Ready(String),
    Wait(SharedRenewal),
    Fail(SessionError),
}

/// Builder for [`SessionManager`]
pub struct SessionManagerBuilder {
    store: Arc<dyn CredentialStore>,
    renewer: Arc<dyn TokenRenewer>,
    inspector: Arc<dyn TokenInspector>,
    expiry_skew: Duration,
    event_capacity: usize,
}

impl SessionManagerBuilder {
    /// Use a different token format
    pub fn inspector(mut self, inspector: Arc<dyn TokenInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    /// Renew this long before the access token's stated expiry
    pub fn expiry_skew(mut self, skew: Duration) -> Self {
        self.expiry_skew = skew;
        self
    }

    /// Buffer size of the event channel
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Apply the relevant fields of a [`SessionConfig`]
    pub fn config(self, config: &SessionConfig) -> Self {
        self.expiry_skew(config.expiry_skew())
    }

    pub fn build(self) -> SessionManager {
        let initial = match self.store.load() {
            Ok(Some(_)) => SessionState::Authenticated,
            Ok(None) => SessionState::Unauthenticated,
            Err(e) => {
                warn!("Failed to read stored credentials, starting signed out: {e}");
                SessionState::Unauthenticated
            }
        };
        let (state_tx, _) = watch::channel(initial);

        SessionManager {
            inner: Arc::new(Inner {
                store: self.store,
                renewer: self.renewer,
                inspector: self.inspector,
                expiry_skew: self.expiry_skew,
                refresh: Mutex::new(None),
                epoch: AtomicU64::new(0),
                next_operation: AtomicU64::new(1),
                state_tx,
                events: EventBus::new(self.event_capacity),
            }),
        }
    }
}

/// Owns the session's credentials and renews them on demand.
///
/// Cheap to clone; clones share the same state. Construct one per session
/// scope (tests build isolated instances).
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn CredentialStore>,
    renewer: Arc<dyn TokenRenewer>,
    inspector: Arc<dyn TokenInspector>,
    expiry_skew: Duration,
    refresh: Mutex<Option<RefreshOperation>>,
    /// Bumped on every teardown or login; a renewal that started under an
    /// older epoch must not write its result.
    epoch: AtomicU64,
    next_operation: AtomicU64,
    state_tx: watch::Sender<SessionState>,
    events: EventBus,
}

impl SessionManager {
    /// Default skew applied before the stated expiry
    pub const DEFAULT_EXPIRY_SKEW: Duration = Duration::from_secs(60);

    pub fn builder(
        store: Arc<dyn CredentialStore>,
        renewer: Arc<dyn TokenRenewer>,
    ) -> SessionManagerBuilder {
        SessionManagerBuilder {
            store,
            renewer,
            inspector: Arc::new(JwtInspector::new()),
            expiry_skew: Self::DEFAULT_EXPIRY_SKEW,
            event_capacity: 64,
        }
    }

    /// Manager with the JWT inspector and the default skew
    pub fn new(store: Arc<dyn CredentialStore>, renewer: Arc<dyn TokenRenewer>) -> Self {
        Self::builder(store, renewer).build()
    }

    /// Return an access token that is not known to be expired.
    ///
    /// Returns the stored token when it is outside the skew window, otherwise
    /// starts (or joins) a renewal and returns its result. Fails without any
    /// network call when there is no session to renew.
    pub async fn valid_access_token(&self) -> Result<String, SessionError> {
        self.valid_access_token_with_origin()
            .await
            .map(|(token, _)| token)
    }

    /// Like [`valid_access_token`](Self::valid_access_token), also reporting
    /// whether obtaining the token involved a renewal
    pub async fn valid_access_token_with_origin(
        &self,
    ) -> Result<(String, TokenOrigin), SessionError> {
        let next = {
            let mut slot = self.inner.lock_refresh();
            if let Some(operation) = slot.as_ref() {
                debug!(operation = operation.id, "Joining in-flight token renewal");
                Next::Wait(operation.future.clone())
            } else {
                match self.inner.store.load() {
                    Ok(None) => Next::Fail(SessionError::NoRefreshToken),
                    Err(e) => Next::Fail(e.into()),
                    Ok(Some(credentials)) => {
                        let tokens = credentials.tokens;
                        if self
                            .inner
                            .inspector
                            .is_expired(&tokens.access_token, self.inner.expiry_skew)
                        {
                            debug!("Access token expired or about to expire");
                            Next::Wait(self.inner.start_renewal(&mut slot, tokens.refresh_token))
                        } else {
                            Next::Ready(tokens.access_token)
                        }
                    }
                }
            }
        };

        self.inner.resolve(next).await
    }

    /// Renew after the server answered 401 for `rejected_token`.
    ///
    /// Joins an in-flight renewal if there is one. If the store already holds
    /// a different, unexpired token (another caller renewed in the meantime)
    /// that token is returned without a network call.
    pub async fn renew_rejected(&self, rejected_token: &str) -> Result<String, SessionError> {
        let next = {
            let mut slot = self.inner.lock_refresh();
            if let Some(operation) = slot.as_ref() {
                debug!(operation = operation.id, "Joining in-flight token renewal after 401");
                Next::Wait(operation.future.clone())
            } else {
                match self.inner.store.load() {
                    Ok(None) => Next::Fail(SessionError::NoRefreshToken),
                    Err(e) => Next::Fail(e.into()),
                    Ok(Some(credentials)) => {
                        let tokens = credentials.tokens;
                        if tokens.access_token != rejected_token
                            && !self
                                .inner
                                .inspector
                                .is_expired(&tokens.access_token, self.inner.expiry_skew)
                        {
                            debug!("Token already renewed by another caller");
                            Next::Ready(tokens.access_token)
                        } else {
                            info!("Server rejected access token, renewing");
                            Next::Wait(self.inner.start_renewal(&mut slot, tokens.refresh_token))
                        }
                    }
                }
            }
        };

        self.inner.resolve(next).await.map(|(token, _)| token)
    }

    /// Tear the session down unconditionally.
    ///
    /// Clears the store, abandons any in-flight renewal (its result will not
    /// be written) and emits `AuthFailure`.
    pub fn force_invalidate(&self, reason: AuthFailureReason) {
        self.inner.teardown(reason);
    }

    /// True iff a token pair is stored. Says nothing about expiry.
    pub fn is_authenticated(&self) -> bool {
        matches!(self.inner.store.load(), Ok(Some(_)))
    }

    /// Start a session from a login response.
    ///
    /// When `identity` is `None` it is derived from the access token claims.
    /// Any in-flight renewal belongs to the previous session and is abandoned.
    pub fn establish(
        &self,
        tokens: TokenPair,
        identity: Option<SessionIdentity>,
    ) -> Result<(), SessionError> {
        let identity = identity.or_else(|| self.inner.derive_identity(&tokens.access_token));
        let credentials = StoredCredentials::new(tokens, identity.clone());

        {
            let mut slot = self.inner.lock_refresh();
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            *slot = None;
            self.inner.store.replace(&credentials)?;
        }

        info!(
            subject = identity.as_ref().map(|i| i.subject_id.as_str()),
            "Session established"
        );
        self.inner.state_tx.send_replace(SessionState::Authenticated);
        self.inner.events.emit(SessionEvent::Established { identity });
        Ok(())
    }

    /// Cached identity; may be stale
    pub fn identity(&self) -> Option<SessionIdentity> {
        self.inner
            .store
            .load()
            .ok()
            .flatten()
            .and_then(|credentials| credentials.identity)
    }

    /// Stated expiry of the stored access token, if it decodes
    pub fn access_token_expiry(&self) -> Option<DateTime<Utc>> {
        let credentials = self.inner.store.load().ok().flatten()?;
        self.inner
            .inspector
            .expiry(&credentials.tokens.access_token)
            .ok()
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to state changes
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// The in-flight renewal, if any
    pub fn refresh_in_flight(&self) -> Option<RefreshInfo> {
        self.inner.lock_refresh().as_ref().map(|operation| RefreshInfo {
            id: operation.id,
            started_at: operation.started_at,
        })
    }

    /// Configured expiry skew
    pub fn expiry_skew(&self) -> Duration {
        self.inner.expiry_skew
    }
}

impl Inner {
    fn lock_refresh(&self) -> MutexGuard<'_, Option<RefreshOperation>> {
        self.refresh.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn resolve(&self, next: Next) -> Result<(String, TokenOrigin), SessionError> {
        match next {
            Next::Ready(token) => Ok((token, TokenOrigin::Stored)),
            Next::Wait(renewal) => renewal.await.map(|token| (token, TokenOrigin::Renewed)),
            Next::Fail(err) => {
                self.teardown(err.reason());
                Err(err)
            }
        }
    }

    /// Spawn the single renewal and park a shared handle to it in `slot`.
    ///
    /// The renewal runs as its own task, so it settles even if every waiter
    /// is dropped. Caller holds the refresh lock and has checked that the
    /// slot is empty.
    fn start_renewal(
        self: &Arc<Self>,
        slot: &mut Option<RefreshOperation>,
        refresh_token: String,
    ) -> SharedRenewal {
        let id = self.next_operation.fetch_add(1, Ordering::Relaxed);
        let epoch = self.epoch.load(Ordering::SeqCst);
        let task = tokio::spawn(Arc::clone(self).run_renewal(id, epoch, refresh_token));
        let inner = Arc::clone(self);
        let future = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    let failure = SessionError::RefreshNetwork(format!("renewal task failed: {e}"));
                    error!(operation = id, "Token renewal task failed: {e}");
                    inner.teardown_if_current(epoch, failure.reason());
                    Err(failure)
                }
            }
        }
        .boxed()
        .shared();

        *slot = Some(RefreshOperation {
            id,
            started_at: Instant::now(),
            future: future.clone(),
        });
        self.state_tx.send_replace(SessionState::Refreshing);
        info!(operation = id, "Starting token renewal");
        future
    }

    async fn run_renewal(
        self: Arc<Self>,
        id: u64,
        epoch: u64,
        refresh_token: String,
    ) -> Result<String, SessionError> {
        let result = self.renewer.renew(&refresh_token).await;

        let mut slot = self.lock_refresh();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            // Invalidated or re-established while the call was out; whoever
            // did that already cleaned up and reported.
            if slot.as_ref().is_some_and(|operation| operation.id == id) {
                *slot = None;
            }
            warn!(operation = id, "Discarding renewal result for an invalidated session");
            return Err(SessionError::Invalidated);
        }
        *slot = None;

        let failure = match result {
            Ok(tokens) if self.inspector.is_expired(&tokens.access_token, Duration::ZERO) => {
                SessionError::from(RenewalError::Malformed(
                    "renewed access token is expired or unreadable".into(),
                ))
            }
            Ok(tokens) => {
                let cached = self
                    .store
                    .load()
                    .ok()
                    .flatten()
                    .and_then(|credentials| credentials.identity);
                let identity = merge_identity(cached, self.derive_identity(&tokens.access_token));
                let access_token = tokens.access_token.clone();
                match self.store.replace(&StoredCredentials::new(tokens, identity)) {
                    Ok(()) => {
                        drop(slot);
                        info!(operation = id, "Token renewal succeeded");
                        self.state_tx.send_replace(SessionState::Authenticated);
                        self.events.emit(SessionEvent::Renewed);
                        return Ok(access_token);
                    }
                    Err(e) => SessionError::from(e),
                }
            }
            Err(e) => SessionError::from(e),
        };

        // Clear under the same lock so no new renewal can start from the
        // refresh token that just failed.
        self.clear_locked(&mut slot);
        drop(slot);
        error!(operation = id, reason = %failure.reason(), "Token renewal failed: {failure}");
        self.announce_teardown(failure.reason());
        Err(failure)
    }

    fn teardown(&self, reason: AuthFailureReason) {
        {
            let mut slot = self.lock_refresh();
            self.clear_locked(&mut slot);
        }
        self.announce_teardown(reason);
    }

    /// Teardown unless a newer session or teardown already took over
    fn teardown_if_current(&self, epoch: u64, reason: AuthFailureReason) {
        {
            let mut slot = self.lock_refresh();
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            self.clear_locked(&mut slot);
        }
        self.announce_teardown(reason);
    }

    fn clear_locked(&self, slot: &mut Option<RefreshOperation>) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(operation) = slot.take() {
            debug!(operation = operation.id, "Abandoning in-flight renewal");
        }
        if let Err(e) = self.store.clear() {
            error!("Failed to clear credential store: {e}");
        }
    }

    fn announce_teardown(&self, reason: AuthFailureReason) {
        warn!(reason = %reason, "Session torn down");
        self.state_tx.send_replace(SessionState::Unauthenticated);
        self.events.emit(SessionEvent::AuthFailure { reason });
    }

    fn derive_identity(&self, access_token: &str) -> Option<SessionIdentity> {
        self.inspector
            .decode(access_token)
            .inspect_err(|e| debug!("Access token claims unavailable: {e}"))
            .ok()
            .map(|claims| claims.identity())
    }
}

/// Keep the richer cached identity while the subject is unchanged, taking
/// the role from the newest token.
fn merge_identity(
    cached: Option<SessionIdentity>,
    decoded: Option<SessionIdentity>,
) -> Option<SessionIdentity> {
    match (cached, decoded) {
        (Some(cached), Some(decoded)) if cached.subject_id == decoded.subject_id => {
            Some(SessionIdentity {
                role: decoded.role,
                ..cached
            })
        }
        (_, Some(decoded)) => Some(decoded),
        (cached, None) => cached,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCredentialStore;
    use async_trait::async_trait;
    use mockall::mock;
    use std::sync::atomic::AtomicUsize;
    use storefront_core::testing::{mint_token, token_expiring_in};
    use tokio::sync::Notify;

    mock! {
        pub Renewer {}

        #[async_trait]
        impl TokenRenewer for Renewer {
            async fn renew(&self, refresh_token: &str) -> Result<TokenPair, RenewalError>;
        }
    }

    /// Renewer that blocks until released and counts calls
    struct GatedRenewer {
        calls: AtomicUsize,
        release: Notify,
        outcome: Result<TokenPair, RenewalError>,
    }

    impl GatedRenewer {
        fn new(outcome: Result<TokenPair, RenewalError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                release: Notify::new(),
                outcome,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenRenewer for GatedRenewer {
        async fn renew(&self, _refresh_token: &str) -> Result<TokenPair, RenewalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            self.outcome.clone()
        }
    }

    fn store_with(access: &str, refresh: &str) -> Arc<MemoryCredentialStore> {
        Arc::new(MemoryCredentialStore::with_credentials(
            StoredCredentials::new(TokenPair::new(access, refresh), None),
        ))
    }

    fn rejected(status: u16) -> RenewalError {
        RenewalError::Rejected {
            status,
            message: "refresh token revoked".into(),
        }
    }

    #[tokio::test]
    async fn test_fresh_token_returned_without_renewal() {
        let token = token_expiring_in("u1", 3600);
        let mut renewer = MockRenewer::new();
        renewer.expect_renew().never();

        let manager = SessionManager::new(store_with(&token, "r1"), Arc::new(renewer));
        assert_eq!(manager.state(), SessionState::Authenticated);
        assert_eq!(manager.valid_access_token().await.unwrap(), token);
    }

    #[tokio::test]
    async fn test_token_outside_skew_window_is_not_renewed() {
        // Expiry 90s out with a 60s skew
        let token = token_expiring_in("u1", 90);
        let mut renewer = MockRenewer::new();
        renewer.expect_renew().never();

        let manager = SessionManager::new(store_with(&token, "r1"), Arc::new(renewer));
        assert_eq!(manager.valid_access_token().await.unwrap(), token);
    }

    #[tokio::test]
    async fn test_token_inside_skew_window_triggers_renewal() {
        for secs in [30, -1] {
            let fresh = token_expiring_in("u1", 3600);
            let mut renewer = MockRenewer::new();
            let returned = TokenPair::new(fresh.clone(), "r2");
            renewer
                .expect_renew()
                .withf(|refresh| refresh == "r1")
                .times(1)
                .returning(move |_| Ok(returned.clone()));

            let store = store_with(&token_expiring_in("u1", secs), "r1");
            let manager = SessionManager::new(store.clone(), Arc::new(renewer));
            let mut events = manager.subscribe();

            assert_eq!(manager.valid_access_token().await.unwrap(), fresh);
            assert_eq!(events.recv().await.unwrap(), SessionEvent::Renewed);
            assert_eq!(manager.state(), SessionState::Authenticated);

            let stored = store.load().unwrap().unwrap();
            assert_eq!(stored.tokens, TokenPair::new(fresh, "r2"));
            assert_eq!(stored.identity, Some(SessionIdentity::new("u1", "user")));
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_renewal() {
        let fresh = token_expiring_in("u1", 3600);
        let renewer = GatedRenewer::new(Ok(TokenPair::new(fresh.clone(), "r2")));
        let manager = SessionManager::new(
            store_with(&token_expiring_in("u1", -10), "r1"),
            renewer.clone(),
        );

        let callers: Vec<_> = (0..3)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.valid_access_token().await })
            })
            .collect();

        // Let every caller reach the shared renewal before the network answers
        while renewer.calls() == 0 {
            tokio::task::yield_now().await;
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(manager.refresh_in_flight().is_some());
        assert_eq!(manager.state(), SessionState::Refreshing);
        renewer.release.notify_one();

        for caller in callers {
            assert_eq!(caller.await.unwrap().unwrap(), fresh);
        }
        assert_eq!(renewer.calls(), 1);
        assert!(manager.refresh_in_flight().is_none());
    }

    #[tokio::test]
    async fn test_same_tick_callers_resolve_together() {
        let fresh = token_expiring_in("u1", 3600);
        let renewer = GatedRenewer::new(Ok(TokenPair::new(fresh.clone(), "r2")));
        let manager = SessionManager::new(
            store_with(&token_expiring_in("u1", -10), "r1"),
            renewer.clone(),
        );

        let release = async {
            while renewer.calls() == 0 {
                tokio::task::yield_now().await;
            }
            renewer.release.notify_one();
        };
        let (a, b, c, ()) = tokio::join!(
            manager.valid_access_token(),
            manager.valid_access_token(),
            manager.valid_access_token(),
            release,
        );

        assert_eq!(renewer.calls(), 1);
        assert_eq!(a.unwrap(), fresh);
        assert_eq!(b.unwrap(), fresh);
        assert_eq!(c.unwrap(), fresh);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_rejection() {
        let renewer = GatedRenewer::new(Err(rejected(401)));
        let store = store_with(&token_expiring_in("u1", -10), "r1");
        let manager = SessionManager::new(store.clone(), renewer.clone());
        let mut events = manager.subscribe();

        let callers: Vec<_> = (0..4)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.valid_access_token().await })
            })
            .collect();
        while renewer.calls() == 0 {
            tokio::task::yield_now().await;
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        renewer.release.notify_one();

        let expected = SessionError::RefreshRejected {
            status: 401,
            message: "refresh token revoked".into(),
        };
        for caller in callers {
            assert_eq!(caller.await.unwrap(), Err(expected.clone()));
        }
        assert_eq!(renewer.calls(), 1);
        assert!(store.load().unwrap().is_none());
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::AuthFailure {
                reason: AuthFailureReason::RefreshRejected
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_revoked_refresh_token_tears_down_once() {
        let mut renewer = MockRenewer::new();
        renewer.expect_renew().times(1).returning(|_| Err(rejected(400)));

        let store = store_with(&token_expiring_in("u1", -10), "r1");
        let manager = SessionManager::new(store.clone(), Arc::new(renewer));
        let mut events = manager.subscribe();

        let result = manager.valid_access_token().await;
        assert!(matches!(
            result,
            Err(SessionError::RefreshRejected { status: 400, .. })
        ));
        assert!(store.load().unwrap().is_none());
        assert!(!manager.is_authenticated());
        assert_eq!(manager.state(), SessionState::Unauthenticated);

        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::AuthFailure {
                reason: AuthFailureReason::RefreshRejected
            }
        );
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_network_failure_fails_closed() {
        let mut renewer = MockRenewer::new();
        renewer
            .expect_renew()
            .times(1)
            .returning(|_| Err(RenewalError::Network("connection reset".into())));

        let store = store_with(&token_expiring_in("u1", -10), "r1");
        let manager = SessionManager::new(store.clone(), Arc::new(renewer));
        let mut events = manager.subscribe();

        assert_eq!(
            manager.valid_access_token().await,
            Err(SessionError::RefreshNetwork("connection reset".into()))
        );
        assert!(store.load().unwrap().is_none());
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::AuthFailure {
                reason: AuthFailureReason::RefreshNetworkError
            }
        );
    }

    #[tokio::test]
    async fn test_no_session_fails_without_network() {
        let mut renewer = MockRenewer::new();
        renewer.expect_renew().never();

        let manager = SessionManager::new(Arc::new(MemoryCredentialStore::new()), Arc::new(renewer));
        let mut events = manager.subscribe();

        assert_eq!(
            manager.valid_access_token().await,
            Err(SessionError::NoRefreshToken)
        );
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::AuthFailure {
                reason: AuthFailureReason::NoRefreshToken
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_access_token_triggers_renewal() {
        let fresh = token_expiring_in("u1", 3600);
        let mut renewer = MockRenewer::new();
        let returned = TokenPair::new(fresh.clone(), "r2");
        renewer
            .expect_renew()
            .times(1)
            .returning(move |_| Ok(returned.clone()));

        let manager = SessionManager::new(store_with("garbage", "r1"), Arc::new(renewer));
        assert_eq!(manager.valid_access_token().await.unwrap(), fresh);
    }

    #[tokio::test]
    async fn test_unreadable_renewed_token_tears_down() {
        let mut renewer = MockRenewer::new();
        renewer
            .expect_renew()
            .times(1)
            .returning(|_| Ok(TokenPair::new("opaque-access", "r2")));

        let store = store_with(&token_expiring_in("u9", -10), "r1");
        let manager = SessionManager::new(store.clone(), Arc::new(renewer));
        let mut events = manager.subscribe();

        let result = manager.valid_access_token().await;
        assert!(matches!(result, Err(SessionError::RefreshRejected { .. })));
        assert!(store.load().unwrap().is_none());
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::AuthFailure {
                reason: AuthFailureReason::RefreshRejected
            }
        );
    }

    #[tokio::test]
    async fn test_already_expired_renewed_token_is_not_returned() {
        let mut renewer = MockRenewer::new();
        let returned = TokenPair::new(token_expiring_in("u1", -100), "r2");
        renewer
            .expect_renew()
            .times(1)
            .returning(move |_| Ok(returned.clone()));

        let store = store_with(&token_expiring_in("u1", -10), "r1");
        let manager = SessionManager::new(store.clone(), Arc::new(renewer));

        let result = manager.valid_access_token().await;
        assert!(matches!(result, Err(SessionError::RefreshRejected { .. })));
        assert!(!manager.is_authenticated());
        assert_eq!(manager.state(), SessionState::Unauthenticated);

        // Torn down, so the next call fails locally instead of renewing again
        assert_eq!(
            manager.valid_access_token().await,
            Err(SessionError::NoRefreshToken)
        );
    }

    #[tokio::test]
    async fn test_renewal_settles_when_every_waiter_is_dropped() {
        let fresh = token_expiring_in("u1", 3600);
        let renewer = GatedRenewer::new(Ok(TokenPair::new(fresh.clone(), "r2")));
        let store = store_with(&token_expiring_in("u1", -10), "r1");
        let manager = SessionManager::new(store.clone(), renewer.clone());

        let caller = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.valid_access_token().await })
        };
        while renewer.calls() == 0 {
            tokio::task::yield_now().await;
        }
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());
        assert_eq!(manager.state(), SessionState::Refreshing);

        renewer.release.notify_one();
        for _ in 0..1000 {
            if manager.refresh_in_flight().is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(manager.refresh_in_flight().is_none());
        assert_eq!(manager.state(), SessionState::Authenticated);
        assert_eq!(store.load().unwrap().unwrap().tokens, TokenPair::new(fresh, "r2"));
        assert_eq!(renewer.calls(), 1);
    }

    #[tokio::test]
    async fn test_origin_reports_renewal() {
        let fresh = token_expiring_in("u1", 3600);
        let mut renewer = MockRenewer::new();
        let returned = TokenPair::new(fresh.clone(), "r2");
        renewer
            .expect_renew()
            .times(1)
            .returning(move |_| Ok(returned.clone()));

        let manager = SessionManager::new(store_with(&token_expiring_in("u1", -10), "r1"), Arc::new(renewer));
        assert_eq!(
            manager.valid_access_token_with_origin().await.unwrap(),
            (fresh.clone(), TokenOrigin::Renewed)
        );
        assert_eq!(
            manager.valid_access_token_with_origin().await.unwrap(),
            (fresh, TokenOrigin::Stored)
        );
    }

    #[tokio::test]
    async fn test_force_invalidate_discards_in_flight_renewal() {
        let renewer = GatedRenewer::new(Ok(TokenPair::new(token_expiring_in("u1", 3600), "r2")));
        let store = store_with(&token_expiring_in("u1", -10), "r1");
        let manager = SessionManager::new(store.clone(), renewer.clone());
        let mut events = manager.subscribe();

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.valid_access_token().await })
        };
        while renewer.calls() == 0 {
            tokio::task::yield_now().await;
        }

        manager.force_invalidate(AuthFailureReason::Logout);
        assert!(store.load().unwrap().is_none());
        assert!(manager.refresh_in_flight().is_none());

        renewer.release.notify_one();
        assert_eq!(waiter.await.unwrap(), Err(SessionError::Invalidated));

        // The late success must not resurrect the session
        assert!(store.load().unwrap().is_none());
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::AuthFailure {
                reason: AuthFailureReason::Logout
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_renew_rejected_uses_newer_token() {
        let newer = token_expiring_in("u1", 3600);
        let mut renewer = MockRenewer::new();
        renewer.expect_renew().never();

        let manager = SessionManager::new(store_with(&newer, "r2"), Arc::new(renewer));
        assert_eq!(manager.renew_rejected("older-token").await.unwrap(), newer);
    }

    #[tokio::test]
    async fn test_renew_rejected_renews_unexpired_token() {
        let current = token_expiring_in("u1", 3600);
        let fresh = token_expiring_in("u1", 7200);
        let mut renewer = MockRenewer::new();
        let returned = TokenPair::new(fresh.clone(), "r2");
        renewer
            .expect_renew()
            .times(1)
            .returning(move |_| Ok(returned.clone()));

        let manager = SessionManager::new(store_with(&current, "r1"), Arc::new(renewer));
        assert_eq!(manager.renew_rejected(&current).await.unwrap(), fresh);
    }

    #[tokio::test]
    async fn test_establish_derives_identity_and_supersedes_renewal() {
        let renewer = GatedRenewer::new(Ok(TokenPair::new(token_expiring_in("old", 3600), "r-old")));
        let store = store_with(&token_expiring_in("old", -10), "r1");
        let manager = SessionManager::new(store.clone(), renewer.clone());
        let mut events = manager.subscribe();

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.valid_access_token().await })
        };
        while renewer.calls() == 0 {
            tokio::task::yield_now().await;
        }

        let login_token = mint_token("new-user", "admin", Utc::now().timestamp() + 3600);
        manager
            .establish(TokenPair::new(login_token.clone(), "r-new"), None)
            .unwrap();
        renewer.release.notify_one();
        assert_eq!(waiter.await.unwrap(), Err(SessionError::Invalidated));

        let stored = store.load().unwrap().unwrap();
        assert_eq!(stored.tokens, TokenPair::new(login_token, "r-new"));
        assert_eq!(manager.identity(), Some(SessionIdentity::new("new-user", "admin")));
        assert_eq!(manager.state(), SessionState::Authenticated);
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Established { identity: Some(_) }
        ));
    }

    #[tokio::test]
    async fn test_renewal_failure_is_not_retried() {
        let mut renewer = MockRenewer::new();
        renewer.expect_renew().times(1).returning(|_| Err(rejected(400)));

        let manager = SessionManager::new(
            store_with(&token_expiring_in("u1", -10), "r1"),
            Arc::new(renewer),
        );

        assert!(manager.valid_access_token().await.is_err());
        // The session is gone, so the next call fails locally
        assert_eq!(
            manager.valid_access_token().await,
            Err(SessionError::NoRefreshToken)
        );
    }

    #[test]
    fn test_merge_identity() {
        let mut cached = SessionIdentity::new("u1", "customer");
        cached.email = Some("u1@example.com".into());

        let merged = merge_identity(Some(cached.clone()), Some(SessionIdentity::new("u1", "admin")));
        assert_eq!(merged.as_ref().map(|i| i.role.as_str()), Some("admin"));
        assert_eq!(merged.and_then(|i| i.email).as_deref(), Some("u1@example.com"));

        let other = SessionIdentity::new("u2", "user");
        assert_eq!(merge_identity(Some(cached.clone()), Some(other.clone())), Some(other));
        assert_eq!(merge_identity(Some(cached.clone()), None), Some(cached));
        assert_eq!(merge_identity(None, None), None);
    }

    #[tokio::test]
    async fn test_access_token_expiry() {
        let exp = Utc::now().timestamp() + 600;
        let mut renewer = MockRenewer::new();
        renewer.expect_renew().never();
        let manager = SessionManager::builder(
            store_with(&mint_token("u1", "user", exp), "r1"),
            Arc::new(renewer),
        )
        .expiry_skew(Duration::from_secs(30))
        .build();

        assert_eq!(manager.access_token_expiry().unwrap().timestamp(), exp);
        assert_eq!(manager.expiry_skew(), Duration::from_secs(30));
    }
}
