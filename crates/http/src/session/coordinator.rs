//! Single-flight refresh coordination
//!
//! Requests that hit a 401 ask the coordinator for a fresh token. The first
//! one to arrive while the coordinator is idle starts the refresh round-trip
//! on its own task; every caller, the first included, parks a one-shot
//! continuation in a FIFO queue that is drained exactly once when the
//! round-trip settles. Callers that give up do not cancel the refresh. The
//! state lock is never held across an `.await`, so each transition is atomic
//! with respect to the other tasks touching the coordinator.

use super::events::{LoginRedirect, SessionEvent, SessionEvents};
use super::refresher::{RefreshError, TokenRefresher};
use super::store::TokenStore;
use super::token::BearerToken;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

type RefreshOutcome = Result<BearerToken, RefreshError>;
type Waiter = oneshot::Sender<RefreshOutcome>;

enum RefreshState {
    Idle,
    Refreshing { waiters: VecDeque<Waiter> },
}

enum Role {
    /// Another request already holds a newer token than the rejected one
    Reuse(BearerToken),
    Leader(oneshot::Receiver<RefreshOutcome>),
    Follower(oneshot::Receiver<RefreshOutcome>),
}

/// Owns the refresh state, the pending queue, and the token store
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    refresher: Arc<dyn TokenRefresher>,
    store: Arc<dyn TokenStore>,
    events: SessionEvents,
    redirect: LoginRedirect,
    refresh_timeout: Option<Duration>,
    round_trips: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        refresher: Arc<dyn TokenRefresher>,
        store: Arc<dyn TokenStore>,
        events: SessionEvents,
        redirect: LoginRedirect,
    ) -> Self {
        Self {
            state: Mutex::new(RefreshState::Idle),
            refresher,
            store,
            events,
            redirect,
            refresh_timeout: None,
            round_trips: AtomicU64::new(0),
        }
    }

    /// Bound each refresh round-trip; an elapsed deadline counts as a
    /// failed refresh
    pub fn with_refresh_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Token storage shared with the request path
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Session event fan-out
    pub fn events(&self) -> &SessionEvents {
        &self.events
    }

    /// Whether a refresh round-trip is outstanding
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock_state(), RefreshState::Refreshing { .. })
    }

    /// Number of requests waiting on the outstanding refresh
    pub fn pending_requests(&self) -> usize {
        match &*self.lock_state() {
            RefreshState::Idle => 0,
            RefreshState::Refreshing { waiters } => waiters.len(),
        }
    }

    /// Refresh round-trips started since construction
    pub fn round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::Relaxed)
    }

    /// Obtain a token to retry a request the backend rejected with 401.
    ///
    /// `rejected` is the token the failed request carried. If storage
    /// already holds a different one, a refresh settled while that request
    /// was in flight and the stored token is returned without another
    /// round-trip.
    ///
    /// The round-trip runs on a spawned task, so dropping the caller that
    /// started it leaves every other waiter to receive its outcome.
    pub async fn refreshed_token(
        self: &Arc<Self>,
        rejected: Option<&BearerToken>,
    ) -> RefreshOutcome {
        let role = {
            let mut state = self.lock_state();
            match &mut *state {
                RefreshState::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push_back(tx);
                    debug!(queued = waiters.len(), "Refresh in flight, queueing request");
                    Role::Follower(rx)
                }
                RefreshState::Idle => match self.newer_stored_token(rejected) {
                    Some(token) => Role::Reuse(token),
                    None => {
                        let (tx, rx) = oneshot::channel();
                        *state = RefreshState::Refreshing {
                            waiters: VecDeque::from([tx]),
                        };
                        Role::Leader(rx)
                    }
                },
            }
        };

        match role {
            Role::Reuse(token) => {
                debug!("Token was renewed while request was in flight, reusing it");
                Ok(token)
            }
            Role::Leader(rx) => {
                let coordinator = Arc::clone(self);
                tokio::spawn(async move { coordinator.lead_refresh().await });
                rx.await.unwrap_or(Err(RefreshError::Abandoned))
            }
            Role::Follower(rx) => rx.await.unwrap_or(Err(RefreshError::Abandoned)),
        }
    }

    /// Drop the session: clear the stored token and tell subscribers to
    /// send the user to login
    pub fn expire_session(&self) {
        self.clear_token();
        self.announce_expiry();
    }

    async fn lead_refresh(&self) {
        let mut guard = SettleGuard {
            coordinator: self,
            armed: true,
        };

        self.round_trips.fetch_add(1, Ordering::Relaxed);
        info!("Access token rejected, refreshing session");
        let outcome = self.round_trip().await;

        match &outcome {
            Ok(token) => {
                if let Err(e) = self.store.save(token) {
                    warn!(error = %e, "Failed to persist refreshed token");
                }
                guard.settle(&outcome);
                info!("Session refreshed");
                self.events.emit(SessionEvent::TokenRenewed);
            }
            Err(e) => {
                warn!(error = %e, "Session refresh failed");
                self.clear_token();
                guard.settle(&outcome);
                self.announce_expiry();
            }
        }
    }

    async fn round_trip(&self) -> RefreshOutcome {
        match self.refresh_timeout {
            Some(limit) => tokio::time::timeout(limit, self.refresher.refresh())
                .await
                .unwrap_or(Err(RefreshError::TimedOut(limit))),
            None => self.refresher.refresh().await,
        }
    }

    fn clear_token(&self) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stored token");
        }
    }

    fn announce_expiry(&self) {
        warn!(redirect = %self.redirect.location(), "Session expired");
        self.events.emit(SessionEvent::Expired(self.redirect.clone()));
    }

    fn newer_stored_token(&self, rejected: Option<&BearerToken>) -> Option<BearerToken> {
        match self.store.load() {
            Ok(Some(current)) if Some(&current) != rejected => Some(current),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read stored token");
                None
            }
        }
    }

    /// Return to idle and hand the outcome to every parked request, oldest
    /// first
    fn drain(&self, outcome: &RefreshOutcome) {
        let waiters = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::Refreshing { waiters } => waiters,
                RefreshState::Idle => VecDeque::new(),
            }
        };

        if !waiters.is_empty() {
            debug!(count = waiters.len(), "Releasing queued requests");
        }
        for waiter in waiters {
            // A receiver that went away was cancelled by its caller
            let _ = waiter.send(outcome.clone());
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Settles the coordinator even if the refresh task is torn down mid-flight
struct SettleGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    armed: bool,
}

impl SettleGuard<'_> {
    fn settle(&mut self, outcome: &RefreshOutcome) {
        self.armed = false;
        self.coordinator.drain(outcome);
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("Refresh task dropped before completing, releasing queued requests");
            self.coordinator.drain(&Err(RefreshError::Abandoned));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::{MemoryTokenStore, MockTokenStore, StoreError};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Refresher that blocks until released and counts its calls
    struct GatedRefresher {
        calls: AtomicUsize,
        release: Notify,
        outcome: RefreshOutcome,
    }

    impl GatedRefresher {
        fn new(outcome: RefreshOutcome) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                release: Notify::new(),
                outcome,
            })
        }
    }

    #[async_trait]
    impl TokenRefresher for GatedRefresher {
        async fn refresh(&self) -> RefreshOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            self.outcome.clone()
        }
    }

    fn token(raw: &str) -> BearerToken {
        BearerToken::new(raw).unwrap()
    }

    fn redirect() -> LoginRedirect {
        LoginRedirect {
            route: "/login".into(),
            expired: true,
        }
    }

    fn coordinator(
        refresher: Arc<GatedRefresher>,
        store: Arc<dyn TokenStore>,
    ) -> Arc<RefreshCoordinator> {
        Arc::new(RefreshCoordinator::new(
            refresher,
            store,
            SessionEvents::new(),
            redirect(),
        ))
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        while !condition() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn concurrent_rejections_share_one_refresh() {
        let refresher = GatedRefresher::new(Ok(token("new456")));
        let store = Arc::new(MemoryTokenStore::with_token(token("old")));
        let coordinator = coordinator(refresher.clone(), store.clone());
        let stale = token("old");

        let leader = {
            let coordinator = coordinator.clone();
            let stale = stale.clone();
            tokio::spawn(async move { coordinator.refreshed_token(Some(&stale)).await })
        };
        wait_until(|| coordinator.is_refreshing()).await;

        let followers: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = coordinator.clone();
                let stale = stale.clone();
                tokio::spawn(async move { coordinator.refreshed_token(Some(&stale)).await })
            })
            .collect();
        wait_until(|| coordinator.pending_requests() == 5).await;

        refresher.release.notify_one();

        assert_eq!(leader.await.unwrap(), Ok(token("new456")));
        for follower in followers {
            assert_eq!(follower.await.unwrap(), Ok(token("new456")));
        }

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.round_trips(), 1);
        assert!(!coordinator.is_refreshing());
        assert_eq!(coordinator.pending_requests(), 0);
        assert_eq!(store.load().unwrap(), Some(token("new456")));
    }

    #[tokio::test]
    async fn failed_refresh_rejects_queue_and_expires_once() {
        let failure = RefreshError::Rejected {
            status: 500,
            message: "boom".into(),
        };
        let refresher = GatedRefresher::new(Err(failure.clone()));
        let store = Arc::new(MemoryTokenStore::with_token(token("old")));
        let coordinator = coordinator(refresher.clone(), store.clone());
        let mut events = coordinator.events().subscribe();
        let stale = token("old");

        let leader = {
            let coordinator = coordinator.clone();
            let stale = stale.clone();
            tokio::spawn(async move { coordinator.refreshed_token(Some(&stale)).await })
        };
        wait_until(|| coordinator.is_refreshing()).await;

        let followers: Vec<_> = (0..3)
            .map(|_| {
                let coordinator = coordinator.clone();
                let stale = stale.clone();
                tokio::spawn(async move { coordinator.refreshed_token(Some(&stale)).await })
            })
            .collect();
        wait_until(|| coordinator.pending_requests() == 4).await;

        refresher.release.notify_one();

        assert_eq!(leader.await.unwrap(), Err(failure.clone()));
        for follower in followers {
            assert_eq!(follower.await.unwrap(), Err(failure.clone()));
        }

        assert!(store.load().unwrap().is_none());
        assert_eq!(coordinator.pending_requests(), 0);
        assert!(!coordinator.is_refreshing());
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Expired(redirect())
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn renewed_token_is_reused_without_refresh() {
        let refresher = GatedRefresher::new(Ok(token("unused")));
        let store = Arc::new(MemoryTokenStore::with_token(token("already-new")));
        let coordinator = coordinator(refresher.clone(), store);

        let outcome = coordinator.refreshed_token(Some(&token("old"))).await;

        assert_eq!(outcome, Ok(token("already-new")));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancelled_first_caller_does_not_abandon_refresh() {
        let refresher = GatedRefresher::new(Ok(token("new456")));
        let store = Arc::new(MemoryTokenStore::with_token(token("old")));
        let coordinator = coordinator(refresher.clone(), store.clone());
        let mut events = coordinator.events().subscribe();
        let stale = token("old");

        let first = {
            let coordinator = coordinator.clone();
            let stale = stale.clone();
            tokio::spawn(async move { coordinator.refreshed_token(Some(&stale)).await })
        };
        wait_until(|| refresher.calls.load(Ordering::SeqCst) == 1).await;

        let second = {
            let coordinator = coordinator.clone();
            let stale = stale.clone();
            tokio::spawn(async move { coordinator.refreshed_token(Some(&stale)).await })
        };
        wait_until(|| coordinator.pending_requests() == 2).await;

        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());
        assert!(coordinator.is_refreshing());

        refresher.release.notify_one();

        assert_eq!(second.await.unwrap(), Ok(token("new456")));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.load().unwrap(), Some(token("new456")));
        assert!(!coordinator.is_refreshing());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::TokenRenewed);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_refresh_times_out() {
        let refresher = GatedRefresher::new(Ok(token("late")));
        let store = Arc::new(MemoryTokenStore::with_token(token("old")));
        let coordinator = Arc::new(
            RefreshCoordinator::new(refresher, store.clone(), SessionEvents::new(), redirect())
                .with_refresh_timeout(Some(Duration::from_secs(10))),
        );

        let outcome = coordinator.refreshed_token(Some(&token("old"))).await;

        assert_eq!(outcome, Err(RefreshError::TimedOut(Duration::from_secs(10))));
        assert!(store.load().unwrap().is_none());
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn store_failure_does_not_block_refresh() {
        let refresher = GatedRefresher::new(Ok(token("fresh")));
        refresher.release.notify_one();

        let mut store = MockTokenStore::new();
        store.expect_load().returning(|| Ok(None));
        store.expect_save().times(1).returning(|_| {
            Err(StoreError::Io(std::io::Error::other("read-only")))
        });

        let coordinator = coordinator(refresher, Arc::new(store));
        let outcome = coordinator.refreshed_token(None).await;

        assert_eq!(outcome, Ok(token("fresh")));
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn expire_session_clears_and_notifies() {
        let refresher = GatedRefresher::new(Ok(token("unused")));
        let store = Arc::new(MemoryTokenStore::with_token(token("abc123")));
        let coordinator = coordinator(refresher, store.clone());
        let mut events = coordinator.events().subscribe();

        coordinator.expire_session();

        assert!(store.load().unwrap().is_none());
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Expired(redirect())
        );
    }
}
