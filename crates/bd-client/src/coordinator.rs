//! Single-flight credential refresh.
//!
//! At most one [`RefreshExchange`] call is outstanding at any time. Callers
//! that need a refresh while one is running enqueue a one-shot result slot
//! and are resumed, in enqueue order, with the outcome of that one call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use crate::claims::ExpiryChecker;
use crate::config::RefreshPolicy;
use crate::errors::{ClientError, RefreshError, Result, WaitSource};
use crate::exchange::RefreshExchange;
use crate::session::{Credential, CredentialPair};
use crate::signal::ExternalRefreshSignal;
use crate::store::{CredentialSlot, CredentialStore};

type Outcome = std::result::Result<Credential, RefreshError>;

/// Why a caller needs a new access credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// The stored access credential is expired locally
    Expired,
    /// The server rejected the call sent with `sent`
    Rejected { sent: Option<Credential> },
}

#[derive(Default)]
struct RefreshState {
    in_progress: bool,
    /// Bumped every time a refresh settles
    generation: u64,
    waiters: VecDeque<oneshot::Sender<Outcome>>,
}

struct Inner {
    store: Arc<dyn CredentialStore>,
    exchange: Arc<dyn RefreshExchange>,
    external: Arc<dyn ExternalRefreshSignal>,
    checker: ExpiryChecker,
    policy: RefreshPolicy,
    state: Mutex<RefreshState>,
    exchanges_started: AtomicU64,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Leave the Refreshing state and hand `outcome` to every waiter
    fn settle(&self, outcome: Outcome) {
        let mut state = self.state();
        state.in_progress = false;
        state.generation = state.generation.wrapping_add(1);
        let waiters = std::mem::take(&mut state.waiters);
        let resumed = waiters.len();

        for waiter in waiters {
            // Waiters that timed out have dropped their receiver
            let _ = waiter.send(outcome.clone());
        }
        drop(state);

        match &outcome {
            Ok(_) => info!(resumed, "Credential refresh succeeded"),
            Err(e) => warn!(resumed, error = %e, "Credential refresh failed"),
        }
    }
}

/// Settles the refresh as abandoned if the exchange task ends without an outcome
struct SettleGuard {
    inner: Option<Arc<Inner>>,
}

impl SettleGuard {
    fn finish(mut self, outcome: Outcome) {
        if let Some(inner) = self.inner.take() {
            inner.settle(outcome);
        }
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.settle(Err(RefreshError::Abandoned));
        }
    }
}

/// Owns the "exactly one refresh in flight" invariant.
///
/// Cheap to clone; clones share state. Both interceptors hold the same
/// coordinator so there is one authority for whether a refresh is running.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        exchange: Arc<dyn RefreshExchange>,
        external: Arc<dyn ExternalRefreshSignal>,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                exchange,
                external,
                checker: ExpiryChecker::new(policy.expiry_skew),
                policy,
                state: Mutex::new(RefreshState::default()),
                exchanges_started: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    pub fn checker(&self) -> ExpiryChecker {
        self.inner.checker
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.inner.policy
    }

    /// True while an exchange is outstanding
    pub fn is_refreshing(&self) -> bool {
        self.inner.state().in_progress
    }

    /// Callers currently suspended on the in-flight exchange
    pub fn queued(&self) -> usize {
        self.inner.state().waiters.len()
    }

    /// Exchanges started since creation
    pub fn exchanges_started(&self) -> u64 {
        self.inner.exchanges_started.load(Ordering::Relaxed)
    }

    /// Obtain a usable access credential for a caller that needs one.
    ///
    /// Defers to the sibling refresher while its signal is set; otherwise
    /// drives or joins the coordinated refresh.
    #[instrument(skip(self, trigger), fields(rejected = matches!(trigger, RefreshTrigger::Rejected { .. })))]
    pub async fn renew(&self, trigger: RefreshTrigger) -> Result<Credential> {
        if self.inner.external.is_set() {
            return self.adopt_external_refresh().await;
        }
        self.refresh(trigger).await
    }

    /// Drive or join the coordinated refresh, bounded by the policy timeout
    pub async fn refresh(&self, trigger: RefreshTrigger) -> Result<Credential> {
        self.refresh_within(trigger, self.inner.policy.wait_timeout)
            .await
    }

    /// Drive or join the coordinated refresh, giving up after `wait`.
    ///
    /// Giving up does not cancel the exchange; it still settles and updates
    /// the store for later callers.
    pub async fn refresh_within(&self, trigger: RefreshTrigger, wait: Duration) -> Result<Credential> {
        let slot = loop {
            let seen = match self.join_in_flight() {
                Joined::Queued(slot) => break slot,
                Joined::Idle { generation } => generation,
            };
            match self.start(&trigger, seen).await? {
                Started::Slot(slot) => break slot,
                Started::AlreadyFresh(credential) => return Ok(credential),
                // A refresh settled while the store was read; look again
                Started::Stale => continue,
            }
        };

        match tokio::time::timeout(wait, slot).await {
            Ok(Ok(outcome)) => outcome.map_err(ClientError::from),
            Ok(Err(_)) => Err(RefreshError::Abandoned.into()),
            Err(_) => {
                warn!(?wait, "Gave up waiting for in-flight credential refresh");
                Err(ClientError::RefreshWaitTimedOut {
                    waiting_on: WaitSource::RefreshQueue,
                    waited: wait,
                })
            }
        }
    }

    /// Enqueue behind a running exchange, if there is one
    fn join_in_flight(&self) -> Joined {
        let mut state = self.inner.state();
        if !state.in_progress {
            return Joined::Idle {
                generation: state.generation,
            };
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);
        debug!(position = state.waiters.len(), "Joined in-flight credential refresh");
        Joined::Queued(rx)
    }

    /// Idle -> Refreshing, unless the store already holds what the caller needs.
    ///
    /// `seen` is the generation observed before the store was read. If a
    /// refresh settled since, the snapshot may hold a refresh credential that
    /// was already spent, so nothing is started.
    async fn start(&self, trigger: &RefreshTrigger, seen: u64) -> Result<Started> {
        let stored = self.inner.store.load().await;

        if let Some(pair) = &stored
            && !self.inner.checker.is_expired(&pair.access)
        {
            let superseded = match trigger {
                RefreshTrigger::Expired => true,
                RefreshTrigger::Rejected { sent } => sent.as_ref() != Some(&pair.access),
            };
            if superseded {
                debug!("Stored credential already fresh, skipping refresh");
                return Ok(Started::AlreadyFresh(pair.access.clone()));
            }
        }

        let usable = stored.and_then(|pair| match pair.refresh.clone() {
            Some(refresh) if !self.inner.checker.is_expired(&refresh) => Some((pair, refresh)),
            _ => None,
        });

        let (tx, rx) = oneshot::channel();
        let (pair, refresh) = {
            let mut state = self.inner.state();
            if state.in_progress {
                // Another caller started while the store was read
                state.waiters.push_back(tx);
                return Ok(Started::Slot(rx));
            }
            if state.generation != seen {
                debug!("Refresh settled while the store was read");
                return Ok(Started::Stale);
            }
            let Some((pair, refresh)) = usable else {
                debug!("No usable refresh credential");
                return Err(ClientError::NoValidCredentials);
            };
            state.waiters.push_back(tx);
            state.in_progress = true;
            (pair, refresh)
        };

        self.inner.exchanges_started.fetch_add(1, Ordering::Relaxed);
        info!("Starting credential refresh");

        let guard = SettleGuard {
            inner: Some(Arc::clone(&self.inner)),
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = run_exchange(&inner, pair, refresh).await;
            guard.finish(outcome);
        });

        Ok(Started::Slot(rx))
    }

    /// Wait for the sibling refresher, then take whatever it stored
    async fn adopt_external_refresh(&self) -> Result<Credential> {
        let wait = self.inner.policy.wait_timeout;
        debug!("External refresh in progress, waiting for it to finish");

        tokio::time::timeout(
            wait,
            self.inner.external.cleared(self.inner.policy.poll_interval),
        )
        .await
        .map_err(|_| {
            warn!(?wait, "Gave up waiting for external credential refresh");
            ClientError::RefreshWaitTimedOut {
                waiting_on: WaitSource::ExternalSignal,
                waited: wait,
            }
        })?;

        let current = self
            .inner
            .store
            .get(CredentialSlot::Access)
            .await
            .ok_or(ClientError::NoValidCredentials)?;

        if self.inner.checker.is_expired(&current) {
            return Err(ClientError::CredentialExpiredLocally);
        }
        Ok(current)
    }
}

enum Joined {
    Queued(oneshot::Receiver<Outcome>),
    Idle { generation: u64 },
}

enum Started {
    Slot(oneshot::Receiver<Outcome>),
    AlreadyFresh(Credential),
    Stale,
}

async fn run_exchange(inner: &Inner, current: CredentialPair, refresh: Credential) -> Outcome {
    let refreshed = inner.exchange.exchange(&refresh).await?;
    let next = current.superseded_by(refreshed.access, refreshed.refresh);

    inner
        .store
        .replace(&next)
        .await
        .map_err(|e| RefreshError::Persist(e.to_string()))?;

    Ok(next.access)
}
