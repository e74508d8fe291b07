//! Read-only view of refreshes driven by a sibling authentication component.
//!
//! The sibling owns the flag; this crate only observes it and never sets or
//! clears it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;

#[async_trait::async_trait]
pub trait ExternalRefreshSignal: Send + Sync {
    /// True while the sibling component is refreshing credentials
    fn is_set(&self) -> bool;

    /// Resolve once the signal is clear.
    ///
    /// The default implementation polls `is_set` every `poll_interval`;
    /// signals that can broadcast should override it. Callers bound this
    /// wait with their own timeout.
    async fn cleared(&self, poll_interval: Duration) {
        while self.is_set() {
            tokio::time::sleep(poll_interval).await;
        }
    }
}

/// Signal for setups without a sibling refresher; never set
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExternalRefresh;

#[async_trait::async_trait]
impl ExternalRefreshSignal for NoExternalRefresh {
    fn is_set(&self) -> bool {
        false
    }
}

/// Plain shared flag, observed by polling
#[derive(Debug, Clone, Default)]
pub struct AtomicRefreshSignal {
    flag: Arc<AtomicBool>,
}

impl AtomicRefreshSignal {
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }
}

#[async_trait::async_trait]
impl ExternalRefreshSignal for AtomicRefreshSignal {
    fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Owner half of a broadcast refresh signal, held by the sibling component
#[derive(Debug)]
pub struct RefreshSignalOwner {
    tx: watch::Sender<bool>,
}

impl RefreshSignalOwner {
    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    pub fn clear(&self) {
        self.tx.send_replace(false);
    }
}

/// Observer half of a broadcast refresh signal; wakes waiters on change
#[derive(Debug, Clone)]
pub struct WatchRefreshSignal {
    rx: watch::Receiver<bool>,
}

/// Create a linked owner/observer pair, initially clear
pub fn refresh_signal() -> (RefreshSignalOwner, WatchRefreshSignal) {
    let (tx, rx) = watch::channel(false);
    (RefreshSignalOwner { tx }, WatchRefreshSignal { rx })
}

#[async_trait::async_trait]
impl ExternalRefreshSignal for WatchRefreshSignal {
    fn is_set(&self) -> bool {
        *self.rx.borrow()
    }

    async fn cleared(&self, _poll_interval: Duration) {
        let mut rx = self.rx.clone();
        // A dropped owner can never set the flag again
        let _ = rx.wait_for(|set| !*set).await;
    }
}
