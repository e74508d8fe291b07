use std::sync::{Arc, RwLock};

use crate::errors::{ClientError, Result};
use crate::session::{Credential, CredentialPair};

/// Named slots a credential store exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialSlot {
    Access,
    Refresh,
}

/// Durable storage for the access and refresh credential.
///
/// Writers only ever replace both slots together or clear both; a store is
/// never left holding half of a pair.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load both credentials, if any are stored
    async fn load(&self) -> Option<CredentialPair>;

    /// Replace both slots with `pair`
    async fn replace(&self, pair: &CredentialPair) -> Result<()>;

    /// Remove both credentials
    async fn clear(&self) -> Result<()>;

    /// Read a single slot
    async fn get(&self, slot: CredentialSlot) -> Option<Credential> {
        let pair = self.load().await?;
        match slot {
            CredentialSlot::Access => Some(pair.access),
            CredentialSlot::Refresh => pair.refresh,
        }
    }
}

/// In-memory credential store for testing and simple use cases
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    pair: Arc<RwLock<Option<CredentialPair>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `pair`
    pub fn with_pair(pair: CredentialPair) -> Self {
        Self {
            pair: Arc::new(RwLock::new(Some(pair))),
        }
    }
}

#[async_trait::async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Option<CredentialPair> {
        self.pair.read().ok()?.clone()
    }

    async fn replace(&self, pair: &CredentialPair) -> Result<()> {
        *self
            .pair
            .write()
            .map_err(|_| ClientError::Store("Lock poisoned".to_string()))? = Some(pair.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self
            .pair
            .write()
            .map_err(|_| ClientError::Store("Lock poisoned".to_string()))? = None;
        Ok(())
    }
}
