use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::errors::{ClientError, Result};
use crate::session::CredentialPair;
use crate::store::CredentialStore;

/// File-based credential store
///
/// Persists the credential pair as a single JSON document so that a
/// restarted process picks up where the last one left off.
///
/// # Directory Structure
/// ```text
/// ~/.config/bizdesk/
/// ├── lock                   # Advisory lock file
/// └── credentials.json       # {"token": "...", "refreshToken": "..."}
/// ```
#[derive(Debug)]
pub struct FileCredentialStore {
    credentials_file: PathBuf,
    lock_file: PathBuf,
    /// In-memory copy of the last pair read or written
    cache: Arc<RwLock<Option<CredentialPair>>>,
    /// Serializes writers of this store before they contend for the file lock
    writer: Mutex<()>,
    /// How long a writer waits for another process to release the file lock
    lock_wait: Duration,
}

const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(20);

impl FileCredentialStore {
    /// Create a new file-based credential store
    ///
    /// # Arguments
    /// * `storage_dir` - Base directory for storage (e.g., ~/.config/bizdesk)
    pub async fn new(storage_dir: impl AsRef<Path>) -> Result<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();

        fs::create_dir_all(&storage_dir).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(&storage_dir, perms)?;
        }

        Ok(Self {
            credentials_file: storage_dir.join("credentials.json"),
            lock_file: storage_dir.join("lock"),
            cache: Arc::new(RwLock::new(None)),
            writer: Mutex::new(()),
            lock_wait: DEFAULT_LOCK_WAIT,
        })
    }

    /// Override how long writers wait for the file lock
    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    /// Get default storage directory for the current platform
    pub fn default_storage_dir() -> Result<PathBuf> {
        ClientConfig::default_config_dir()
    }

    /// Acquire an exclusive lock on the storage, waiting up to `lock_wait`
    async fn acquire_lock(&self) -> Result<std::fs::File> {
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_file)?;

        let deadline = Instant::now() + self.lock_wait;
        loop {
            match lock_file.try_lock_exclusive() {
                Ok(()) => return Ok(lock_file),
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if Instant::now() >= deadline {
                        tracing::warn!(path = %self.lock_file.display(), "Credential store lock still held");
                        return Err(ClientError::LockTimeout);
                    }
                    tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn load_from_disk(&self) -> Result<Option<CredentialPair>> {
        if !fs::try_exists(&self.credentials_file).await? {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.credentials_file).await?;
        let pair: CredentialPair = serde_json::from_str(&content)
            .map_err(|e| ClientError::Store(format!("Invalid credentials file: {}", e)))?;

        Ok(Some(pair))
    }

    async fn save_to_disk(&self, pair: &CredentialPair) -> Result<()> {
        let json = serde_json::to_string_pretty(pair)?;

        // Atomic write: write to temp file, then rename
        let temp_path = self.credentials_file.with_extension("tmp");
        fs::write(&temp_path, json).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&temp_path, perms)?;
        }

        let file = std::fs::File::open(&temp_path)?;
        file.sync_all()?;

        fs::rename(&temp_path, &self.credentials_file).await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Option<CredentialPair> {
        {
            let cache = self.cache.read().await;
            if cache.is_some() {
                return cache.clone();
            }
        }

        match self.load_from_disk().await {
            Ok(Some(pair)) => {
                *self.cache.write().await = Some(pair.clone());
                Some(pair)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::error!("Failed to load stored credentials: {}", e);
                None
            }
        }
    }

    async fn replace(&self, pair: &CredentialPair) -> Result<()> {
        let _writer = self.writer.lock().await;
        let _lock = self.acquire_lock().await?;

        self.save_to_disk(pair).await?;
        *self.cache.write().await = Some(pair.clone());

        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        let _lock = self.acquire_lock().await?;

        if fs::try_exists(&self.credentials_file).await? {
            fs::remove_file(&self.credentials_file).await?;
        }
        *self.cache.write().await = None;

        Ok(())
    }
}
