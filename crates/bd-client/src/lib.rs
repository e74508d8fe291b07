//! Authenticated HTTP client core for the bizdesk API
//!
//! Attaches bearer credentials to every outbound call, detects expired
//! credentials before a call is sent, and exchanges the refresh credential
//! for a new access credential exactly once when several calls need it at
//! the same time.
//!
//! # Call Flow
//!
//! 1. [`RequestInterceptor`] checks the stored access credential; an expired
//!    one is renewed through the [`RefreshCoordinator`] before sending
//! 2. [`HttpTransport`] executes the call
//! 3. [`ResponseInterceptor`] handles a 401 by renewing through the same
//!    coordinator and re-issuing the call at most once
//!
//! While a refresh is running every other caller that needs one waits on
//! its outcome instead of starting another exchange. A failed refresh is
//! reported to every waiter and never clears stored credentials.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bd_client::{ApiClient, ClientConfig, FileCredentialStore, LoginOutcome};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::new("https://erp.example.com/api".parse()?);
//!     let store = FileCredentialStore::new(FileCredentialStore::default_storage_dir()?).await?;
//!     let client = ApiClient::new(config, Arc::new(store))?;
//!
//!     if let LoginOutcome::TwoFactorRequired { .. } =
//!         client.login("ana@example.com", "hunter2").await?
//!     {
//!         anyhow::bail!("second factor required");
//!     }
//!
//!     let invoices: serde_json::Value = client.get("/invoices", &[("page", "1")]).await?;
//!     println!("{invoices}");
//!     Ok(())
//! }
//! ```
//!
//! # Credential Storage
//!
//! ```
//! use bd_client::{Credential, CredentialPair, CredentialSlot, CredentialStore, MemoryCredentialStore};
//!
//! # async fn example() -> bd_client::Result<()> {
//! let store = MemoryCredentialStore::new();
//! store
//!     .replace(&CredentialPair::new("access", Some(Credential::new("refresh"))))
//!     .await?;
//!
//! assert_eq!(store.get(CredentialSlot::Refresh).await, Some(Credential::new("refresh")));
//! # Ok(())
//! # }
//! # tokio_test::block_on(example()).unwrap();
//! ```

pub mod claims;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod exchange;
pub mod file_store;
pub mod interceptor;
pub mod models;
pub mod session;
pub mod signal;
pub mod store;
pub mod transport;

// Re-export main types
pub use claims::{Claims, ExpiryChecker};
pub use client::{ApiClient, ApiClientBuilder, LoginOutcome};
pub use config::{ClientConfig, HttpTimeouts, RefreshPolicy};
pub use coordinator::{RefreshCoordinator, RefreshTrigger};
pub use errors::{ClientError, RefreshError, Result, WaitSource};
pub use exchange::{HttpRefreshExchange, RefreshExchange, RefreshedCredentials};
pub use file_store::FileCredentialStore;
pub use interceptor::{
    ActiveSession, NavigationContext, OutboundCall, RequestInterceptor, ResponseInterceptor,
    is_auth_endpoint,
};
pub use session::{Credential, CredentialPair};
pub use signal::{
    AtomicRefreshSignal, ExternalRefreshSignal, NoExternalRefresh, RefreshSignalOwner,
    WatchRefreshSignal, refresh_signal,
};
pub use store::{CredentialSlot, CredentialStore, MemoryCredentialStore};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport, TransportError};
