use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::{ClientError, Result};

/// Authentication endpoints, relative to the API base URL
pub mod endpoints {
    pub const LOGIN: &str = "/auth/login";
    pub const LOGOUT: &str = "/auth/logout";
    pub const REGISTER: &str = "/auth/register";
    pub const REFRESH: &str = "/auth/refresh";
    pub const FORGOT_PASSWORD: &str = "/auth/forgot-password";
    pub const RESET_PASSWORD: &str = "/auth/reset-password";
    pub const VERIFY_2FA: &str = "/auth/verify-2fa";
    pub const ME: &str = "/auth/me";
    pub const CHANGE_PASSWORD: &str = "/auth/change-password";

    /// Endpoints that never go through refresh-and-retry on 401
    pub const AUTH_ALLOWLIST: &[&str] = &[
        LOGIN,
        REGISTER,
        FORGOT_PASSWORD,
        RESET_PASSWORD,
        REFRESH,
        VERIFY_2FA,
    ];
}

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/api";
pub const DEFAULT_USER_AGENT: &str = "bizdesk";

/// Upper bound on any wait for a refresh (own queue or external signal)
pub const REFRESH_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval for external refresh signals that cannot broadcast
pub const REFRESH_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How many times a call may be re-issued after an authentication rejection
pub const MAX_AUTH_RETRIES: u8 = 1;

/// HTTP client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpTimeouts {
    #[serde(rename = "connect_ms", with = "millis")]
    pub connect: Duration,
    #[serde(rename = "request_ms", with = "millis")]
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            request: Duration::from_secs(30),
        }
    }
}

/// Refresh coordination policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshPolicy {
    /// Bound on waiting for an in-flight refresh or the external signal
    #[serde(rename = "wait_timeout_ms", with = "millis")]
    pub wait_timeout: Duration,

    /// Poll interval used only by signals without change notification
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,

    /// Treat credentials as expired this long before their `exp` claim
    #[serde(rename = "expiry_skew_ms", with = "millis")]
    pub expiry_skew: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            wait_timeout: REFRESH_WAIT_TIMEOUT,
            poll_interval: REFRESH_POLL_INTERVAL,
            expiry_skew: Duration::ZERO,
        }
    }
}

/// Configuration for ApiClient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// API base URL; request paths are appended to it
    pub base_url: Url,

    /// HTTP client timeouts
    pub http_timeouts: HttpTimeouts,

    /// Custom user agent (optional)
    pub user_agent: Option<String>,

    /// Refresh coordination policy
    pub refresh: RefreshPolicy,
}

impl ClientConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            ..Self::default()
        }
    }

    /// Parse a config from TOML text; missing fields fall back to defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ClientError::Config(e.to_string()))
    }

    /// Load a config file from disk
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_toml_str(&content)
    }

    /// Get default config directory for the current platform
    pub fn default_config_dir() -> Result<PathBuf> {
        let project_dirs = directories::ProjectDirs::from("", "", "bizdesk").ok_or_else(|| {
            ClientError::Config("Could not determine config directory".to_string())
        })?;

        Ok(project_dirs.config_dir().to_path_buf())
    }

    /// Resolve a path relative to the API base URL.
    ///
    /// Absolute URLs are used as-is; everything else is appended to the
    /// base path, so `/invoices` under `http://host/api` becomes
    /// `http://host/api/invoices`.
    pub fn endpoint_url(&self, path: &str) -> Result<Url> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(Url::parse(path)?);
        }

        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("valid default base URL"),
            http_timeouts: HttpTimeouts::default(),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            refresh: RefreshPolicy::default(),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
