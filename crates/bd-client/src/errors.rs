use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;

/// Client error types
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Access credential expired and no fresh credential became available")]
    CredentialExpiredLocally,

    #[error("Credential refresh failed: {0}")]
    RefreshExchangeFailed(#[from] RefreshError),

    #[error("No valid credentials available - login required")]
    NoValidCredentials,

    #[error("Timed out after {waited:?} waiting on {waiting_on}")]
    RefreshWaitTimedOut {
        waiting_on: WaitSource,
        waited: Duration,
    },

    #[error("Authentication rejected ({status}): {body_snippet}")]
    AuthenticationRejected {
        status: reqwest::StatusCode,
        body_snippet: String,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("HTTP error {status}: {}", message.as_deref().unwrap_or(body_snippet))]
    Http {
        status: reqwest::StatusCode,
        /// Reason parsed from the API error body, if it had one
        message: Option<String>,
        body_snippet: String,
    },

    #[error("{message}")]
    AccountLocked {
        message: String,
        remaining_minutes: Option<u64>,
        locked_until: Option<String>,
    },

    #[error("JSON serialization/deserialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential store error: {0}")]
    Store(String),

    #[error("Could not acquire credential store lock")]
    LockTimeout,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Which wait a caller gave up on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitSource {
    /// The coordinator's own in-flight refresh
    RefreshQueue,
    /// A refresh driven by a sibling authentication component
    ExternalSignal,
}

impl std::fmt::Display for WaitSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RefreshQueue => f.write_str("in-flight credential refresh"),
            Self::ExternalSignal => f.write_str("external credential refresh"),
        }
    }
}

/// Outcome of a failed refresh exchange.
///
/// Cloneable so a single failure can be handed to every queued caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("refresh credential rejected ({status}): {body_snippet}")]
    Rejected {
        status: reqwest::StatusCode,
        body_snippet: String,
    },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),

    #[error("refreshed credentials could not be persisted: {0}")]
    Persist(String),

    #[error("refresh task ended without an outcome")]
    Abandoned,
}

impl ClientError {
    /// True for the failures that mean the caller has to log in again
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::NoValidCredentials
                | Self::CredentialExpiredLocally
                | Self::AuthenticationRejected { .. }
                | Self::RefreshExchangeFailed(RefreshError::Rejected { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_login() {
        assert!(ClientError::NoValidCredentials.requires_login());
        assert!(
            ClientError::RefreshExchangeFailed(RefreshError::Rejected {
                status: reqwest::StatusCode::UNAUTHORIZED,
                body_snippet: String::new(),
            })
            .requires_login()
        );
        assert!(
            !ClientError::RefreshExchangeFailed(RefreshError::Transport("reset".into()))
                .requires_login()
        );
        assert!(
            !ClientError::RefreshWaitTimedOut {
                waiting_on: WaitSource::RefreshQueue,
                waited: Duration::from_secs(10),
            }
            .requires_login()
        );
    }

    #[test]
    fn test_http_error_prefers_server_message() {
        let with_message = ClientError::Http {
            status: reqwest::StatusCode::UNPROCESSABLE_ENTITY,
            message: Some("customerId is required".to_string()),
            body_snippet: r#"{"message":"customerId is required"}"#.to_string(),
        };
        assert_eq!(
            with_message.to_string(),
            "HTTP error 422 Unprocessable Entity: customerId is required"
        );

        let without = ClientError::Http {
            status: reqwest::StatusCode::BAD_GATEWAY,
            message: None,
            body_snippet: "upstream down".to_string(),
        };
        assert_eq!(without.to_string(), "HTTP error 502 Bad Gateway: upstream down");
    }
}
