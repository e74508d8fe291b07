use std::sync::Arc;

use reqwest::Method;
use tracing::{debug, instrument, warn};

use crate::config::endpoints;
use crate::errors::RefreshError;
use crate::models::{RefreshRequest, RefreshResponse};
use crate::session::Credential;
use crate::transport::{ApiRequest, HttpTransport};

/// New credentials minted by a successful exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedCredentials {
    pub access: Credential,
    /// Absent when the server does not rotate refresh credentials
    pub refresh: Option<Credential>,
}

/// The single network call that trades a refresh credential for new ones.
///
/// Implementations never retry; a failed exchange is reported once.
#[async_trait::async_trait]
pub trait RefreshExchange: Send + Sync {
    async fn exchange(
        &self,
        refresh: &Credential,
    ) -> std::result::Result<RefreshedCredentials, RefreshError>;
}

/// `POST /auth/refresh` over an [`HttpTransport`]
#[derive(Clone)]
pub struct HttpRefreshExchange {
    transport: Arc<dyn HttpTransport>,
}

impl HttpRefreshExchange {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait::async_trait]
impl RefreshExchange for HttpRefreshExchange {
    #[instrument(skip(self, refresh))]
    async fn exchange(
        &self,
        refresh: &Credential,
    ) -> std::result::Result<RefreshedCredentials, RefreshError> {
        let body = serde_json::to_value(RefreshRequest {
            refresh_token: refresh.as_str().to_string(),
        })
        .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;
        let request = ApiRequest::new(Method::POST, endpoints::REFRESH).with_json(body);

        debug!("Exchanging refresh credential");
        let response = self
            .transport
            .send(&request)
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        if !response.is_success() {
            warn!(status = %response.status, "Refresh endpoint rejected the refresh credential");
            return Err(RefreshError::Rejected {
                status: response.status,
                body_snippet: response.body_snippet(),
            });
        }

        let parsed: RefreshResponse = response
            .json()
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

        if parsed.token.is_empty() {
            return Err(RefreshError::InvalidResponse(
                "Missing token in refresh response".to_string(),
            ));
        }

        Ok(RefreshedCredentials {
            access: Credential::new(parsed.token),
            refresh: parsed
                .refresh_token
                .filter(|r| !r.is_empty())
                .map(Credential::new),
        })
    }
}
