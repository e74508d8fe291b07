use std::sync::Arc;

use reqwest::StatusCode;
use tracing::{debug, info, instrument, warn};

use crate::config::{MAX_AUTH_RETRIES, endpoints};
use crate::coordinator::{RefreshCoordinator, RefreshTrigger};
use crate::errors::{ClientError, Result};
use crate::session::Credential;
use crate::store::CredentialSlot;
use crate::transport::{ApiRequest, ApiResponse, HttpTransport};

/// Whether the caller's UI is already showing a logged-out screen
pub trait NavigationContext: Send + Sync {
    fn is_logged_out(&self) -> bool;
}

/// Navigation context for callers without a UI; never logged out
#[derive(Debug, Clone, Copy, Default)]
pub struct ActiveSession;

impl NavigationContext for ActiveSession {
    fn is_logged_out(&self) -> bool {
        false
    }
}

/// True for endpoints that take part in authentication itself
pub fn is_auth_endpoint(route: &str) -> bool {
    endpoints::AUTH_ALLOWLIST
        .iter()
        .any(|endpoint| route.ends_with(endpoint))
}

/// A logical call and how many times it has been re-issued
#[derive(Debug, Clone)]
pub struct OutboundCall {
    pub request: ApiRequest,
    attempt: u8,
}

impl OutboundCall {
    pub fn new(request: ApiRequest) -> Self {
        Self {
            request,
            attempt: 0,
        }
    }

    pub fn attempt(&self) -> u8 {
        self.attempt
    }

    pub fn can_retry(&self) -> bool {
        self.attempt < MAX_AUTH_RETRIES
    }

    /// Same call carrying `credential`, same attempt count
    pub fn authorized(&self, credential: &Credential) -> Result<Self> {
        Ok(Self {
            request: self.request.with_credential(credential)?,
            attempt: self.attempt,
        })
    }

    /// Next attempt of this call carrying `credential`
    pub fn retry_with(&self, credential: &Credential) -> Result<Self> {
        Ok(Self {
            request: self.request.with_credential(credential)?,
            attempt: self.attempt.saturating_add(1),
        })
    }
}

fn rejected(response: &ApiResponse) -> ClientError {
    ClientError::AuthenticationRejected {
        status: response.status,
        body_snippet: response.body_snippet(),
    }
}

/// Pre-flight credential check run before every outbound call
#[derive(Clone)]
pub struct RequestInterceptor {
    coordinator: RefreshCoordinator,
}

impl RequestInterceptor {
    pub fn new(coordinator: RefreshCoordinator) -> Self {
        Self { coordinator }
    }

    /// Attach a usable credential to `call`, refreshing first if needed.
    ///
    /// Calls pass through unauthenticated only when nothing is stored. An
    /// expired credential is never sent and never silently dropped: the call
    /// either carries a fresh credential or fails.
    #[instrument(skip(self, call), fields(method = %call.request.method, path = %call.request.route()))]
    pub async fn intercept(&self, call: OutboundCall) -> Result<OutboundCall> {
        let Some(current) = self.coordinator.store().get(CredentialSlot::Access).await else {
            debug!("No stored credential, sending unauthenticated");
            return Ok(call);
        };

        if !self.coordinator.checker().is_expired(&current) {
            return call.authorized(&current);
        }

        if is_auth_endpoint(call.request.route()) {
            debug!("Stored credential expired, sending auth call without it");
            return Ok(call);
        }

        debug!("Stored credential expired, renewing before send");
        let fresh = self.coordinator.renew(RefreshTrigger::Expired).await?;
        call.authorized(&fresh)
    }
}

/// Post-flight handling of authentication rejections
#[derive(Clone)]
pub struct ResponseInterceptor {
    coordinator: RefreshCoordinator,
    transport: Arc<dyn HttpTransport>,
    navigation: Arc<dyn NavigationContext>,
}

impl ResponseInterceptor {
    pub fn new(
        coordinator: RefreshCoordinator,
        transport: Arc<dyn HttpTransport>,
        navigation: Arc<dyn NavigationContext>,
    ) -> Self {
        Self {
            coordinator,
            transport,
            navigation,
        }
    }

    /// Pass `response` through, or refresh and re-issue `call` on a 401.
    ///
    /// Non-401 responses are returned untouched whatever their status.
    #[instrument(skip(self, call, response), fields(method = %call.request.method, path = %call.request.route()))]
    pub async fn handle(&self, call: OutboundCall, response: ApiResponse) -> Result<ApiResponse> {
        let mut call = call;
        let mut response = response;

        while response.status == StatusCode::UNAUTHORIZED {
            if is_auth_endpoint(call.request.route()) {
                debug!("Auth endpoint rejected the call, not retrying");
                return Err(rejected(&response));
            }
            if !call.can_retry() {
                warn!(attempt = call.attempt(), "Call rejected again after refresh");
                return Err(rejected(&response));
            }
            if self.navigation.is_logged_out() {
                debug!("Already logged out, not refreshing");
                return Err(rejected(&response));
            }

            let sent = call.request.bearer_token().map(Credential::new);
            let fresh = self
                .coordinator
                .renew(RefreshTrigger::Rejected { sent })
                .await?;

            call = call.retry_with(&fresh)?;
            info!(attempt = call.attempt(), "Re-issuing call with refreshed credential");
            response = self.transport.send(&call.request).await?;
        }

        Ok(response)
    }
}
