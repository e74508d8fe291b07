use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::claims::Claims;
use crate::config::{ClientConfig, endpoints};
use crate::coordinator::RefreshCoordinator;
use crate::errors::{ClientError, Result};
use crate::exchange::{HttpRefreshExchange, RefreshExchange};
use crate::interceptor::{
    ActiveSession, NavigationContext, OutboundCall, RequestInterceptor, ResponseInterceptor,
};
use crate::models::{
    ApiErrorBody, AuthResponse, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest,
    ResetPasswordRequest, VerifyTwoFactorRequest,
};
use crate::session::{Credential, CredentialPair};
use crate::signal::{ExternalRefreshSignal, NoExternalRefresh};
use crate::store::{CredentialSlot, CredentialStore};
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};

/// Result of a login attempt
#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    /// Credentials stored; `user` is whatever profile the server returned
    Authenticated { user: Option<Value> },
    /// The account needs a second factor before credentials are issued
    TwoFactorRequired {
        two_factor_token: String,
        methods: Vec<String>,
    },
}

/// Authenticated API client
///
/// Every call runs through the request interceptor (pre-flight expiry
/// check), the transport, and the response interceptor (refresh-and-retry
/// on 401). Both interceptors share one [`RefreshCoordinator`].
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    coordinator: RefreshCoordinator,
    request_interceptor: RequestInterceptor,
    response_interceptor: ResponseInterceptor,
}

/// Wires an [`ApiClient`] from its collaborators
pub struct ApiClientBuilder {
    config: ClientConfig,
    store: Arc<dyn CredentialStore>,
    transport: Option<Arc<dyn HttpTransport>>,
    exchange: Option<Arc<dyn RefreshExchange>>,
    external: Arc<dyn ExternalRefreshSignal>,
    navigation: Arc<dyn NavigationContext>,
}

impl ApiClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn exchange(mut self, exchange: Arc<dyn RefreshExchange>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    /// Refresh flag owned by a sibling authentication component
    pub fn external_signal(mut self, external: Arc<dyn ExternalRefreshSignal>) -> Self {
        self.external = external;
        self
    }

    pub fn navigation(mut self, navigation: Arc<dyn NavigationContext>) -> Self {
        self.navigation = navigation;
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(self.config.clone())?),
        };
        let exchange: Arc<dyn RefreshExchange> = match self.exchange {
            Some(exchange) => exchange,
            None => Arc::new(HttpRefreshExchange::new(Arc::clone(&transport))),
        };

        let coordinator =
            RefreshCoordinator::new(self.store, exchange, self.external, self.config.refresh);

        Ok(ApiClient {
            request_interceptor: RequestInterceptor::new(coordinator.clone()),
            response_interceptor: ResponseInterceptor::new(
                coordinator.clone(),
                Arc::clone(&transport),
                self.navigation,
            ),
            transport,
            coordinator,
        })
    }
}

impl ApiClient {
    /// Create a client with the default reqwest transport
    pub fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
        Self::builder(config, store).build()
    }

    pub fn builder(config: ClientConfig, store: Arc<dyn CredentialStore>) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            store,
            transport: None,
            exchange: None,
            external: Arc::new(NoExternalRefresh),
            navigation: Arc::new(ActiveSession),
        }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Run a call through both interceptors.
    ///
    /// Returns the response for any status other than an unrecoverable 401.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.route()))]
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let call = self
            .request_interceptor
            .intercept(OutboundCall::new(request))
            .await?;
        let response = self.transport.send(&call.request).await?;
        self.response_interceptor.handle(call, response).await
    }

    /// Run a call and parse a successful JSON body
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = self.execute(request).await?;

        if !response.is_success() {
            return Err(error_for(&response));
        }

        Ok(response.json()?)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, &str)]) -> Result<T> {
        let request = ApiRequest::new(Method::GET, path).with_query(params.iter().copied());
        self.send_json(request).await
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_with_body(Method::POST, path, body).await
    }

    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_with_body(Method::PUT, path, body).await
    }

    pub async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_with_body(Method::PATCH, path, body).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(ApiRequest::new(Method::DELETE, path)).await
    }

    async fn send_with_body<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let request = ApiRequest::new(method, path).with_json(serde_json::to_value(body)?);
        self.send_json(request).await
    }

    /// Log in with email and password
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response: AuthResponse = self.post(endpoints::LOGIN, &request).await?;

        if response.requires_2fa {
            let two_factor_token = response.two_factor_token.ok_or_else(|| {
                ClientError::InvalidResponse("Missing twoFactorToken in 2FA challenge".to_string())
            })?;
            info!("Login requires a second factor");
            return Ok(LoginOutcome::TwoFactorRequired {
                two_factor_token,
                methods: response.methods,
            });
        }

        let user = self.adopt_credentials(response).await?;
        info!("Logged in");
        Ok(LoginOutcome::Authenticated { user })
    }

    /// Answer a two-factor challenge issued by [`ApiClient::login`]
    #[instrument(skip(self, two_factor_token, code))]
    pub async fn verify_two_factor(
        &self,
        two_factor_token: &str,
        code: &str,
        method: &str,
    ) -> Result<Option<Value>> {
        let request = VerifyTwoFactorRequest {
            two_factor_token: two_factor_token.to_string(),
            code: code.to_string(),
            method: method.to_string(),
        };
        let response: AuthResponse = self.post(endpoints::VERIFY_2FA, &request).await?;
        self.adopt_credentials(response).await
    }

    /// Register a new account; credentials are stored if the server issues them
    #[instrument(skip(self, registration))]
    pub async fn register<B: Serialize + ?Sized>(&self, registration: &B) -> Result<Option<Value>> {
        let response: AuthResponse = self.post(endpoints::REGISTER, registration).await?;
        if response.token.is_none() {
            return Ok(response.user);
        }
        self.adopt_credentials(response).await
    }

    /// Log out; stored credentials are cleared even if the server call fails.
    ///
    /// The call bypasses both interceptors: it carries whatever access
    /// credential is stored, expired or not, and never triggers a refresh.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<()> {
        let mut request = ApiRequest::new(Method::POST, endpoints::LOGOUT).with_json(Value::Object(
            serde_json::Map::new(),
        ));
        if let Some(access) = self.coordinator.store().get(CredentialSlot::Access).await {
            request = request.with_credential(&access)?;
        }

        match self.transport.send(&request).await {
            Ok(response) if response.is_success() => debug!("Server session closed"),
            Ok(response) => warn!(status = %response.status, "Logout call failed"),
            Err(e) => warn!(error = %e, "Logout call failed"),
        }

        self.coordinator.store().clear().await?;
        info!("Logged out");
        Ok(())
    }

    /// Profile of the logged-in user as the server sees it
    #[instrument(skip(self))]
    pub async fn current_user(&self) -> Result<Value> {
        let mut body: Value = self.get(endpoints::ME, &[]).await?;
        match body.get_mut("user").map(Value::take) {
            Some(user) if !user.is_null() => Ok(user),
            _ => Ok(body),
        }
    }

    #[instrument(skip(self, current_password, new_password))]
    pub async fn change_password(&self, current_password: &str, new_password: &str) -> Result<()> {
        let request = ChangePasswordRequest {
            current_password: current_password.to_string(),
            new_password: new_password.to_string(),
        };
        let _: Value = self.post(endpoints::CHANGE_PASSWORD, &request).await?;
        info!("Password changed");
        Ok(())
    }

    /// Ask the server to email a password reset link
    #[instrument(skip(self))]
    pub async fn forgot_password(&self, email: &str) -> Result<()> {
        let request = ForgotPasswordRequest {
            email: email.to_string(),
        };
        let _: Value = self.post(endpoints::FORGOT_PASSWORD, &request).await?;
        Ok(())
    }

    /// Set a new password using the token from a reset link
    #[instrument(skip(self, token, new_password))]
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<()> {
        let request = ResetPasswordRequest {
            token: token.to_string(),
            new_password: new_password.to_string(),
        };
        let _: Value = self.post(endpoints::RESET_PASSWORD, &request).await?;
        info!("Password reset");
        Ok(())
    }

    /// Claims of the stored access credential, expired or not
    pub async fn current_claims(&self) -> Option<Claims> {
        let pair = self.coordinator.store().load().await?;
        Claims::decode(&pair.access)
    }

    /// True if a stored credential can still authenticate a call
    pub async fn is_authenticated(&self) -> bool {
        let Some(pair) = self.coordinator.store().load().await else {
            return false;
        };
        let checker = self.coordinator.checker();
        !checker.is_expired(&pair.access)
            || pair.refresh.as_ref().is_some_and(|r| !checker.is_expired(r))
    }

    /// Store the credential pair carried by an auth response
    async fn adopt_credentials(&self, response: AuthResponse) -> Result<Option<Value>> {
        let token = response
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ClientError::InvalidResponse("Missing token in response".to_string()))?;

        let pair = CredentialPair::new(
            Credential::new(token),
            response.refresh_token.filter(|r| !r.is_empty()).map(Credential::new),
        );
        self.coordinator.store().replace(&pair).await?;

        Ok(response.user)
    }
}

/// Map a non-2xx response to an error, using the API error body when present
fn error_for(response: &ApiResponse) -> ClientError {
    let body = ApiErrorBody::parse(&response.body);

    if response.status == StatusCode::LOCKED {
        return ClientError::AccountLocked {
            message: body
                .message
                .clone()
                .unwrap_or_else(|| "Account is temporarily locked".to_string()),
            remaining_minutes: body.remaining_minutes,
            locked_until: body.locked_until,
        };
    }

    ClientError::Http {
        status: response.status,
        message: body.detail(),
        body_snippet: response.body_snippet(),
    }
}
