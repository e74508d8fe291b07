use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `POST /auth/refresh` request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// `POST /auth/refresh` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// `POST /auth/login` request
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Response shared by login, register and two-factor verification.
///
/// Either carries a credential pair or, for accounts with two-factor
/// authentication, a challenge that has to be answered first.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<Value>,
    #[serde(default, rename = "requires2FA")]
    pub requires_2fa: bool,
    #[serde(default)]
    pub two_factor_token: Option<String>,
    #[serde(default)]
    pub methods: Vec<String>,
}

/// `POST /auth/verify-2fa` request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyTwoFactorRequest {
    pub two_factor_token: String,
    pub code: String,
    pub method: String,
}

/// `POST /auth/change-password` request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// `POST /auth/forgot-password` request
#[derive(Debug, Clone, Serialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// `POST /auth/reset-password` request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

/// One entry of a validation failure list
#[derive(Debug, Clone, Deserialize)]
pub struct FieldError {
    #[serde(default)]
    pub msg: Option<String>,
}

/// Error body returned by the API on failures
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub errors: Vec<FieldError>,
    /// Set on 423 account lockouts
    #[serde(default)]
    pub remaining_minutes: Option<u64>,
    #[serde(default)]
    pub locked_until: Option<String>,
}

impl ApiErrorBody {
    /// Parse an error body; anything that is not a JSON object yields an empty body
    pub fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    /// Most specific human-readable reason: validation messages, then `error`, then `message`
    pub fn detail(&self) -> Option<String> {
        let fields: Vec<&str> = self
            .errors
            .iter()
            .filter_map(|e| e.msg.as_deref())
            .collect();
        if !fields.is_empty() {
            return Some(fields.join(", "));
        }
        self.error.clone().or_else(|| self.message.clone())
    }
}
