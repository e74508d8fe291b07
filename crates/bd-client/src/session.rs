use serde::{Deserialize, Serialize};

/// Opaque signed bearer token.
///
/// Immutable once issued; a refresh supersedes it with a new value.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

/// Access and refresh credential, always written to the store together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    #[serde(rename = "token")]
    pub access: Credential,
    #[serde(rename = "refreshToken", skip_serializing_if = "Option::is_none")]
    pub refresh: Option<Credential>,
}

impl CredentialPair {
    pub fn new(access: impl Into<Credential>, refresh: Option<Credential>) -> Self {
        Self {
            access: access.into(),
            refresh,
        }
    }

    /// Build the pair that replaces `self` after a refresh.
    ///
    /// Servers that do not rotate refresh credentials omit the new one, in
    /// which case the current refresh credential carries over.
    pub fn superseded_by(&self, access: Credential, refresh: Option<Credential>) -> Self {
        Self {
            access,
            refresh: refresh.or_else(|| self.refresh.clone()),
        }
    }
}
