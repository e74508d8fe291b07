use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::session::Credential;

/// Decoded payload of an access or refresh credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub subject_id: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub display_name: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Claims {
    /// Decode the payload segment of a JWT without verifying its signature
    pub fn decode(credential: &Credential) -> Option<Self> {
        let mut segments = credential.as_str().split('.');
        let (_header, payload) = (segments.next()?, segments.next()?);
        segments.next()?;

        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        let raw: RawClaims = serde_json::from_slice(&bytes).ok()?;

        let expires_at = match raw.exp {
            Some(exp) => Some(Utc.timestamp_opt(exp, 0).single()?),
            None => None,
        };

        Some(Self {
            subject_id: raw.sub.or(raw.id).or(raw.user_id).and_then(id_string),
            email: raw.email,
            role: raw.role,
            display_name: raw.name,
            expires_at,
        })
    }

    pub fn has_role(&self, roles: &[&str]) -> bool {
        self.role
            .as_deref()
            .is_some_and(|role| roles.iter().any(|r| r.eq_ignore_ascii_case(role)))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClaims {
    sub: Option<Value>,
    id: Option<Value>,
    user_id: Option<Value>,
    email: Option<String>,
    role: Option<String>,
    name: Option<String>,
    exp: Option<i64>,
}

fn id_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Local expiry check for credentials; never touches the network.
///
/// Fails closed: a credential that cannot be decoded, or that carries no
/// `exp` claim, counts as expired.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpiryChecker {
    skew: Duration,
}

impl ExpiryChecker {
    pub fn new(skew: Duration) -> Self {
        Self { skew }
    }

    pub fn expiry_instant(&self, credential: &Credential) -> Option<DateTime<Utc>> {
        Claims::decode(credential)?.expires_at
    }

    pub fn is_expired(&self, credential: &Credential) -> bool {
        self.is_expired_at(credential, Utc::now())
    }

    pub fn is_expired_at(&self, credential: &Credential, now: DateTime<Utc>) -> bool {
        let Some(expires_at) = self.expiry_instant(credential) else {
            return true;
        };
        let skew = chrono::Duration::from_std(self.skew).unwrap_or(chrono::Duration::zero());
        now + skew >= expires_at
    }
}
