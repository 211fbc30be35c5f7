//! Access token inspection
//!
//! Tokens are decoded without signature verification: the client only needs the
//! claims to decide when to refresh, the server remains the authority on validity.
//!
//! Inspection fails open. A token without an `exp` claim, or one that cannot be
//! decoded at all, is treated as non-expiring so that a malformed credential never
//! forces a spurious logout. Use [`expiry`] to tell the two cases apart.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{Map, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

/// Proactive refresh window used by the request interceptor
pub const DEFAULT_REFRESH_WINDOW: Duration = Duration::from_secs(600);

/// Reported by [`remaining_seconds`] when a token carries no usable expiry
pub const NO_EXPIRY_REMAINING_SECS: u64 = 24 * 60 * 60;

/// Claims the client cares about. Everything is optional since tokens come from
/// several issuers with different claim layouts.
///
/// Claims are read leniently: a claim of an unexpected JSON type is dropped
/// rather than failing the whole token, numeric ids become strings and a
/// fractional `exp` is truncated to whole seconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Claims {
    pub sub: Option<String>,
    pub user_id: Option<String>,
    pub exp: Option<i64>,
    pub iat: Option<i64>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub username: Option<String>,
    pub role: Option<String>,
    pub authorities: Option<Vec<String>>,
    pub roles: Option<Vec<String>>,
    pub scope: Option<String>,
}

impl Claims {
    fn from_payload(payload: &Map<String, Value>) -> Self {
        let text = |key: &str| payload.get(key).and_then(claim_text);
        let list = |key: &str| payload.get(key).and_then(claim_list);
        let seconds = |key: &str| payload.get(key).and_then(claim_seconds);

        Self {
            sub: text("sub"),
            user_id: text("userId"),
            exp: seconds("exp"),
            iat: seconds("iat"),
            email: text("email"),
            name: text("name"),
            username: text("username"),
            role: text("role"),
            authorities: list("authorities"),
            roles: list("roles"),
            // Space separated, as in the OAuth `scope` form
            scope: list("scope").map(|scopes| scopes.join(" ")),
        }
    }

    /// Resolve the role: `role`, then `authorities[0]`, then `scope`, then `roles[0]`
    pub fn role(&self) -> Option<&str> {
        self.role
            .as_deref()
            .or_else(|| self.authorities.as_ref().and_then(|a| a.first()).map(String::as_str))
            .or(self.scope.as_deref())
            .or_else(|| self.roles.as_ref().and_then(|r| r.first()).map(String::as_str))
            .filter(|role| !role.is_empty())
    }
}

fn claim_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn claim_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(items.iter().filter_map(claim_text).collect()),
        other => claim_text(other).map(|single| vec![single]),
    }
}

fn claim_seconds(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
}

#[derive(Error, Debug)]
pub enum TokenDecodeError {
    #[error("token is not in header.payload.signature form")]
    Format,

    #[error("token payload is not valid base64url: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("token payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("token payload is not a JSON object")]
    NotAnObject,
}

/// Outcome of reading a token's expiry claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    At(i64),
    Missing,
    Malformed,
}

/// Decode the payload segment of a JWT
pub fn decode_claims(token: &str) -> Result<Claims, TokenDecodeError> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
        _ => return Err(TokenDecodeError::Format),
    };

    // Some issuers keep the padding
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
    match serde_json::from_slice::<Value>(&bytes)? {
        Value::Object(payload) => Ok(Claims::from_payload(&payload)),
        _ => Err(TokenDecodeError::NotAnObject),
    }
}

pub fn expiry(token: &str) -> Expiry {
    match decode_claims(token) {
        Ok(Claims { exp: Some(exp), .. }) => Expiry::At(exp),
        Ok(_) => Expiry::Missing,
        Err(e) => {
            debug!(error = %e, "Could not decode access token claims");
            Expiry::Malformed
        }
    }
}

/// Current unix time in seconds
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub fn is_expired(token: &str, now: i64) -> bool {
    match expiry(token) {
        Expiry::At(exp) => exp <= now,
        Expiry::Missing | Expiry::Malformed => false,
    }
}

/// True iff the token has a not-yet-passed expiry that falls within `window` of `now`.
///
/// An already expired token is not "expiring soon"; it is left to the 401 path.
pub fn expires_within(token: &str, now: i64, window: Duration) -> bool {
    match expiry(token) {
        Expiry::At(exp) => exp > now && exp.saturating_sub(now) <= window.as_secs() as i64,
        Expiry::Missing | Expiry::Malformed => false,
    }
}

pub fn remaining_seconds(token: &str, now: i64) -> u64 {
    match expiry(token) {
        Expiry::At(exp) => exp.saturating_sub(now).max(0) as u64,
        Expiry::Missing | Expiry::Malformed => NO_EXPIRY_REMAINING_SECS,
    }
}
