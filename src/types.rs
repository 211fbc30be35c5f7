//! Credential, session and wire types

use crate::token::{self, Claims};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Access + refresh token pair with the user it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds taken from the access token's `exp` claim, if it has one
    pub expires_at: Option<i64>,
    pub user: Option<Value>,
}

impl Credential {
    pub fn new(access_token: String, refresh_token: String, user: Option<Value>) -> Self {
        let expires_at = match token::expiry(&access_token) {
            token::Expiry::At(exp) => Some(exp),
            _ => None,
        };

        Self {
            access_token,
            refresh_token,
            expires_at,
            user,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        token::is_expired(&self.access_token, now)
    }
}

/// Authentication state derived from the current credential. Never cached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub is_authenticated: bool,
    pub role: Option<String>,
}

impl Session {
    pub fn from_credential(credential: Option<&Credential>) -> Self {
        let Some(credential) = credential else {
            return Self::default();
        };

        match token::decode_claims(&credential.access_token) {
            Ok(claims) => Self {
                is_authenticated: true,
                role: claims.role().map(str::to_string),
            },
            Err(_) => Self::default(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.as_deref().is_some_and(|role| role.contains("ADMIN"))
    }

    /// Where the shell should land after login or on reload
    pub fn landing_path(&self) -> &'static str {
        match (self.is_authenticated, self.is_admin()) {
            (false, _) => "/auth",
            (true, true) => "/admin",
            (true, false) => "/dashboard",
        }
    }
}

/// Profile fields carried in the access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: String,
    pub exp: Option<i64>,
}

impl UserInfo {
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            id: claims.sub.clone().or_else(|| claims.user_id.clone()),
            email: claims.email.clone(),
            name: claims.name.clone().or_else(|| claims.username.clone()),
            role: claims.role().unwrap_or("STUDENT").to_string(),
            exp: claims.exp,
        }
    }
}

/// Body of `POST /auth/refresh-token`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Response of the refresh endpoint. Servers answer with either `token` or
/// `accessToken`; the refresh token is only present when it was rotated.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub token: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<Value>,
}

impl RefreshResponse {
    pub fn access_token(&self) -> Option<&str> {
        self.token
            .as_deref()
            .or(self.access_token.as_deref())
            .filter(|t| !t.is_empty())
    }
}

/// Output of the identity-provider login exchange
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginResponse {
    #[serde(rename = "accessToken", alias = "access_token", alias = "token")]
    pub access_token: Option<String>,
    #[serde(rename = "refreshToken", alias = "refresh_token")]
    pub refresh_token: Option<String>,
    #[serde(alias = "userInfo")]
    pub user: Option<Value>,
}
