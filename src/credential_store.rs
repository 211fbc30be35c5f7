//! Persisted holder of the current credential

use crate::error::{ClientError, Result};
use crate::storage::{MemoryStorage, Storage};
use crate::types::{Credential, LoginResponse, Session};
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

const ACCESS_TOKEN_KEY: &str = "authToken";
const LEGACY_ACCESS_TOKEN_KEY: &str = "token";
const REFRESH_TOKEN_KEY: &str = "refreshToken";
const USER_KEY: &str = "user";

/// Owns the persisted access token, refresh token and user object.
///
/// All three entries change together: `save` and `clear` hold the write side of
/// a lock that `read` shares, so a reader never observes a half-written pair.
/// Cloning is cheap and every clone sees the same state.
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn Storage>,
    gate: Arc<RwLock<()>>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            gate: Arc::new(RwLock::new(())),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Replace the stored credential
    pub fn save(&self, credential: &Credential) -> Result<()> {
        let _guard = self.gate.write().unwrap_or_else(PoisonError::into_inner);

        let user = match &credential.user {
            Some(user) => Some(serde_json::to_string(user)?),
            None => None,
        };

        let written = self.storage.write_batch(&[
            (ACCESS_TOKEN_KEY, Some(credential.access_token.as_str())),
            (LEGACY_ACCESS_TOKEN_KEY, None),
            (REFRESH_TOKEN_KEY, Some(credential.refresh_token.as_str())),
            (USER_KEY, user.as_deref()),
        ]);

        if let Err(e) = written {
            // Never leave a mixed pair behind
            self.remove_all();
            return Err(e);
        }

        debug!("Credential saved");
        Ok(())
    }

    /// Store the output of a login exchange
    pub fn save_login(&self, login: LoginResponse) -> Result<Credential> {
        let access_token = login
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ClientError::Configuration("login response carried no access token".to_string()))?;
        let refresh_token = login
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or(ClientError::MissingRefreshToken)?;

        let credential = Credential::new(access_token, refresh_token, login.user);
        self.save(&credential)?;
        Ok(credential)
    }

    /// Current credential, or `None` when logged out.
    ///
    /// An access token stored without its refresh token is an invalid pair and
    /// is cleared here.
    pub fn read(&self) -> Option<Credential> {
        let loaded = {
            let _guard = self.gate.read().unwrap_or_else(PoisonError::into_inner);
            self.load()
        };

        let (access_token, refresh_token, user) = match loaded? {
            (access_token, Some(refresh_token), user) => (access_token, refresh_token, user),
            (_, None, _) => {
                // Check again under the write side: a save may have completed the pair meanwhile
                let _guard = self.gate.write().unwrap_or_else(PoisonError::into_inner);
                match self.load()? {
                    (access_token, Some(refresh_token), user) => (access_token, refresh_token, user),
                    (_, None, _) => {
                        warn!("Access token stored without a refresh token, clearing credential");
                        self.remove_all();
                        return None;
                    }
                }
            }
        };

        let user = user.and_then(|raw| match serde_json::from_str::<Value>(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Stored user is not valid JSON, ignoring it");
                None
            }
        });

        Some(Credential::new(access_token, refresh_token, user))
    }

    /// Raw entries; the caller holds the gate
    fn load(&self) -> Option<(String, Option<String>, Option<String>)> {
        let access_token = self
            .storage
            .get(ACCESS_TOKEN_KEY)
            .or_else(|| self.storage.get(LEGACY_ACCESS_TOKEN_KEY))
            .filter(|t| !t.is_empty())?;

        Some((
            access_token,
            self.storage.get(REFRESH_TOKEN_KEY).filter(|t| !t.is_empty()),
            self.storage.get(USER_KEY),
        ))
    }

    pub fn user(&self) -> Option<Value> {
        self.read().and_then(|credential| credential.user)
    }

    /// Recomputed on every call
    pub fn session(&self) -> Session {
        Session::from_credential(self.read().as_ref())
    }

    /// Remove every stored entry. Safe to call when already empty.
    pub fn clear(&self) {
        let _guard = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        self.remove_all();
        debug!("Credential cleared");
    }

    fn remove_all(&self) {
        let changes = [ACCESS_TOKEN_KEY, LEGACY_ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY].map(|key| (key, None::<&str>));
        if let Err(e) = self.storage.write_batch(&changes) {
            warn!(error = %e, "Failed to remove stored credential entries");
        }
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
