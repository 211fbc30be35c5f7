// Single-flight exchange of the refresh token for a new credential

use crate::credential_store::CredentialStore;
use crate::error::{ClientError, Result};
use crate::events::{SessionEvent, SessionEventBus};
use crate::token;
use crate::types::{Credential, RefreshRequest, RefreshResponse};
use async_singleflight::Group;
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Every refresh shares one key: there is one credential per client
const REFRESH_KEY: &str = "refresh";

/// Macro to check HTTP response status and return error if not successful
macro_rules! check_response {
    ($response:expr, $error_msg:expr) => {
        if !$response.status().is_success() {
            let status = $response.status();
            let text = $response.text().await.unwrap_or_default();
            return Err(ClientError::RefreshFailed(format!(
                "{} with status {}: {}",
                $error_msg, status, text
            )));
        }
    };
}

/// Exchanges the refresh token for a new credential.
///
/// Concurrent callers collapse onto one in-flight exchange and all receive its
/// result. On failure the credential store is cleared and
/// [`SessionEvent::SessionExpired`] is published exactly once per exchange.
///
/// The exchange goes through its own `reqwest::Client`, never through the
/// intercepted [`ApiClient`](crate::ApiClient) pipeline, so a refresh can not
/// trigger another refresh.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    http_client: Client,
    refresh_url: String,
    store: CredentialStore,
    events: SessionEventBus,
    /// Error type is String because singleflight requires a shared error type
    singleflight: Group<Credential, String>,
}

impl RefreshCoordinator {
    /// `http_client` must be a plain client without any interception
    pub fn new(
        http_client: Client,
        refresh_url: String,
        store: CredentialStore,
        events: SessionEventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                http_client,
                refresh_url,
                store,
                events,
                singleflight: Group::new(),
            }),
        }
    }

    /// Refresh now, or join the refresh already in flight
    pub async fn refresh(&self) -> Result<Credential> {
        self.refresh_singleflight(None).await
    }

    /// Refresh on behalf of a caller that saw `observed` as the access token.
    ///
    /// If the store has moved on to a different, unexpired token in the meantime
    /// that credential is returned without a network call.
    pub async fn refresh_stale(&self, observed: &str) -> Result<Credential> {
        if let Some(current) = self.inner.newer_than(observed) {
            debug!("Credential already refreshed by another request");
            return Ok(current);
        }

        self.refresh_singleflight(Some(observed.to_string())).await
    }

    async fn refresh_singleflight(&self, observed: Option<String>) -> Result<Credential> {
        let inner = Arc::clone(&self.inner);
        // The group entry lives in a spawned task, so a dropped caller never
        // releases the key while the exchange is still running
        let flight = tokio::spawn(async move {
            let exchange = inner.singleflight.work(REFRESH_KEY, async {
                if let Some(current) = observed.as_deref().and_then(|o| inner.newer_than(o)) {
                    return Ok(current);
                }
                inner.refresh_or_expire().await.map_err(|e| e.to_string())
            });
            let (success_opt, error_opt, _shared) = exchange.await;
            (success_opt, error_opt)
        });

        match flight.await {
            Ok((Some(credential), None)) => Ok(credential),
            Ok((None, Some(err_str))) => Err(ClientError::RefreshFailed(err_str)),
            Ok(_) => Err(ClientError::RefreshFailed("Unknown error during token refresh".to_string())),
            Err(e) => Err(ClientError::RefreshFailed(format!("refresh task aborted: {e}"))),
        }
    }

    pub fn refresh_url(&self) -> &str {
        &self.inner.refresh_url
    }
}

impl Inner {
    fn newer_than(&self, observed: &str) -> Option<Credential> {
        self.store
            .read()
            .filter(|current| current.access_token != observed)
            .filter(|current| !current.is_expired(token::now_secs()))
    }

    async fn refresh_or_expire(&self) -> Result<Credential> {
        match self.do_refresh().await {
            Ok(credential) => Ok(credential),
            Err(e) => {
                warn!(error = %e, "Token refresh failed, ending session");
                self.store.clear();
                self.events.publish(SessionEvent::SessionExpired);
                Err(e)
            }
        }
    }

    async fn do_refresh(&self) -> Result<Credential> {
        let current = self.store.read().ok_or(ClientError::MissingRefreshToken)?;

        let request = RefreshRequest {
            refresh_token: current.refresh_token.clone(),
        };

        let response = self
            .http_client
            .post(&self.refresh_url)
            .json(&request)
            .send()
            .await?;

        check_response!(response, "Token refresh rejected");

        let refreshed: RefreshResponse = response.json().await?;
        let access_token = refreshed
            .access_token()
            .ok_or_else(|| ClientError::RefreshFailed("refresh response carried no access token".to_string()))?
            .to_string();

        let credential = Credential::new(
            access_token,
            refreshed
                .refresh_token
                .filter(|t| !t.is_empty())
                .unwrap_or(current.refresh_token),
            refreshed.user.or(current.user),
        );

        self.store.save(&credential)?;
        info!(expires_at = ?credential.expires_at, "Access token refreshed successfully");

        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::tests::make_token;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coordinator(store: &CredentialStore, events: &SessionEventBus) -> RefreshCoordinator {
        // Nothing listens here; any network attempt fails fast
        RefreshCoordinator::new(
            Client::new(),
            "http://127.0.0.1:9/api/auth/refresh-token".to_string(),
            store.clone(),
            events.clone(),
        )
    }

    #[tokio::test]
    async fn test_missing_refresh_token_expires_session() {
        let store = CredentialStore::in_memory();
        let events = SessionEventBus::new();
        let expired = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&expired);
        let _subscription = events.subscribe(move |event| {
            if *event == SessionEvent::SessionExpired {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        let err = coordinator(&store, &events).refresh().await.unwrap_err();
        assert!(matches!(err, ClientError::RefreshFailed(_)));
        assert_eq!(expired.load(Ordering::SeqCst), 1);
        assert!(store.read().is_none());
    }

    #[tokio::test]
    async fn test_stale_observation_returns_current_credential() {
        let store = CredentialStore::in_memory();
        let events = SessionEventBus::new();
        let fresh = Credential::new(
            make_token(json!({ "exp": token::now_secs() + 3600 })),
            "refresh".to_string(),
            None,
        );
        store.save(&fresh).unwrap();

        let credential = coordinator(&store, &events)
            .refresh_stale("an-older-token")
            .await
            .unwrap();
        assert_eq!(credential, fresh);
    }
}
