//! Request and response interception around every API call
//!
//! A logical request moves through
//! `Sent -> Success | 401 -> Refreshing -> Retried -> Success | Failed`,
//! with 403 and every other failure ending immediately. The retry budget lives
//! on the [`RequestContext`], so each logical request is retried at most once
//! and unrelated requests never share a budget.

use crate::api_client::{ApiRequest, ApiResponse};
use crate::config::ClientConfig;
use crate::credential_store::CredentialStore;
use crate::error::{ClientError, FailedResponse};
use crate::events::{ForbiddenDetail, SessionEvent, SessionEventBus};
use crate::refresh::RefreshCoordinator;
use crate::token;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One-shot retry budget of a logical request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryMarker {
    #[default]
    Unused,
    Spent,
}

impl RetryMarker {
    pub fn is_spent(&self) -> bool {
        *self == Self::Spent
    }
}

/// Everything needed to (re-)issue one logical request
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub retry: RetryMarker,
    /// The request has been re-issued after a refresh
    pub reissued: bool,
}

impl RequestContext {
    pub fn new(request: ApiRequest, config: &ClientConfig) -> Self {
        let mut headers = request.headers;
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        Self {
            url: config.build_url(&request.path),
            method: request.method,
            headers,
            query: request.query,
            body: request.body,
            retry: RetryMarker::Unused,
            reissued: false,
        }
    }

    pub fn set_bearer(&mut self, token: &str) {
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                self.headers.insert(AUTHORIZATION, value);
            }
            Err(e) => warn!(error = %e, "Access token is not a valid header value, sending without it"),
        }
    }

    /// Token carried in the Authorization header, if any
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
    }

    fn failure(&self, response: &ApiResponse) -> ClientError {
        ClientError::status_failure(FailedResponse {
            status: response.status,
            method: self.method.clone(),
            url: self.url.clone(),
            body: response.text(),
            retried: self.reissued,
        })
    }
}

/// Attaches the bearer token, refreshing it first when it is about to expire
pub struct RequestInterceptor {
    store: CredentialStore,
    refresher: RefreshCoordinator,
    refresh_window: Duration,
    refresh_timeout: Duration,
}

impl RequestInterceptor {
    pub fn new(
        store: CredentialStore,
        refresher: RefreshCoordinator,
        refresh_window: Duration,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            store,
            refresher,
            refresh_window,
            refresh_timeout,
        }
    }

    pub async fn apply(&self, ctx: &mut RequestContext) {
        let Some(credential) = self.store.read() else {
            debug!(url = %ctx.url, "No credential stored, sending request unauthenticated");
            return;
        };

        let mut access_token = credential.access_token;
        if token::expires_within(&access_token, token::now_secs(), self.refresh_window) {
            info!(url = %ctx.url, "Access token expiring soon, refreshing before dispatch");

            // A failed or stalled refresh must not fail the request: the 401 path is the backstop
            match tokio::time::timeout(self.refresh_timeout, self.refresher.refresh_stale(&access_token)).await {
                Ok(Ok(refreshed)) => access_token = refreshed.access_token,
                Ok(Err(e)) => warn!(error = %e, "Proactive refresh failed, sending current token"),
                Err(_) => warn!(
                    timeout_secs = self.refresh_timeout.as_secs(),
                    "Proactive refresh timed out, sending current token"
                ),
            }
        }

        ctx.set_bearer(&access_token);
    }
}

/// What to do with a completed response
#[derive(Debug)]
pub enum Disposition {
    Deliver(ApiResponse),
    /// Re-issue the request; the context already carries the new token
    Retry,
    Fail(ClientError),
}

/// Turns failed responses into a one-time retry, a session event, or an error
pub struct ResponseInterceptor {
    refresher: RefreshCoordinator,
    events: SessionEventBus,
}

impl ResponseInterceptor {
    pub fn new(refresher: RefreshCoordinator, events: SessionEventBus) -> Self {
        Self { refresher, events }
    }

    pub async fn handle(&self, ctx: &mut RequestContext, response: ApiResponse) -> Disposition {
        if response.status.is_success() {
            debug!(url = %ctx.url, status = %response.status, "Request succeeded");
            return Disposition::Deliver(response);
        }

        match response.status {
            StatusCode::UNAUTHORIZED if !ctx.retry.is_spent() => {
                ctx.retry = RetryMarker::Spent;
                info!(method = %ctx.method, url = %ctx.url, "Received 401, refreshing credential");

                let refreshed = match ctx.bearer().map(str::to_string) {
                    Some(observed) => self.refresher.refresh_stale(&observed).await,
                    None => self.refresher.refresh().await,
                };

                match refreshed {
                    Ok(credential) => {
                        ctx.set_bearer(&credential.access_token);
                        ctx.reissued = true;
                        Disposition::Retry
                    }
                    Err(e) => {
                        // Store already cleared and session-expired already published
                        warn!(url = %ctx.url, error = %e, "Refresh after 401 failed");
                        Disposition::Fail(ctx.failure(&response))
                    }
                }
            }
            StatusCode::UNAUTHORIZED => {
                warn!(method = %ctx.method, url = %ctx.url, "Still unauthorized after refresh, giving up");
                Disposition::Fail(ctx.failure(&response))
            }
            StatusCode::FORBIDDEN => {
                warn!(method = %ctx.method, url = %ctx.url, "Access forbidden");
                self.events.publish(SessionEvent::AccessForbidden {
                    detail: ForbiddenDetail {
                        message: forbidden_message(&response),
                        url: ctx.url.clone(),
                        method: ctx.method.to_string(),
                    },
                });
                Disposition::Fail(ctx.failure(&response))
            }
            status => {
                debug!(url = %ctx.url, status = %status, "Request failed");
                Disposition::Fail(ctx.failure(&response))
            }
        }
    }
}

fn forbidden_message(response: &ApiResponse) -> String {
    serde_json::from_slice::<serde_json::Value>(&response.body)
        .ok()
        .and_then(|body| body.get("message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| "Access forbidden".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::tests::make_token;
    use crate::types::Credential;
    use serde_json::json;

    fn response(status: StatusCode, body: &str) -> ApiResponse {
        ApiResponse {
            status,
            url: "http://localhost:8080/api/admin/users".to_string(),
            headers: HeaderMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    fn parts() -> (CredentialStore, SessionEventBus, RefreshCoordinator) {
        let store = CredentialStore::in_memory();
        let events = SessionEventBus::new();
        let refresher = RefreshCoordinator::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/api/auth/refresh-token".to_string(),
            store.clone(),
            events.clone(),
        );
        (store, events, refresher)
    }

    fn context() -> RequestContext {
        RequestContext::new(ApiRequest::get("/admin/users"), &ClientConfig::default())
    }

    #[test]
    fn test_context_defaults() {
        let mut ctx = context();
        assert_eq!(ctx.url, "http://localhost:8080/api/admin/users");
        assert_eq!(ctx.headers[CONTENT_TYPE], "application/json");
        assert_eq!(ctx.bearer(), None);
        assert!(!ctx.retry.is_spent());

        ctx.set_bearer("abc");
        assert_eq!(ctx.bearer(), Some("abc"));
    }

    #[tokio::test]
    async fn test_request_without_credential_stays_anonymous() {
        let (store, _events, refresher) = parts();
        let interceptor = RequestInterceptor::new(store, refresher, token::DEFAULT_REFRESH_WINDOW, Duration::from_secs(1));

        let mut ctx = context();
        interceptor.apply(&mut ctx).await;
        assert!(!ctx.headers.contains_key(AUTHORIZATION));
    }

    #[tokio::test]
    async fn test_request_attaches_valid_token_without_refresh() {
        let (store, _events, refresher) = parts();
        let access = make_token(json!({ "exp": token::now_secs() + 3600 }));
        store
            .save(&Credential::new(access.clone(), "refresh".to_string(), None))
            .unwrap();
        let interceptor = RequestInterceptor::new(store, refresher, token::DEFAULT_REFRESH_WINDOW, Duration::from_secs(1));

        let mut ctx = context();
        interceptor.apply(&mut ctx).await;
        assert_eq!(ctx.bearer(), Some(access.as_str()));
    }

    #[tokio::test]
    async fn test_forbidden_publishes_and_keeps_session() {
        let (store, events, refresher) = parts();
        store
            .save(&Credential::new("access".to_string(), "refresh".to_string(), None))
            .unwrap();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&seen);
        let _subscription = events.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        let interceptor = ResponseInterceptor::new(refresher, events.clone());
        let mut ctx = context();
        let outcome = interceptor
            .handle(&mut ctx, response(StatusCode::FORBIDDEN, r#"{"message":"Admins only"}"#))
            .await;

        assert!(matches!(outcome, Disposition::Fail(ref e) if e.status() == Some(StatusCode::FORBIDDEN)));
        assert!(store.read().is_some());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![SessionEvent::AccessForbidden {
                detail: ForbiddenDetail {
                    message: "Admins only".to_string(),
                    url: "http://localhost:8080/api/admin/users".to_string(),
                    method: "GET".to_string(),
                }
            }]
        );
    }

    #[tokio::test]
    async fn test_second_401_is_not_retried() {
        let (_store, _events, refresher) = parts();
        let interceptor = ResponseInterceptor::new(refresher, SessionEventBus::new());
        let mut ctx = context();
        ctx.retry = RetryMarker::Spent;
        ctx.reissued = true;

        let outcome = interceptor.handle(&mut ctx, response(StatusCode::UNAUTHORIZED, "")).await;
        match outcome {
            Disposition::Fail(e) => assert_eq!(e.kind(), crate::ErrorKind::RetryExhausted),
            other => panic!("unexpected disposition: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_other_failures_pass_through() {
        let (_store, _events, refresher) = parts();
        let interceptor = ResponseInterceptor::new(refresher, SessionEventBus::new());
        let mut ctx = context();

        let outcome = interceptor.handle(&mut ctx, response(StatusCode::NOT_FOUND, "missing")).await;
        match outcome {
            Disposition::Fail(e) => {
                assert_eq!(e.status(), Some(StatusCode::NOT_FOUND));
                assert_eq!(e.failed_response().map(|f| f.body.as_str()), Some("missing"));
            }
            other => panic!("unexpected disposition: {other:?}"),
        }
        assert!(!ctx.retry.is_spent());
    }
}
