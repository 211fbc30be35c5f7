//! API client with automatic bearer authentication and token refresh

use crate::config::ClientConfig;
use crate::credential_store::CredentialStore;
use crate::error::Result;
use crate::events::SessionEventBus;
use crate::interceptor::{Disposition, RequestContext, RequestInterceptor, ResponseInterceptor};
use crate::refresh::RefreshCoordinator;
use crate::storage::{FileStorage, MemoryStorage, Storage};
use crate::token;
use crate::types::{Credential, LoginResponse, Session, UserInfo};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// A request as the caller describes it; the client adds authentication
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL, or an absolute URL
    pub path: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        self.body = Some(Bytes::from(serde_json::to_vec(body)?));
        Ok(self)
    }
}

/// A completed response, read in full
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    async fn read(response: reqwest::Response) -> Result<Self> {
        let status = response.status();
        let url = response.url().to_string();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(Self {
            status,
            url,
            headers,
            body,
        })
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP client for the InterviewPrep API.
///
/// Every request carries the stored access token, refreshed ahead of expiry
/// and once more after a 401. Callers only see ordinary responses and errors;
/// session loss and permission problems are also announced on [`events`](Self::events).
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    http_client: Client,
    store: CredentialStore,
    events: SessionEventBus,
    refresher: RefreshCoordinator,
    request_interceptor: RequestInterceptor,
    response_interceptor: ResponseInterceptor,
}

impl ApiClient {
    /// Create a client with its own store (file backed when `storage_path` is set)
    pub fn new(config: ClientConfig) -> Result<Self> {
        let storage: Arc<dyn Storage> = match &config.storage_path {
            Some(path) => Arc::new(FileStorage::open(path)?),
            None => Arc::new(MemoryStorage::new()),
        };

        Self::with_parts(config, CredentialStore::new(storage), SessionEventBus::new())
    }

    pub fn with_parts(config: ClientConfig, store: CredentialStore, events: SessionEventBus) -> Result<Self> {
        config.validate()?;

        let http_client = Client::builder().timeout(config.request_timeout()).build()?;
        // Separate client so the refresh exchange never passes through the interceptors
        let refresh_client = Client::builder().timeout(config.request_timeout()).build()?;

        let refresher = RefreshCoordinator::new(refresh_client, config.refresh_url(), store.clone(), events.clone());
        let request_interceptor = RequestInterceptor::new(
            store.clone(),
            refresher.clone(),
            config.refresh_window(),
            config.request_timeout(),
        );
        let response_interceptor = ResponseInterceptor::new(refresher.clone(), events.clone());

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                http_client,
                store,
                events,
                refresher,
                request_interceptor,
                response_interceptor,
            }),
        })
    }

    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let mut ctx = RequestContext::new(request, &self.inner.config);
        self.inner.request_interceptor.apply(&mut ctx).await;

        // Bounded: the response interceptor asks for at most one retry per context
        loop {
            let response = self.dispatch(&ctx).await?;
            match self.inner.response_interceptor.handle(&mut ctx, response).await {
                Disposition::Deliver(response) => return Ok(response),
                Disposition::Retry => {
                    debug!(method = %ctx.method, url = %ctx.url, "Retrying with refreshed credential");
                }
                Disposition::Fail(err) => return Err(err),
            }
        }
    }

    async fn dispatch(&self, ctx: &RequestContext) -> Result<ApiResponse> {
        debug!(
            method = %ctx.method,
            url = %ctx.url,
            has_token = ctx.bearer().is_some(),
            "Dispatching request"
        );

        let mut builder = self
            .inner
            .http_client
            .request(ctx.method.clone(), &ctx.url)
            .headers(ctx.headers.clone());
        if !ctx.query.is_empty() {
            builder = builder.query(&ctx.query);
        }
        if let Some(body) = &ctx.body {
            builder = builder.body(body.clone());
        }

        ApiResponse::read(builder.send().await?).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::post(path).json(body)?).await?.json()
    }

    /// Store the credential produced by a login exchange
    pub fn login(&self, login: LoginResponse) -> Result<Credential> {
        let credential = self.inner.store.save_login(login)?;
        debug!(expires_at = ?credential.expires_at, "Logged in");
        Ok(credential)
    }

    pub fn logout(&self) {
        self.inner.store.clear();
    }

    pub fn session(&self) -> Session {
        self.inner.store.session()
    }

    pub fn user_info(&self) -> Option<UserInfo> {
        let credential = self.inner.store.read()?;
        token::decode_claims(&credential.access_token)
            .ok()
            .map(|claims| UserInfo::from_claims(&claims))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.store
    }

    pub fn events(&self) -> &SessionEventBus {
        &self.inner.events
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.inner.refresher
    }
}
