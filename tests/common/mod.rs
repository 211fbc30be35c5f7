#![allow(dead_code)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use interviewprep_client::token::now_secs;
use interviewprep_client::{
    ApiClient, ClientConfig, Credential, CredentialStore, SessionEvent, SessionEventBus, Subscription,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use wiremock::MockServer;

pub const REFRESH_PATH: &str = "/api/auth/refresh-token";

/// Unsigned token carrying `claims`
pub fn make_token(claims: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

/// Token for `sub` expiring `secs` from now (negative for already expired)
pub fn token_expiring_in(sub: &str, secs: i64) -> String {
    make_token(json!({ "sub": sub, "role": "STUDENT", "exp": now_secs() + secs }))
}

pub struct Harness {
    pub client: ApiClient,
    pub store: CredentialStore,
    pub events: SessionEventBus,
    pub seen: Arc<Mutex<Vec<SessionEvent>>>,
    _subscription: Subscription,
}

impl Harness {
    pub fn events_seen(&self) -> Vec<SessionEvent> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self, event: &SessionEvent) -> usize {
        self.events_seen().iter().filter(|e| *e == event).count()
    }

    pub fn url(&self, server: &MockServer, path: &str) -> String {
        format!("{}/api{}", server.uri(), path)
    }
}

/// Client pointed at `server` with an in-memory store and a recording subscriber
pub fn harness(server: &MockServer) -> Harness {
    harness_with_store(server, CredentialStore::in_memory())
}

pub fn harness_with_store(server: &MockServer, store: CredentialStore) -> Harness {
    build_harness(server, store, 5)
}

/// Client whose transport timeout and proactive refresh wait are `timeout_secs`
pub fn harness_with_timeout(server: &MockServer, timeout_secs: u64) -> Harness {
    build_harness(server, CredentialStore::in_memory(), timeout_secs)
}

fn build_harness(server: &MockServer, store: CredentialStore, timeout_secs: u64) -> Harness {
    let events = SessionEventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = events.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

    let config = ClientConfig {
        request_timeout_secs: timeout_secs,
        ..ClientConfig::new(format!("{}/api", server.uri()))
    };
    let client = ApiClient::with_parts(config, store.clone(), events.clone()).unwrap();

    Harness {
        client,
        store,
        events,
        seen,
        _subscription: subscription,
    }
}

pub fn login(harness: &Harness, access_token: &str, refresh_token: &str) {
    harness
        .store
        .save(&Credential::new(
            access_token.to_string(),
            refresh_token.to_string(),
            Some(json!({ "email": "ada@example.com" })),
        ))
        .unwrap();
}
