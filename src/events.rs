//! In-process session notifications
//!
//! The client publishes two kinds of events: the session expired (refresh failed,
//! credential cleared) and a request was forbidden. UI code subscribes once at
//! the top level; there is no queueing, so events published while nobody is
//! subscribed are dropped.

use papaya::HashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::debug;

/// Payload of an access-forbidden event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForbiddenDetail {
    pub message: String,
    pub url: String,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SessionEvent {
    SessionExpired,
    AccessForbidden { detail: ForbiddenDetail },
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionExpired => "session-expired",
            Self::AccessForbidden { .. } => "access-forbidden",
        }
    }
}

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;
type Handlers = HashMap<u64, Handler>;

/// Process-wide publish point for [`SessionEvent`]s. Clones share subscribers.
#[derive(Clone, Default)]
pub struct SessionEventBus {
    handlers: Arc<Handlers>,
    next_id: Arc<AtomicU64>,
}

impl SessionEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` synchronously to everyone subscribed right now
    pub fn publish(&self, event: SessionEvent) {
        // Snapshot first so handlers may subscribe or unsubscribe while we deliver
        let handlers: Vec<Handler> = self.handlers.pin().iter().map(|(_, h)| Arc::clone(h)).collect();
        debug!(kind = event.kind(), subscribers = handlers.len(), "Publishing session event");

        for handler in handlers {
            handler(&event);
        }
    }

    /// Register `handler`; it stays registered until the returned guard is dropped
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.pin().insert(id, Arc::new(handler));

        Subscription {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.pin().len()
    }
}

/// Unsubscribes its handler when dropped
#[must_use = "dropping a Subscription unsubscribes its handler immediately"]
pub struct Subscription {
    id: u64,
    handlers: Weak<Handlers>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handlers) = self.handlers.upgrade() {
            handlers.pin().remove(&self.id);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorState {
    pub session_expired: bool,
    pub access_forbidden: bool,
    pub forbidden_message: String,
}

/// Session state for a top-level shell: raises flags on events and lets the
/// user dismiss them.
pub struct SessionMonitor {
    state: Arc<Mutex<MonitorState>>,
    _subscription: Subscription,
}

impl SessionMonitor {
    pub fn attach(bus: &SessionEventBus) -> Self {
        let state = Arc::new(Mutex::new(MonitorState::default()));
        let shared = Arc::clone(&state);

        let subscription = bus.subscribe(move |event| {
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            match event {
                SessionEvent::SessionExpired => state.session_expired = true,
                SessionEvent::AccessForbidden { detail } => {
                    state.access_forbidden = true;
                    state.forbidden_message = detail.message.clone();
                }
            }
        });

        Self {
            state,
            _subscription: subscription,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Acknowledge the expiry; returns the route to send the user to
    pub fn dismiss_session_expired(&self) -> &'static str {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).session_expired = false;
        "/auth"
    }

    pub fn dismiss_access_forbidden(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.access_forbidden = false;
        state.forbidden_message.clear();
    }
}
