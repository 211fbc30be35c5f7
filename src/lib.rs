//! InterviewPrep Rust Client
//!
//! An authenticated HTTP client for the InterviewPrep API. It attaches the stored
//! bearer token to every request, refreshes the token before it expires and once
//! after a 401, collapses concurrent refreshes into a single exchange, and
//! announces session loss and permission failures on an in-process event bus.

pub mod api_client;
pub mod config;
pub mod credential_store;
pub mod error;
pub mod events;
pub mod interceptor;
pub mod refresh;
pub mod storage;
pub mod token;
pub mod types;

pub use api_client::{ApiClient, ApiRequest, ApiResponse};
pub use config::ClientConfig;
pub use credential_store::CredentialStore;
pub use error::{ClientError, ErrorKind, FailedResponse, Result};
pub use events::{ForbiddenDetail, SessionEvent, SessionEventBus, SessionMonitor, Subscription};
pub use interceptor::{RequestContext, RetryMarker};
pub use refresh::RefreshCoordinator;
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use types::{Credential, LoginResponse, Session, UserInfo};
