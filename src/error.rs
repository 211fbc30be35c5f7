//! Error types for the InterviewPrep client

use reqwest::{Method, StatusCode};
use thiserror::Error;

/// A request that completed with a non-success status.
#[derive(Debug, Clone)]
pub struct FailedResponse {
    pub status: StatusCode,
    pub method: Method,
    pub url: String,
    pub body: String,
    /// Set when this failure came back from the one retry after a refresh
    pub retried: bool,
}

/// Client error types
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{} {} failed with status {}", .0.method, .0.url, .0.status)]
    Status(Box<FailedResponse>),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("No refresh token available")]
    MissingRefreshToken,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Coarse classification used by callers deciding how to react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 401 that was not retried (refresh failed or was impossible)
    ExpiredCredential,
    /// 401 returned by the retried request
    RetryExhausted,
    /// 403, the session is still valid
    Forbidden,
    /// The refresh exchange itself failed; the session is gone
    RefreshFailure,
    /// Transport-level failure unrelated to auth
    Network,
    Other,
}

impl ClientError {
    pub(crate) fn status_failure(failure: FailedResponse) -> Self {
        Self::Status(Box::new(failure))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Status(failure) => match failure.status {
                StatusCode::UNAUTHORIZED if failure.retried => ErrorKind::RetryExhausted,
                StatusCode::UNAUTHORIZED => ErrorKind::ExpiredCredential,
                StatusCode::FORBIDDEN => ErrorKind::Forbidden,
                _ => ErrorKind::Other,
            },
            Self::RefreshFailed(_) | Self::MissingRefreshToken => ErrorKind::RefreshFailure,
            Self::HttpRequest(_) => ErrorKind::Network,
            _ => ErrorKind::Other,
        }
    }

    /// HTTP status of the failed response, if the request completed at all
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status(failure) => Some(failure.status),
            Self::HttpRequest(e) => e.status(),
            _ => None,
        }
    }

    pub fn failed_response(&self) -> Option<&FailedResponse> {
        match self {
            Self::Status(failure) => Some(failure),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
