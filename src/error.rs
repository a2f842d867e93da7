use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::FailureKind;

/// Errors that stop a run before scheduling begins, or that the library
/// surfaces from its filesystem-facing helpers.
#[derive(Error, Debug)]
pub enum AdvisorError {
    #[error("Repository root is not readable: {path}: {reason}")]
    RootUnreadable { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Concurrency limit {0} is outside the supported range 1-50")]
    InvalidConcurrency(usize),

    #[error("Version control error: {0}")]
    VersionControl(String),

    #[error("Backend setup failed: {0}")]
    BackendSetup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Pattern error: {0}")]
    Pattern(#[from] globset::Error),
}

pub type Result<T> = std::result::Result<T, AdvisorError>;

/// Retry eligibility of a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Never retried.
    Permanent,
    /// Retried with exponential backoff.
    RateLimit,
    /// Retried after a short fixed delay.
    Transient,
    /// Permanent on the first attempt, transient afterwards.
    Unknown,
}

/// Failure taxonomy shared by every backend adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("quota exhausted: {0}")]
    Quota(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("token limit exceeded: {0}")]
    TokenLimit(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        BackendError::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            BackendError::Auth(_)
            | BackendError::Quota(_)
            | BackendError::PayloadTooLarge(_)
            | BackendError::TokenLimit(_) => ErrorClass::Permanent,
            BackendError::RateLimited { .. } => ErrorClass::RateLimit,
            BackendError::Network(_) | BackendError::Timeout(_) => ErrorClass::Transient,
            BackendError::Other(_) => ErrorClass::Unknown,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            BackendError::Auth(_) => FailureKind::Auth,
            BackendError::Quota(_) => FailureKind::Quota,
            BackendError::RateLimited { .. } => FailureKind::RateLimited,
            BackendError::PayloadTooLarge(_) => FailureKind::PayloadTooLarge,
            BackendError::TokenLimit(_) => FailureKind::TokenLimit,
            BackendError::Network(_) => FailureKind::Network,
            BackendError::Timeout(_) => FailureKind::Timeout,
            BackendError::Other(_) => FailureKind::Other,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout(Duration::ZERO)
        } else if err.is_connect() || err.is_request() {
            BackendError::Network(err.to_string())
        } else if err.is_decode() {
            BackendError::Other(format!("invalid response body: {}", err))
        } else {
            BackendError::Other(err.to_string())
        }
    }
}
