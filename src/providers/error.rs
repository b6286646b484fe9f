//! Provider error taxonomy (C4 §4.4).
//!
//! Classified once at the provider-client boundary; nothing upstream
//! re-inspects the raw transport error afterward.

use crate::error::HelixError;
use crate::utils::retry::RetryableError;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Transport error, 5xx, or timeout — safe to retry on the next
    /// provider in a fallback chain, or drop the participant in a debate
    /// round.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Local or upstream throttle.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// Missing/invalid credentials. Do-not-retry; marks the provider
    /// degraded in the registry.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Malformed request body or unsupported parameter combination.
    /// Do-not-retry; surfaced verbatim to the caller.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Prompt exceeds the model's context window. May trigger upstream
    /// compaction.
    #[error("context too long: {0}")]
    ContextTooLong(String),

    /// The caller's context was cancelled mid-call.
    #[error("cancelled")]
    Cancelled,

    /// Provider is known-unreachable (e.g. circuit open, DNS failure).
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl RetryableError for ProviderError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Transient(_) | ProviderError::RateLimited { .. }
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Transient(format!("timeout: {e}"))
        } else if e.is_connect() {
            ProviderError::Unavailable(format!("connect failed: {e}"))
        } else {
            ProviderError::Transient(e.to_string())
        }
    }
}

impl From<ProviderError> for HelixError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Transient(m) => HelixError::Transient { message: m },
            ProviderError::RateLimited {
                message,
                retry_after_secs,
            } => HelixError::RateLimited {
                message,
                retry_after_secs,
            },
            ProviderError::AuthFailed(m) => HelixError::Auth { message: m },
            ProviderError::InvalidRequest(m) => HelixError::Validation { message: m },
            ProviderError::ContextTooLong(m) => HelixError::Validation { message: m },
            ProviderError::Cancelled => HelixError::Cancelled,
            ProviderError::Unavailable(m) => HelixError::Transient { message: m },
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
