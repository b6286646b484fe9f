//! Top-level error taxonomy.
//!
//! Every component-local error type converts into [`HelixError`] at its
//! boundary. The [`ErrorCode`] is the stable string surfaced in the
//! OpenAI-compatible error envelope's `type` field and used for HTTP
//! status mapping in the gateway.

use thiserror::Error;

/// Stable, programmatically-matchable error kind per the error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Validation,
    Auth,
    Forbidden,
    RateLimited,
    Transient,
    Cancelled,
    NoProviders,
    AllFailed,
    Timeout,
    NotFound,
    Internal,
}

impl ErrorCode {
    /// The string placed in the OpenAI error envelope's `type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Validation => "validation_error",
            ErrorCode::Auth => "auth_error",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::Transient => "transient_error",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::NoProviders => "no_providers",
            ErrorCode::AllFailed => "all_failed",
            ErrorCode::Timeout => "timeout",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Internal => "internal_error",
        }
    }

    /// HTTP status this kind maps to per the gateway's error mapping table.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::Validation => 400,
            ErrorCode::Auth => 401,
            ErrorCode::Forbidden => 403,
            ErrorCode::RateLimited => 429,
            ErrorCode::Transient => 503,
            ErrorCode::Cancelled => 499,
            ErrorCode::NoProviders => 503,
            ErrorCode::AllFailed => 503,
            ErrorCode::Timeout => 504,
            ErrorCode::NotFound => 404,
            ErrorCode::Internal => 500,
        }
    }
}

/// Top-level application error. Components convert their own error enums
/// into this at their public boundary; nothing upstream re-inspects the
/// original transport error.
#[derive(Debug, Error)]
pub enum HelixError {
    #[error("{message}")]
    Validation { message: String },

    #[error("{message}")]
    Auth { message: String },

    #[error("{message}")]
    Forbidden { message: String },

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("transient failure: {message}")]
    Transient { message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("no eligible providers: {message}")]
    NoProviders { message: String },

    #[error("all providers failed: {message}")]
    AllFailed { message: String },

    #[error("timed out: {message}")]
    Timeout { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl HelixError {
    pub fn code(&self) -> ErrorCode {
        match self {
            HelixError::Validation { .. } => ErrorCode::Validation,
            HelixError::Auth { .. } => ErrorCode::Auth,
            HelixError::Forbidden { .. } => ErrorCode::Forbidden,
            HelixError::RateLimited { .. } => ErrorCode::RateLimited,
            HelixError::Transient { .. } => ErrorCode::Transient,
            HelixError::Cancelled => ErrorCode::Cancelled,
            HelixError::NoProviders { .. } => ErrorCode::NoProviders,
            HelixError::AllFailed { .. } => ErrorCode::AllFailed,
            HelixError::Timeout { .. } => ErrorCode::Timeout,
            HelixError::NotFound { .. } => ErrorCode::NotFound,
            HelixError::Internal { .. } => ErrorCode::Internal,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        HelixError::Internal {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        HelixError::Validation {
            message: message.into(),
        }
    }

    pub fn no_providers(message: impl Into<String>) -> Self {
        HelixError::NoProviders {
            message: message.into(),
        }
    }

    pub fn all_failed(message: impl Into<String>) -> Self {
        HelixError::AllFailed {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        HelixError::NotFound {
            message: message.into(),
        }
    }
}

pub type HelixResult<T> = Result<T, HelixError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_http_status_mapping() {
        assert_eq!(ErrorCode::Auth.http_status(), 401);
        assert_eq!(ErrorCode::RateLimited.http_status(), 429);
        assert_eq!(ErrorCode::Cancelled.http_status(), 499);
        assert_eq!(ErrorCode::Timeout.http_status(), 504);
        assert_eq!(ErrorCode::NotFound.http_status(), 404);
        assert_eq!(ErrorCode::Internal.http_status(), 500);
    }

    #[test]
    fn helix_error_code_roundtrip() {
        let e = HelixError::RateLimited {
            message: "slow down".into(),
            retry_after_secs: Some(5),
        };
        assert_eq!(e.code().as_str(), "rate_limited");
    }
}
