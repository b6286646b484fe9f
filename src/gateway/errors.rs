//! Maps [`HelixError`] onto the OpenAI-compatible error envelope and the
//! HTTP status table the public surface promises.
//!
//! The envelope shape (`{"error": {"message", "type", "code", "param"}}`)
//! and the status mapping itself both come straight off
//! [`crate::error::ErrorCode`] — this module only wires that taxonomy
//! into axum's `IntoResponse`.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::HelixError;

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    param: Option<&'a str>,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorBody<'a>,
}

impl IntoResponse for HelixError {
    fn into_response(self) -> Response {
        let code = self.code();
        let status = StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = self.to_string();
        let body = ErrorEnvelope {
            error: ErrorBody {
                message: &message,
                kind: code.as_str(),
                code: code.as_str(),
                param: None,
            },
        };
        let mut response = (status, axum::Json(body)).into_response();
        if let HelixError::RateLimited { retry_after_secs: Some(secs), .. } = &self
            && let Ok(value) = HeaderValue::from_str(&secs.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        if matches!(self.code(), crate::error::ErrorCode::Internal) {
            tracing::error!(error = %self, "internal error surfaced to client");
        }
        response
    }
}

/// Thin newtype so handlers can return `Result<T, GatewayError>` without
/// an inherent-vs-foreign-trait conflict when `T` is itself a `Result`.
pub struct GatewayError(pub HelixError);

impl From<HelixError> for GatewayError {
    fn from(e: HelixError) -> Self {
        Self(e)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.0.into_response()
    }
}
