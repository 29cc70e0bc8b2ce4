//! Error types for the broker and the HTTP boundary.
//!
//! [`BrokerError`] is what the broker API returns to in-process callers.
//! [`RealtimeError`] is the HTTP-facing error: each variant maps to a status
//! code and the structured JSON error body shared by every endpoint.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::transport::TransportError;

/// JSON body of every error response:
/// ```json
/// {
///   "error": {
///     "code": 3001,
///     "message": "broker unavailable",
///     "details": "transport error: transport closed"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// The error.
    pub error: ErrorBody,
}

/// Code, message and optional details of an error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable numeric code, see [`RealtimeError::error_code`].
    pub code: u32,
    /// Message for humans.
    pub message: String,
    /// Underlying cause, when there is one worth showing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Failure of a broker operation.
///
/// Publishing callers log and drop these: an event that was not delivered
/// never undoes the mutation that produced it.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The backing transport rejected the operation.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The event could not be rendered as JSON.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Error returned by HTTP and WebSocket-upgrade handlers.
///
/// # Codes
///
/// | Range     | Category   | HTTP Status               |
/// |-----------|------------|---------------------------|
/// | 1000–1999 | Validation | 400 Bad Request           |
/// | 3000–3999 | Backend    | 503 Service Unavailable   |
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    /// A path parameter or request field is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The broker could not serve the request (backend unreachable,
    /// subscription refused, ...).
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

impl RealtimeError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::Broker(_) => 3001,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Broker(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for RealtimeError {
    fn into_response(self) -> Response {
        let (message, details) = match &self {
            Self::Broker(source) => ("broker unavailable".to_owned(), Some(source.to_string())),
            other => (other.to_string(), None),
        };
        let body = ErrorBody {
            code: self.error_code(),
            message,
            details,
        };
        (self.status_code(), axum::Json(ErrorResponse { error: body })).into_response()
    }
}
