//! Error types for the relay
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Fetch Error Enum ==
/// Unified error type for cache lookups and upstream fetches.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// Transport failure (connection refused, DNS, client-side timeout)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Upstream answered with a non-success status
    #[error("Invalid response (status {status}): {message}")]
    InvalidResponse { status: u16, message: String },

    /// Upstream quota exhausted and the retry budget is spent
    #[error("Rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    /// Server-side timeout class (504, 524, 408) after the retry budget is spent
    #[error("Gateway timeout after {attempts} attempts")]
    GatewayTimeout { attempts: u32 },

    /// Envelope parsed but the payload did not match the expected schema
    #[error("Decoding error: {0}")]
    DecodingError(String),

    /// Fingerprint already has an upstream call in flight
    #[error("Duplicate request: {0}")]
    DuplicateRequest(String),

    /// Valid but contentless result
    #[error("Empty response for {0}")]
    EmptyResponse(String),

    /// Caller abandoned its wait
    #[error("Request cancelled: {0}")]
    Cancelled(String),

    /// Every partition of a batch failed
    #[error("Batch failed: all {total} partitions failed (last error: {last})")]
    BatchFailed { total: usize, last: Box<FetchError> },

    /// Caller supplied an unusable request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error (task join failure, misconfiguration)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FetchError {
    /// Whether the error is the upstream quota signal.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, FetchError::RateLimitExceeded { .. })
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for FetchError {
    fn into_response(self) -> Response {
        let status = match &self {
            FetchError::NetworkError(_) => StatusCode::BAD_GATEWAY,
            FetchError::InvalidResponse { .. } => StatusCode::BAD_GATEWAY,
            FetchError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            FetchError::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            FetchError::DecodingError(_) => StatusCode::BAD_GATEWAY,
            FetchError::DuplicateRequest(_) => StatusCode::CONFLICT,
            FetchError::EmptyResponse(_) => StatusCode::NOT_FOUND,
            FetchError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
            FetchError::BatchFailed { last, .. } if last.is_rate_limit() => {
                StatusCode::TOO_MANY_REQUESTS
            }
            FetchError::BatchFailed { .. } => StatusCode::BAD_GATEWAY,
            FetchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            FetchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the relay.
pub type Result<T> = std::result::Result<T, FetchError>;
