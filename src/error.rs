//! Engine error types with HTTP status code mapping.
//!
//! [`CreditError`] is the central error type for the credit engine. Each
//! variant maps to a specific HTTP status code and structured JSON error
//! response. Idempotent replays are never errors; they surface as
//! success variants of the operation outcomes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 4002,
///     "message": "insufficient balance for u-1234: requested 50, available 45",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`CreditError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Engine-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category          | HTTP Status                 |
/// |-----------|-------------------|-----------------------------|
/// | 1000–1999 | Validation        | 400 Bad Request             |
/// | 2000–2999 | State/Not Found   | 404 Not Found / 409 Conflict |
/// | 3000–3999 | Infrastructure    | 500 / 503 (retriable)       |
/// | 4000–4999 | Balance           | 402 Payment Required        |
#[derive(Debug, thiserror::Error)]
pub enum CreditError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authorize or debit rejected: available funds are too low. A
    /// business outcome, not retriable with the same amount.
    #[error("insufficient balance for {user_code}: requested {requested}, available {available}")]
    InsufficientBalance {
        /// User whose balance was checked.
        user_code: String,
        /// Amount the operation needed.
        requested: i64,
        /// Amount actually available.
        available: i64,
    },

    /// The same reference was reused with incompatible parameters; a
    /// caller bug, never retried automatically.
    #[error("idempotency conflict on {op_ref}: {detail}")]
    IdempotencyConflict {
        /// Reference the caller reused.
        op_ref: String,
        /// What differed from the original operation.
        detail: String,
    },

    /// Capture or void arrived for a reference that was never
    /// authorized.
    #[error("no hold found for ({user_code}, {op_ref})")]
    HoldNotFound {
        /// User whose holds were searched.
        user_code: String,
        /// Reference with no matching hold.
        op_ref: String,
    },

    /// Transient store failure; safe to retry with the same reference.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Internal invariant failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CreditError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::HoldNotFound { .. } => 2001,
            Self::IdempotencyConflict { .. } => 2003,
            Self::Internal(_) => 3000,
            Self::StoreUnavailable(_) => 3002,
            Self::InsufficientBalance { .. } => 4002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::HoldNotFound { .. } => StatusCode::NOT_FOUND,
            Self::IdempotencyConflict { .. } => StatusCode::CONFLICT,
            Self::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller may safely retry with the same reference.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl IntoResponse for CreditError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_balance_maps_to_402() {
        let error = CreditError::InsufficientBalance {
            user_code: "u1".to_string(),
            requested: 50,
            available: 45,
        };
        assert_eq!(error.status_code(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(error.error_code(), 4002);
        assert!(!error.is_retriable());
    }

    #[test]
    fn idempotency_conflict_maps_to_409() {
        let error = CreditError::IdempotencyConflict {
            op_ref: "turn-1".to_string(),
            detail: "amount 10 != 5".to_string(),
        };
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
        assert!(!error.is_retriable());
    }

    #[test]
    fn store_unavailable_is_retriable() {
        let error = CreditError::StoreUnavailable("timeout".to_string());
        assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(error.is_retriable());
    }
}
