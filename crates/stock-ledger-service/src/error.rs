//! API error types and responses.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use stock_ledger_core::StockError;
use stock_ledger_store::StoreError;

/// Seconds a client should wait before retrying a transient failure.
const RETRY_AFTER_SECONDS: &str = "1";

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - malformed input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Well-formed input that a ledger rule refuses.
    #[error("{message}")]
    Unprocessable {
        /// Machine-readable code.
        code: &'static str,
        /// Human-readable message.
        message: String,
    },

    /// Conflict with the current state of a resource.
    #[error("{message}")]
    Conflict {
        /// Machine-readable code.
        code: &'static str,
        /// Human-readable message.
        message: String,
    },

    /// The same idempotency key is being processed; retry shortly.
    #[error("{0}")]
    InFlight(String),

    /// Lock contention outlasted the retry budget; retry shortly.
    #[error("{0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, retry) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), false),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), false),
            Self::Unprocessable { code, message } => {
                (StatusCode::UNPROCESSABLE_ENTITY, *code, message.clone(), false)
            }
            Self::Conflict { code, message } => {
                (StatusCode::CONFLICT, *code, message.clone(), false)
            }
            Self::InFlight(msg) => {
                (StatusCode::CONFLICT, "duplicate_in_flight", msg.clone(), true)
            }
            Self::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "balance_cache_write_conflict",
                msg.clone(),
                true,
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    false,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details: None,
            },
        };

        if retry {
            (
                status,
                [(header::RETRY_AFTER, RETRY_AFTER_SECONDS)],
                Json(body),
            )
                .into_response()
        } else {
            (status, Json(body)).into_response()
        }
    }
}

impl From<StockError> for ApiError {
    fn from(err: StockError) -> Self {
        let message = err.to_string();
        match err {
            StockError::ZeroDeltaRejected { .. } => Self::Unprocessable {
                code: "zero_delta_rejected",
                message,
            },
            StockError::InvalidEventType(_) => Self::Unprocessable {
                code: "invalid_event_type",
                message,
            },
            StockError::MissingReference { .. } => Self::Unprocessable {
                code: "missing_reference",
                message,
            },
            StockError::ReferenceTooLong { .. } => Self::Unprocessable {
                code: "reference_too_long",
                message,
            },
            StockError::QuantityOverflow { .. } => Self::Unprocessable {
                code: "quantity_overflow",
                message,
            },
            StockError::EmptyEvent(_) => Self::Unprocessable {
                code: "empty_event",
                message,
            },
            StockError::DirectionMismatch { .. } => Self::Unprocessable {
                code: "direction_mismatch",
                message,
            },
            StockError::OpeningStockNotFirst { .. } => Self::Unprocessable {
                code: "opening_stock_not_first",
                message,
            },
            StockError::InsufficientStock { .. } => Self::Unprocessable {
                code: "insufficient_stock",
                message,
            },
            StockError::IdempotencyKeyReused { .. } => Self::Unprocessable {
                code: "idempotency_key_reused",
                message,
            },
            StockError::StaleFinding { .. } => Self::Conflict {
                code: "stale_finding",
                message,
            },
            StockError::IdempotencyKeyFailed { .. } => Self::Conflict {
                code: "idempotency_key_failed",
                message,
            },
            StockError::InvalidTransition { .. } => Self::Conflict {
                code: "invalid_transition",
                message,
            },
            StockError::DuplicateInFlight { .. } => Self::InFlight(message),
            StockError::BalanceCacheWriteConflict { .. } => Self::Unavailable(message),
            StockError::DocumentNotFound(_) | StockError::SaleNotFound(_) => {
                Self::NotFound(message)
            }
            StockError::InvalidId(_) => Self::BadRequest(message),
            StockError::Storage(msg) | StockError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        StockError::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stock_ledger_core::{LocationId, StockKey, VariantId};

    #[test]
    fn validation_errors_are_unprocessable() {
        let key = StockKey::new(VariantId::new(1), LocationId::new(1));
        let response = ApiError::from(StockError::ZeroDeltaRejected { key }).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn transient_errors_carry_retry_after() {
        let response = ApiError::from(StockError::DuplicateInFlight { key: "k".into() })
            .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(response.headers()[header::RETRY_AFTER], RETRY_AFTER_SECONDS);

        let response =
            ApiError::from(StockError::BalanceCacheWriteConflict { attempts: 6 }).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
    }

    #[test]
    fn missing_document_is_not_found() {
        let err = ApiError::from(StoreError::NotFound {
            entity: "document",
            id: "01H".into(),
        });
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
