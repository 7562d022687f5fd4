//! API handlers.

use axum::http::HeaderMap;

use crate::error::ApiError;
use crate::workflow::TRANSITION_KEY_PREFIX;

pub mod documents;
pub mod events;
pub mod health;
pub mod idempotency;
pub mod reconciliation;
pub mod sales;
pub mod stock;

/// Header carrying the client-supplied idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Longest idempotency key accepted.
const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Read the idempotency key, if the client sent one.
///
/// Keys under the document-action prefix belong to the workflow service.
pub(crate) fn idempotency_key(headers: &HeaderMap) -> Result<Option<String>, ApiError> {
    let Some(value) = headers.get(IDEMPOTENCY_KEY_HEADER) else {
        return Ok(None);
    };
    let key = value
        .to_str()
        .map_err(|_| ApiError::BadRequest("Idempotency-Key must be visible ASCII".into()))?
        .trim();
    if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ApiError::BadRequest(format!(
            "Idempotency-Key must be 1 to {MAX_IDEMPOTENCY_KEY_LEN} characters"
        )));
    }
    if key.starts_with(TRANSITION_KEY_PREFIX) {
        return Err(ApiError::BadRequest(format!(
            "Idempotency-Key must not start with {TRANSITION_KEY_PREFIX:?}"
        )));
    }
    Ok(Some(key.to_string()))
}
