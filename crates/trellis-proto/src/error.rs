use serde::{Deserialize, Serialize};

/// Domain errors reported by the store. These travel over the wire inside
/// `Response::Error` and are surfaced to callers as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("unavailable")]
    Unavailable,
    #[error("timed out")]
    TimedOut,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
}
