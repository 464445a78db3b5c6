//! Error taxonomy for the request-processing pipeline.
//!
//! Every fallible boundary operation returns one of these kinds; the HTTP
//! layer maps each kind to a stable status code, and the proxy adapters
//! additionally render provider-shaped error bodies.

use thiserror::Error;

use crate::http::HttpError;

#[derive(Debug, Error)]
pub enum FirewallError {
    /// Malformed request: bad JSON, missing context fields, oversized payload.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The policy decision is `block`. Carries the decision reason.
    #[error("blocked by policy: {0}")]
    PolicyBlocked(String),

    /// Detokenize invoked by a caller that is not trusted.
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    /// Token handle unknown or expired.
    #[error("token handle unknown or expired")]
    TokenHandleMissing,

    /// A detector pattern exceeded its scan budget.
    #[error("detector budget exceeded on pattern {0}")]
    DetectorTimeout(&'static str),

    /// Token-store I/O deadline exceeded, or AEAD tag verification failed.
    #[error("token backend unavailable: {0:#}")]
    BackendUnavailable(anyhow::Error),
}

impl From<FirewallError> for HttpError {
    fn from(error: FirewallError) -> Self {
        match error {
            FirewallError::InvalidInput(_) => HttpError::bad_request().err()(error),
            FirewallError::PolicyBlocked(_) => HttpError::blocked().with_msg("blocked by policy").err()(error),
            FirewallError::Forbidden(msg) => HttpError::forbidden().msg(msg),
            FirewallError::TokenHandleMissing => HttpError::gone().with_msg("token handle unknown or expired").err()(error),
            FirewallError::DetectorTimeout(_) => HttpError::internal().with_msg("detector budget exceeded").err()(error),
            FirewallError::BackendUnavailable(_) => {
                HttpError::unavailable().with_msg("token backend unavailable").err()(error)
            }
        }
    }
}
