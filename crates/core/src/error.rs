use thiserror::Error;

use crate::model::SessionStatus;

/// Bad input shape. Always the caller's fault and never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{0} must be a JSON object")]
    NotAnObject(&'static str),

    #[error("field `{field}` is server-owned and cannot be supplied by the client")]
    ServerOwnedField { field: String },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Illegal session state change.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("session cannot move from {from} to {to}")]
pub struct TransitionError {
    pub from: SessionStatus,
    pub to: SessionStatus,
}
