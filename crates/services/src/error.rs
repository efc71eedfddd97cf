//! Shared error types for the services crate.

use chrono::{DateTime, Utc};
use thiserror::Error;

use compliance_core::model::{BreakTooShort, SessionStatus};
use compliance_core::playback::PlaybackContractViolation;
use compliance_core::policy::PolicyError;
use compliance_core::{TransitionError, ValidationError};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

use crate::retry::{RetryClassify, RetryError};

impl RetryClassify for StorageError {
    fn error_code(&self) -> Option<&str> {
        Some(self.code())
    }
}

/// Errors emitted by the authority transports (in-process or HTTP).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthorityError {
    #[error("authority endpoint is not configured")]
    Disabled,
    /// The authority answered with an explicit refusal.
    #[error("{code}: {message}")]
    Refused { code: String, message: String },
    #[error("authority request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("authority response could not be decoded: {0}")]
    Decode(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl AuthorityError {
    /// Maps an HTTP status onto the codes the retry classifier understands.
    #[must_use]
    pub fn status_code(status: reqwest::StatusCode) -> Option<&'static str> {
        match status.as_u16() {
            400 => Some("BAD_REQUEST"),
            401 => Some("UNAUTHENTICATED"),
            403 => Some("PERMISSION_DENIED"),
            404 => Some("NOT_FOUND"),
            409 => Some("ALREADY_EXISTS"),
            412 => Some("FAILED_PRECONDITION"),
            429 => Some("RESOURCE_EXHAUSTED"),
            500..=599 => Some("UNAVAILABLE"),
            _ => None,
        }
    }
}

impl RetryClassify for AuthorityError {
    fn error_code(&self) -> Option<&str> {
        match self {
            Self::Disabled => Some("FAILED_PRECONDITION"),
            Self::Refused { code, .. } => Some(code.as_str()),
            Self::HttpStatus(status) => Self::status_code(*status),
            Self::Decode(_) => Some("DATA_LOSS"),
            Self::Http(err) => err
                .status()
                .and_then(Self::status_code)
                .or(Some("UNAVAILABLE")),
        }
    }
}

/// Errors emitted by the session service, break manager and server time authority.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ComplianceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("session not found")]
    SessionNotFound,
    #[error("session belongs to a different user or course")]
    PermissionDenied,
    #[error("session is {status}, expected an active session")]
    SessionNotActive { status: SessionStatus },
    #[error("no break is in progress")]
    NoActiveBreak,
    #[error("a break is already in progress")]
    BreakInProgress,
    #[error(transparent)]
    BreakTooShort(#[from] BreakTooShort),
    #[error(transparent)]
    Store(#[from] RetryError<StorageError>),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ComplianceError {
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Validation(_) => "INVALID_ARGUMENT",
            Self::Transition(_) | Self::SessionNotActive { .. } | Self::NoActiveBreak => {
                "FAILED_PRECONDITION"
            }
            Self::BreakInProgress => "ALREADY_EXISTS",
            Self::SessionNotFound => "NOT_FOUND",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::BreakTooShort(_) => "BREAK_TOO_SHORT",
            Self::Store(err) => err.code().unwrap_or("UNAVAILABLE"),
            Self::Storage(err) => err.code(),
        }
    }

    /// Status found by a conditional write that no longer applied.
    #[must_use]
    pub fn status_mismatch(&self) -> Option<SessionStatus> {
        let storage = match self {
            Self::Store(err) => err.inner(),
            Self::Storage(err) => err,
            _ => return None,
        };
        match storage {
            StorageError::StatusMismatch { actual } => Some(*actual),
            _ => None,
        }
    }
}

/// Errors emitted by identity verification and the PVQ trigger.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IdentityError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("identity verification locked until {until}")]
    PvqLockedOut { until: DateTime<Utc> },
    #[error("no identity challenge is pending")]
    NoPendingChallenge,
    #[error("identity challenge is still pending")]
    ChallengePending,
    #[error(transparent)]
    Authority(#[from] RetryError<AuthorityError>),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl IdentityError {
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Validation(_) => "INVALID_ARGUMENT",
            Self::PvqLockedOut { .. } => "PVQ_LOCKED_OUT",
            Self::NoPendingChallenge | Self::ChallengePending => "FAILED_PRECONDITION",
            Self::Authority(err) => err.code().unwrap_or("UNAVAILABLE"),
            Self::Storage(err) => err.code(),
        }
    }

    /// Terminal for the current day, as opposed to "wrong answer, try again".
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PvqLockedOut { .. })
    }
}

/// Errors emitted by `SessionOrchestrator`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OrchestratorError {
    #[error("no session has been started")]
    NotStarted,
    #[error("session is paused")]
    Paused,
    #[error("session is on a break")]
    OnBreak,
    #[error("an identity challenge is pending")]
    PvqPending,
    #[error("daily instruction limit reached")]
    DailyLimitReached,
    #[error("session ended after inactivity; sign in again to continue")]
    IdleTimeout,
    #[error(transparent)]
    Session(#[from] ComplianceError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Playback(#[from] PlaybackContractViolation),
    #[error(transparent)]
    Heartbeat(#[from] RetryError<AuthorityError>),
}

impl OrchestratorError {
    /// The remaining-time hint when `end_break` was refused.
    #[must_use]
    pub fn break_too_short(&self) -> Option<&BreakTooShort> {
        match self {
            Self::Session(ComplianceError::BreakTooShort(info)) => Some(info),
            _ => None,
        }
    }
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
}
