use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::ValidationError;
use crate::time::elapsed_seconds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakReason {
    Mandatory,
    UserInitiated,
}

impl BreakReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mandatory => "mandatory",
            Self::UserInitiated => "user_initiated",
        }
    }
}

impl fmt::Display for BreakReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BreakReason {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mandatory" => Ok(Self::Mandatory),
            "user_initiated" => Ok(Self::UserInitiated),
            other => Err(ValidationError::Invalid {
                field: "reason",
                reason: format!("expected mandatory or user_initiated, got {other:?}"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakStatus {
    Active,
    Completed,
}

/// A break inside a session. Every timestamp is server-observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Break {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub reason: BreakReason,
    pub actual_duration_seconds: Option<u64>,
    pub status: BreakStatus,
    pub validated_by_server: bool,
}

/// Refusal to close a break before the minimum duration has elapsed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error(
    "break too short: {current_duration_seconds}s elapsed, {minutes_remaining} minute(s) remaining"
)]
pub struct BreakTooShort {
    pub minutes_remaining: u64,
    pub remaining_seconds: u64,
    pub current_duration_seconds: u64,
}

/// Countdown view of the current break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakRemaining {
    pub remaining_seconds: u64,
    pub elapsed_seconds: u64,
    pub is_break_complete: bool,
}

impl Break {
    #[must_use]
    pub fn start(reason: BreakReason, now: DateTime<Utc>) -> Self {
        Self {
            start_time: now,
            end_time: None,
            reason,
            actual_duration_seconds: None,
            status: BreakStatus::Active,
            validated_by_server: false,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == BreakStatus::Active
    }

    #[must_use]
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        elapsed_seconds(self.start_time, self.end_time.unwrap_or(now))
    }

    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>, min_seconds: u64) -> BreakRemaining {
        let elapsed = self.elapsed_seconds(now);
        let remaining_seconds = min_seconds.saturating_sub(elapsed);
        BreakRemaining {
            remaining_seconds,
            elapsed_seconds: elapsed,
            is_break_complete: remaining_seconds == 0,
        }
    }

    /// Closes the break at server time `now`.
    ///
    /// # Errors
    ///
    /// Returns `BreakTooShort` and leaves the break untouched if fewer than
    /// `min_seconds` have elapsed since it started.
    pub fn complete(&mut self, now: DateTime<Utc>, min_seconds: u64) -> Result<u64, BreakTooShort> {
        let elapsed = elapsed_seconds(self.start_time, now);
        if elapsed < min_seconds {
            let remaining_seconds = min_seconds - elapsed;
            return Err(BreakTooShort {
                minutes_remaining: remaining_seconds.div_ceil(60),
                remaining_seconds,
                current_duration_seconds: elapsed,
            });
        }
        self.end_time = Some(now);
        self.actual_duration_seconds = Some(elapsed);
        self.status = BreakStatus::Completed;
        self.validated_by_server = true;
        Ok(elapsed)
    }

    /// Ends the break because its session closed, skipping the minimum-duration check.
    /// The record is left unvalidated.
    pub fn interrupt(&mut self, now: DateTime<Utc>) {
        if !self.is_active() {
            return;
        }
        self.end_time = Some(now);
        self.actual_duration_seconds = Some(elapsed_seconds(self.start_time, now));
        self.status = BreakStatus::Completed;
    }
}

/// Client request to start a break. Carries only the reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakStartRequest {
    pub reason: BreakReason,
}

impl BreakStartRequest {
    /// Parses `{ "reason": ... }`, refusing any duration or timestamp.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for a missing or unknown reason, or when the
    /// payload carries a client-supplied duration or time field.
    pub fn from_json(value: &Value) -> Result<Self, ValidationError> {
        let obj = value
            .as_object()
            .ok_or(ValidationError::NotAnObject("break request"))?;
        for key in obj.keys() {
            if key != "reason" {
                return Err(ValidationError::ServerOwnedField { field: key.clone() });
            }
        }
        let reason = obj
            .get("reason")
            .and_then(Value::as_str)
            .ok_or(ValidationError::Missing("reason"))?
            .parse()?;
        Ok(Self { reason })
    }
}
