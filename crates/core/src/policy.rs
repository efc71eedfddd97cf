//! Compliance policy constants.
//!
//! The defaults reproduce the observed jurisdiction rules (4-hour daily cap,
//! 15-minute idle timeout, 10-minute minimum break, identity challenge every
//! two hours). Every value can be overridden from the environment.

use std::env;
use std::time::Duration as StdDuration;

use chrono::Duration;
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PolicyError {
    #[error("{var} must be a positive integer, got {raw:?}")]
    InvalidNumber { var: &'static str, raw: String },

    #[error("{var} is not a known IANA timezone: {raw:?}")]
    InvalidTimezone { var: &'static str, raw: String },

    #[error("PVQ offset range is inverted ({min}s > {max}s)")]
    InvertedPvqOffset { min: u64, max: u64 },

    #[error("retry max delay ({max_ms}ms) is below the initial delay ({initial_ms}ms)")]
    InvertedRetryDelay { initial_ms: u64, max_ms: u64 },
}

/// Backoff settings shared by every network-calling component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay: StdDuration,
    pub max_delay: StdDuration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: StdDuration::from_millis(100),
            max_delay: StdDuration::from_millis(5_000),
        }
    }
}

/// Tunable compliance rules.
#[derive(Debug, Clone, PartialEq)]
pub struct CompliancePolicy {
    pub daily_limit_minutes: u32,
    pub idle_timeout: Duration,
    pub idle_warning_after: Duration,
    pub orphan_threshold: Duration,
    pub min_break: Duration,
    pub break_recommended_after: Duration,
    pub pvq_threshold: Duration,
    /// Extra random delay `[min, max]` seconds added each time the PVQ countdown is armed.
    pub pvq_random_offset_secs: Option<(u64, u64)>,
    pub pvq_max_incorrect_attempts: u32,
    pub pvq_lockout: Duration,
    pub heartbeat_interval: StdDuration,
    /// Minimum server-observed spacing between two credited heartbeat minutes.
    pub min_heartbeat_spacing: Duration,
    pub autosave_interval: StdDuration,
    pub break_countdown_interval: StdDuration,
    pub timezone: Tz,
    pub retry: RetrySettings,
}

impl Default for CompliancePolicy {
    fn default() -> Self {
        Self {
            daily_limit_minutes: 240,
            idle_timeout: Duration::minutes(15),
            idle_warning_after: Duration::minutes(13),
            orphan_threshold: Duration::minutes(30),
            min_break: Duration::seconds(600),
            break_recommended_after: Duration::hours(2),
            pvq_threshold: Duration::minutes(120),
            pvq_random_offset_secs: None,
            pvq_max_incorrect_attempts: 2,
            pvq_lockout: Duration::hours(24),
            heartbeat_interval: StdDuration::from_secs(60),
            min_heartbeat_spacing: Duration::seconds(55),
            autosave_interval: StdDuration::from_secs(30),
            break_countdown_interval: StdDuration::from_secs(1),
            timezone: chrono_tz::America::New_York,
            retry: RetrySettings::default(),
        }
    }
}

impl CompliancePolicy {
    /// Defaults overlaid with `COMPLIANCE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError` when a variable is present but malformed.
    pub fn from_env() -> Result<Self, PolicyError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`CompliancePolicy::from_env`] with an injectable variable source.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError` when a variable is present but malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PolicyError> {
        let mut policy = Self::default();
        let number = |var: &'static str| -> Result<Option<u64>, PolicyError> {
            match lookup(var) {
                None => Ok(None),
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|v| *v > 0)
                    .map(Some)
                    .ok_or(PolicyError::InvalidNumber { var, raw }),
            }
        };

        if let Some(v) = number("COMPLIANCE_DAILY_LIMIT_MINUTES")? {
            policy.daily_limit_minutes = u32::try_from(v).unwrap_or(u32::MAX);
        }
        if let Some(v) = number("COMPLIANCE_IDLE_TIMEOUT_MINUTES")? {
            policy.idle_timeout = minutes(v);
        }
        if let Some(v) = number("COMPLIANCE_ORPHAN_THRESHOLD_MINUTES")? {
            policy.orphan_threshold = minutes(v);
        }
        if let Some(v) = number("COMPLIANCE_MIN_BREAK_SECONDS")? {
            policy.min_break = seconds(v);
        }
        if let Some(v) = number("COMPLIANCE_PVQ_THRESHOLD_MINUTES")? {
            policy.pvq_threshold = minutes(v);
        }
        if let Some(v) = number("COMPLIANCE_PVQ_MAX_ATTEMPTS")? {
            policy.pvq_max_incorrect_attempts = u32::try_from(v).unwrap_or(u32::MAX);
        }
        if let Some(v) = number("COMPLIANCE_PVQ_LOCKOUT_HOURS")? {
            policy.pvq_lockout = Duration::hours(i64::try_from(v).unwrap_or(i64::MAX / 3_600_000));
        }
        if let Some(v) = number("COMPLIANCE_HEARTBEAT_INTERVAL_SECONDS")? {
            policy.heartbeat_interval = StdDuration::from_secs(v);
        }
        if let Some(v) = number("COMPLIANCE_AUTOSAVE_INTERVAL_SECONDS")? {
            policy.autosave_interval = StdDuration::from_secs(v);
        }
        if let Some(v) = number("COMPLIANCE_RETRY_MAX_ATTEMPTS")? {
            policy.retry.max_attempts = u32::try_from(v).unwrap_or(u32::MAX);
        }
        if let Some(v) = number("COMPLIANCE_RETRY_INITIAL_DELAY_MS")? {
            policy.retry.initial_delay = StdDuration::from_millis(v);
        }
        if let Some(v) = number("COMPLIANCE_RETRY_MAX_DELAY_MS")? {
            policy.retry.max_delay = StdDuration::from_millis(v);
        }
        if let (Some(min), Some(max)) = (
            number("COMPLIANCE_PVQ_OFFSET_MIN_SECONDS")?,
            number("COMPLIANCE_PVQ_OFFSET_MAX_SECONDS")?,
        ) {
            policy.pvq_random_offset_secs = Some((min, max));
        }
        if let Some(raw) = lookup("COMPLIANCE_TIMEZONE") {
            policy.timezone = raw
                .trim()
                .parse::<Tz>()
                .map_err(|_| PolicyError::InvalidTimezone {
                    var: "COMPLIANCE_TIMEZONE",
                    raw,
                })?;
        }

        policy.validate()?;
        Ok(policy)
    }

    /// Checks cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError` for inverted ranges.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if let Some((min, max)) = self.pvq_random_offset_secs {
            if min > max {
                return Err(PolicyError::InvertedPvqOffset { min, max });
            }
        }
        if self.retry.max_delay < self.retry.initial_delay {
            return Err(PolicyError::InvertedRetryDelay {
                initial_ms: u64::try_from(self.retry.initial_delay.as_millis()).unwrap_or(u64::MAX),
                max_ms: u64::try_from(self.retry.max_delay.as_millis()).unwrap_or(u64::MAX),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn daily_limit_seconds(&self) -> u64 {
        u64::from(self.daily_limit_minutes) * 60
    }

    #[must_use]
    pub fn min_break_seconds(&self) -> u64 {
        u64::try_from(self.min_break.num_seconds()).unwrap_or(0)
    }
}

fn minutes(v: u64) -> Duration {
    Duration::minutes(i64::try_from(v).unwrap_or(i64::MAX / 60_000))
}

fn seconds(v: u64) -> Duration {
    Duration::seconds(i64::try_from(v).unwrap_or(i64::MAX / 1_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_reference_policy() {
        let policy = CompliancePolicy::default();
        assert_eq!(policy.daily_limit_minutes, 240);
        assert_eq!(policy.min_break_seconds(), 600);
        assert_eq!(policy.orphan_threshold, Duration::minutes(30));
        assert_eq!(policy.pvq_max_incorrect_attempts, 2);
        assert_eq!(policy.retry.max_attempts, 3);
    }

    #[test]
    fn environment_overrides_defaults() {
        let policy = CompliancePolicy::from_lookup(lookup(&[
            ("COMPLIANCE_DAILY_LIMIT_MINUTES", "180"),
            ("COMPLIANCE_TIMEZONE", "America/Chicago"),
            ("COMPLIANCE_PVQ_OFFSET_MIN_SECONDS", "300"),
            ("COMPLIANCE_PVQ_OFFSET_MAX_SECONDS", "600"),
        ]))
        .unwrap();
        assert_eq!(policy.daily_limit_minutes, 180);
        assert_eq!(policy.timezone, chrono_tz::America::Chicago);
        assert_eq!(policy.pvq_random_offset_secs, Some((300, 600)));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = CompliancePolicy::from_lookup(lookup(&[("COMPLIANCE_MIN_BREAK_SECONDS", "ten")]))
            .unwrap_err();
        assert!(matches!(err, PolicyError::InvalidNumber { .. }));

        let err = CompliancePolicy::from_lookup(lookup(&[("COMPLIANCE_TIMEZONE", "Mars/Base")]))
            .unwrap_err();
        assert!(matches!(err, PolicyError::InvalidTimezone { .. }));
    }
}
