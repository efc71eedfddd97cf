use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::UserId;
use crate::time::DateKey;

/// Per-user, per-calendar-day accrual owned by the server time authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyActivityLog {
    pub user_id: UserId,
    pub date_key: DateKey,
    pub minutes_completed: u32,
    pub sessions_started: u32,
    pub sessions_ended: u32,
    pub identity_challenges_completed: u32,
    pub last_credited_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl DailyActivityLog {
    #[must_use]
    pub fn empty(user_id: UserId, date_key: DateKey, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            date_key,
            minutes_completed: 0,
            sessions_started: 0,
            sessions_ended: 0,
            identity_challenges_completed: 0,
            last_credited_at: None,
            updated_at: now,
        }
    }

    /// Document key, `{userId}_{YYYY-MM-DD}`.
    #[must_use]
    pub fn document_key(&self) -> String {
        format!("{}_{}", self.user_id, self.date_key)
    }

    #[must_use]
    pub fn remaining_minutes(&self, ceiling: u32) -> u32 {
        ceiling.saturating_sub(self.minutes_completed)
    }

    #[must_use]
    pub fn is_locked(&self, ceiling: u32) -> bool {
        self.minutes_completed >= ceiling
    }

    /// Applies one bounded accrual step.
    ///
    /// The ceiling is checked before crediting, and a minute is credited at
    /// most once per `min_spacing_secs` of server time.
    pub fn accrue(&mut self, ceiling: u32, now: DateTime<Utc>, min_spacing_secs: i64) -> Accrual {
        if self.minutes_completed >= ceiling {
            return Accrual::LimitReached {
                minutes_completed: self.minutes_completed,
            };
        }
        if let Some(last) = self.last_credited_at {
            if (now - last).num_seconds() < min_spacing_secs {
                return Accrual::TooSoon {
                    minutes_completed: self.minutes_completed,
                };
            }
        }
        let is_new_day = self.minutes_completed == 0 && self.last_credited_at.is_none();
        self.minutes_completed += 1;
        self.last_credited_at = Some(now);
        self.updated_at = now;
        Accrual::Credited {
            minutes_completed: self.minutes_completed,
            is_new_day,
        }
    }
}

/// Outcome of an atomic bounded increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accrual {
    Credited { minutes_completed: u32, is_new_day: bool },
    /// Heartbeat arrived faster than the minimum spacing; nothing credited.
    TooSoon { minutes_completed: u32 },
    LimitReached { minutes_completed: u32 },
}

impl Accrual {
    #[must_use]
    pub fn minutes_completed(self) -> u32 {
        match self {
            Self::Credited {
                minutes_completed, ..
            }
            | Self::TooSoon { minutes_completed }
            | Self::LimitReached { minutes_completed } => minutes_completed,
        }
    }

    #[must_use]
    pub fn is_new_day(self) -> bool {
        matches!(self, Self::Credited { is_new_day: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    fn log() -> DailyActivityLog {
        DailyActivityLog::empty(
            UserId::new("user-1").unwrap(),
            "2023-11-14".parse().unwrap(),
            fixed_now(),
        )
    }

    #[test]
    fn document_key_joins_user_and_day() {
        assert_eq!(log().document_key(), "user-1_2023-11-14");
    }

    #[test]
    fn accrual_is_bounded_by_ceiling() {
        let mut log = log();
        let mut now = fixed_now();
        let first = log.accrue(2, now, 55);
        assert!(first.is_new_day());
        now += Duration::seconds(60);
        assert_eq!(
            log.accrue(2, now, 55),
            Accrual::Credited {
                minutes_completed: 2,
                is_new_day: false
            }
        );
        now += Duration::seconds(60);
        assert_eq!(
            log.accrue(2, now, 55),
            Accrual::LimitReached {
                minutes_completed: 2
            }
        );
        assert!(log.is_locked(2));
    }

    #[test]
    fn rapid_heartbeats_are_not_credited() {
        let mut log = log();
        let now = fixed_now();
        log.accrue(240, now, 55);
        assert_eq!(
            log.accrue(240, now + Duration::seconds(10), 55),
            Accrual::TooSoon {
                minutes_completed: 1
            }
        );
    }
}
