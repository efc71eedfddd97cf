use std::sync::Arc;

use compliance_core::model::{Accrual, SessionStatus, SessionUpdate, UserId};
use compliance_core::time::DateKey;
use compliance_core::{Clock, CompliancePolicy};
use storage::repository::{DailyActivityRepository, SessionRepository};
use tracing::{debug, info};

use crate::authority::{HeartbeatRequest, HeartbeatResponse, Verdict};
use crate::error::ComplianceError;

/// Today's accrual for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyLockoutStatus {
    pub date_key: DateKey,
    pub minutes_completed: u32,
    pub remaining_minutes: u32,
    pub is_locked: bool,
}

/// Server-side verdict authority behind every heartbeat.
///
/// Owns the daily accrual: minutes are credited here, bounded by the
/// policy ceiling, and only at server-observed spacing.
pub struct ServerTimeAuthority {
    clock: Clock,
    policy: CompliancePolicy,
    sessions: Arc<dyn SessionRepository>,
    daily_logs: Arc<dyn DailyActivityRepository>,
}

impl ServerTimeAuthority {
    #[must_use]
    pub fn new(
        clock: Clock,
        policy: CompliancePolicy,
        sessions: Arc<dyn SessionRepository>,
        daily_logs: Arc<dyn DailyActivityRepository>,
    ) -> Self {
        Self {
            clock,
            policy,
            sessions,
            daily_logs,
        }
    }

    /// Evaluates one heartbeat.
    ///
    /// `DAILY_LIMIT_REACHED` and `SESSION_IDLE_TIMEOUT` are successful
    /// responses, not errors.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound`, `PermissionDenied` for a user or course
    /// mismatch, `SessionNotActive` for a session that is not `active`, or a
    /// storage error.
    pub async fn heartbeat(
        &self,
        request: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, ComplianceError> {
        let now = self.clock.now();
        let session = self
            .sessions
            .get_session(&request.session_id)
            .await?
            .ok_or(ComplianceError::SessionNotFound)?;
        if session.user_id != request.user_id || session.course_id != request.course_id {
            return Err(ComplianceError::PermissionDenied);
        }
        if session.status != SessionStatus::Active {
            return Err(ComplianceError::SessionNotActive {
                status: session.status,
            });
        }

        let date_key = DateKey::for_instant(now, self.policy.timezone);
        let ceiling = self.policy.daily_limit_minutes;

        if now - session.last_heartbeat_timestamp > self.policy.idle_timeout {
            let minutes_completed = self
                .daily_logs
                .get_daily_log(&request.user_id, date_key)
                .await?
                .map_or(0, |log| log.minutes_completed);
            info!(
                session_id = %request.session_id,
                last_heartbeat = %session.last_heartbeat_timestamp,
                "session idle past timeout"
            );
            return Ok(HeartbeatResponse {
                verdict: Verdict::SessionIdleTimeout,
                minutes_completed,
                remaining_minutes: ceiling.saturating_sub(minutes_completed),
                date_key,
                is_new_day: false,
                server_timestamp: now,
            });
        }

        let accrual = self
            .daily_logs
            .accrue_minute(
                &request.user_id,
                date_key,
                ceiling,
                now,
                self.policy.min_heartbeat_spacing.num_seconds(),
            )
            .await?;

        let verdict = match accrual {
            Accrual::LimitReached { .. } => {
                info!(user_id = %request.user_id, %date_key, "daily limit reached");
                Verdict::DailyLimitReached
            }
            Accrual::Credited { .. } | Accrual::TooSoon { .. } => {
                let update = SessionUpdate {
                    last_heartbeat_timestamp: Some(now),
                    ..SessionUpdate::stamped(now)
                }
                .expecting(&[SessionStatus::Active]);
                self.sessions
                    .update_session(&request.session_id, &update)
                    .await?;
                Verdict::Continue
            }
        };
        let minutes_completed = accrual.minutes_completed();
        debug!(
            session_id = %request.session_id,
            ?verdict,
            minutes_completed,
            "heartbeat evaluated"
        );
        Ok(HeartbeatResponse {
            verdict,
            minutes_completed,
            remaining_minutes: ceiling.saturating_sub(minutes_completed),
            date_key,
            is_new_day: accrual.is_new_day(),
            server_timestamp: now,
        })
    }

    /// Read-only view of today's accrual.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the daily log cannot be read.
    pub async fn check_daily_lockout(
        &self,
        user_id: &UserId,
    ) -> Result<DailyLockoutStatus, ComplianceError> {
        let date_key = DateKey::for_instant(self.clock.now(), self.policy.timezone);
        let ceiling = self.policy.daily_limit_minutes;
        let minutes_completed = self
            .daily_logs
            .get_daily_log(user_id, date_key)
            .await?
            .map_or(0, |log| log.minutes_completed);
        Ok(DailyLockoutStatus {
            date_key,
            minutes_completed,
            remaining_minutes: ceiling.saturating_sub(minutes_completed),
            is_locked: minutes_completed >= ceiling,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use compliance_core::model::{CourseId, Session, SessionId, SessionMeta};
    use compliance_core::time::{ManualClock, fixed_now};
    use storage::repository::{InMemoryRepository, Storage};

    struct Fixture {
        clock: ManualClock,
        storage: Storage,
        authority: ServerTimeAuthority,
        request: HeartbeatRequest,
    }

    async fn fixture(daily_limit_minutes: u32) -> Fixture {
        let clock = ManualClock::new(fixed_now());
        let storage = Storage::from_repository(InMemoryRepository::new());
        let policy = CompliancePolicy {
            daily_limit_minutes,
            ..CompliancePolicy::default()
        };
        let authority = ServerTimeAuthority::new(
            Clock::manual(&clock),
            policy,
            Arc::clone(&storage.sessions),
            Arc::clone(&storage.daily_logs),
        );
        let session = Session::new(
            SessionId::new("s-1").unwrap(),
            UserId::new("user-1").unwrap(),
            CourseId::new("course-1").unwrap(),
            SessionMeta::default(),
            clock.now(),
        );
        storage.sessions.create_session(&session).await.unwrap();
        let request = HeartbeatRequest {
            user_id: session.user_id,
            course_id: session.course_id,
            session_id: session.session_id,
        };
        Fixture {
            clock,
            storage,
            authority,
            request,
        }
    }

    #[tokio::test]
    async fn limit_is_reached_after_the_ceiling() {
        let fx = fixture(2).await;
        for expected in 1..=2 {
            fx.clock.advance(Duration::seconds(60));
            let resp = fx.authority.heartbeat(&fx.request).await.unwrap();
            assert_eq!(resp.verdict, Verdict::Continue);
            assert_eq!(resp.minutes_completed, expected);
            assert_eq!(resp.is_new_day, expected == 1);
        }
        fx.clock.advance(Duration::seconds(60));
        let resp = fx.authority.heartbeat(&fx.request).await.unwrap();
        assert_eq!(resp.verdict, Verdict::DailyLimitReached);
        assert_eq!(resp.minutes_completed, 2);
        assert_eq!(resp.remaining_minutes, 0);
        assert!(
            fx.authority
                .check_daily_lockout(&fx.request.user_id)
                .await
                .unwrap()
                .is_locked
        );
    }

    #[tokio::test]
    async fn rapid_heartbeats_do_not_accrue() {
        let fx = fixture(240).await;
        fx.clock.advance(Duration::seconds(60));
        fx.authority.heartbeat(&fx.request).await.unwrap();
        fx.clock.advance(Duration::seconds(5));
        let resp = fx.authority.heartbeat(&fx.request).await.unwrap();
        assert_eq!(resp.verdict, Verdict::Continue);
        assert_eq!(resp.minutes_completed, 1);
    }

    #[tokio::test]
    async fn idle_sessions_get_timeout_verdict() {
        let fx = fixture(240).await;
        fx.clock.advance(Duration::minutes(16));
        let resp = fx.authority.heartbeat(&fx.request).await.unwrap();
        assert_eq!(resp.verdict, Verdict::SessionIdleTimeout);
        assert_eq!(resp.minutes_completed, 0);
    }

    #[tokio::test]
    async fn mismatched_or_closed_sessions_are_refused() {
        let fx = fixture(240).await;
        let mut wrong_course = fx.request.clone();
        wrong_course.course_id = CourseId::new("course-2").unwrap();
        assert!(matches!(
            fx.authority.heartbeat(&wrong_course).await,
            Err(ComplianceError::PermissionDenied)
        ));

        let mut update = SessionUpdate::stamped(fx.clock.now());
        update.status = Some(SessionStatus::OnBreak);
        fx.storage
            .sessions
            .update_session(&fx.request.session_id, &update)
            .await
            .unwrap();
        assert!(matches!(
            fx.authority.heartbeat(&fx.request).await,
            Err(ComplianceError::SessionNotActive {
                status: SessionStatus::OnBreak
            })
        ));

        let mut missing = fx.request.clone();
        missing.session_id = SessionId::new("nope").unwrap();
        assert!(matches!(
            fx.authority.heartbeat(&missing).await,
            Err(ComplianceError::SessionNotFound)
        ));
    }
}
