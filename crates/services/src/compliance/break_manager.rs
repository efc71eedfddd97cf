use std::sync::Arc;

use compliance_core::model::{
    Break, BreakReason, BreakRemaining, BreakStartRequest, SessionId, SessionStatus,
    SessionUpdate, UserId,
};
use serde_json::Value;
use tracing::info;

use crate::compliance::ComplianceSessionService;
use crate::error::ComplianceError;

/// Starts and ends breaks on server-observed time.
///
/// A break is only closed once the policy minimum has elapsed; until then
/// `end_break` refuses with `BreakTooShort` and leaves the session on break.
pub struct BreakManager {
    sessions: Arc<ComplianceSessionService>,
}

impl BreakManager {
    #[must_use]
    pub fn new(sessions: Arc<ComplianceSessionService>) -> Self {
        Self { sessions }
    }

    /// # Errors
    ///
    /// Returns `BreakInProgress` if a break is already running, `Transition`
    /// if the session is not `active`, or a lookup or store error.
    pub async fn start_break(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        reason: BreakReason,
    ) -> Result<Break, ComplianceError> {
        let session = self.sessions.load_owned(user_id, session_id).await?;
        if session.active_break().is_some() {
            return Err(ComplianceError::BreakInProgress);
        }
        let status = session.status.transition_to(SessionStatus::OnBreak)?;
        let now = self.sessions.now();
        let started = Break::start(reason, now);

        let mut breaks = session.breaks;
        breaks.push(started.clone());
        let update = SessionUpdate {
            status: Some(status),
            breaks: Some(breaks),
            ..SessionUpdate::stamped(now)
        }
        .expecting(&[session.status]);
        self.sessions.write(session_id, &update).await?;
        info!(session_id = %session_id, reason = reason.as_str(), "break started");
        Ok(started)
    }

    /// Starts a break from a raw client payload carrying only `reason`.
    ///
    /// # Errors
    ///
    /// Returns `ComplianceError::Validation` when the payload carries anything
    /// other than a known reason, otherwise as [`start_break`](Self::start_break).
    pub async fn start_break_from_json(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        payload: &Value,
    ) -> Result<Break, ComplianceError> {
        let request = BreakStartRequest::from_json(payload)?;
        self.start_break(user_id, session_id, request.reason).await
    }

    /// Ends the running break and returns it with its server-measured duration.
    ///
    /// # Errors
    ///
    /// Returns `BreakTooShort` without writing anything when the minimum has
    /// not elapsed, `NoActiveBreak` when nothing is running, or a lookup or
    /// store error.
    pub async fn end_break(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<Break, ComplianceError> {
        let session = self.sessions.load_owned(user_id, session_id).await?;
        if session.active_break().is_none() {
            return Err(ComplianceError::NoActiveBreak);
        }
        let status = session.status.transition_to(SessionStatus::Active)?;
        let now = self.sessions.now();
        let min_seconds = self.sessions.policy().min_break_seconds();

        let mut breaks = session.breaks;
        let Some(current) = breaks.last_mut() else {
            return Err(ComplianceError::NoActiveBreak);
        };
        let actual = current.complete(now, min_seconds)?;
        let ended = current.clone();

        let update = SessionUpdate {
            status: Some(status),
            breaks: Some(breaks),
            last_heartbeat_timestamp: Some(now),
            ..SessionUpdate::stamped(now)
        }
        .expecting(&[session.status]);
        self.sessions.write(session_id, &update).await?;
        info!(session_id = %session_id, actual_duration_seconds = actual, "break ended");
        Ok(ended)
    }

    /// Countdown view of the running break. Never unlocks anything.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveBreak` when nothing is running, or a lookup error.
    pub async fn get_remaining_break_time(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<BreakRemaining, ComplianceError> {
        let session = self.sessions.load_owned(user_id, session_id).await?;
        let current = session
            .active_break()
            .ok_or(ComplianceError::NoActiveBreak)?;
        Ok(current.remaining(
            self.sessions.now(),
            self.sessions.policy().min_break_seconds(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use compliance_core::model::{CourseId, SessionMeta};
    use compliance_core::time::{ManualClock, fixed_now};
    use compliance_core::{Clock, CompliancePolicy, ValidationError};
    use serde_json::json;
    use storage::repository::{InMemoryRepository, Storage};

    async fn setup() -> (ManualClock, BreakManager, Arc<ComplianceSessionService>, UserId, SessionId) {
        let clock = ManualClock::new(fixed_now());
        let storage = Storage::from_repository(InMemoryRepository::new());
        let sessions = Arc::new(ComplianceSessionService::new(
            Clock::manual(&clock),
            CompliancePolicy::default(),
            Arc::clone(&storage.sessions),
            Arc::clone(&storage.daily_logs),
        ));
        let user = UserId::new("user-1").unwrap();
        let id = sessions
            .create(
                &user,
                &CourseId::new("course-1").unwrap(),
                SessionMeta::default(),
            )
            .await
            .unwrap();
        let manager = BreakManager::new(Arc::clone(&sessions));
        (clock, manager, sessions, user, id)
    }

    #[tokio::test]
    async fn short_break_is_refused_then_accepted() {
        let (clock, manager, sessions, user, id) = setup().await;
        manager
            .start_break(&user, &id, BreakReason::Mandatory)
            .await
            .unwrap();

        clock.advance(Duration::seconds(400));
        let err = manager.end_break(&user, &id).await.unwrap_err();
        let ComplianceError::BreakTooShort(info) = err else {
            panic!("expected BreakTooShort, got {err:?}");
        };
        assert_eq!(info.minutes_remaining, 4);
        assert_eq!(info.current_duration_seconds, 400);
        let still = sessions.get(&user, &id).await.unwrap();
        assert_eq!(still.status, SessionStatus::OnBreak);
        assert!(still.active_break().is_some());

        let remaining = manager.get_remaining_break_time(&user, &id).await.unwrap();
        assert_eq!(remaining.remaining_seconds, 200);
        assert!(!remaining.is_break_complete);

        clock.advance(Duration::seconds(205));
        let ended = manager.end_break(&user, &id).await.unwrap();
        assert_eq!(ended.actual_duration_seconds, Some(605));
        assert!(ended.validated_by_server);

        let stored = sessions.get(&user, &id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Active);
        assert_eq!(stored.last_heartbeat_timestamp, clock.now());
        assert_eq!(stored.breaks.len(), 1);
    }

    #[tokio::test]
    async fn second_break_while_on_break_is_refused() {
        let (_clock, manager, _sessions, user, id) = setup().await;
        manager
            .start_break(&user, &id, BreakReason::UserInitiated)
            .await
            .unwrap();
        assert!(matches!(
            manager
                .start_break(&user, &id, BreakReason::Mandatory)
                .await,
            Err(ComplianceError::BreakInProgress)
        ));
    }

    #[tokio::test]
    async fn ending_without_a_break_fails() {
        let (_clock, manager, _sessions, user, id) = setup().await;
        assert!(matches!(
            manager.end_break(&user, &id).await,
            Err(ComplianceError::NoActiveBreak)
        ));
    }

    #[tokio::test]
    async fn client_supplied_duration_is_rejected() {
        let (_clock, manager, _sessions, user, id) = setup().await;
        let err = manager
            .start_break_from_json(&user, &id, &json!({"reason": "mandatory", "duration": 600}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ComplianceError::Validation(ValidationError::ServerOwnedField { .. })
        ));
    }
}
