use std::sync::Arc;

use chrono::{DateTime, Utc};
use compliance_core::model::{
    CloseSummary, ClosureType, CourseId, LessonCompletion, ModuleCompletion, ProgressPatch,
    Session, SessionId, SessionMeta, SessionStatus, SessionUpdate, UserId,
};
use compliance_core::time::DateKey;
use compliance_core::{Clock, CompliancePolicy, TransitionError, ValidationError};
use storage::repository::{DailyActivityRepository, DailyCounter, SessionQuery, SessionRepository};
use tracing::{debug, info, warn};

use crate::error::ComplianceError;
use crate::retry::RetryExecutor;

/// Outcome of one orphan sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub closed_count: usize,
    /// Sessions that could not be closed; they are retried on the next sweep.
    pub failed: Vec<SessionId>,
}

/// Session lifecycle against the session store.
///
/// Every store call goes through the `RetryExecutor` except
/// [`close_best_effort`](Self::close_best_effort). Timestamps and durations
/// come from the service clock only.
pub struct ComplianceSessionService {
    clock: Clock,
    policy: CompliancePolicy,
    retry: RetryExecutor,
    sessions: Arc<dyn SessionRepository>,
    daily_logs: Arc<dyn DailyActivityRepository>,
}

impl ComplianceSessionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        policy: CompliancePolicy,
        sessions: Arc<dyn SessionRepository>,
        daily_logs: Arc<dyn DailyActivityRepository>,
    ) -> Self {
        Self {
            retry: RetryExecutor::new(policy.retry),
            clock,
            policy,
            sessions,
            daily_logs,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &CompliancePolicy {
        &self.policy
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    //
    // ─── LIFECYCLE ─────────────────────────────────────────────────────────────
    //

    /// Creates an `active` session stamped with server time.
    ///
    /// # Errors
    ///
    /// Returns `ComplianceError::Store` if the store stays unavailable.
    pub async fn create(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
        meta: SessionMeta,
    ) -> Result<SessionId, ComplianceError> {
        let now = self.clock.now();
        let session = Session::new(
            SessionId::generate(),
            user_id.clone(),
            course_id.clone(),
            meta,
            now,
        );
        let repo = self.sessions.as_ref();
        let record = &session;
        self.retry
            .execute("session.create", move || repo.create_session(record))
            .await?;
        info!(session_id = %session.session_id, user_id = %user_id, course_id = %course_id, "session created");
        self.bump_counter(user_id, DailyCounter::SessionsStarted, now)
            .await;
        Ok(session.session_id)
    }

    /// Same as [`create`](Self::create) for untyped client input.
    ///
    /// # Errors
    ///
    /// Returns `ComplianceError::Validation` for blank ids or non-object meta.
    pub async fn create_from_json(
        &self,
        user_id: &str,
        course_id: &str,
        meta: serde_json::Value,
    ) -> Result<SessionId, ComplianceError> {
        let user_id = UserId::new(user_id)?;
        let course_id = CourseId::new(course_id)?;
        let meta = SessionMeta::from_json(meta)?;
        self.create(&user_id, &course_id, meta).await
    }

    /// Merges client progress into an open session and stamps `lastUpdated`.
    ///
    /// # Errors
    ///
    /// Returns `ComplianceError` if the session is missing, owned by someone
    /// else, already closed, or the store stays unavailable.
    pub async fn update_heartbeat_or_progress(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        patch: ProgressPatch,
    ) -> Result<(), ComplianceError> {
        let session = self.load_owned(user_id, session_id).await?;
        if session.status.is_terminal() {
            return Err(ComplianceError::SessionNotActive {
                status: session.status,
            });
        }
        let update = SessionUpdate::from_progress(patch, self.clock.now());
        self.write(session_id, &update).await
    }

    /// Closes a session with a server-computed duration.
    ///
    /// A break still running at close time is ended without validation.
    ///
    /// # Errors
    ///
    /// Returns `ComplianceError::Transition` if the session is already closed,
    /// or a lookup or store error.
    pub async fn close(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        summary: CloseSummary,
    ) -> Result<(), ComplianceError> {
        let session = self.load_owned(user_id, session_id).await?;
        let now = self.clock.now();
        let update = closing_update(&session, summary, now)?;
        let target = update.status.unwrap_or(session.status);
        self.write(session_id, &update).await.map_err(|err| {
            match err.status_mismatch() {
                Some(from) => TransitionError { from, to: target }.into(),
                None => err,
            }
        })?;
        info!(
            session_id = %session_id,
            status = %session.status,
            duration_seconds = update.duration_seconds.unwrap_or_default(),
            "session closed"
        );
        self.bump_counter(user_id, DailyCounter::SessionsEnded, now)
            .await;
        Ok(())
    }

    /// Single-shot close for the page-unload path. Never retries and never fails.
    pub async fn close_best_effort(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        summary: CloseSummary,
    ) {
        let now = self.clock.now();
        let result = async {
            let session = self
                .sessions
                .get_session(session_id)
                .await?
                .ok_or(ComplianceError::SessionNotFound)?;
            if &session.user_id != user_id {
                return Err(ComplianceError::PermissionDenied);
            }
            let update = closing_update(&session, summary, now)?;
            self.sessions.update_session(session_id, &update).await?;
            self.daily_logs
                .increment_counter(
                    user_id,
                    self.today(now),
                    DailyCounter::SessionsEnded,
                    now,
                )
                .await?;
            Ok::<_, ComplianceError>(())
        }
        .await;
        match result {
            Ok(()) => debug!(session_id = %session_id, "best-effort close delivered"),
            Err(err) => warn!(session_id = %session_id, error = %err, "best-effort close dropped"),
        }
    }

    /// Force-closes `active` sessions whose last heartbeat is older than the
    /// orphan threshold. One failure never aborts the sweep.
    ///
    /// # Errors
    ///
    /// Returns `ComplianceError::Store` only if the initial scan fails.
    pub async fn reap_orphans(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<ReapReport, ComplianceError> {
        let now = self.clock.now();
        let query = SessionQuery::for_course(user_id.clone(), course_id.clone())
            .with_status(SessionStatus::Active)
            .heartbeat_before(now - self.policy.orphan_threshold);
        let orphans = self.query(&query, "session.scan_orphans").await?;

        let mut report = ReapReport::default();
        for session in orphans {
            let update = SessionUpdate::closing(&session, ClosureType::OrphanedAutoClose, now)
                .expecting(&[SessionStatus::Active]);
            match self.write(&session.session_id, &update).await {
                Ok(()) => {
                    info!(
                        session_id = %session.session_id,
                        last_heartbeat = %session.last_heartbeat_timestamp,
                        "orphaned session closed"
                    );
                    report.closed_count += 1;
                    self.bump_counter(user_id, DailyCounter::SessionsEnded, now)
                        .await;
                }
                Err(err) if err.status_mismatch().is_some() => {
                    debug!(session_id = %session.session_id, error = %err, "session changed before reaping, skipped");
                }
                Err(err) => {
                    warn!(session_id = %session.session_id, error = %err, "failed to close orphaned session");
                    report.failed.push(session.session_id);
                }
            }
        }
        Ok(report)
    }

    //
    // ─── READS ─────────────────────────────────────────────────────────────────
    //

    /// Loads a session the caller owns.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound`, `PermissionDenied` or a store error.
    pub async fn get(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<Session, ComplianceError> {
        self.load_owned(user_id, session_id).await
    }

    /// Seconds of `completed` sessions started today in the policy timezone.
    ///
    /// # Errors
    ///
    /// Returns `ComplianceError::Store` if the store stays unavailable.
    pub async fn get_daily_time(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<u64, ComplianceError> {
        let (from, until) = self
            .today(self.clock.now())
            .utc_bounds(self.policy.timezone);
        let query = SessionQuery::for_course(user_id.clone(), course_id.clone())
            .with_status(SessionStatus::Completed)
            .started_within(from, until);
        let sessions = self.query(&query, "session.daily_time").await?;
        Ok(sum_durations(&sessions))
    }

    /// True once today's completed time reaches the daily ceiling.
    ///
    /// # Errors
    ///
    /// Returns `ComplianceError::Store` if the store stays unavailable.
    pub async fn check_daily_hour_lockout(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<bool, ComplianceError> {
        let seconds = self.get_daily_time(user_id, course_id).await?;
        Ok(seconds >= self.policy.daily_limit_seconds())
    }

    /// Newest-first session history.
    ///
    /// # Errors
    ///
    /// Returns `ComplianceError::Validation` when `limit` is zero.
    pub async fn session_history(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
        limit: u32,
    ) -> Result<Vec<Session>, ComplianceError> {
        if limit == 0 {
            return Err(ValidationError::Invalid {
                field: "limit",
                reason: "must be greater than zero".into(),
            }
            .into());
        }
        let query = SessionQuery::for_course(user_id.clone(), course_id.clone()).limit(limit);
        self.query(&query, "session.history").await
    }

    /// Seconds across every `completed` session in the course.
    ///
    /// # Errors
    ///
    /// Returns `ComplianceError::Store` if the store stays unavailable.
    pub async fn total_session_time(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<u64, ComplianceError> {
        let query = SessionQuery::for_course(user_id.clone(), course_id.clone())
            .with_status(SessionStatus::Completed);
        let sessions = self.query(&query, "session.total_time").await?;
        Ok(sum_durations(&sessions))
    }

    /// # Errors
    ///
    /// Returns `ComplianceError::Store` if the store stays unavailable.
    pub async fn total_session_minutes(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<u64, ComplianceError> {
        Ok(self.total_session_time(user_id, course_id).await? / 60)
    }

    //
    // ─── COMPLETION EVENTS ─────────────────────────────────────────────────────
    //

    /// Appends a lesson completion and marks the lesson accessed.
    ///
    /// # Errors
    ///
    /// Returns `ComplianceError` if the session is missing, not owned by the
    /// caller, or the store stays unavailable.
    pub async fn log_lesson_completion(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        completion: LessonCompletion,
    ) -> Result<(), ComplianceError> {
        self.load_owned(user_id, session_id).await?;
        let now = self.clock.now();
        let mut update = SessionUpdate::stamped(now);
        update.lessons_accessed.push(completion.lesson_id.clone());
        update.completion_events.push(completion.into_event(now));
        self.write(session_id, &update).await
    }

    /// # Errors
    ///
    /// Returns `ComplianceError` if the session is missing, not owned by the
    /// caller, or the store stays unavailable.
    pub async fn log_module_completion(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        completion: ModuleCompletion,
    ) -> Result<(), ComplianceError> {
        self.load_owned(user_id, session_id).await?;
        let now = self.clock.now();
        let mut update = SessionUpdate::stamped(now);
        update.completion_events.push(completion.into_event(now));
        self.write(session_id, &update).await
    }

    //
    // ─── HELPERS ───────────────────────────────────────────────────────────────
    //

    pub(crate) async fn load_owned(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<Session, ComplianceError> {
        let repo = self.sessions.as_ref();
        let session = self
            .retry
            .execute("session.get", move || repo.get_session(session_id))
            .await?
            .ok_or(ComplianceError::SessionNotFound)?;
        if &session.user_id != user_id {
            return Err(ComplianceError::PermissionDenied);
        }
        Ok(session)
    }

    pub(crate) async fn write(
        &self,
        session_id: &SessionId,
        update: &SessionUpdate,
    ) -> Result<(), ComplianceError> {
        let repo = self.sessions.as_ref();
        self.retry
            .execute("session.update", move || {
                repo.update_session(session_id, update)
            })
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        query: &SessionQuery,
        operation: &str,
    ) -> Result<Vec<Session>, ComplianceError> {
        let repo = self.sessions.as_ref();
        Ok(self
            .retry
            .execute(operation, move || repo.query_sessions(query))
            .await?)
    }

    fn today(&self, now: DateTime<Utc>) -> DateKey {
        DateKey::for_instant(now, self.policy.timezone)
    }

    async fn bump_counter(&self, user_id: &UserId, counter: DailyCounter, now: DateTime<Utc>) {
        let repo = self.daily_logs.as_ref();
        let date_key = self.today(now);
        let result: Result<(), _> = self
            .retry
            .execute("daily_log.increment", move || {
                repo.increment_counter(user_id, date_key, counter, now)
            })
            .await;
        if let Err(err) = result {
            warn!(user_id = %user_id, ?counter, error = %err, "daily counter not updated");
        }
    }
}

fn closing_update(
    session: &Session,
    summary: CloseSummary,
    now: DateTime<Utc>,
) -> Result<SessionUpdate, ComplianceError> {
    session
        .status
        .transition_to(summary.closure_type.closing_status())?;
    let mut update = SessionUpdate::closing(session, summary.closure_type, now);
    update.video_progress = summary.video_progress;
    update.lessons_accessed = summary.lessons_accessed;
    if session.active_break().is_some() {
        let mut breaks = session.breaks.clone();
        if let Some(open) = breaks.last_mut() {
            open.interrupt(now);
        }
        update.breaks = Some(breaks);
    }
    Ok(update)
}

fn sum_durations(sessions: &[Session]) -> u64 {
    sessions
        .iter()
        .filter_map(|s| s.duration_seconds)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use compliance_core::model::{LessonId, ModuleId, VideoProgress};
    use compliance_core::time::{ManualClock, fixed_now};
    use serde_json::json;
    use storage::repository::{InMemoryRepository, Storage, StorageError};

    fn ids() -> (UserId, CourseId) {
        (
            UserId::new("user-1").unwrap(),
            CourseId::new("course-1").unwrap(),
        )
    }

    fn service(clock: &ManualClock) -> (ComplianceSessionService, Storage) {
        let storage = Storage::from_repository(InMemoryRepository::new());
        let service = ComplianceSessionService::new(
            Clock::manual(clock),
            CompliancePolicy::default(),
            Arc::clone(&storage.sessions),
            Arc::clone(&storage.daily_logs),
        );
        (service, storage)
    }

    #[tokio::test]
    async fn create_rejects_bad_input() {
        let clock = ManualClock::new(fixed_now());
        let (service, _) = service(&clock);
        let err = service
            .create_from_json("", "course-1", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ComplianceError::Validation(ValidationError::Missing(_))
        ));
        let err = service
            .create_from_json("user-1", "course-1", json!("lesson-1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ComplianceError::Validation(ValidationError::NotAnObject("meta"))
        ));
    }

    #[tokio::test]
    async fn close_computes_duration_from_server_clock() {
        let clock = ManualClock::new(fixed_now());
        let (service, storage) = service(&clock);
        let (user, course) = ids();
        let id = service
            .create(&user, &course, SessionMeta::default())
            .await
            .unwrap();

        clock.advance(Duration::minutes(42));
        let summary = CloseSummary::from_json(json!({
            "videoProgress": {"currentTime": 50.0, "duration": 100.0},
            "lessonsAccessed": ["lesson-9"]
        }))
        .unwrap();
        service.close(&user, &id, summary).await.unwrap();

        let stored = service.get(&user, &id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert_eq!(stored.duration_seconds, Some(42 * 60));
        assert_eq!(stored.end_timestamp, Some(clock.now()));
        assert_eq!(
            stored.video_progress,
            Some(VideoProgress::new(50.0, 100.0).unwrap())
        );
        assert!(stored.lessons_accessed.contains(&LessonId::new("lesson-9").unwrap()));

        let err = service
            .close(&user, &id, CloseSummary::normal())
            .await
            .unwrap_err();
        assert!(matches!(err, ComplianceError::Transition(_)));

        let key = DateKey::for_instant(clock.now(), CompliancePolicy::default().timezone);
        let log = storage
            .daily_logs
            .get_daily_log(&user, key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!((log.sessions_started, log.sessions_ended), (1, 1));
    }

    #[tokio::test]
    async fn page_unload_close_marks_session_unloaded() {
        let clock = ManualClock::new(fixed_now());
        let (service, _) = service(&clock);
        let (user, course) = ids();
        let id = service
            .create(&user, &course, SessionMeta::default())
            .await
            .unwrap();
        clock.advance(Duration::seconds(90));
        service
            .close_best_effort(&user, &id, CloseSummary::page_unload())
            .await;
        let stored = service.get(&user, &id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Unloaded);
        assert_eq!(stored.closure_type, Some(ClosureType::PageUnload));
        assert_eq!(stored.duration_seconds, Some(90));
    }

    #[tokio::test]
    async fn other_users_cannot_touch_a_session() {
        let clock = ManualClock::new(fixed_now());
        let (service, _) = service(&clock);
        let (user, course) = ids();
        let id = service
            .create(&user, &course, SessionMeta::default())
            .await
            .unwrap();
        let intruder = UserId::new("user-2").unwrap();
        let err = service
            .update_heartbeat_or_progress(&intruder, &id, ProgressPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ComplianceError::PermissionDenied));
    }

    #[tokio::test]
    async fn daily_time_counts_only_completed_sessions_from_today() {
        let clock = ManualClock::new(fixed_now());
        let (service, _) = service(&clock);
        let (user, course) = ids();

        let done = service
            .create(&user, &course, SessionMeta::default())
            .await
            .unwrap();
        clock.advance(Duration::minutes(30));
        service
            .close(&user, &done, CloseSummary::normal())
            .await
            .unwrap();
        service
            .create(&user, &course, SessionMeta::default())
            .await
            .unwrap();

        assert_eq!(service.get_daily_time(&user, &course).await.unwrap(), 1_800);
        assert!(!service.check_daily_hour_lockout(&user, &course).await.unwrap());
        assert_eq!(service.total_session_minutes(&user, &course).await.unwrap(), 30);

        // Next calendar day in New York.
        clock.advance(Duration::hours(24));
        assert_eq!(service.get_daily_time(&user, &course).await.unwrap(), 0);
        assert_eq!(service.total_session_time(&user, &course).await.unwrap(), 1_800);
    }

    #[tokio::test]
    async fn history_requires_positive_limit() {
        let clock = ManualClock::new(fixed_now());
        let (service, _) = service(&clock);
        let (user, course) = ids();
        for _ in 0..3 {
            service
                .create(&user, &course, SessionMeta::default())
                .await
                .unwrap();
            clock.advance(Duration::minutes(1));
        }
        assert!(matches!(
            service.session_history(&user, &course, 0).await,
            Err(ComplianceError::Validation(_))
        ));
        let history = service.session_history(&user, &course, 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].start_timestamp > history[1].start_timestamp);
    }

    #[tokio::test]
    async fn completion_events_are_appended() {
        let clock = ManualClock::new(fixed_now());
        let (service, _) = service(&clock);
        let (user, course) = ids();
        let id = service
            .create(&user, &course, SessionMeta::default())
            .await
            .unwrap();
        service
            .log_lesson_completion(
                &user,
                &id,
                LessonCompletion {
                    lesson_id: LessonId::new("lesson-3").unwrap(),
                    module_id: Some(ModuleId::new("module-1").unwrap()),
                    score: Some(0.9),
                },
            )
            .await
            .unwrap();
        service
            .log_module_completion(
                &user,
                &id,
                ModuleCompletion {
                    module_id: ModuleId::new("module-1").unwrap(),
                    lessons_completed: 4,
                },
            )
            .await
            .unwrap();
        let stored = service.get(&user, &id).await.unwrap();
        assert_eq!(stored.completion_events.len(), 2);
        assert!(stored.lessons_accessed.contains(&LessonId::new("lesson-3").unwrap()));
    }

    /// Closes every session it returns from a scan, as a client stopping
    /// between the reaper's read and its write would.
    struct ClosedDuringScan(Arc<InMemoryRepository>);

    #[async_trait::async_trait]
    impl SessionRepository for ClosedDuringScan {
        async fn create_session(&self, session: &Session) -> Result<(), StorageError> {
            self.0.create_session(session).await
        }

        async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, StorageError> {
            self.0.get_session(id).await
        }

        async fn update_session(
            &self,
            id: &SessionId,
            update: &SessionUpdate,
        ) -> Result<(), StorageError> {
            self.0.update_session(id, update).await
        }

        async fn query_sessions(
            &self,
            query: &SessionQuery,
        ) -> Result<Vec<Session>, StorageError> {
            let found = self.0.query_sessions(query).await?;
            for session in &found {
                let end = session.last_heartbeat_timestamp + Duration::minutes(1);
                let close = SessionUpdate::closing(session, ClosureType::Normal, end);
                self.0.update_session(&session.session_id, &close).await?;
            }
            Ok(found)
        }
    }

    #[tokio::test]
    async fn reaper_skips_sessions_closed_after_the_scan() {
        let clock = ManualClock::new(fixed_now());
        let repo = Arc::new(InMemoryRepository::new());
        let service = ComplianceSessionService::new(
            Clock::manual(&clock),
            CompliancePolicy::default(),
            Arc::new(ClosedDuringScan(Arc::clone(&repo))),
            Arc::clone(&repo) as Arc<dyn DailyActivityRepository>,
        );
        let (user, course) = ids();
        let id = service
            .create(&user, &course, SessionMeta::default())
            .await
            .unwrap();

        clock.advance(Duration::minutes(31));
        let report = service.reap_orphans(&user, &course).await.unwrap();
        assert_eq!(report.closed_count, 0);
        assert!(report.failed.is_empty());

        let stored = service.get(&user, &id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert_eq!(stored.closure_type, Some(ClosureType::Normal));
        assert_eq!(stored.duration_seconds, Some(60));
        assert!(!stored.auto_closed);
    }

    #[tokio::test]
    async fn close_after_reaping_is_a_transition_error() {
        let clock = ManualClock::new(fixed_now());
        let (service, storage) = service(&clock);
        let (user, course) = ids();
        let id = service
            .create(&user, &course, SessionMeta::default())
            .await
            .unwrap();
        let stale = service.get(&user, &id).await.unwrap();

        clock.advance(Duration::minutes(31));
        assert_eq!(
            service.reap_orphans(&user, &course).await.unwrap().closed_count,
            1
        );

        let late = closing_update(&stale, CloseSummary::normal(), clock.now()).unwrap();
        let err = service.write(&id, &late).await.unwrap_err();
        assert_eq!(err.status_mismatch(), Some(SessionStatus::Timeout));
        assert!(matches!(
            service.close(&user, &id, CloseSummary::normal()).await,
            Err(ComplianceError::Transition(_))
        ));

        let stored = service.get(&user, &id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Timeout);
        assert_eq!(stored.duration_seconds, Some(31 * 60));
        let key = DateKey::for_instant(clock.now(), CompliancePolicy::default().timezone);
        let log = storage
            .daily_logs
            .get_daily_log(&user, key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.sessions_ended, 1);
    }
}
