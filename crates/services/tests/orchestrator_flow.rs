use chrono::Duration;
use compliance_core::model::{
    BreakReason, ClosureType, CourseId, LessonId, PvqQuestion, SessionMeta, SessionStatus,
    UserId, default_question_pool,
};
use compliance_core::time::{ManualClock, fixed_now};
use compliance_core::{Clock, CompliancePolicy};
use services::authority::Verdict;
use services::{
    AppServices, ComplianceError, IdentityError, OrchestratorError, OrchestratorEvent, Phase,
    PvqOutcome, SessionOrchestrator, StopReason,
};
use tokio::sync::broadcast::error::TryRecvError;

struct Fixture {
    clock: ManualClock,
    app: AppServices,
    user: UserId,
    course: CourseId,
}

fn fixture() -> Fixture {
    let clock = ManualClock::new(fixed_now());
    let app = AppServices::in_memory(Clock::manual(&clock), CompliancePolicy::default());
    Fixture {
        clock,
        app,
        user: UserId::new("learner-1").unwrap(),
        course: CourseId::new("course-1").unwrap(),
    }
}

fn question() -> PvqQuestion {
    default_question_pool().remove(1)
}

impl Fixture {
    async fn orchestrator(&self) -> SessionOrchestrator {
        self.app
            .identity()
            .enroll_security_answer(&self.user, question(), "Columbus")
            .await
            .unwrap();
        self.app
            .orchestrator(self.user.clone(), self.course.clone())
            .await
            .unwrap()
    }

    fn advance_secs(&self, secs: i64) {
        self.clock.advance(Duration::seconds(secs));
    }

    /// Moves the server clock and the paused tokio clock together, then lets
    /// every woken task finish.
    async fn run_for(&self, secs: u64) {
        self.advance_secs(i64::try_from(secs).unwrap());
        tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
        settle().await;
    }

    async fn minutes_today(&self, user: &UserId) -> u32 {
        self.app
            .time_authority()
            .check_daily_lockout(user)
            .await
            .unwrap()
            .minutes_completed
    }
}

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn heartbeats_run_until_the_daily_ceiling() {
    let fx = fixture();
    let orch = fx.orchestrator().await;
    let session_id = orch.start(SessionMeta::default()).await.unwrap();

    let mut challenges = 0;
    let mut last = None;
    for beat in 1..=241 {
        fx.advance_secs(60);
        let resp = orch.heartbeat_now().await.unwrap();
        if beat <= 240 {
            assert_eq!(resp.verdict, Verdict::Continue, "beat {beat}");
            assert_eq!(resp.minutes_completed, beat);
        }
        if orch.phase() == Phase::AwaitingPvq {
            challenges += 1;
            let pending = orch.pending_pvq().unwrap();
            assert_eq!(pending.id, question().id);
            let outcome = orch
                .submit_pvq_answer(&pending.id, "  columbus ")
                .await
                .unwrap();
            assert_eq!(outcome, PvqOutcome::Verified);
            orch.close_pvq_modal().unwrap();
            assert_eq!(orch.phase(), Phase::Running);
        }
        last = Some(resp);
    }

    let last = last.unwrap();
    assert_eq!(last.verdict, Verdict::DailyLimitReached);
    assert_eq!(last.remaining_minutes, 0);
    assert_eq!(challenges, 2, "challenged at 120 and 240 active minutes");
    assert_eq!(orch.phase(), Phase::Stopped(StopReason::DailyLimitReached));
    assert!(orch.is_max_daily_hours_reached());
    assert_eq!(orch.get_remaining_daily_time(), 0);
    assert_eq!(orch.formatted_session_time(), "00:00:00");

    let stored = fx.app.sessions().get(&fx.user, &session_id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
    assert_eq!(stored.duration_seconds, Some(241 * 60));

    let again = fx.orchestrator().await;
    assert!(matches!(
        again.start(SessionMeta::default()).await,
        Err(OrchestratorError::DailyLimitReached)
    ));
}

#[tokio::test]
async fn breaks_end_only_after_the_server_minimum() {
    let fx = fixture();
    let orch = fx.orchestrator().await;
    orch.start(SessionMeta::default()).await.unwrap();
    fx.advance_secs(300);

    let mut countdown = orch.break_countdown();
    orch.start_break(BreakReason::UserInitiated).await.unwrap();
    assert_eq!(orch.phase(), Phase::OnBreak);
    countdown.changed().await.unwrap();
    let first = countdown.borrow_and_update().unwrap();
    assert_eq!(first.remaining_seconds, 600);
    assert!(matches!(
        orch.heartbeat_now().await,
        Err(OrchestratorError::OnBreak)
    ));

    fx.advance_secs(400);
    let err = orch.end_break().await.unwrap_err();
    let info = err.break_too_short().unwrap();
    assert_eq!(info.minutes_remaining, 4);
    assert_eq!(info.remaining_seconds, 200);
    assert_eq!(orch.phase(), Phase::OnBreak);
    assert_eq!(orch.remaining_break_time().await.unwrap().remaining_seconds, 200);

    fx.advance_secs(205);
    let ended = orch.end_break().await.unwrap();
    assert_eq!(ended.actual_duration_seconds, Some(605));
    assert!(ended.validated_by_server);
    assert_eq!(orch.phase(), Phase::Running);
    assert_eq!(orch.formatted_break_time(), "00:10:05");
    assert_eq!(orch.formatted_session_time(), "00:05:00");
    assert!(orch.break_countdown().borrow().is_none());

    assert!(matches!(
        orch.end_break().await,
        Err(OrchestratorError::Session(ComplianceError::NoActiveBreak))
    ));
}

#[tokio::test]
async fn start_reaps_orphans_past_the_threshold() {
    let fx = fixture();
    let sessions = fx.app.sessions();
    let stale = sessions
        .create(&fx.user, &fx.course, SessionMeta::default())
        .await
        .unwrap();

    fx.advance_secs(29 * 60);
    assert_eq!(
        sessions
            .reap_orphans(&fx.user, &fx.course)
            .await
            .unwrap()
            .closed_count,
        0
    );

    fx.advance_secs(2 * 60);
    let orch = fx.orchestrator().await;
    let fresh = orch.start(SessionMeta::default()).await.unwrap();
    assert_ne!(fresh, stale);

    let reaped = sessions.get(&fx.user, &stale).await.unwrap();
    assert_eq!(reaped.closure_type, Some(ClosureType::OrphanedAutoClose));
    assert_eq!(reaped.status, SessionStatus::Timeout);
    assert!(reaped.auto_closed);
}

#[tokio::test]
async fn concurrent_starts_share_one_session() {
    let fx = fixture();
    let orch = fx.orchestrator().await;
    let other = orch.clone();

    let (a, b) = tokio::join!(
        orch.start(SessionMeta::default()),
        other.start(SessionMeta::default())
    );
    assert_eq!(a.unwrap(), b.unwrap());

    let history = fx
        .app
        .sessions()
        .session_history(&fx.user, &fx.course, 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    orch.stop().await;
}

#[tokio::test]
async fn two_wrong_answers_stop_the_session() {
    let fx = fixture();
    let orch = fx.orchestrator().await;
    let session_id = orch.start(SessionMeta::default()).await.unwrap();
    fx.advance_secs(90);

    let question = orch.trigger_pvq().unwrap();
    assert_eq!(orch.phase(), Phase::AwaitingPvq);
    assert!(matches!(
        orch.close_pvq_modal(),
        Err(OrchestratorError::Identity(IdentityError::ChallengePending))
    ));

    let first = orch.submit_pvq_answer(&question.id, "dayton").await.unwrap();
    assert_eq!(
        first,
        PvqOutcome::Incorrect {
            attempts_remaining: 1
        }
    );
    assert_eq!(orch.phase(), Phase::AwaitingPvq);

    let err = orch
        .submit_pvq_answer(&question.id, "toledo")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Identity(IdentityError::PvqLockedOut { .. })
    ));
    assert_eq!(orch.phase(), Phase::Stopped(StopReason::PvqLockedOut));

    let stored = fx.app.sessions().get(&fx.user, &session_id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
    assert_eq!(stored.duration_seconds, Some(90));
}

#[tokio::test]
async fn learners_without_answers_on_file_cannot_stall_a_challenge() {
    let fx = fixture();
    let learner = UserId::new("learner-without-answers").unwrap();
    let orch = fx
        .app
        .orchestrator(learner.clone(), fx.course.clone())
        .await
        .unwrap();
    let session_id = orch.start(SessionMeta::default()).await.unwrap();
    fx.advance_secs(60);

    let question = orch.trigger_pvq().unwrap();
    assert!(default_question_pool().iter().any(|q| q.id == question.id));

    let first = orch.submit_pvq_answer(&question.id, "anything").await.unwrap();
    assert_eq!(
        first,
        PvqOutcome::Incorrect {
            attempts_remaining: 1
        }
    );
    assert_eq!(orch.phase(), Phase::AwaitingPvq);

    assert!(matches!(
        orch.submit_pvq_answer(&question.id, "anything else").await,
        Err(OrchestratorError::Identity(IdentityError::PvqLockedOut { .. }))
    ));
    assert_eq!(orch.phase(), Phase::Stopped(StopReason::PvqLockedOut));
    let stored = fx.app.sessions().get(&learner, &session_id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
    assert_eq!(stored.duration_seconds, Some(60));
}

#[tokio::test]
async fn pause_freezes_the_timer_and_heartbeat() {
    let fx = fixture();
    let orch = fx.orchestrator().await;
    orch.start(SessionMeta::default()).await.unwrap();

    fx.advance_secs(100);
    orch.pause().await.unwrap();
    fx.advance_secs(500);
    assert_eq!(orch.session_seconds(), 100);
    assert!(matches!(
        orch.heartbeat_now().await,
        Err(OrchestratorError::Paused)
    ));

    orch.resume().await.unwrap();
    fx.advance_secs(20);
    assert_eq!(orch.formatted_session_time(), "00:02:00");
    assert!(!orch.is_break_recommended());

    fx.advance_secs(2 * 3600);
    assert!(orch.is_break_recommended());
    orch.stop().await;
    assert_eq!(orch.phase(), Phase::Stopped(StopReason::UserStopped));
    assert_eq!(orch.session_id(), None);
}

#[tokio::test]
async fn page_unload_closes_through_the_beacon() {
    let fx = fixture();
    let orch = fx.orchestrator().await;
    let session_id = orch.start(SessionMeta::default()).await.unwrap();
    fx.advance_secs(45);

    orch.page_unload();
    assert_eq!(orch.phase(), Phase::Stopped(StopReason::PageUnload));

    let sessions = fx.app.sessions();
    let mut status = SessionStatus::Active;
    for _ in 0..100 {
        tokio::task::yield_now().await;
        status = sessions.get(&fx.user, &session_id).await.unwrap().status;
        if status != SessionStatus::Active {
            break;
        }
    }
    assert_eq!(status, SessionStatus::Unloaded);
}

#[tokio::test(start_paused = true)]
async fn autosave_runs_on_its_interval_and_stop_cancels_every_timer() {
    let fx = fixture();
    let orch = fx.orchestrator().await;
    let mut events = orch.subscribe();
    let session_id = orch.start(SessionMeta::default()).await.unwrap();
    let lesson = LessonId::new("lesson-7").unwrap();
    orch.mark_lesson_accessed(lesson.clone());

    fx.run_for(30).await;
    let saved = fx.app.sessions().get(&fx.user, &session_id).await.unwrap();
    assert!(saved.lessons_accessed.contains(&lesson));
    assert_eq!(saved.last_updated, fixed_now() + Duration::seconds(30));
    assert_eq!(fx.minutes_today(&fx.user).await, 0);

    fx.run_for(30).await;
    assert_eq!(fx.minutes_today(&fx.user).await, 1);
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, OrchestratorEvent::Heartbeat(_)))
    );

    let mut countdown = orch.break_countdown();
    orch.start_break(BreakReason::UserInitiated).await.unwrap();
    fx.run_for(2).await;
    assert!(countdown.borrow_and_update().is_some());

    orch.stop().await;
    assert_eq!(orch.phase(), Phase::Stopped(StopReason::UserStopped));
    assert!(countdown.borrow_and_update().is_none());
    drain(&mut events);
    let closed = fx.app.sessions().get(&fx.user, &session_id).await.unwrap();

    for _ in 0..5 {
        fx.run_for(60).await;
    }
    let after = fx.app.sessions().get(&fx.user, &session_id).await.unwrap();
    assert_eq!(after.last_updated, closed.last_updated);
    assert_eq!(after.last_heartbeat_timestamp, closed.last_heartbeat_timestamp);
    assert_eq!(fx.minutes_today(&fx.user).await, 1);
    assert!(!countdown.has_changed().unwrap());
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn a_terminal_verdict_cancels_every_timer() {
    let clock = ManualClock::new(fixed_now());
    let policy = CompliancePolicy {
        daily_limit_minutes: 2,
        ..CompliancePolicy::default()
    };
    let fx = Fixture {
        app: AppServices::in_memory(Clock::manual(&clock), policy),
        clock,
        user: UserId::new("learner-1").unwrap(),
        course: CourseId::new("course-1").unwrap(),
    };
    let orch = fx.orchestrator().await;
    let mut events = orch.subscribe();
    let session_id = orch.start(SessionMeta::default()).await.unwrap();

    for _ in 0..3 {
        fx.run_for(60).await;
    }
    assert_eq!(orch.phase(), Phase::Stopped(StopReason::DailyLimitReached));
    let seen = drain(&mut events);
    assert!(seen.contains(&OrchestratorEvent::Stopped(StopReason::DailyLimitReached)));
    assert_eq!(fx.minutes_today(&fx.user).await, 2);
    let closed = fx.app.sessions().get(&fx.user, &session_id).await.unwrap();
    assert_eq!(closed.status, SessionStatus::Completed);
    assert_eq!(closed.duration_seconds, Some(180));

    for _ in 0..5 {
        fx.run_for(60).await;
    }
    let after = fx.app.sessions().get(&fx.user, &session_id).await.unwrap();
    assert_eq!(after.last_updated, closed.last_updated);
    assert_eq!(after.last_heartbeat_timestamp, closed.last_heartbeat_timestamp);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}
