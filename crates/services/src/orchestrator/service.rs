use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use compliance_core::model::{
    Break, BreakReason, BreakRemaining, ClosureType, CourseId, LessonId, PvqQuestion, QuestionId,
    SessionId, SessionMeta, UserId, VideoProgress,
};
use compliance_core::playback::RestrictedPlayback;
use compliance_core::time::format_hms;
use compliance_core::{Clock, CompliancePolicy};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use super::context::{InactivityStatus, Phase, SessionContext, StopReason};
use super::tasks::{self, ScheduledTasks};
use crate::authority::{
    AnswerVerifier, HeartbeatResponse, TimeAuthority, UnloadBeacon, UnloadBeaconPayload, Verdict,
};
use crate::compliance::{BreakManager, ComplianceSessionService};
use crate::error::{ComplianceError, IdentityError, OrchestratorError};
use crate::heartbeat::{HeartbeatEvent, HeartbeatMonitor, HeartbeatTarget};
use crate::identity::{IdentityChallengeTrigger, PvqOutcome};
use crate::retry::RetryExecutor;

/// Collaborators an orchestrator is built from.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub clock: Clock,
    pub policy: CompliancePolicy,
    pub sessions: Arc<ComplianceSessionService>,
    pub breaks: Arc<BreakManager>,
    pub time_authority: Arc<dyn TimeAuthority>,
    pub verifier: Arc<dyn AnswerVerifier>,
    pub beacon: Arc<dyn UnloadBeacon>,
}

/// Notifications for whoever renders the session.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    Started(SessionId),
    Heartbeat(HeartbeatResponse),
    HeartbeatFailed(String),
    PvqRequired(PvqQuestion),
    Stopped(StopReason),
}

const EVENT_CAPACITY: usize = 64;
const HEARTBEAT_QUEUE: usize = 8;

/// Client-side coordinator for one learner in one course.
///
/// Owns the session timer, the heartbeat loop, autosave, the break countdown
/// and the PVQ trigger. Cheap to clone; clones share state. Dropping the
/// last clone cancels every timer and fires the unload beacon for a session
/// that is still open.
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

pub(super) struct Inner {
    user_id: UserId,
    course_id: CourseId,
    clock: Clock,
    policy: CompliancePolicy,
    retry: RetryExecutor,
    sessions: Arc<ComplianceSessionService>,
    breaks: Arc<BreakManager>,
    verifier: Arc<dyn AnswerVerifier>,
    beacon: Arc<dyn UnloadBeacon>,
    heartbeat: HeartbeatMonitor,
    start_guard: tokio::sync::Mutex<()>,
    context: Mutex<SessionContext>,
    tasks: Mutex<ScheduledTasks>,
    events: broadcast::Sender<OrchestratorEvent>,
    countdown: watch::Sender<Option<BreakRemaining>>,
}

impl SessionOrchestrator {
    /// `questions` is the learner's enrolled pool; empty means the default pool.
    #[must_use]
    pub fn new(
        deps: OrchestratorDeps,
        user_id: UserId,
        course_id: CourseId,
        questions: Vec<PvqQuestion>,
    ) -> Self {
        let retry = RetryExecutor::new(deps.policy.retry);
        let trigger = IdentityChallengeTrigger::new(&deps.policy, questions);
        let context = SessionContext::new(trigger, deps.clock.now());
        let heartbeat =
            HeartbeatMonitor::new(deps.time_authority, retry, deps.policy.heartbeat_interval);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (countdown, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                user_id,
                course_id,
                clock: deps.clock,
                policy: deps.policy,
                retry,
                sessions: deps.sessions,
                breaks: deps.breaks,
                verifier: deps.verifier,
                beacon: deps.beacon,
                heartbeat,
                start_guard: tokio::sync::Mutex::new(()),
                context: Mutex::new(context),
                tasks: Mutex::new(ScheduledTasks::default()),
                events,
                countdown,
            }),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.inner.events.subscribe()
    }

    /// Break countdown, `None` outside a break.
    #[must_use]
    pub fn break_countdown(&self) -> watch::Receiver<Option<BreakRemaining>> {
        self.inner.countdown.subscribe()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.inner.context().phase
    }

    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.context().session_id.clone()
    }

    /// The challenge waiting for an answer, if any.
    #[must_use]
    pub fn pending_pvq(&self) -> Option<PvqQuestion> {
        self.inner.context().trigger.awaiting_answer().cloned()
    }

    /// Stops sending heartbeats (or allows them again) without touching the
    /// session.
    pub fn set_heartbeat_enabled(&self, enabled: bool) {
        self.inner.heartbeat.set_enabled(enabled);
        if enabled && self.phase() == Phase::Running {
            self.inner.arm_schedules();
        }
    }

    //
    // ─── LIFECYCLE ─────────────────────────────────────────────────────────────
    //

    /// Opens a session, or returns the one already open.
    ///
    /// Concurrent callers are serialized, so at most one session is created.
    /// Orphans older than the threshold are reaped first.
    ///
    /// # Errors
    ///
    /// Returns `DailyLimitReached` when today's completed time already meets
    /// the ceiling, or a session-store error.
    pub async fn start(&self, meta: SessionMeta) -> Result<SessionId, OrchestratorError> {
        let _guard = self.inner.start_guard.lock().await;
        {
            let ctx = self.inner.context();
            if let Some(id) = ctx.session_id.as_ref().filter(|_| ctx.phase.is_live()) {
                debug!(session_id = %id, "start ignored: session already open");
                return Ok(id.clone());
            }
        }

        let (user, course) = (&self.inner.user_id, &self.inner.course_id);
        match self.inner.sessions.reap_orphans(user, course).await {
            Ok(report) if report.closed_count > 0 => {
                info!(closed = report.closed_count, "orphaned sessions reaped before start");
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "orphan sweep failed; starting anyway"),
        }

        let daily_secs = self.inner.sessions.get_daily_time(user, course).await?;
        if daily_secs >= self.inner.policy.daily_limit_seconds() {
            info!(user_id = %user, daily_secs, "start refused: daily limit reached");
            return Err(OrchestratorError::DailyLimitReached);
        }

        let session_id = self.inner.sessions.create(user, course, meta).await?;
        self.inner
            .context()
            .begin(session_id.clone(), self.inner.clock.now(), daily_secs);
        self.inner.tasks().arm_unload();
        self.inner.arm_schedules();
        self.inner.emit(OrchestratorEvent::Started(session_id.clone()));
        info!(session_id = %session_id, "session started");
        Ok(session_id)
    }

    /// Pauses the timer and heartbeat after persisting a progress snapshot.
    /// A failed persist is logged and the pause still happens.
    ///
    /// # Errors
    ///
    /// Returns an error when no running session exists.
    pub async fn pause(&self) -> Result<(), OrchestratorError> {
        match self.phase() {
            Phase::Running => {}
            Phase::Paused => return Ok(()),
            other => return Err(not_running(other)),
        }
        if let Err(err) = self.inner.persist_snapshot().await {
            warn!(error = %err, "snapshot before pause not saved");
        }
        {
            let mut ctx = self.inner.context();
            ctx.stop_timer(self.inner.clock.now());
            ctx.phase = Phase::Paused;
        }
        self.inner.suspend_schedules();
        debug!("session paused");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error unless the session is paused.
    pub async fn resume(&self) -> Result<(), OrchestratorError> {
        match self.phase() {
            Phase::Paused => {}
            Phase::Running => return Ok(()),
            other => return Err(not_running(other)),
        }
        if let Err(err) = self.inner.persist_snapshot().await {
            warn!(error = %err, "snapshot before resume not saved");
        }
        {
            let mut ctx = self.inner.context();
            let now = self.inner.clock.now();
            ctx.start_timer(now);
            ctx.last_activity = now;
            ctx.phase = Phase::Running;
        }
        self.inner.arm_schedules();
        debug!("session resumed");
        Ok(())
    }

    /// Cancels every timer and closes the session with its final snapshot.
    /// Local state is reset whether or not the close reaches the store.
    pub async fn stop(&self) {
        self.inner.terminate(StopReason::UserStopped).await;
    }

    /// Synchronous unload path: tears down timers and fires the beacon
    /// without waiting for delivery.
    pub fn page_unload(&self) {
        let payload = {
            let mut ctx = self.inner.context();
            let now = self.inner.clock.now();
            let duration = ctx.active_seconds(now);
            ctx.finish(StopReason::PageUnload, now)
                .map(|session_id| UnloadBeaconPayload {
                    user_id: self.inner.user_id.clone(),
                    session_id,
                    closure_type: ClosureType::PageUnload,
                    duration,
                })
        };
        self.inner.heartbeat.stop();
        self.inner.tasks().cancel_all();
        self.inner.clear_countdown();
        if let Some(payload) = payload {
            info!(session_id = %payload.session_id, "page unload: beacon sent");
            self.inner.beacon.send(payload);
            self.inner
                .emit(OrchestratorEvent::Stopped(StopReason::PageUnload));
        }
    }

    //
    // ─── BREAKS ────────────────────────────────────────────────────────────────
    //

    /// Starts a server-recorded break and stops the session timer.
    ///
    /// # Errors
    ///
    /// Returns `OnBreak` or `PvqPending` when the phase forbids a break, or
    /// the session service's refusal. State is unchanged on error.
    pub async fn start_break(&self, reason: BreakReason) -> Result<Break, OrchestratorError> {
        let session_id = {
            let ctx = self.inner.context();
            match ctx.phase {
                Phase::Running | Phase::Paused => {}
                other => return Err(not_running(other)),
            }
            ctx.session_id.clone().ok_or(OrchestratorError::NotStarted)?
        };
        if let Err(err) = self.inner.persist_snapshot().await {
            warn!(error = %err, "snapshot before break not saved");
        }
        let started = self
            .inner
            .breaks
            .start_break(&self.inner.user_id, &session_id, reason)
            .await?;
        {
            let mut ctx = self.inner.context();
            let now = self.inner.clock.now();
            ctx.stop_timer(now);
            ctx.active_secs_at_last_break = ctx.active_seconds(now);
            ctx.current_break = Some(started.clone());
            ctx.phase = Phase::OnBreak;
        }
        self.inner.suspend_schedules();
        let countdown = tasks::spawn_break_countdown(
            Arc::downgrade(&self.inner),
            self.inner.policy.break_countdown_interval,
        );
        self.inner.tasks().set_countdown(countdown);
        Ok(started)
    }

    /// Ends the break once the server confirms the minimum elapsed.
    ///
    /// # Errors
    ///
    /// Returns the session service's `BreakTooShort` (see
    /// [`OrchestratorError::break_too_short`]) and stays on break, or
    /// `NoActiveBreak` outside a break.
    pub async fn end_break(&self) -> Result<Break, OrchestratorError> {
        let session_id = {
            let ctx = self.inner.context();
            if ctx.phase != Phase::OnBreak {
                return Err(ComplianceError::NoActiveBreak.into());
            }
            ctx.session_id.clone().ok_or(OrchestratorError::NotStarted)?
        };
        let ended = self
            .inner
            .breaks
            .end_break(&self.inner.user_id, &session_id)
            .await?;
        {
            let mut ctx = self.inner.context();
            let now = self.inner.clock.now();
            ctx.break_secs_total += ended.actual_duration_seconds.unwrap_or_default();
            ctx.current_break = None;
            ctx.last_activity = now;
            ctx.start_timer(now);
            ctx.phase = Phase::Running;
        }
        self.inner.tasks().stop_countdown();
        self.inner.clear_countdown();
        self.inner.arm_schedules();
        Ok(ended)
    }

    /// Server-computed countdown for the running break.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveBreak` outside a break, or a lookup error.
    pub async fn remaining_break_time(&self) -> Result<BreakRemaining, OrchestratorError> {
        let session_id = self.session_id().ok_or(OrchestratorError::NotStarted)?;
        Ok(self
            .inner
            .breaks
            .get_remaining_break_time(&self.inner.user_id, &session_id)
            .await?)
    }

    //
    // ─── IDENTITY CHALLENGES ───────────────────────────────────────────────────
    //

    /// Surfaces a challenge now, returning the pending one if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error when no session is running.
    pub fn trigger_pvq(&self) -> Result<PvqQuestion, OrchestratorError> {
        let question = {
            let mut ctx = self.inner.context();
            if let Some(question) = ctx.trigger.awaiting_answer() {
                return Ok(question.clone());
            }
            match ctx.phase {
                Phase::Running | Phase::Paused => {}
                other => return Err(not_running(other)),
            }
            let now = self.inner.clock.now();
            let question = ctx
                .trigger
                .force_trigger(now)
                .ok_or(OrchestratorError::PvqPending)?;
            ctx.stop_timer(now);
            ctx.phase = Phase::AwaitingPvq;
            question
        };
        self.inner.suspend_schedules();
        self.inner
            .emit(OrchestratorEvent::PvqRequired(question.clone()));
        Ok(question)
    }

    /// Sends an answer to the verification authority.
    ///
    /// A verified answer resumes the timer and heartbeat. An incorrect one
    /// leaves the challenge pending.
    ///
    /// # Errors
    ///
    /// Returns `Identity(PvqLockedOut)` after the session has been stopped
    /// for a lockout, `Identity(NoPendingChallenge)` for a stale question,
    /// or the verifier's failure once retries are exhausted.
    pub async fn submit_pvq_answer(
        &self,
        question_id: &QuestionId,
        answer: &str,
    ) -> Result<PvqOutcome, OrchestratorError> {
        let request = {
            let ctx = self.inner.context();
            if ctx.phase != Phase::AwaitingPvq {
                return Err(IdentityError::NoPendingChallenge.into());
            }
            let session_id = ctx.session_id.clone().ok_or(OrchestratorError::NotStarted)?;
            ctx.trigger.prepare_submission(
                &self.inner.user_id,
                &session_id,
                question_id,
                answer,
                self.inner.clock.now(),
            )?
        };

        let verifier = self.inner.verifier.as_ref();
        let req = &request;
        let response = self
            .inner
            .retry
            .execute("pvq.verify", move || verifier.verify(req))
            .await
            .map_err(IdentityError::Authority)?;

        let outcome = {
            let mut ctx = self.inner.context();
            let now = self.inner.clock.now();
            let active = ctx.active_seconds(now);
            let outcome = ctx.trigger.record_outcome(&response, active);
            if matches!(outcome, Ok(PvqOutcome::Verified)) {
                ctx.start_timer(now);
                ctx.last_activity = now;
                ctx.phase = Phase::Running;
            }
            outcome
        };

        match outcome {
            Ok(PvqOutcome::Verified) => {
                info!(attempt = response.attempt_number, "identity verified; session resumed");
                self.inner.arm_schedules();
                Ok(PvqOutcome::Verified)
            }
            Ok(incorrect) => Ok(incorrect),
            Err(err) => {
                if err.is_terminal() {
                    warn!(error = %err, "identity lockout; stopping session");
                    self.inner.terminate(StopReason::PvqLockedOut).await;
                }
                Err(err.into())
            }
        }
    }

    /// # Errors
    ///
    /// Returns `Identity(ChallengePending)` while the question is unanswered.
    pub fn close_pvq_modal(&self) -> Result<(), OrchestratorError> {
        Ok(self.inner.context().trigger.close_modal()?)
    }

    //
    // ─── HEARTBEAT AND AUTOSAVE ────────────────────────────────────────────────
    //

    /// Sends one heartbeat right away and applies its verdict exactly as the
    /// interval loop would. Terminal verdicts are returned, not raised.
    ///
    /// # Errors
    ///
    /// Returns `Paused`, `OnBreak` or `PvqPending` when heartbeats are
    /// suspended, or the authority failure after retries.
    pub async fn heartbeat_now(&self) -> Result<HeartbeatResponse, OrchestratorError> {
        let target = {
            let ctx = self.inner.context();
            if ctx.phase != Phase::Running {
                return Err(not_running(ctx.phase));
            }
            self.inner.target(ctx.session_id.clone())
        };
        let request = target.request().ok_or(OrchestratorError::NotStarted)?;
        let response = self.inner.heartbeat.beat(&request).await?;
        self.inner.apply_verdict(&response).await;
        Ok(response)
    }

    /// Persists the current snapshot immediately.
    ///
    /// # Errors
    ///
    /// Returns the session service's error.
    pub async fn autosave_now(&self) -> Result<(), OrchestratorError> {
        Ok(self.inner.persist_snapshot().await?)
    }

    //
    // ─── ACTIVITY AND PROGRESS ─────────────────────────────────────────────────
    //

    pub fn record_activity(&self) {
        self.inner.context().last_activity = self.inner.clock.now();
    }

    #[must_use]
    pub fn inactivity_status(&self) -> InactivityStatus {
        self.inner
            .context()
            .inactivity(self.inner.clock.now(), &self.inner.policy)
    }

    /// Takes the next autosave snapshot from a verified restricted player.
    ///
    /// # Errors
    ///
    /// Returns `Playback(Unverified)` for a player that failed its mount check.
    pub fn report_video_progress(
        &self,
        player: &RestrictedPlayback,
    ) -> Result<VideoProgress, OrchestratorError> {
        let progress = player.verified_progress()?;
        let mut ctx = self.inner.context();
        ctx.video_progress = Some(progress);
        ctx.last_activity = self.inner.clock.now();
        Ok(progress)
    }

    pub fn mark_lesson_accessed(&self, lesson_id: LessonId) {
        self.inner.context().lessons.insert(lesson_id);
    }

    //
    // ─── DISPLAY ───────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn session_seconds(&self) -> u64 {
        self.inner.context().active_seconds(self.inner.clock.now())
    }

    #[must_use]
    pub fn formatted_session_time(&self) -> String {
        format_hms(self.session_seconds())
    }

    /// Today's completed time plus the current session.
    #[must_use]
    pub fn formatted_total_time(&self) -> String {
        let ctx = self.inner.context();
        format_hms(ctx.daily_secs_at_start + ctx.active_seconds(self.inner.clock.now()))
    }

    #[must_use]
    pub fn formatted_break_time(&self) -> String {
        format_hms(self.inner.context().break_seconds(self.inner.clock.now()))
    }

    /// True after two hours of active time since the last break.
    #[must_use]
    pub fn is_break_recommended(&self) -> bool {
        let ctx = self.inner.context();
        if !matches!(ctx.phase, Phase::Running | Phase::Paused) {
            return false;
        }
        let since_break = ctx
            .active_seconds(self.inner.clock.now())
            .saturating_sub(ctx.active_secs_at_last_break);
        let threshold =
            u64::try_from(self.inner.policy.break_recommended_after.num_seconds()).unwrap_or(0);
        since_break >= threshold
    }

    #[must_use]
    pub fn is_max_daily_hours_reached(&self) -> bool {
        let ctx = self.inner.context();
        ctx.phase == Phase::Stopped(StopReason::DailyLimitReached)
            || ctx
                .last_heartbeat
                .as_ref()
                .is_some_and(|h| h.verdict == Verdict::DailyLimitReached)
            || self.inner.remaining_daily(&ctx) == 0
    }

    /// Seconds left today. The last heartbeat verdict wins over the local
    /// estimate once one has arrived.
    #[must_use]
    pub fn get_remaining_daily_time(&self) -> u64 {
        let ctx = self.inner.context();
        self.inner.remaining_daily(&ctx)
    }
}

impl Inner {
    fn context(&self) -> MutexGuard<'_, SessionContext> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> MutexGuard<'_, ScheduledTasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: OrchestratorEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn target(&self, session_id: Option<SessionId>) -> HeartbeatTarget {
        HeartbeatTarget {
            user_id: Some(self.user_id.clone()),
            course_id: Some(self.course_id.clone()),
            session_id,
        }
    }

    fn remaining_daily(&self, ctx: &SessionContext) -> u64 {
        if let Some(last) = &ctx.last_heartbeat {
            return u64::from(last.remaining_minutes) * 60;
        }
        let used = ctx.daily_secs_at_start + ctx.active_seconds(self.clock.now());
        self.policy.daily_limit_seconds().saturating_sub(used)
    }

    /// Starts heartbeat and autosave for the current session.
    fn arm_schedules(self: &Arc<Self>) {
        let target = self.target(self.context().session_id.clone());
        let (tx, rx) = mpsc::channel(HEARTBEAT_QUEUE);
        if self.heartbeat.start(&target, tx) {
            tasks::spawn_heartbeat_listener(Arc::downgrade(self), rx);
        }
        let autosave = tasks::spawn_autosave(Arc::downgrade(self), self.policy.autosave_interval);
        self.tasks().set_autosave(autosave);
    }

    fn suspend_schedules(&self) {
        self.heartbeat.stop();
        self.tasks().stop_autosave();
    }

    fn clear_countdown(&self) {
        self.countdown.send_replace(None);
    }

    pub(super) async fn persist_snapshot(&self) -> Result<(), ComplianceError> {
        let (session_id, patch) = {
            let ctx = self.context();
            let Some(id) = ctx.session_id.clone().filter(|_| ctx.phase.is_live()) else {
                return Ok(());
            };
            (id, ctx.snapshot())
        };
        self.sessions
            .update_heartbeat_or_progress(&self.user_id, &session_id, patch)
            .await?;
        debug!(session_id = %session_id, "progress snapshot saved");
        Ok(())
    }

    /// Returns `false` once no break is running so the countdown task ends.
    pub(super) fn publish_break_countdown(&self) -> bool {
        let remaining = {
            let ctx = self.context();
            ctx.current_break
                .as_ref()
                .map(|b| b.remaining(self.clock.now(), self.policy.min_break_seconds()))
        };
        let running = remaining.is_some();
        self.countdown.send_replace(remaining);
        running
    }

    pub(super) async fn on_heartbeat(&self, event: HeartbeatEvent) {
        match event {
            HeartbeatEvent::Verdict(response) => self.apply_verdict(&response).await,
            HeartbeatEvent::Failed(err) => {
                self.emit(OrchestratorEvent::HeartbeatFailed(err.to_string()));
            }
        }
    }

    async fn apply_verdict(&self, response: &HeartbeatResponse) {
        self.emit(OrchestratorEvent::Heartbeat(response.clone()));
        match response.verdict {
            Verdict::Continue => {
                let question = {
                    let mut ctx = self.context();
                    ctx.last_heartbeat = Some(response.clone());
                    if ctx.phase == Phase::Running {
                        let now = self.clock.now();
                        let active = ctx.active_seconds(now);
                        let question = ctx.trigger.check(active, now);
                        if question.is_some() {
                            ctx.stop_timer(now);
                            ctx.phase = Phase::AwaitingPvq;
                        }
                        question
                    } else {
                        None
                    }
                };
                if let Some(question) = question {
                    info!(question_id = %question.id, "identity challenge due");
                    self.suspend_schedules();
                    self.emit(OrchestratorEvent::PvqRequired(question));
                }
            }
            Verdict::DailyLimitReached => {
                self.context().last_heartbeat = Some(response.clone());
                self.terminate(StopReason::DailyLimitReached).await;
            }
            Verdict::SessionIdleTimeout => {
                self.context().last_heartbeat = Some(response.clone());
                self.terminate(StopReason::IdleTimeout).await;
            }
        }
    }

    /// Cancels timers, resets local state and closes the session.
    async fn terminate(&self, reason: StopReason) {
        let closing = {
            let mut ctx = self.context();
            let now = self.clock.now();
            let summary = ctx.close_summary(ClosureType::Normal);
            ctx.finish(reason, now).map(|id| (id, summary))
        };
        self.heartbeat.stop();
        self.tasks().cancel_all();
        self.clear_countdown();
        let Some((session_id, summary)) = closing else {
            return;
        };
        match self
            .sessions
            .close(&self.user_id, &session_id, summary)
            .await
        {
            Ok(()) => info!(session_id = %session_id, ?reason, "session stopped"),
            Err(err) => warn!(session_id = %session_id, ?reason, error = %err, "session stopped locally; close not persisted"),
        }
        self.emit(OrchestratorEvent::Stopped(reason));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let armed = self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .disarm_unload();
        let now = self.clock.now();
        let ctx = self
            .context
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if !armed || !ctx.phase.is_live() {
            return;
        }
        let duration = ctx.active_seconds(now);
        if let Some(session_id) = ctx.finish(StopReason::PageUnload, now) {
            debug!(session_id = %session_id, "orchestrator dropped with an open session");
            self.beacon.send(UnloadBeaconPayload {
                user_id: self.user_id.clone(),
                session_id,
                closure_type: ClosureType::PageUnload,
                duration,
            });
        }
    }
}

fn not_running(phase: Phase) -> OrchestratorError {
    match phase {
        Phase::Paused => OrchestratorError::Paused,
        Phase::OnBreak => OrchestratorError::OnBreak,
        Phase::AwaitingPvq => OrchestratorError::PvqPending,
        Phase::Stopped(StopReason::DailyLimitReached) => OrchestratorError::DailyLimitReached,
        Phase::Stopped(StopReason::IdleTimeout) => OrchestratorError::IdleTimeout,
        Phase::Idle | Phase::Running | Phase::Stopped(_) => OrchestratorError::NotStarted,
    }
}
