use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use compliance_core::CompliancePolicy;
use compliance_core::model::{
    Break, CloseSummary, ClosureType, LessonId, ProgressPatch, SessionId, VideoProgress,
};
use compliance_core::time::elapsed_seconds;

use crate::authority::HeartbeatResponse;
use crate::identity::IdentityChallengeTrigger;

/// Why a session left the live phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    UserStopped,
    DailyLimitReached,
    IdleTimeout,
    PvqLockedOut,
    PageUnload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Paused,
    OnBreak,
    AwaitingPvq,
    Stopped(StopReason),
}

impl Phase {
    /// A session id exists and has not been closed locally.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(
            self,
            Self::Running | Self::Paused | Self::OnBreak | Self::AwaitingPvq
        )
    }
}

/// Local view of learner inactivity. Advisory only; the time authority owns
/// the real idle cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InactivityStatus {
    Active,
    Warning { seconds_remaining: u64 },
    TimedOut,
}

/// Mutable per-session state guarded by the orchestrator.
#[derive(Debug)]
pub(crate) struct SessionContext {
    pub session_id: Option<SessionId>,
    pub phase: Phase,
    accumulated_secs: u64,
    running_since: Option<DateTime<Utc>>,
    pub current_break: Option<Break>,
    pub break_secs_total: u64,
    pub active_secs_at_last_break: u64,
    pub last_activity: DateTime<Utc>,
    pub lessons: BTreeSet<LessonId>,
    pub video_progress: Option<VideoProgress>,
    pub last_heartbeat: Option<HeartbeatResponse>,
    pub daily_secs_at_start: u64,
    pub trigger: IdentityChallengeTrigger,
}

impl SessionContext {
    pub fn new(trigger: IdentityChallengeTrigger, now: DateTime<Utc>) -> Self {
        Self {
            session_id: None,
            phase: Phase::Idle,
            accumulated_secs: 0,
            running_since: None,
            current_break: None,
            break_secs_total: 0,
            active_secs_at_last_break: 0,
            last_activity: now,
            lessons: BTreeSet::new(),
            video_progress: None,
            last_heartbeat: None,
            daily_secs_at_start: 0,
            trigger,
        }
    }

    /// Resets everything for a freshly created session and starts the timer.
    pub fn begin(&mut self, session_id: SessionId, now: DateTime<Utc>, daily_secs: u64) {
        self.clear_timers(now);
        self.last_heartbeat = None;
        self.session_id = Some(session_id);
        self.daily_secs_at_start = daily_secs;
        self.phase = Phase::Running;
        self.trigger.reset();
        self.start_timer(now);
    }

    /// Drops the session and local timer state. The heartbeat verdict and
    /// stop reason survive so callers can still ask why the session ended.
    pub fn finish(&mut self, reason: StopReason, now: DateTime<Utc>) -> Option<SessionId> {
        let id = self.session_id.take();
        self.clear_timers(now);
        self.trigger.reset();
        self.phase = Phase::Stopped(reason);
        id
    }

    fn clear_timers(&mut self, now: DateTime<Utc>) {
        self.accumulated_secs = 0;
        self.running_since = None;
        self.current_break = None;
        self.break_secs_total = 0;
        self.active_secs_at_last_break = 0;
        self.last_activity = now;
        self.lessons.clear();
        self.video_progress = None;
    }

    pub fn start_timer(&mut self, now: DateTime<Utc>) {
        if self.running_since.is_none() {
            self.running_since = Some(now);
        }
    }

    pub fn stop_timer(&mut self, now: DateTime<Utc>) {
        if let Some(since) = self.running_since.take() {
            self.accumulated_secs += elapsed_seconds(since, now);
        }
    }

    /// Seconds the timer has run, excluding pauses, breaks and open challenges.
    pub fn active_seconds(&self, now: DateTime<Utc>) -> u64 {
        self.accumulated_secs
            + self
                .running_since
                .map_or(0, |since| elapsed_seconds(since, now))
    }

    pub fn break_seconds(&self, now: DateTime<Utc>) -> u64 {
        self.break_secs_total
            + self
                .current_break
                .as_ref()
                .map_or(0, |b| b.elapsed_seconds(now))
    }

    pub fn snapshot(&self) -> ProgressPatch {
        ProgressPatch {
            video_progress: self.video_progress,
            lessons_accessed: self.lessons.iter().cloned().collect(),
            ..ProgressPatch::default()
        }
    }

    pub fn close_summary(&self, closure: ClosureType) -> CloseSummary {
        CloseSummary {
            closure_type: closure,
            ..CloseSummary::normal()
        }
        .with_progress(self.video_progress, self.lessons.iter().cloned().collect())
    }

    pub fn inactivity(&self, now: DateTime<Utc>, policy: &CompliancePolicy) -> InactivityStatus {
        let idle = elapsed_seconds(self.last_activity, now);
        let timeout = u64::try_from(policy.idle_timeout.num_seconds()).unwrap_or(0);
        let warn_after = u64::try_from(policy.idle_warning_after.num_seconds()).unwrap_or(0);
        if idle >= timeout {
            InactivityStatus::TimedOut
        } else if idle >= warn_after {
            InactivityStatus::Warning {
                seconds_remaining: timeout - idle,
            }
        } else {
            InactivityStatus::Active
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use compliance_core::time::fixed_now;

    fn context() -> SessionContext {
        let policy = CompliancePolicy::default();
        SessionContext::new(IdentityChallengeTrigger::new(&policy, Vec::new()), fixed_now())
    }

    #[test]
    fn timer_excludes_stopped_spans() {
        let mut ctx = context();
        let t0 = fixed_now();
        ctx.begin(SessionId::new("s").unwrap(), t0, 0);
        ctx.stop_timer(t0 + Duration::seconds(90));
        assert_eq!(ctx.active_seconds(t0 + Duration::seconds(500)), 90);
        ctx.start_timer(t0 + Duration::seconds(500));
        assert_eq!(ctx.active_seconds(t0 + Duration::seconds(510)), 100);
    }

    #[test]
    fn finish_keeps_reason_and_clears_time() {
        let mut ctx = context();
        let t0 = fixed_now();
        ctx.begin(SessionId::new("s").unwrap(), t0, 60);
        let id = ctx.finish(StopReason::UserStopped, t0 + Duration::seconds(30));
        assert_eq!(id, Some(SessionId::new("s").unwrap()));
        assert_eq!(ctx.phase, Phase::Stopped(StopReason::UserStopped));
        assert_eq!(ctx.active_seconds(t0 + Duration::hours(1)), 0);
        assert!(!ctx.phase.is_live());
    }

    #[test]
    fn inactivity_warns_before_timeout() {
        let ctx = context();
        let policy = CompliancePolicy::default();
        assert_eq!(ctx.inactivity(fixed_now(), &policy), InactivityStatus::Active);
        assert_eq!(
            ctx.inactivity(fixed_now() + Duration::minutes(14), &policy),
            InactivityStatus::Warning {
                seconds_remaining: 60
            }
        );
        assert_eq!(
            ctx.inactivity(fixed_now() + Duration::minutes(15), &policy),
            InactivityStatus::TimedOut
        );
    }
}
