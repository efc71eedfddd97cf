use chrono::{DateTime, Utc};
use compliance_core::CompliancePolicy;
use compliance_core::model::{
    PvqQuestion, QuestionId, SessionId, UserId, default_question_pool, normalize_answer,
};
use compliance_core::time::elapsed_seconds;
use rand::Rng;
use rand::seq::IndexedRandom;

use crate::authority::{VerificationRequest, VerificationResponse};
use crate::error::IdentityError;

/// A question currently shown to the learner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChallenge {
    pub question: PvqQuestion,
    pub presented_at: DateTime<Utc>,
    /// Set once the verifier answered; the modal may then be closed.
    pub resolved: Option<PvqOutcome>,
}

/// Result of one submission that was not a lockout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PvqOutcome {
    Verified,
    Incorrect { attempts_remaining: u32 },
}

/// Decides when to surface a PVQ based on cumulative active session time.
///
/// Pure state: the owner feeds it active seconds and forwards submissions to
/// the verification authority. It never resumes the session timer itself.
#[derive(Debug, Clone)]
pub struct IdentityChallengeTrigger {
    threshold_secs: u64,
    random_offset_secs: Option<(u64, u64)>,
    next_due_secs: u64,
    pool: Vec<PvqQuestion>,
    pending: Option<PendingChallenge>,
}

impl IdentityChallengeTrigger {
    /// Uses `pool`, or the default ten questions when it is empty.
    #[must_use]
    pub fn new(policy: &CompliancePolicy, pool: Vec<PvqQuestion>) -> Self {
        let mut trigger = Self {
            threshold_secs: u64::try_from(policy.pvq_threshold.num_seconds()).unwrap_or(0),
            random_offset_secs: policy.pvq_random_offset_secs,
            next_due_secs: 0,
            pool: Vec::new(),
            pending: None,
        };
        trigger.set_pool(pool);
        trigger.arm(0);
        trigger
    }

    pub fn set_pool(&mut self, pool: Vec<PvqQuestion>) {
        self.pool = if pool.is_empty() {
            default_question_pool()
        } else {
            pool
        };
    }

    /// Schedules the next challenge one threshold (plus any random offset)
    /// after `active_secs`.
    pub fn arm(&mut self, active_secs: u64) {
        let offset = match self.random_offset_secs {
            Some((min, max)) if max > min => rand::rng().random_range(min..=max),
            Some((min, _)) => min,
            None => 0,
        };
        self.next_due_secs = active_secs
            .saturating_add(self.threshold_secs)
            .saturating_add(offset);
    }

    #[must_use]
    pub fn next_due_secs(&self) -> u64 {
        self.next_due_secs
    }

    #[must_use]
    pub fn pending(&self) -> Option<&PendingChallenge> {
        self.pending.as_ref()
    }

    /// The question still waiting for a correct answer.
    #[must_use]
    pub fn awaiting_answer(&self) -> Option<&PvqQuestion> {
        self.pending
            .as_ref()
            .filter(|p| p.resolved != Some(PvqOutcome::Verified))
            .map(|p| &p.question)
    }

    /// Surfaces a challenge once `active_secs` crosses the armed threshold.
    pub fn check(&mut self, active_secs: u64, now: DateTime<Utc>) -> Option<PvqQuestion> {
        if self.awaiting_answer().is_some() || active_secs < self.next_due_secs {
            return None;
        }
        self.present(now)
    }

    /// Surfaces a challenge immediately unless one is still unanswered.
    pub fn force_trigger(&mut self, now: DateTime<Utc>) -> Option<PvqQuestion> {
        if self.awaiting_answer().is_some() {
            return None;
        }
        self.present(now)
    }

    fn present(&mut self, now: DateTime<Utc>) -> Option<PvqQuestion> {
        let question = self.pool.choose(&mut rand::rng())?.clone();
        self.pending = Some(PendingChallenge {
            question: question.clone(),
            presented_at: now,
            resolved: None,
        });
        Some(question)
    }

    /// Builds the verifier request for the pending question.
    ///
    /// # Errors
    ///
    /// Returns `NoPendingChallenge` if nothing is pending or `question_id`
    /// does not match it, and `Validation` for a blank or oversized answer.
    pub fn prepare_submission(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        question_id: &QuestionId,
        answer: &str,
        now: DateTime<Utc>,
    ) -> Result<VerificationRequest, IdentityError> {
        let pending = self
            .pending
            .as_ref()
            .filter(|p| &p.question.id == question_id && p.resolved != Some(PvqOutcome::Verified))
            .ok_or(IdentityError::NoPendingChallenge)?;
        normalize_answer(answer)?;
        let waited = elapsed_seconds(pending.presented_at, now);
        Ok(VerificationRequest {
            user_id: user_id.clone(),
            session_id: session_id.clone(),
            question_id: question_id.clone(),
            answer: answer.to_owned(),
            time_to_answer_seconds: u32::try_from(waited).unwrap_or(u32::MAX),
        })
    }

    /// Applies the verifier's answer. A verified answer re-arms the trigger
    /// from `active_secs`.
    ///
    /// # Errors
    ///
    /// Returns `PvqLockedOut`, distinct from an incorrect answer, when the
    /// authority imposed a lockout.
    pub fn record_outcome(
        &mut self,
        response: &VerificationResponse,
        active_secs: u64,
    ) -> Result<PvqOutcome, IdentityError> {
        if let Some(until) = response.locked_until {
            self.pending = None;
            return Err(IdentityError::PvqLockedOut { until });
        }
        let outcome = if response.verified {
            PvqOutcome::Verified
        } else {
            PvqOutcome::Incorrect {
                attempts_remaining: response.attempts_remaining,
            }
        };
        if let Some(pending) = self.pending.as_mut() {
            pending.resolved = Some(outcome);
        }
        if outcome == PvqOutcome::Verified {
            self.arm(active_secs);
        }
        Ok(outcome)
    }

    /// Dismisses a verified challenge.
    ///
    /// # Errors
    ///
    /// Returns `ChallengePending` while the question is still unanswered.
    pub fn close_modal(&mut self) -> Result<(), IdentityError> {
        match &self.pending {
            Some(p) if p.resolved != Some(PvqOutcome::Verified) => {
                Err(IdentityError::ChallengePending)
            }
            _ => {
                self.pending = None;
                Ok(())
            }
        }
    }

    pub fn reset(&mut self) {
        self.pending = None;
        self.arm(0);
    }
}
