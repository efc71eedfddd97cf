use std::sync::Arc;

use compliance_core::model::{
    IdentityChallengeAttempt, PvqLockout, PvqQuestion, SecurityAnswer, UserId,
    default_question_pool, normalize_answer,
};
use compliance_core::time::DateKey;
use compliance_core::{Clock, CompliancePolicy};
use storage::repository::{DailyActivityRepository, DailyCounter, IdentityRepository};
use tracing::{info, warn};

use crate::authority::{VerificationRequest, VerificationResponse};
use crate::error::IdentityError;

/// Server-side checker for PVQ answers.
///
/// Every submission is appended to the audit trail, including the ones
/// refused during a lockout.
pub struct IdentityVerificationAuthority {
    clock: Clock,
    policy: CompliancePolicy,
    identity: Arc<dyn IdentityRepository>,
    daily_logs: Arc<dyn DailyActivityRepository>,
}

impl IdentityVerificationAuthority {
    #[must_use]
    pub fn new(
        clock: Clock,
        policy: CompliancePolicy,
        identity: Arc<dyn IdentityRepository>,
        daily_logs: Arc<dyn DailyActivityRepository>,
    ) -> Self {
        Self {
            clock,
            policy,
            identity,
            daily_logs,
        }
    }

    /// Stores the normalized answer for one question, replacing any earlier one.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Validation` for a blank or oversized answer.
    pub async fn enroll_security_answer(
        &self,
        user_id: &UserId,
        question: PvqQuestion,
        answer: &str,
    ) -> Result<SecurityAnswer, IdentityError> {
        let enrolled = SecurityAnswer {
            user_id: user_id.clone(),
            question,
            normalized_answer: normalize_answer(answer)?,
            enrolled_at: self.clock.now(),
        };
        self.identity.upsert_security_answer(&enrolled).await?;
        info!(user_id = %user_id, question_id = %enrolled.question.id, "security answer enrolled");
        Ok(enrolled)
    }

    /// The user's enrolled questions, or the default pool if they have none.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the answers cannot be listed.
    pub async fn questions_for(&self, user_id: &UserId) -> Result<Vec<PvqQuestion>, IdentityError> {
        let enrolled = self.identity.list_security_answers(user_id).await?;
        if enrolled.is_empty() {
            return Ok(default_question_pool());
        }
        Ok(enrolled.into_iter().map(|a| a.question).collect())
    }

    /// Checks one answer and records the attempt.
    ///
    /// A lockout is a successful response with `locked_until` set.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a blank or oversized answer, or a storage
    /// error. A question with no answer on file counts as an incorrect
    /// attempt.
    pub async fn verify(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationResponse, IdentityError> {
        let normalized = normalize_answer(&request.answer)?;
        let now = self.clock.now();
        let max = self.policy.pvq_max_incorrect_attempts;

        let history = self.identity.list_attempts(&request.session_id).await?;
        let attempt_number = history
            .iter()
            .filter(|a| a.question_id == request.question_id)
            .count()
            .saturating_add(1);
        let attempt_number = u32::try_from(attempt_number).unwrap_or(u32::MAX);

        let mut attempt = IdentityChallengeAttempt {
            session_id: request.session_id.clone(),
            user_id: request.user_id.clone(),
            question_id: request.question_id.clone(),
            answer: normalized.clone(),
            is_correct: false,
            time_to_answer_seconds: request.time_to_answer_seconds,
            attempt_number,
            recorded_at: now,
        };

        let lockout = self.identity.get_lockout(&request.user_id).await?;
        if let Some(lockout) = lockout.as_ref().filter(|l| l.is_active(now)) {
            self.identity.append_attempt(&attempt).await?;
            warn!(user_id = %request.user_id, until = %lockout.locked_until, "answer submitted during lockout");
            return Ok(VerificationResponse {
                verified: false,
                attempt_number,
                attempts_remaining: 0,
                locked_until: Some(lockout.locked_until),
            });
        }

        let expected = self
            .identity
            .list_security_answers(&request.user_id)
            .await?
            .into_iter()
            .find(|a| a.question.id == request.question_id);
        if expected.is_none() {
            warn!(
                user_id = %request.user_id,
                question_id = %request.question_id,
                "no answer on file, counted as incorrect"
            );
        }

        attempt.is_correct = expected.is_some_and(|a| a.normalized_answer == normalized);
        self.identity.append_attempt(&attempt).await?;

        if attempt.is_correct {
            let date_key = DateKey::for_instant(now, self.policy.timezone);
            if let Err(err) = self
                .daily_logs
                .increment_counter(
                    &request.user_id,
                    date_key,
                    DailyCounter::IdentityChallengesCompleted,
                    now,
                )
                .await
            {
                warn!(user_id = %request.user_id, error = %err, "challenge counter not updated");
            }
            info!(session_id = %request.session_id, attempt_number, "identity verified");
            return Ok(VerificationResponse {
                verified: true,
                attempt_number,
                attempts_remaining: max,
                locked_until: None,
            });
        }

        let counted_since = lockout.map(|l| l.locked_until);
        let consecutive = history
            .iter()
            .rev()
            .take_while(|a| !a.is_correct && counted_since.is_none_or(|t| a.recorded_at >= t))
            .count()
            .saturating_add(1);
        let consecutive = u32::try_from(consecutive).unwrap_or(u32::MAX);
        if consecutive >= max {
            let lockout = PvqLockout {
                user_id: request.user_id.clone(),
                locked_at: now,
                locked_until: now + self.policy.pvq_lockout,
                failed_attempts: consecutive,
            };
            self.identity.put_lockout(&lockout).await?;
            warn!(
                user_id = %request.user_id,
                failed_attempts = consecutive,
                until = %lockout.locked_until,
                "identity verification locked"
            );
            return Ok(VerificationResponse {
                verified: false,
                attempt_number,
                attempts_remaining: 0,
                locked_until: Some(lockout.locked_until),
            });
        }

        Ok(VerificationResponse {
            verified: false,
            attempt_number,
            attempts_remaining: max - consecutive,
            locked_until: None,
        })
    }
}
