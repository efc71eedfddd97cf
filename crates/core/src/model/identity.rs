use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::{QuestionId, SessionId, UserId};

pub const MAX_ANSWER_LENGTH: usize = 10_000;

/// A personal verification question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PvqQuestion {
    pub id: QuestionId,
    pub prompt: String,
}

const DEFAULT_POOL: [(&str, &str); 10] = [
    ("pvq_001", "What is your mother's maiden name?"),
    ("pvq_002", "In what city were you born?"),
    ("pvq_003", "What was the name of your first pet?"),
    ("pvq_004", "What is your favorite color?"),
    ("pvq_005", "In what year did you graduate high school?"),
    ("pvq_006", "What is the name of your elementary school?"),
    ("pvq_007", "Who is your favorite musician or band?"),
    ("pvq_008", "What is your favorite book or movie?"),
    ("pvq_009", "What is the street name of the street you grew up on?"),
    ("pvq_010", "In what state did you live as a child?"),
];

/// The fixed pool used when a user has not enrolled their own questions.
#[must_use]
pub fn default_question_pool() -> Vec<PvqQuestion> {
    DEFAULT_POOL
        .iter()
        .filter_map(|(id, prompt)| {
            QuestionId::new(*id).ok().map(|id| PvqQuestion {
                id,
                prompt: (*prompt).to_owned(),
            })
        })
        .collect()
}

/// Canonical comparison form of an answer: trimmed and lowercased.
///
/// # Errors
///
/// Returns `ValidationError` if the answer is blank or longer than
/// `MAX_ANSWER_LENGTH` characters.
pub fn normalize_answer(raw: &str) -> Result<String, ValidationError> {
    if raw.chars().count() > MAX_ANSWER_LENGTH {
        return Err(ValidationError::Invalid {
            field: "answer",
            reason: format!("longer than {MAX_ANSWER_LENGTH} characters"),
        });
    }
    let normalized = raw.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(ValidationError::Missing("answer"));
    }
    Ok(normalized)
}

/// Stored answer to one of the user's security questions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityAnswer {
    pub user_id: UserId,
    pub question: PvqQuestion,
    pub normalized_answer: String,
    pub enrolled_at: DateTime<Utc>,
}

/// Immutable audit record of one PVQ submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityChallengeAttempt {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub question_id: QuestionId,
    pub answer: String,
    pub is_correct: bool,
    pub time_to_answer_seconds: u32,
    pub attempt_number: u32,
    pub recorded_at: DateTime<Utc>,
}

/// Server-imposed PVQ lockout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PvqLockout {
    pub user_id: UserId,
    pub locked_at: DateTime<Utc>,
    pub locked_until: DateTime<Utc>,
    pub failed_attempts: u32,
}

impl PvqLockout {
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.locked_until
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    #[test]
    fn default_pool_has_ten_unique_questions() {
        let pool = default_question_pool();
        assert_eq!(pool.len(), 10);
        let mut ids: Vec<_> = pool.iter().map(|q| q.id.as_str().to_owned()).collect();
        ids.dedup();
        assert_eq!(ids.len(), 10);
        assert_eq!(pool[1].prompt, "In what city were you born?");
    }

    #[test]
    fn answers_are_trimmed_and_lowercased() {
        assert_eq!(normalize_answer("  Columbus \n").unwrap(), "columbus");
        assert_eq!(normalize_answer("   ").unwrap_err(), ValidationError::Missing("answer"));
        let long = "x".repeat(MAX_ANSWER_LENGTH + 1);
        assert!(normalize_answer(&long).is_err());
    }

    #[test]
    fn lockout_expires() {
        let lockout = PvqLockout {
            user_id: UserId::new("u").unwrap(),
            locked_at: fixed_now(),
            locked_until: fixed_now() + Duration::hours(24),
            failed_attempts: 2,
        };
        assert!(lockout.is_active(fixed_now() + Duration::hours(23)));
        assert!(!lockout.is_active(fixed_now() + Duration::hours(24)));
    }
}
