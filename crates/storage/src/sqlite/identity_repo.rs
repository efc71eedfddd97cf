use compliance_core::model::{
    IdentityChallengeAttempt, PvqLockout, SecurityAnswer, SessionId, UserId,
};

use super::SqliteRepository;
use super::mapping::{conn, map_answer_row, map_attempt_row, map_lockout_row};
use crate::repository::{IdentityRepository, StorageError};

#[async_trait::async_trait]
impl IdentityRepository for SqliteRepository {
    async fn append_attempt(&self, attempt: &IdentityChallengeAttempt) -> Result<(), StorageError> {
        sqlx::query(
            r"
                INSERT INTO identity_attempts (
                    session_id, user_id, question_id, answer, is_correct,
                    time_to_answer_seconds, attempt_number, recorded_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
        )
        .bind(attempt.session_id.as_str())
        .bind(attempt.user_id.as_str())
        .bind(attempt.question_id.as_str())
        .bind(&attempt.answer)
        .bind(attempt.is_correct)
        .bind(i64::from(attempt.time_to_answer_seconds))
        .bind(i64::from(attempt.attempt_number))
        .bind(attempt.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    async fn list_attempts(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<IdentityChallengeAttempt>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT
                    session_id, user_id, question_id, answer, is_correct,
                    time_to_answer_seconds, attempt_number, recorded_at
                FROM identity_attempts
                WHERE session_id = ?1
                ORDER BY id ASC
            ",
        )
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;
        rows.iter().map(map_attempt_row).collect()
    }

    async fn upsert_security_answer(&self, answer: &SecurityAnswer) -> Result<(), StorageError> {
        sqlx::query(
            r"
                INSERT INTO security_answers (
                    user_id, question_id, prompt, normalized_answer, enrolled_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(user_id, question_id) DO UPDATE SET
                    prompt = excluded.prompt,
                    normalized_answer = excluded.normalized_answer,
                    enrolled_at = excluded.enrolled_at
            ",
        )
        .bind(answer.user_id.as_str())
        .bind(answer.question.id.as_str())
        .bind(&answer.question.prompt)
        .bind(&answer.normalized_answer)
        .bind(answer.enrolled_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    async fn list_security_answers(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SecurityAnswer>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT user_id, question_id, prompt, normalized_answer, enrolled_at
                FROM security_answers
                WHERE user_id = ?1
                ORDER BY question_id ASC
            ",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;
        rows.iter().map(map_answer_row).collect()
    }

    async fn get_lockout(&self, user_id: &UserId) -> Result<Option<PvqLockout>, StorageError> {
        let row = sqlx::query(
            r"
                SELECT user_id, locked_at, locked_until, failed_attempts
                FROM pvq_lockouts
                WHERE user_id = ?1
            ",
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;
        row.as_ref().map(map_lockout_row).transpose()
    }

    async fn put_lockout(&self, lockout: &PvqLockout) -> Result<(), StorageError> {
        sqlx::query(
            r"
                INSERT INTO pvq_lockouts (user_id, locked_at, locked_until, failed_attempts)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(user_id) DO UPDATE SET
                    locked_at = excluded.locked_at,
                    locked_until = excluded.locked_until,
                    failed_attempts = excluded.failed_attempts
            ",
        )
        .bind(lockout.user_id.as_str())
        .bind(lockout.locked_at)
        .bind(lockout.locked_until)
        .bind(i64::from(lockout.failed_attempts))
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }
}
