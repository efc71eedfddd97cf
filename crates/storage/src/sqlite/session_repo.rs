use compliance_core::model::{Session, SessionId, SessionStatus, SessionUpdate};
use serde_json::Value;

use super::SqliteRepository;
use super::mapping::{SESSION_SELECT, conn, map_session_row, ser, to_json, u64_to_i64};
use crate::repository::{SessionQuery, SessionRepository, StorageError};

#[async_trait::async_trait]
impl SessionRepository for SqliteRepository {
    async fn create_session(&self, session: &Session) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let res = sqlx::query(
            r"
                INSERT INTO sessions (
                    session_id, user_id, course_id, lesson_id, status,
                    start_timestamp, last_heartbeat_timestamp, last_updated,
                    end_timestamp, duration_seconds, closure_type, auto_closed,
                    breaks, video_progress, progress, meta
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                ON CONFLICT(session_id) DO NOTHING
            ",
        )
        .bind(session.session_id.as_str())
        .bind(session.user_id.as_str())
        .bind(session.course_id.as_str())
        .bind(session.lesson_id.as_ref().map(|l| l.as_str().to_owned()))
        .bind(session.status.as_str())
        .bind(session.start_timestamp)
        .bind(session.last_heartbeat_timestamp)
        .bind(session.last_updated)
        .bind(session.end_timestamp)
        .bind(
            session
                .duration_seconds
                .map(|d| u64_to_i64("duration_seconds", d))
                .transpose()?,
        )
        .bind(session.closure_type.map(|c| c.as_str()))
        .bind(session.auto_closed)
        .bind(to_json(&session.breaks)?)
        .bind(session.video_progress.as_ref().map(to_json).transpose()?)
        .bind(to_json(&session.progress)?)
        .bind(to_json(&session.meta)?)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        for lesson in &session.lessons_accessed {
            sqlx::query("INSERT OR IGNORE INTO session_lessons (session_id, lesson_id) VALUES (?1, ?2)")
                .bind(session.session_id.as_str())
                .bind(lesson.as_str())
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
        }
        for event in &session.completion_events {
            sqlx::query("INSERT INTO session_events (session_id, event) VALUES (?1, ?2)")
                .bind(session.session_id.as_str())
                .bind(to_json(event)?)
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, StorageError> {
        let sql = format!("{SESSION_SELECT} WHERE s.session_id = ?1");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;
        row.as_ref().map(map_session_row).transpose()
    }

    async fn update_session(
        &self,
        id: &SessionId,
        update: &SessionUpdate,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        // Scalar fields only overwrite when supplied; progress is a JSON merge patch.
        // ?12 is the JSON array of statuses the row must be in, or NULL.
        let res = sqlx::query(
            r"
                UPDATE sessions SET
                    status = COALESCE(?2, status),
                    last_heartbeat_timestamp = COALESCE(?3, last_heartbeat_timestamp),
                    last_updated = COALESCE(?4, last_updated),
                    end_timestamp = COALESCE(?5, end_timestamp),
                    duration_seconds = COALESCE(?6, duration_seconds),
                    closure_type = COALESCE(?7, closure_type),
                    auto_closed = COALESCE(?8, auto_closed),
                    video_progress = COALESCE(?9, video_progress),
                    breaks = COALESCE(?10, breaks),
                    progress = json_patch(progress, ?11)
                WHERE session_id = ?1
                  AND (?12 IS NULL OR status IN (SELECT value FROM json_each(?12)))
            ",
        )
        .bind(id.as_str())
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.last_heartbeat_timestamp)
        .bind(update.last_updated)
        .bind(update.end_timestamp)
        .bind(
            update
                .duration_seconds
                .map(|d| u64_to_i64("duration_seconds", d))
                .transpose()?,
        )
        .bind(update.closure_type.map(|c| c.as_str()))
        .bind(update.auto_closed)
        .bind(update.video_progress.as_ref().map(to_json).transpose()?)
        .bind(update.breaks.as_ref().map(to_json).transpose()?)
        .bind(to_json(&Value::Object(update.progress.clone()))?)
        .bind(
            (!update.expected_status.is_empty())
                .then(|| to_json(&update.expected_status))
                .transpose()?,
        )
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        if res.rows_affected() == 0 {
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM sessions WHERE session_id = ?1")
                    .bind(id.as_str())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(conn)?;
            return Err(match current {
                None => StorageError::NotFound,
                Some(raw) => StorageError::StatusMismatch {
                    actual: raw.parse::<SessionStatus>().map_err(ser)?,
                },
            });
        }

        for lesson in &update.lessons_accessed {
            sqlx::query("INSERT OR IGNORE INTO session_lessons (session_id, lesson_id) VALUES (?1, ?2)")
                .bind(id.as_str())
                .bind(lesson.as_str())
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
        }
        for event in &update.completion_events {
            sqlx::query("INSERT INTO session_events (session_id, event) VALUES (?1, ?2)")
                .bind(id.as_str())
                .bind(to_json(event)?)
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn query_sessions(&self, query: &SessionQuery) -> Result<Vec<Session>, StorageError> {
        let sql = format!(
            r"{SESSION_SELECT}
                WHERE s.user_id = ?1
                  AND s.course_id = ?2
                  AND (?3 IS NULL OR s.status = ?3)
                  AND (?4 IS NULL OR julianday(s.start_timestamp) >= julianday(?4))
                  AND (?5 IS NULL OR julianday(s.start_timestamp) < julianday(?5))
                  AND (?6 IS NULL OR julianday(s.last_heartbeat_timestamp) < julianday(?6))
                ORDER BY julianday(s.start_timestamp) DESC, s.session_id DESC
                LIMIT ?7
            "
        );
        let limit = query.limit.map_or(-1_i64, i64::from);

        let rows = sqlx::query(&sql)
            .bind(query.user_id.as_str())
            .bind(query.course_id.as_str())
            .bind(query.status.map(|s| s.as_str()))
            .bind(query.started_from)
            .bind(query.started_until)
            .bind(query.heartbeat_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;

        rows.iter().map(map_session_row).collect()
    }
}
