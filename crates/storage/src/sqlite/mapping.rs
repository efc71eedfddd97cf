use chrono::{DateTime, Utc};
use compliance_core::model::{
    Break, CompletionEvent, CourseId, DailyActivityLog, IdentityChallengeAttempt, LessonId,
    PvqLockout, PvqQuestion, QuestionId, SecurityAnswer, Session, SessionId, SessionStatus,
    UserId, VideoProgress,
};
use serde_json::{Map, Value};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn u64_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn i64_to_u32(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(ser)
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(ser)
}

/// Session columns plus aggregated side tables, shared by every session read.
pub(crate) const SESSION_SELECT: &str = r"
    SELECT
        s.session_id, s.user_id, s.course_id, s.lesson_id, s.status,
        s.start_timestamp, s.last_heartbeat_timestamp, s.last_updated,
        s.end_timestamp, s.duration_seconds, s.closure_type, s.auto_closed,
        s.breaks, s.video_progress, s.progress, s.meta,
        (
            SELECT json_group_array(l.lesson_id)
            FROM (SELECT lesson_id FROM session_lessons
                  WHERE session_id = s.session_id ORDER BY lesson_id) AS l
        ) AS lessons_json,
        (
            SELECT json_group_array(json(e.event))
            FROM (SELECT event FROM session_events
                  WHERE session_id = s.session_id ORDER BY id) AS e
        ) AS events_json
    FROM sessions s
";

pub(crate) fn map_session_row(row: &SqliteRow) -> Result<Session, StorageError> {
    let status: String = row.try_get("status").map_err(ser)?;
    let closure: Option<String> = row.try_get("closure_type").map_err(ser)?;
    let lesson_id: Option<String> = row.try_get("lesson_id").map_err(ser)?;
    let duration: Option<i64> = row.try_get("duration_seconds").map_err(ser)?;
    let video: Option<String> = row.try_get("video_progress").map_err(ser)?;

    let lessons: Vec<LessonId> = from_json(&row.try_get::<String, _>("lessons_json").map_err(ser)?)?;
    let events: Vec<CompletionEvent> =
        from_json(&row.try_get::<String, _>("events_json").map_err(ser)?)?;
    let breaks: Vec<Break> = from_json(&row.try_get::<String, _>("breaks").map_err(ser)?)?;
    let progress: Map<String, Value> =
        from_json(&row.try_get::<String, _>("progress").map_err(ser)?)?;
    let meta: Map<String, Value> = from_json(&row.try_get::<String, _>("meta").map_err(ser)?)?;

    Ok(Session {
        session_id: SessionId::new(row.try_get::<String, _>("session_id").map_err(ser)?)
            .map_err(ser)?,
        user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(ser)?).map_err(ser)?,
        course_id: CourseId::new(row.try_get::<String, _>("course_id").map_err(ser)?)
            .map_err(ser)?,
        lesson_id: lesson_id.map(LessonId::new).transpose().map_err(ser)?,
        status: status.parse::<SessionStatus>().map_err(ser)?,
        start_timestamp: row.try_get("start_timestamp").map_err(ser)?,
        last_heartbeat_timestamp: row.try_get("last_heartbeat_timestamp").map_err(ser)?,
        last_updated: row.try_get("last_updated").map_err(ser)?,
        end_timestamp: row.try_get("end_timestamp").map_err(ser)?,
        duration_seconds: duration
            .map(|v| i64_to_u64("duration_seconds", v))
            .transpose()?,
        closure_type: closure.map(|c| c.parse()).transpose().map_err(ser)?,
        auto_closed: row.try_get("auto_closed").map_err(ser)?,
        breaks,
        completion_events: events,
        lessons_accessed: lessons.into_iter().collect(),
        video_progress: video
            .map(|raw| from_json::<VideoProgress>(&raw))
            .transpose()?,
        progress,
        meta,
    })
}

pub(crate) fn map_daily_log_row(row: &SqliteRow) -> Result<DailyActivityLog, StorageError> {
    let date_key: String = row.try_get("date_key").map_err(ser)?;
    Ok(DailyActivityLog {
        user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(ser)?).map_err(ser)?,
        date_key: date_key.parse().map_err(ser)?,
        minutes_completed: i64_to_u32(
            "minutes_completed",
            row.try_get("minutes_completed").map_err(ser)?,
        )?,
        sessions_started: i64_to_u32(
            "sessions_started",
            row.try_get("sessions_started").map_err(ser)?,
        )?,
        sessions_ended: i64_to_u32("sessions_ended", row.try_get("sessions_ended").map_err(ser)?)?,
        identity_challenges_completed: i64_to_u32(
            "identity_challenges_completed",
            row.try_get("identity_challenges_completed").map_err(ser)?,
        )?,
        last_credited_at: row.try_get("last_credited_at").map_err(ser)?,
        updated_at: row.try_get("updated_at").map_err(ser)?,
    })
}

pub(crate) fn map_attempt_row(row: &SqliteRow) -> Result<IdentityChallengeAttempt, StorageError> {
    Ok(IdentityChallengeAttempt {
        session_id: SessionId::new(row.try_get::<String, _>("session_id").map_err(ser)?)
            .map_err(ser)?,
        user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(ser)?).map_err(ser)?,
        question_id: QuestionId::new(row.try_get::<String, _>("question_id").map_err(ser)?)
            .map_err(ser)?,
        answer: row.try_get("answer").map_err(ser)?,
        is_correct: row.try_get("is_correct").map_err(ser)?,
        time_to_answer_seconds: i64_to_u32(
            "time_to_answer_seconds",
            row.try_get("time_to_answer_seconds").map_err(ser)?,
        )?,
        attempt_number: i64_to_u32("attempt_number", row.try_get("attempt_number").map_err(ser)?)?,
        recorded_at: row.try_get("recorded_at").map_err(ser)?,
    })
}

pub(crate) fn map_answer_row(row: &SqliteRow) -> Result<SecurityAnswer, StorageError> {
    let enrolled_at: DateTime<Utc> = row.try_get("enrolled_at").map_err(ser)?;
    Ok(SecurityAnswer {
        user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(ser)?).map_err(ser)?,
        question: PvqQuestion {
            id: QuestionId::new(row.try_get::<String, _>("question_id").map_err(ser)?)
                .map_err(ser)?,
            prompt: row.try_get("prompt").map_err(ser)?,
        },
        normalized_answer: row.try_get("normalized_answer").map_err(ser)?,
        enrolled_at,
    })
}

pub(crate) fn map_lockout_row(row: &SqliteRow) -> Result<PvqLockout, StorageError> {
    Ok(PvqLockout {
        user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(ser)?).map_err(ser)?,
        locked_at: row.try_get("locked_at").map_err(ser)?,
        locked_until: row.try_get("locked_until").map_err(ser)?,
        failed_attempts: i64_to_u32(
            "failed_attempts",
            row.try_get("failed_attempts").map_err(ser)?,
        )?,
    })
}
