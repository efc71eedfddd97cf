use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs versioned migrations for the compliance schema.
///
/// Version 1 creates sessions (with lesson and completion-event side tables),
/// daily activity logs, the identity audit trail, enrolled answers and lockouts.
#[allow(clippy::too_many_lines)]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: full schema.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS sessions (
                    session_id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    course_id TEXT NOT NULL,
                    lesson_id TEXT,
                    status TEXT NOT NULL CHECK (
                        status IN ('active', 'on_break', 'timeout', 'completed', 'unloaded')
                    ),
                    start_timestamp TEXT NOT NULL,
                    last_heartbeat_timestamp TEXT NOT NULL,
                    last_updated TEXT NOT NULL,
                    end_timestamp TEXT,
                    duration_seconds INTEGER CHECK (duration_seconds >= 0),
                    closure_type TEXT,
                    auto_closed INTEGER NOT NULL DEFAULT 0,
                    breaks TEXT NOT NULL DEFAULT '[]',
                    video_progress TEXT,
                    progress TEXT NOT NULL DEFAULT '{}',
                    meta TEXT NOT NULL DEFAULT '{}'
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS session_lessons (
                    session_id TEXT NOT NULL,
                    lesson_id TEXT NOT NULL,
                    PRIMARY KEY (session_id, lesson_id),
                    FOREIGN KEY (session_id) REFERENCES sessions(session_id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS session_events (
                    id INTEGER PRIMARY KEY,
                    session_id TEXT NOT NULL,
                    event TEXT NOT NULL,
                    FOREIGN KEY (session_id) REFERENCES sessions(session_id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS daily_activity_logs (
                    user_id TEXT NOT NULL,
                    date_key TEXT NOT NULL,
                    minutes_completed INTEGER NOT NULL DEFAULT 0 CHECK (minutes_completed >= 0),
                    sessions_started INTEGER NOT NULL DEFAULT 0 CHECK (sessions_started >= 0),
                    sessions_ended INTEGER NOT NULL DEFAULT 0 CHECK (sessions_ended >= 0),
                    identity_challenges_completed INTEGER NOT NULL DEFAULT 0
                        CHECK (identity_challenges_completed >= 0),
                    last_credited_at TEXT,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, date_key)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS identity_attempts (
                    id INTEGER PRIMARY KEY,
                    session_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    question_id TEXT NOT NULL,
                    answer TEXT NOT NULL,
                    is_correct INTEGER NOT NULL CHECK (is_correct IN (0, 1)),
                    time_to_answer_seconds INTEGER NOT NULL CHECK (time_to_answer_seconds >= 0),
                    attempt_number INTEGER NOT NULL CHECK (attempt_number >= 1),
                    recorded_at TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        // Audit trail: attempts can be appended but never changed.
        sqlx::query(
            r"
                CREATE TRIGGER IF NOT EXISTS identity_attempts_no_update
                BEFORE UPDATE ON identity_attempts
                BEGIN
                    SELECT RAISE(ABORT, 'identity attempts are immutable');
                END;
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TRIGGER IF NOT EXISTS identity_attempts_no_delete
                BEFORE DELETE ON identity_attempts
                BEGIN
                    SELECT RAISE(ABORT, 'identity attempts are immutable');
                END;
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS security_answers (
                    user_id TEXT NOT NULL,
                    question_id TEXT NOT NULL,
                    prompt TEXT NOT NULL,
                    normalized_answer TEXT NOT NULL,
                    enrolled_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, question_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS pvq_lockouts (
                    user_id TEXT PRIMARY KEY,
                    locked_at TEXT NOT NULL,
                    locked_until TEXT NOT NULL,
                    failed_attempts INTEGER NOT NULL CHECK (failed_attempts >= 0)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_sessions_user_course_status
                    ON sessions(user_id, course_id, status, start_timestamp);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_identity_attempts_session
                    ON identity_attempts(session_id, id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)")
            .bind(1_i64)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(version = 1, "applied schema migration");
    }

    Ok(())
}
