use chrono::{DateTime, Utc};
use compliance_core::model::{Accrual, DailyActivityLog, UserId};
use compliance_core::time::DateKey;
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, map_daily_log_row, ser};
use crate::repository::{DailyActivityRepository, DailyCounter, StorageError};

const DAILY_LOG_COLUMNS: &str = r"
    user_id, date_key, minutes_completed, sessions_started, sessions_ended,
    identity_challenges_completed, last_credited_at, updated_at
";

#[async_trait::async_trait]
impl DailyActivityRepository for SqliteRepository {
    async fn accrue_minute(
        &self,
        user_id: &UserId,
        date_key: DateKey,
        ceiling: u32,
        now: DateTime<Utc>,
        min_spacing_secs: i64,
    ) -> Result<Accrual, StorageError> {
        let key = date_key.to_string();

        // Single statement: the ceiling and spacing checks happen inside the
        // write, so concurrent heartbeats cannot overshoot.
        let credited = sqlx::query(
            r"
                INSERT INTO daily_activity_logs (
                    user_id, date_key, minutes_completed, last_credited_at, updated_at
                )
                VALUES (?1, ?2, 1, ?3, ?3)
                ON CONFLICT(user_id, date_key) DO UPDATE SET
                    minutes_completed = daily_activity_logs.minutes_completed + 1,
                    last_credited_at = excluded.last_credited_at,
                    updated_at = excluded.updated_at
                WHERE daily_activity_logs.minutes_completed < ?4
                  AND (
                        daily_activity_logs.last_credited_at IS NULL
                        OR (julianday(excluded.last_credited_at)
                            - julianday(daily_activity_logs.last_credited_at)) * 86400.0 >= ?5
                  )
                RETURNING minutes_completed
            ",
        )
        .bind(user_id.as_str())
        .bind(&key)
        .bind(now)
        .bind(i64::from(ceiling))
        .bind(min_spacing_secs)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        if let Some(row) = credited {
            let minutes: i64 = row.try_get("minutes_completed").map_err(ser)?;
            let minutes_completed = u32::try_from(minutes)
                .map_err(|_| StorageError::Serialization(format!("invalid minutes: {minutes}")))?;
            return Ok(Accrual::Credited {
                minutes_completed,
                is_new_day: minutes_completed == 1,
            });
        }

        let log = self
            .get_daily_log(user_id, date_key)
            .await?
            .ok_or(StorageError::NotFound)?;
        if log.minutes_completed >= ceiling {
            Ok(Accrual::LimitReached {
                minutes_completed: log.minutes_completed,
            })
        } else {
            Ok(Accrual::TooSoon {
                minutes_completed: log.minutes_completed,
            })
        }
    }

    async fn get_daily_log(
        &self,
        user_id: &UserId,
        date_key: DateKey,
    ) -> Result<Option<DailyActivityLog>, StorageError> {
        let sql = format!(
            "SELECT {DAILY_LOG_COLUMNS} FROM daily_activity_logs WHERE user_id = ?1 AND date_key = ?2"
        );
        let row = sqlx::query(&sql)
            .bind(user_id.as_str())
            .bind(date_key.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;
        row.as_ref().map(map_daily_log_row).transpose()
    }

    async fn increment_counter(
        &self,
        user_id: &UserId,
        date_key: DateKey,
        counter: DailyCounter,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let column = match counter {
            DailyCounter::SessionsStarted => "sessions_started",
            DailyCounter::SessionsEnded => "sessions_ended",
            DailyCounter::IdentityChallengesCompleted => "identity_challenges_completed",
        };
        let sql = format!(
            r"
                INSERT INTO daily_activity_logs (user_id, date_key, {column}, updated_at)
                VALUES (?1, ?2, 1, ?3)
                ON CONFLICT(user_id, date_key) DO UPDATE SET
                    {column} = daily_activity_logs.{column} + 1,
                    updated_at = excluded.updated_at
            "
        );
        sqlx::query(&sql)
            .bind(user_id.as_str())
            .bind(date_key.to_string())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(())
    }
}
