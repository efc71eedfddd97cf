use async_trait::async_trait;
use chrono::{DateTime, Utc};
use compliance_core::model::{
    Accrual, CourseId, DailyActivityLog, IdentityChallengeAttempt, PvqLockout, QuestionId,
    SecurityAnswer, Session, SessionId, SessionStatus, SessionUpdate, UserId,
};
use compliance_core::time::DateKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    /// A conditional session write found the session in another status.
    #[error("session is {actual}")]
    StatusMismatch { actual: SessionStatus },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Machine-readable code understood by the retry classifier.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "ALREADY_EXISTS",
            Self::StatusMismatch { .. } => "FAILED_PRECONDITION",
            Self::Connection(_) => "UNAVAILABLE",
            Self::Serialization(_) => "DATA_LOSS",
        }
    }
}

//
// ─── QUERIES ───────────────────────────────────────────────────────────────────
//

/// Filter over one user's sessions in one course, returned newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionQuery {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub status: Option<SessionStatus>,
    pub started_from: Option<DateTime<Utc>>,
    pub started_until: Option<DateTime<Utc>>,
    /// Only sessions whose last heartbeat is strictly older than this instant.
    pub heartbeat_before: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl SessionQuery {
    #[must_use]
    pub fn for_course(user_id: UserId, course_id: CourseId) -> Self {
        Self {
            user_id,
            course_id,
            status: None,
            started_from: None,
            started_until: None,
            heartbeat_before: None,
            limit: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn started_within(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.started_from = Some(from);
        self.started_until = Some(until);
        self
    }

    #[must_use]
    pub fn heartbeat_before(mut self, at: DateTime<Utc>) -> Self {
        self.heartbeat_before = Some(at);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn matches(&self, session: &Session) -> bool {
        session.user_id == self.user_id
            && session.course_id == self.course_id
            && self.status.is_none_or(|s| session.status == s)
            && self
                .started_from
                .is_none_or(|from| session.start_timestamp >= from)
            && self
                .started_until
                .is_none_or(|until| session.start_timestamp < until)
            && self
                .heartbeat_before
                .is_none_or(|at| session.last_heartbeat_timestamp < at)
    }
}

/// Per-day counters other than credited minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyCounter {
    SessionsStarted,
    SessionsEnded,
    IdentityChallengesCompleted,
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

/// Document-store contract for session records.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a new session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the id already exists.
    async fn create_session(&self, session: &Session) -> Result<(), StorageError>;

    /// Fetch a session by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, StorageError>;

    /// Merge `update` into the stored session at field level.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the session is missing.
    async fn update_session(&self, id: &SessionId, update: &SessionUpdate)
    -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn query_sessions(&self, query: &SessionQuery) -> Result<Vec<Session>, StorageError>;
}

/// Daily accrual owned by the server time authority.
#[async_trait]
pub trait DailyActivityRepository: Send + Sync {
    /// Atomically credit one minute, bounded by `ceiling` and spaced by
    /// `min_spacing_secs` of server time.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn accrue_minute(
        &self,
        user_id: &UserId,
        date_key: DateKey,
        ceiling: u32,
        now: DateTime<Utc>,
        min_spacing_secs: i64,
    ) -> Result<Accrual, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_daily_log(
        &self,
        user_id: &UserId,
        date_key: DateKey,
    ) -> Result<Option<DailyActivityLog>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn increment_counter(
        &self,
        user_id: &UserId,
        date_key: DateKey,
        counter: DailyCounter,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError>;
}

/// Append-only PVQ audit trail plus enrolled answers and lockouts.
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn append_attempt(&self, attempt: &IdentityChallengeAttempt) -> Result<(), StorageError>;

    /// Attempts for a session in submission order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_attempts(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<IdentityChallengeAttempt>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn upsert_security_answer(&self, answer: &SecurityAnswer) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_security_answers(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SecurityAnswer>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_lockout(&self, user_id: &UserId) -> Result<Option<PvqLockout>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn put_lockout(&self, lockout: &PvqLockout) -> Result<(), StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    sessions: Arc<Mutex<HashMap<SessionId, Session>>>,
    daily_logs: Arc<Mutex<HashMap<(UserId, DateKey), DailyActivityLog>>>,
    attempts: Arc<Mutex<Vec<IdentityChallengeAttempt>>>,
    answers: Arc<Mutex<HashMap<(UserId, QuestionId), SecurityAnswer>>>,
    lockouts: Arc<Mutex<HashMap<UserId, PvqLockout>>>,
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> StorageError {
    StorageError::Connection(e.to_string())
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemoryRepository {
    async fn create_session(&self, session: &Session) -> Result<(), StorageError> {
        let mut guard = self.sessions.lock().map_err(poisoned)?;
        if guard.contains_key(&session.session_id) {
            return Err(StorageError::Conflict);
        }
        guard.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, StorageError> {
        let guard = self.sessions.lock().map_err(poisoned)?;
        Ok(guard.get(id).cloned())
    }

    async fn update_session(
        &self,
        id: &SessionId,
        update: &SessionUpdate,
    ) -> Result<(), StorageError> {
        let mut guard = self.sessions.lock().map_err(poisoned)?;
        let session = guard.get_mut(id).ok_or(StorageError::NotFound)?;
        if !update.permits(session.status) {
            return Err(StorageError::StatusMismatch {
                actual: session.status,
            });
        }
        session.apply(update);
        Ok(())
    }

    async fn query_sessions(&self, query: &SessionQuery) -> Result<Vec<Session>, StorageError> {
        let guard = self.sessions.lock().map_err(poisoned)?;
        let mut found: Vec<Session> = guard
            .values()
            .filter(|s| query.matches(s))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.start_timestamp
                .cmp(&a.start_timestamp)
                .then_with(|| b.session_id.cmp(&a.session_id))
        });
        if let Some(limit) = query.limit {
            found.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        Ok(found)
    }
}

#[async_trait]
impl DailyActivityRepository for InMemoryRepository {
    async fn accrue_minute(
        &self,
        user_id: &UserId,
        date_key: DateKey,
        ceiling: u32,
        now: DateTime<Utc>,
        min_spacing_secs: i64,
    ) -> Result<Accrual, StorageError> {
        let mut guard = self.daily_logs.lock().map_err(poisoned)?;
        let log = guard
            .entry((user_id.clone(), date_key))
            .or_insert_with(|| DailyActivityLog::empty(user_id.clone(), date_key, now));
        Ok(log.accrue(ceiling, now, min_spacing_secs))
    }

    async fn get_daily_log(
        &self,
        user_id: &UserId,
        date_key: DateKey,
    ) -> Result<Option<DailyActivityLog>, StorageError> {
        let guard = self.daily_logs.lock().map_err(poisoned)?;
        Ok(guard.get(&(user_id.clone(), date_key)).cloned())
    }

    async fn increment_counter(
        &self,
        user_id: &UserId,
        date_key: DateKey,
        counter: DailyCounter,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut guard = self.daily_logs.lock().map_err(poisoned)?;
        let log = guard
            .entry((user_id.clone(), date_key))
            .or_insert_with(|| DailyActivityLog::empty(user_id.clone(), date_key, now));
        let slot = match counter {
            DailyCounter::SessionsStarted => &mut log.sessions_started,
            DailyCounter::SessionsEnded => &mut log.sessions_ended,
            DailyCounter::IdentityChallengesCompleted => &mut log.identity_challenges_completed,
        };
        *slot = slot.saturating_add(1);
        log.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl IdentityRepository for InMemoryRepository {
    async fn append_attempt(&self, attempt: &IdentityChallengeAttempt) -> Result<(), StorageError> {
        let mut guard = self.attempts.lock().map_err(poisoned)?;
        guard.push(attempt.clone());
        Ok(())
    }

    async fn list_attempts(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<IdentityChallengeAttempt>, StorageError> {
        let guard = self.attempts.lock().map_err(poisoned)?;
        Ok(guard
            .iter()
            .filter(|a| &a.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn upsert_security_answer(&self, answer: &SecurityAnswer) -> Result<(), StorageError> {
        let mut guard = self.answers.lock().map_err(poisoned)?;
        guard.insert(
            (answer.user_id.clone(), answer.question.id.clone()),
            answer.clone(),
        );
        Ok(())
    }

    async fn list_security_answers(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SecurityAnswer>, StorageError> {
        let guard = self.answers.lock().map_err(poisoned)?;
        let mut found: Vec<SecurityAnswer> = guard
            .values()
            .filter(|a| &a.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.question.id.cmp(&b.question.id));
        Ok(found)
    }

    async fn get_lockout(&self, user_id: &UserId) -> Result<Option<PvqLockout>, StorageError> {
        let guard = self.lockouts.lock().map_err(poisoned)?;
        Ok(guard.get(user_id).cloned())
    }

    async fn put_lockout(&self, lockout: &PvqLockout) -> Result<(), StorageError> {
        let mut guard = self.lockouts.lock().map_err(poisoned)?;
        guard.insert(lockout.user_id.clone(), lockout.clone());
        Ok(())
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub sessions: Arc<dyn SessionRepository>,
    pub daily_logs: Arc<dyn DailyActivityRepository>,
    pub identity: Arc<dyn IdentityRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_repository(InMemoryRepository::new())
    }

    #[must_use]
    pub fn from_repository<R>(repo: R) -> Self
    where
        R: SessionRepository + DailyActivityRepository + IdentityRepository + Clone + 'static,
    {
        let sessions: Arc<dyn SessionRepository> = Arc::new(repo.clone());
        let daily_logs: Arc<dyn DailyActivityRepository> = Arc::new(repo.clone());
        let identity: Arc<dyn IdentityRepository> = Arc::new(repo);
        Self {
            sessions,
            daily_logs,
            identity,
        }
    }
}
