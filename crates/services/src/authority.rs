//! Collaborator contracts the client-side engine calls: the server time
//! authority, the answer verification authority and the unload beacon.
//!
//! Each has an in-process implementation that wraps the server-side services
//! directly and an HTTP implementation in [`crate::http_authority`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use compliance_core::model::{
    ClosureType, CloseSummary, CourseId, QuestionId, SessionId, UserId,
};
use compliance_core::time::DateKey;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::compliance::{ComplianceSessionService, ServerTimeAuthority};
use crate::error::{AuthorityError, ComplianceError, IdentityError};
use crate::identity::IdentityVerificationAuthority;

//
// ─── WIRE TYPES ────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "continue")]
    Continue,
    #[serde(rename = "DAILY_LIMIT_REACHED")]
    DailyLimitReached,
    #[serde(rename = "SESSION_IDLE_TIMEOUT")]
    SessionIdleTimeout,
}

impl Verdict {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Continue)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub verdict: Verdict,
    pub minutes_completed: u32,
    pub remaining_minutes: u32,
    pub date_key: DateKey,
    pub is_new_day: bool,
    pub server_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub question_id: QuestionId,
    pub answer: String,
    pub time_to_answer_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResponse {
    pub verified: bool,
    pub attempt_number: u32,
    pub attempts_remaining: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

/// One-way close signal sent while the page is going away. Duration is advisory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnloadBeaconPayload {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub closure_type: ClosureType,
    pub duration: u64,
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

#[async_trait]
pub trait TimeAuthority: Send + Sync {
    /// # Errors
    ///
    /// Returns `AuthorityError` for transport failures or refusals. Terminal
    /// verdicts are successful responses.
    async fn heartbeat(&self, request: &HeartbeatRequest)
    -> Result<HeartbeatResponse, AuthorityError>;
}

#[async_trait]
pub trait AnswerVerifier: Send + Sync {
    /// # Errors
    ///
    /// Returns `AuthorityError` for transport failures or refusals.
    async fn verify(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationResponse, AuthorityError>;
}

/// Fire-and-forget delivery. Implementations must not block the caller.
pub trait UnloadBeacon: Send + Sync {
    fn send(&self, payload: UnloadBeaconPayload);
}

//
// ─── IN-PROCESS ────────────────────────────────────────────────────────────────
//

fn refused(code: &str, message: String) -> AuthorityError {
    AuthorityError::Refused {
        code: code.to_owned(),
        message,
    }
}

impl From<ComplianceError> for AuthorityError {
    fn from(err: ComplianceError) -> Self {
        refused(err.code(), err.to_string())
    }
}

impl From<IdentityError> for AuthorityError {
    fn from(err: IdentityError) -> Self {
        refused(err.code(), err.to_string())
    }
}

/// Calls the server time authority in the same process.
#[derive(Clone)]
pub struct InProcessTimeAuthority {
    authority: Arc<ServerTimeAuthority>,
}

impl InProcessTimeAuthority {
    #[must_use]
    pub fn new(authority: Arc<ServerTimeAuthority>) -> Self {
        Self { authority }
    }
}

#[async_trait]
impl TimeAuthority for InProcessTimeAuthority {
    async fn heartbeat(
        &self,
        request: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, AuthorityError> {
        Ok(self.authority.heartbeat(request).await?)
    }
}

/// Calls the identity verification authority in the same process.
#[derive(Clone)]
pub struct InProcessVerifier {
    authority: Arc<IdentityVerificationAuthority>,
}

impl InProcessVerifier {
    #[must_use]
    pub fn new(authority: Arc<IdentityVerificationAuthority>) -> Self {
        Self { authority }
    }
}

#[async_trait]
impl AnswerVerifier for InProcessVerifier {
    async fn verify(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationResponse, AuthorityError> {
        Ok(self.authority.verify(request).await?)
    }
}

/// Closes the session through the session service on a detached task.
#[derive(Clone)]
pub struct InProcessBeacon {
    sessions: Arc<ComplianceSessionService>,
}

impl InProcessBeacon {
    #[must_use]
    pub fn new(sessions: Arc<ComplianceSessionService>) -> Self {
        Self { sessions }
    }
}

impl UnloadBeacon for InProcessBeacon {
    fn send(&self, payload: UnloadBeaconPayload) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(session_id = %payload.session_id, "no runtime available for unload beacon");
            return;
        };
        if payload.closure_type != ClosureType::PageUnload {
            warn!(
                session_id = %payload.session_id,
                closure_type = payload.closure_type.as_str(),
                "unload beacon closure type replaced with page_unload"
            );
        }
        let sessions = Arc::clone(&self.sessions);
        runtime.spawn(async move {
            let summary = CloseSummary::page_unload();
            debug!(
                session_id = %payload.session_id,
                advisory_duration = payload.duration,
                "delivering unload beacon"
            );
            sessions
                .close_best_effort(&payload.user_id, &payload.session_id, summary)
                .await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verdicts_use_wire_names() {
        assert_eq!(
            serde_json::to_value(Verdict::DailyLimitReached).unwrap(),
            json!("DAILY_LIMIT_REACHED")
        );
        assert_eq!(serde_json::to_value(Verdict::Continue).unwrap(), json!("continue"));
        assert!(Verdict::SessionIdleTimeout.is_terminal());
    }

    #[test]
    fn compliance_refusals_keep_their_code() {
        let err: AuthorityError = ComplianceError::PermissionDenied.into();
        assert!(matches!(
            &err,
            AuthorityError::Refused { code, .. } if code == "PERMISSION_DENIED"
        ));
    }

    #[tokio::test]
    async fn beacon_always_closes_as_page_unload() {
        use compliance_core::model::{SessionMeta, SessionStatus};
        use compliance_core::time::{ManualClock, fixed_now};
        use compliance_core::{Clock, CompliancePolicy};
        use storage::repository::Storage;

        let clock = ManualClock::new(fixed_now());
        let storage = Storage::in_memory();
        let sessions = Arc::new(ComplianceSessionService::new(
            Clock::manual(&clock),
            CompliancePolicy::default(),
            Arc::clone(&storage.sessions),
            Arc::clone(&storage.daily_logs),
        ));
        let user = UserId::new("user-1").unwrap();
        let id = sessions
            .create(&user, &CourseId::new("course-1").unwrap(), SessionMeta::default())
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(45));

        InProcessBeacon::new(Arc::clone(&sessions)).send(UnloadBeaconPayload {
            user_id: user.clone(),
            session_id: id.clone(),
            closure_type: ClosureType::OrphanedAutoClose,
            duration: 9_999,
        });
        let mut stored = sessions.get(&user, &id).await.unwrap();
        for _ in 0..100 {
            if stored.status != SessionStatus::Active {
                break;
            }
            tokio::task::yield_now().await;
            stored = sessions.get(&user, &id).await.unwrap();
        }
        assert_eq!(stored.status, SessionStatus::Unloaded);
        assert_eq!(stored.closure_type, Some(ClosureType::PageUnload));
        assert_eq!(stored.duration_seconds, Some(45));
        assert!(!stored.auto_closed);
    }
}
