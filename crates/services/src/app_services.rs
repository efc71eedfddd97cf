use std::sync::Arc;

use compliance_core::CompliancePolicy;
use compliance_core::model::{CourseId, UserId};
use storage::repository::Storage;
use tracing::info;

use crate::Clock;
use crate::authority::{
    AnswerVerifier, InProcessBeacon, InProcessTimeAuthority, InProcessVerifier, TimeAuthority,
    UnloadBeacon,
};
use crate::compliance::{BreakManager, ComplianceSessionService, ServerTimeAuthority};
use crate::error::AppServicesError;
use crate::http_authority::HttpAuthorityClient;
use crate::identity::IdentityVerificationAuthority;
use crate::orchestrator::{OrchestratorDeps, SessionOrchestrator};

/// Assembles the compliance services over one storage backend.
///
/// Orchestrators talk to the in-process authorities unless a remote
/// authority endpoint was configured.
#[derive(Clone)]
pub struct AppServices {
    clock: Clock,
    policy: CompliancePolicy,
    sessions: Arc<ComplianceSessionService>,
    breaks: Arc<BreakManager>,
    time_authority: Arc<ServerTimeAuthority>,
    identity: Arc<IdentityVerificationAuthority>,
    remote: Option<HttpAuthorityClient>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the policy is inconsistent or storage
    /// initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        policy: CompliancePolicy,
    ) -> Result<Self, AppServicesError> {
        policy.validate()?;
        let storage = Storage::sqlite(db_url).await?;
        info!(db_url, "sqlite storage ready");
        Ok(Self::from_storage(&storage, clock, policy))
    }

    #[must_use]
    pub fn in_memory(clock: Clock, policy: CompliancePolicy) -> Self {
        Self::from_storage(&Storage::in_memory(), clock, policy)
    }

    #[must_use]
    pub fn from_storage(storage: &Storage, clock: Clock, policy: CompliancePolicy) -> Self {
        let sessions = Arc::new(ComplianceSessionService::new(
            clock.clone(),
            policy.clone(),
            Arc::clone(&storage.sessions),
            Arc::clone(&storage.daily_logs),
        ));
        let breaks = Arc::new(BreakManager::new(Arc::clone(&sessions)));
        let time_authority = Arc::new(ServerTimeAuthority::new(
            clock.clone(),
            policy.clone(),
            Arc::clone(&storage.sessions),
            Arc::clone(&storage.daily_logs),
        ));
        let identity = Arc::new(IdentityVerificationAuthority::new(
            clock.clone(),
            policy.clone(),
            Arc::clone(&storage.identity),
            Arc::clone(&storage.daily_logs),
        ));
        Self {
            clock,
            policy,
            sessions,
            breaks,
            time_authority,
            identity,
            remote: None,
        }
    }

    /// Routes heartbeats, answers and unload beacons through `client` when
    /// it has an endpoint configured.
    #[must_use]
    pub fn with_remote_authority(mut self, client: HttpAuthorityClient) -> Self {
        self.remote = client.enabled().then_some(client);
        self
    }

    #[must_use]
    pub fn policy(&self) -> &CompliancePolicy {
        &self.policy
    }

    #[must_use]
    pub fn sessions(&self) -> Arc<ComplianceSessionService> {
        Arc::clone(&self.sessions)
    }

    #[must_use]
    pub fn breaks(&self) -> Arc<BreakManager> {
        Arc::clone(&self.breaks)
    }

    #[must_use]
    pub fn time_authority(&self) -> Arc<ServerTimeAuthority> {
        Arc::clone(&self.time_authority)
    }

    #[must_use]
    pub fn identity(&self) -> Arc<IdentityVerificationAuthority> {
        Arc::clone(&self.identity)
    }

    #[must_use]
    pub fn orchestrator_deps(&self) -> OrchestratorDeps {
        let time_authority: Arc<dyn TimeAuthority>;
        let verifier: Arc<dyn AnswerVerifier>;
        let beacon: Arc<dyn UnloadBeacon>;
        if let Some(client) = &self.remote {
            time_authority = Arc::new(client.clone());
            verifier = Arc::new(client.clone());
            beacon = Arc::new(client.clone());
        } else {
            time_authority = Arc::new(InProcessTimeAuthority::new(Arc::clone(&self.time_authority)));
            verifier = Arc::new(InProcessVerifier::new(Arc::clone(&self.identity)));
            beacon = Arc::new(InProcessBeacon::new(Arc::clone(&self.sessions)));
        }
        OrchestratorDeps {
            clock: self.clock.clone(),
            policy: self.policy.clone(),
            sessions: Arc::clone(&self.sessions),
            breaks: Arc::clone(&self.breaks),
            time_authority,
            verifier,
            beacon,
        }
    }

    /// An orchestrator for one learner, drawing challenges from their
    /// enrolled questions.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::Identity` if the enrolled questions cannot
    /// be listed.
    pub async fn orchestrator(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<SessionOrchestrator, AppServicesError> {
        let questions = self.identity.questions_for(&user_id).await?;
        Ok(SessionOrchestrator::new(
            self.orchestrator_deps(),
            user_id,
            course_id,
            questions,
        ))
    }
}
