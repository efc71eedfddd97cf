#![forbid(unsafe_code)]

pub mod app_services;
pub mod authority;
pub mod compliance;
pub mod error;
pub mod heartbeat;
pub mod http_authority;
pub mod identity;
pub mod orchestrator;
pub mod retry;

pub use compliance_core::Clock;

pub use app_services::AppServices;
pub use compliance::{
    BreakManager, ComplianceSessionService, DailyLockoutStatus, ReapReport, ServerTimeAuthority,
};
pub use error::{
    AppServicesError, AuthorityError, ComplianceError, IdentityError, OrchestratorError,
};
pub use identity::{IdentityChallengeTrigger, IdentityVerificationAuthority, PvqOutcome};
pub use orchestrator::{
    InactivityStatus, OrchestratorDeps, OrchestratorEvent, Phase, SessionOrchestrator, StopReason,
};
pub use retry::{RetryError, RetryExecutor};
