//! Client-side session coordination: timers, heartbeat, breaks and identity
//! challenges for one learner.

mod context;
mod service;
mod tasks;

pub use context::{InactivityStatus, Phase, StopReason};
pub use service::{OrchestratorDeps, OrchestratorEvent, SessionOrchestrator};
