mod trigger;
mod verification;

pub use trigger::{IdentityChallengeTrigger, PendingChallenge, PvqOutcome};
pub use verification::IdentityVerificationAuthority;
