#![forbid(unsafe_code)]

pub mod error;
pub mod model;
pub mod playback;
pub mod policy;
pub mod time;

pub use error::{TransitionError, ValidationError};
pub use policy::CompliancePolicy;
pub use time::Clock;
