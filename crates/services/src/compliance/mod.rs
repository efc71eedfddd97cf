mod break_manager;
mod session_service;
mod time_authority;

pub use break_manager::BreakManager;
pub use session_service::{ComplianceSessionService, ReapReport};
pub use time_authority::{DailyLockoutStatus, ServerTimeAuthority};
