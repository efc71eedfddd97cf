mod breaks;
mod daily_log;
mod identity;
mod ids;
mod progress;
mod session;

pub use ids::{CourseId, LessonId, ModuleId, QuestionId, SessionId, UserId};

pub use breaks::{Break, BreakReason, BreakRemaining, BreakStartRequest, BreakStatus, BreakTooShort};
pub use daily_log::{Accrual, DailyActivityLog};
pub use identity::{
    IdentityChallengeAttempt, MAX_ANSWER_LENGTH, PvqLockout, PvqQuestion, SecurityAnswer,
    default_question_pool, normalize_answer,
};
pub use progress::{CompletionEvent, CompletionKind, LessonCompletion, ModuleCompletion, VideoProgress};
pub use session::{
    CloseSummary, ClosureType, ProgressPatch, SERVER_OWNED_FIELDS, Session, SessionMeta,
    SessionStatus, SessionUpdate,
};
