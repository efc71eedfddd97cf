#![forbid(unsafe_code)]

pub mod repository;
pub mod sqlite;

pub use repository::{
    DailyActivityRepository, DailyCounter, IdentityRepository, InMemoryRepository, SessionQuery,
    SessionRepository, Storage, StorageError,
};
pub use sqlite::{SqliteInitError, SqliteRepository};
