use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl $name {
            /// Creates the identifier, rejecting empty or whitespace-only values.
            ///
            /// # Errors
            ///
            /// Returns `ValidationError::Missing` if the value is blank.
            pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(ValidationError::Missing($label));
                }
                Ok(Self(value))
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }
    };
}

string_id!(
    /// Authenticated user identifier, as asserted by the auth provider.
    UserId,
    "userId"
);
string_id!(
    /// Course identifier.
    CourseId,
    "courseId"
);
string_id!(
    /// Lesson identifier.
    LessonId,
    "lessonId"
);
string_id!(
    /// Module identifier.
    ModuleId,
    "moduleId"
);
string_id!(
    /// Personal verification question identifier.
    QuestionId,
    "questionId"
);
string_id!(
    /// Opaque, server-generated session identifier.
    SessionId,
    "sessionId"
);

impl SessionId {
    /// Generates a fresh random session identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_ids_are_rejected() {
        assert_eq!(UserId::new("  ").unwrap_err(), ValidationError::Missing("userId"));
        assert_eq!(
            SessionId::new("").unwrap_err(),
            ValidationError::Missing("sessionId")
        );
    }

    #[test]
    fn generated_session_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = CourseId::new("course-456").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"course-456\"");
        assert_eq!(format!("{id:?}"), "CourseId(course-456)");
        assert!(serde_json::from_str::<CourseId>("\"\"").is_err());
    }
}
