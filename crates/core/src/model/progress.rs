use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ValidationError;
use crate::model::{LessonId, ModuleId};

/// Last known playback position. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoProgress {
    pub current_time: f64,
    pub duration: f64,
    pub percent_watched: f64,
}

impl VideoProgress {
    /// Builds a snapshot, deriving `percent_watched` from position and duration.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::Invalid` for negative or non-finite values.
    pub fn new(current_time: f64, duration: f64) -> Result<Self, ValidationError> {
        for (field, value) in [("currentTime", current_time), ("duration", duration)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ValidationError::Invalid {
                    field,
                    reason: format!("expected a non-negative number, got {value}"),
                });
            }
        }
        let percent_watched = if duration > 0.0 {
            (current_time / duration * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        Ok(Self {
            current_time,
            duration,
            percent_watched,
        })
    }

    /// Parses a client snapshot. The reported percentage is recomputed.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the value is not an object with numeric
    /// `currentTime` and `duration`.
    pub fn from_json(value: &Value) -> Result<Self, ValidationError> {
        let obj = value
            .as_object()
            .ok_or(ValidationError::NotAnObject("videoProgress"))?;
        let number = |field: &'static str| {
            obj.get(field)
                .and_then(Value::as_f64)
                .ok_or_else(|| ValidationError::Invalid {
                    field,
                    reason: "expected a number".into(),
                })
        };
        Self::new(number("currentTime")?, number("duration")?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionKind {
    Lesson,
    Module,
}

/// Append-only record of a completion, stamped with server time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    #[serde(rename = "type")]
    pub kind: CompletionKind,
    pub payload: Value,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LessonCompletion {
    pub lesson_id: LessonId,
    pub module_id: Option<ModuleId>,
    pub score: Option<f64>,
}

impl LessonCompletion {
    #[must_use]
    pub fn into_event(self, recorded_at: DateTime<Utc>) -> CompletionEvent {
        CompletionEvent {
            kind: CompletionKind::Lesson,
            payload: json!({
                "lessonId": self.lesson_id,
                "moduleId": self.module_id,
                "score": self.score,
            }),
            recorded_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCompletion {
    pub module_id: ModuleId,
    pub lessons_completed: u32,
}

impl ModuleCompletion {
    #[must_use]
    pub fn into_event(self, recorded_at: DateTime<Utc>) -> CompletionEvent {
        CompletionEvent {
            kind: CompletionKind::Module,
            payload: json!({
                "moduleId": self.module_id,
                "lessonsCompleted": self.lessons_completed,
            }),
            recorded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn percent_is_recomputed_from_position() {
        let progress =
            VideoProgress::from_json(&json!({"currentTime": 30.0, "duration": 120.0, "percentWatched": 99.0}))
                .unwrap();
        assert!((progress.percent_watched - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn negative_positions_are_rejected() {
        let err = VideoProgress::new(-1.0, 10.0).unwrap_err();
        assert!(matches!(err, ValidationError::Invalid { field: "currentTime", .. }));
    }

    #[test]
    fn lesson_completion_event_carries_ids() {
        let event = LessonCompletion {
            lesson_id: LessonId::new("lesson-1").unwrap(),
            module_id: None,
            score: Some(0.9),
        }
        .into_event(fixed_now());
        assert_eq!(event.kind, CompletionKind::Lesson);
        assert_eq!(event.payload["lessonId"], "lesson-1");
        assert_eq!(event.recorded_at, fixed_now());
    }
}
