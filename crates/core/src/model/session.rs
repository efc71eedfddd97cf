use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{TransitionError, ValidationError};
use crate::model::{Break, CompletionEvent, CourseId, LessonId, SessionId, UserId, VideoProgress};
use crate::time::elapsed_seconds;

/// Fields only the server may write. Client payloads carrying any of them are refused.
pub const SERVER_OWNED_FIELDS: &[&str] = &[
    "sessionId",
    "userId",
    "courseId",
    "status",
    "startTimestamp",
    "lastHeartbeatTimestamp",
    "lastUpdated",
    "endTimestamp",
    "duration",
    "durationSeconds",
    "actualDuration",
    "actualDurationSeconds",
    "breaks",
    "completionEvents",
    "closureType",
    "autoClosed",
];

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    OnBreak,
    /// Force-closed by the orphan reaper.
    Timeout,
    Completed,
    /// Page closed without a clean stop.
    Unloaded,
}

impl SessionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::OnBreak => "on_break",
            Self::Timeout => "timeout",
            Self::Completed => "completed",
            Self::Unloaded => "unloaded",
        }
    }

    /// `active` or `on_break`.
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Active | Self::OnBreak)
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        !self.is_open()
    }

    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        use SessionStatus::{Active, Completed, OnBreak, Timeout, Unloaded};
        matches!(
            (self, to),
            (Active, OnBreak | Completed | Timeout | Unloaded)
                | (OnBreak, Active | Completed | Unloaded)
        )
    }

    /// # Errors
    ///
    /// Returns `TransitionError` if the move is not allowed.
    pub fn transition_to(self, to: Self) -> Result<Self, TransitionError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(TransitionError { from: self, to })
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "on_break" => Ok(Self::OnBreak),
            "timeout" => Ok(Self::Timeout),
            "completed" => Ok(Self::Completed),
            "unloaded" => Ok(Self::Unloaded),
            other => Err(ValidationError::Invalid {
                field: "status",
                reason: format!("unknown session status {other:?}"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureType {
    Normal,
    PageUnload,
    OrphanedAutoClose,
}

impl ClosureType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::PageUnload => "page_unload",
            Self::OrphanedAutoClose => "orphaned_auto_close",
        }
    }

    /// Terminal status a session lands in when closed this way.
    #[must_use]
    pub fn closing_status(self) -> SessionStatus {
        match self {
            Self::Normal => SessionStatus::Completed,
            Self::PageUnload => SessionStatus::Unloaded,
            Self::OrphanedAutoClose => SessionStatus::Timeout,
        }
    }
}

impl fmt::Display for ClosureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClosureType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "page_unload" => Ok(Self::PageUnload),
            "orphaned_auto_close" => Ok(Self::OrphanedAutoClose),
            other => Err(ValidationError::Invalid {
                field: "closureType",
                reason: format!("unknown closure type {other:?}"),
            }),
        }
    }
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// Client metadata attached at creation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMeta {
    pub lesson_id: Option<LessonId>,
    pub fields: Map<String, Value>,
}

impl SessionMeta {
    #[must_use]
    pub fn for_lesson(lesson_id: LessonId) -> Self {
        Self {
            lesson_id: Some(lesson_id),
            fields: Map::new(),
        }
    }

    /// # Errors
    ///
    /// Returns `ValidationError::NotAnObject` unless `value` is a JSON object,
    /// or `ServerOwnedField` if it tries to set a server-owned field.
    pub fn from_json(value: Value) -> Result<Self, ValidationError> {
        let Value::Object(mut fields) = value else {
            return Err(ValidationError::NotAnObject("meta"));
        };
        reject_server_owned(&fields)?;
        let lesson_id = match fields.remove("lessonId") {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => Some(LessonId::new(raw)?),
            Some(_) => {
                return Err(ValidationError::Invalid {
                    field: "lessonId",
                    reason: "expected a string".into(),
                });
            }
        };
        Ok(Self { lesson_id, fields })
    }
}

/// One continuous learning attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub course_id: CourseId,
    pub lesson_id: Option<LessonId>,
    pub status: SessionStatus,
    pub start_timestamp: DateTime<Utc>,
    pub last_heartbeat_timestamp: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub duration_seconds: Option<u64>,
    pub closure_type: Option<ClosureType>,
    /// Audit flag set when the reaper closed the session.
    pub auto_closed: bool,
    pub breaks: Vec<Break>,
    pub completion_events: Vec<CompletionEvent>,
    pub lessons_accessed: BTreeSet<LessonId>,
    pub video_progress: Option<VideoProgress>,
    pub progress: Map<String, Value>,
    pub meta: Map<String, Value>,
}

impl Session {
    #[must_use]
    pub fn new(
        session_id: SessionId,
        user_id: UserId,
        course_id: CourseId,
        meta: SessionMeta,
        now: DateTime<Utc>,
    ) -> Self {
        let mut lessons_accessed = BTreeSet::new();
        if let Some(lesson) = &meta.lesson_id {
            lessons_accessed.insert(lesson.clone());
        }
        Self {
            session_id,
            user_id,
            course_id,
            lesson_id: meta.lesson_id,
            status: SessionStatus::Active,
            start_timestamp: now,
            last_heartbeat_timestamp: now,
            last_updated: now,
            end_timestamp: None,
            duration_seconds: None,
            closure_type: None,
            auto_closed: false,
            breaks: Vec::new(),
            completion_events: Vec::new(),
            lessons_accessed,
            video_progress: None,
            progress: Map::new(),
            meta: meta.fields,
        }
    }

    /// Most recent break, if it is still running.
    #[must_use]
    pub fn active_break(&self) -> Option<&Break> {
        self.breaks.last().filter(|b| b.is_active())
    }

    /// Server-computed duration from start to `end`.
    #[must_use]
    pub fn duration_until(&self, end: DateTime<Utc>) -> u64 {
        elapsed_seconds(self.start_timestamp, end)
    }

    /// Field-level merge of `update` into this session.
    pub fn apply(&mut self, update: &SessionUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(at) = update.last_heartbeat_timestamp {
            self.last_heartbeat_timestamp = at;
        }
        if let Some(at) = update.last_updated {
            self.last_updated = at;
        }
        if let Some(at) = update.end_timestamp {
            self.end_timestamp = Some(at);
        }
        if let Some(secs) = update.duration_seconds {
            self.duration_seconds = Some(secs);
        }
        if let Some(closure) = update.closure_type {
            self.closure_type = Some(closure);
        }
        if let Some(flag) = update.auto_closed {
            self.auto_closed = flag;
        }
        if let Some(progress) = update.video_progress {
            self.video_progress = Some(progress);
        }
        if let Some(breaks) = &update.breaks {
            self.breaks.clone_from(breaks);
        }
        self.lessons_accessed
            .extend(update.lessons_accessed.iter().cloned());
        self.completion_events
            .extend(update.completion_events.iter().cloned());
        let mut progress = Value::Object(std::mem::take(&mut self.progress));
        merge_patch(&mut progress, &Value::Object(update.progress.clone()));
        if let Value::Object(map) = progress {
            self.progress = map;
        }
    }
}

/// JSON merge patch: objects merge recursively, `null` deletes, anything else replaces.
pub(crate) fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn reject_server_owned(fields: &Map<String, Value>) -> Result<(), ValidationError> {
    match fields
        .keys()
        .find(|key| SERVER_OWNED_FIELDS.contains(&key.as_str()))
    {
        Some(key) => Err(ValidationError::ServerOwnedField { field: key.clone() }),
        None => Ok(()),
    }
}

fn parse_lessons(value: Value) -> Result<Vec<LessonId>, ValidationError> {
    let Value::Array(items) = value else {
        return Err(ValidationError::Invalid {
            field: "lessonsAccessed",
            reason: "expected an array of lesson ids".into(),
        });
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(raw) => LessonId::new(raw),
            _ => Err(ValidationError::Invalid {
                field: "lessonsAccessed",
                reason: "expected an array of lesson ids".into(),
            }),
        })
        .collect()
}

//
// ─── CLIENT PAYLOADS ───────────────────────────────────────────────────────────
//

/// Client-supplied progress fields for a heartbeat or auto-save.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressPatch {
    pub video_progress: Option<VideoProgress>,
    pub lessons_accessed: Vec<LessonId>,
    pub fields: Map<String, Value>,
}

impl ProgressPatch {
    /// # Errors
    ///
    /// Returns `ValidationError::NotAnObject` unless `value` is an object, and
    /// `ServerOwnedField` for breaks, durations, timestamps or status.
    pub fn from_json(value: Value) -> Result<Self, ValidationError> {
        let Value::Object(mut fields) = value else {
            return Err(ValidationError::NotAnObject("patch"));
        };
        reject_server_owned(&fields)?;
        let video_progress = fields
            .remove("videoProgress")
            .map(|v| VideoProgress::from_json(&v))
            .transpose()?;
        let lessons_accessed = fields
            .remove("lessonsAccessed")
            .map(parse_lessons)
            .transpose()?
            .unwrap_or_default();
        Ok(Self {
            video_progress,
            lessons_accessed,
            fields,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.video_progress.is_none() && self.lessons_accessed.is_empty() && self.fields.is_empty()
    }
}

/// Client summary sent when a session ends. Carries no durations.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseSummary {
    pub closure_type: ClosureType,
    pub video_progress: Option<VideoProgress>,
    pub lessons_accessed: Vec<LessonId>,
}

impl CloseSummary {
    #[must_use]
    pub fn normal() -> Self {
        Self {
            closure_type: ClosureType::Normal,
            video_progress: None,
            lessons_accessed: Vec::new(),
        }
    }

    #[must_use]
    pub fn page_unload() -> Self {
        Self {
            closure_type: ClosureType::PageUnload,
            ..Self::normal()
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Option<VideoProgress>, lessons: Vec<LessonId>) -> Self {
        self.video_progress = progress;
        self.lessons_accessed = lessons;
        self
    }

    /// # Errors
    ///
    /// Returns `ValidationError` for non-object payloads, server-owned fields
    /// other than `closureType`, or the reaper-only `orphaned_auto_close` closure.
    pub fn from_json(value: Value) -> Result<Self, ValidationError> {
        let Value::Object(mut fields) = value else {
            return Err(ValidationError::NotAnObject("summary"));
        };
        let closure_type = match fields.remove("closureType") {
            None | Some(Value::Null) => ClosureType::Normal,
            Some(Value::String(raw)) => match raw.parse()? {
                ClosureType::OrphanedAutoClose => {
                    return Err(ValidationError::Invalid {
                        field: "closureType",
                        reason: "orphaned_auto_close is reserved for the server".into(),
                    });
                }
                other => other,
            },
            Some(_) => {
                return Err(ValidationError::Invalid {
                    field: "closureType",
                    reason: "expected a string".into(),
                });
            }
        };
        reject_server_owned(&fields)?;
        let video_progress = fields
            .remove("videoProgress")
            .map(|v| VideoProgress::from_json(&v))
            .transpose()?;
        let lessons_accessed = fields
            .remove("lessonsAccessed")
            .map(parse_lessons)
            .transpose()?
            .unwrap_or_default();
        Ok(Self {
            closure_type,
            video_progress,
            lessons_accessed,
        })
    }
}

//
// ─── STORAGE UPDATE ────────────────────────────────────────────────────────────
//

/// Field-level merge applied by the session store.
///
/// `None` leaves a field untouched, `lessons_accessed` is unioned,
/// `completion_events` appended and `progress` merge-patched. `breaks`
/// replaces the list and is only ever built by the server.
///
/// A non-empty `expected_status` makes the write conditional: the store
/// applies it only while the session is in one of those statuses and reports
/// the current status otherwise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub expected_status: Vec<SessionStatus>,
    pub status: Option<SessionStatus>,
    pub last_heartbeat_timestamp: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub duration_seconds: Option<u64>,
    pub closure_type: Option<ClosureType>,
    pub auto_closed: Option<bool>,
    pub video_progress: Option<VideoProgress>,
    pub breaks: Option<Vec<Break>>,
    pub lessons_accessed: Vec<LessonId>,
    pub completion_events: Vec<CompletionEvent>,
    pub progress: Map<String, Value>,
}

impl SessionUpdate {
    #[must_use]
    pub fn stamped(now: DateTime<Utc>) -> Self {
        Self {
            last_updated: Some(now),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_progress(patch: ProgressPatch, now: DateTime<Utc>) -> Self {
        Self {
            video_progress: patch.video_progress,
            lessons_accessed: patch.lessons_accessed,
            progress: patch.fields,
            ..Self::stamped(now)
        }
    }

    #[must_use]
    pub fn expecting(mut self, statuses: &[SessionStatus]) -> Self {
        self.expected_status = statuses.to_vec();
        self
    }

    /// Whether a session currently in `status` accepts this update.
    #[must_use]
    pub fn permits(&self, status: SessionStatus) -> bool {
        self.expected_status.is_empty() || self.expected_status.contains(&status)
    }

    /// Terminal update for a session closed at `end`. Applies only while the
    /// session is still open.
    #[must_use]
    pub fn closing(session: &Session, closure: ClosureType, end: DateTime<Utc>) -> Self {
        Self {
            expected_status: vec![SessionStatus::Active, SessionStatus::OnBreak],
            status: Some(closure.closing_status()),
            end_timestamp: Some(end),
            duration_seconds: Some(session.duration_until(end)),
            closure_type: Some(closure),
            auto_closed: Some(closure == ClosureType::OrphanedAutoClose),
            ..Self::stamped(end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BreakReason;
    use crate::time::fixed_now;
    use chrono::Duration;
    use serde_json::json;

    fn session() -> Session {
        Session::new(
            SessionId::new("s-1").unwrap(),
            UserId::new("u-1").unwrap(),
            CourseId::new("c-1").unwrap(),
            SessionMeta::default(),
            fixed_now(),
        )
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for terminal in [
            SessionStatus::Completed,
            SessionStatus::Timeout,
            SessionStatus::Unloaded,
        ] {
            for to in [
                SessionStatus::Active,
                SessionStatus::OnBreak,
                SessionStatus::Completed,
                SessionStatus::Timeout,
                SessionStatus::Unloaded,
            ] {
                assert!(!terminal.can_transition_to(to), "{terminal} -> {to}");
            }
        }
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::OnBreak));
        assert!(SessionStatus::OnBreak.can_transition_to(SessionStatus::Active));
        assert!(!SessionStatus::OnBreak.can_transition_to(SessionStatus::Timeout));
        assert_eq!(
            SessionStatus::Completed
                .transition_to(SessionStatus::Active)
                .unwrap_err(),
            TransitionError {
                from: SessionStatus::Completed,
                to: SessionStatus::Active
            }
        );
    }

    #[test]
    fn meta_must_be_an_object() {
        assert_eq!(
            SessionMeta::from_json(json!([1, 2])).unwrap_err(),
            ValidationError::NotAnObject("meta")
        );
        let meta = SessionMeta::from_json(json!({"lessonId": "l-1", "device": "web"})).unwrap();
        assert_eq!(meta.lesson_id.unwrap().as_str(), "l-1");
        assert_eq!(meta.fields["device"], "web");
    }

    #[test]
    fn progress_patch_rejects_client_durations() {
        let err = ProgressPatch::from_json(json!({"durationSeconds": 9_999})).unwrap_err();
        assert_eq!(
            err,
            ValidationError::ServerOwnedField {
                field: "durationSeconds".into()
            }
        );
        let err = ProgressPatch::from_json(json!({"breaks": []})).unwrap_err();
        assert!(matches!(err, ValidationError::ServerOwnedField { .. }));
        assert_eq!(
            ProgressPatch::from_json(json!("nope")).unwrap_err(),
            ValidationError::NotAnObject("patch")
        );
    }

    #[test]
    fn close_summary_maps_page_unload() {
        let summary = CloseSummary::from_json(json!({"closureType": "page_unload"})).unwrap();
        assert_eq!(summary.closure_type.closing_status(), SessionStatus::Unloaded);
        assert!(CloseSummary::from_json(json!({"closureType": "orphaned_auto_close"})).is_err());
        assert!(CloseSummary::from_json(json!({"duration": 10})).is_err());
    }

    #[test]
    fn update_merges_fields_without_clobbering() {
        let mut s = session();
        let first = ProgressPatch::from_json(json!({
            "videoProgress": {"currentTime": 10.0, "duration": 100.0},
            "lessonsAccessed": ["l-1"],
            "notes": {"a": 1}
        }))
        .unwrap();
        s.apply(&SessionUpdate::from_progress(first, fixed_now()));

        let second = ProgressPatch::from_json(json!({
            "lessonsAccessed": ["l-2"],
            "notes": {"b": 2}
        }))
        .unwrap();
        s.apply(&SessionUpdate::from_progress(
            second,
            fixed_now() + Duration::seconds(30),
        ));

        assert_eq!(s.lessons_accessed.len(), 2);
        assert_eq!(s.progress["notes"], json!({"a": 1, "b": 2}));
        assert!(s.video_progress.is_some());
        assert_eq!(s.last_updated, fixed_now() + Duration::seconds(30));
    }

    #[test]
    fn closing_update_uses_server_duration() {
        let mut s = session();
        s.breaks.push(Break::start(BreakReason::Mandatory, fixed_now()));
        let end = fixed_now() + Duration::seconds(3_600);
        let update = SessionUpdate::closing(&s, ClosureType::OrphanedAutoClose, end);
        s.apply(&update);
        assert_eq!(s.status, SessionStatus::Timeout);
        assert_eq!(s.duration_seconds, Some(3_600));
        assert!(s.auto_closed);
        assert_eq!(s.breaks.len(), 1);
    }

    #[test]
    fn closing_update_requires_an_open_session() {
        let s = session();
        let update = SessionUpdate::closing(&s, ClosureType::Normal, fixed_now());
        assert!(update.permits(SessionStatus::Active));
        assert!(update.permits(SessionStatus::OnBreak));
        assert!(!update.permits(SessionStatus::Completed));
        assert!(!update.permits(SessionStatus::Timeout));

        let reaping = update.expecting(&[SessionStatus::Active]);
        assert!(!reaping.permits(SessionStatus::OnBreak));
        assert!(SessionUpdate::stamped(fixed_now()).permits(SessionStatus::Unloaded));
    }
}
