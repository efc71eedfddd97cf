//! Restricted playback contract for lesson videos.
//!
//! A lesson player wraps its media element in [`RestrictedPlayback`]. The
//! state machine only accepts forward progress at playback speed, reverts
//! every seek to the last valid position, and gates advancing on either a
//! natural end or a correctly answered comprehension question. The orchestrator
//! only trusts `percent_watched` from a player whose control surface has been
//! verified since its last mount.

use thiserror::Error;

use crate::model::VideoProgress;

/// Capabilities a mounted player exposes to the learner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlSurface {
    pub native_controls: bool,
    pub seek_bar: bool,
    pub keyboard_seek: bool,
    pub playback_rate_control: bool,
}

impl ControlSurface {
    /// Play/pause only.
    #[must_use]
    pub fn locked() -> Self {
        Self::default()
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PlaybackContractViolation {
    #[error("native media controls are exposed")]
    NativeControls,
    #[error("a seek bar is exposed")]
    SeekBar,
    #[error("keyboard seeking is enabled")]
    KeyboardSeek,
    #[error("playback rate can be changed")]
    PlaybackRate,
    #[error("player has not been verified since it was mounted")]
    Unverified,
}

/// Where a blocked seek attempt came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekSource {
    Pointer,
    Touch,
    Keyboard,
    Programmatic,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionDecision {
    Accepted(f64),
    /// The player must snap back to this position.
    Reverted(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComprehensionGate {
    NotRequired,
    Pending,
    Passed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestrictedPlayback {
    duration: f64,
    last_valid_position: f64,
    max_forward_step: f64,
    ended_naturally: bool,
    gate: ComprehensionGate,
    verified: bool,
    blocked_seeks: u32,
}

/// Largest forward jump accepted between two time updates, in seconds.
pub const DEFAULT_MAX_FORWARD_STEP: f64 = 2.0;

impl RestrictedPlayback {
    #[must_use]
    pub fn new(duration: f64, requires_comprehension: bool) -> Self {
        Self {
            duration: duration.max(0.0),
            last_valid_position: 0.0,
            max_forward_step: DEFAULT_MAX_FORWARD_STEP,
            ended_naturally: false,
            gate: if requires_comprehension {
                ComprehensionGate::Pending
            } else {
                ComprehensionGate::NotRequired
            },
            verified: false,
            blocked_seeks: 0,
        }
    }

    #[must_use]
    pub fn with_max_forward_step(mut self, step: f64) -> Self {
        self.max_forward_step = step.max(0.0);
        self
    }

    /// Checks the mounted control surface. Must be called after every (re)mount.
    ///
    /// # Errors
    ///
    /// Returns the first `PlaybackContractViolation` found; the player stays unverified.
    pub fn verify_mount(&mut self, surface: ControlSurface) -> Result<(), PlaybackContractViolation> {
        self.verified = false;
        if surface.native_controls {
            return Err(PlaybackContractViolation::NativeControls);
        }
        if surface.seek_bar {
            return Err(PlaybackContractViolation::SeekBar);
        }
        if surface.keyboard_seek {
            return Err(PlaybackContractViolation::KeyboardSeek);
        }
        if surface.playback_rate_control {
            return Err(PlaybackContractViolation::PlaybackRate);
        }
        self.verified = true;
        Ok(())
    }

    /// The element was torn down; verification must be redone.
    pub fn unmount(&mut self) {
        self.verified = false;
    }

    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// Reported position from a `timeupdate` event.
    pub fn on_time_update(&mut self, position: f64) -> PositionDecision {
        let forward = position - self.last_valid_position;
        if !position.is_finite() || forward < 0.0 || forward > self.max_forward_step {
            self.blocked_seeks = self.blocked_seeks.saturating_add(1);
            return PositionDecision::Reverted(self.last_valid_position);
        }
        self.last_valid_position = position.min(self.duration);
        PositionDecision::Accepted(self.last_valid_position)
    }

    /// Any seek attempt, from any source, is refused.
    pub fn request_seek(&mut self, _source: SeekSource, _target: f64) -> PositionDecision {
        self.blocked_seeks = self.blocked_seeks.saturating_add(1);
        PositionDecision::Reverted(self.last_valid_position)
    }

    /// `ended` only counts when the last valid position reached the end.
    pub fn on_ended(&mut self) -> bool {
        if self.duration - self.last_valid_position <= self.max_forward_step {
            self.ended_naturally = true;
        }
        self.ended_naturally
    }

    pub fn answer_comprehension(&mut self, correct: bool) {
        if correct && self.gate == ComprehensionGate::Pending {
            self.gate = ComprehensionGate::Passed;
        }
    }

    #[must_use]
    pub fn can_advance(&self) -> bool {
        self.ended_naturally || self.gate == ComprehensionGate::Passed
    }

    #[must_use]
    pub fn blocked_seeks(&self) -> u32 {
        self.blocked_seeks
    }

    #[must_use]
    pub fn position(&self) -> f64 {
        self.last_valid_position
    }

    /// Progress snapshot from a verified player.
    ///
    /// # Errors
    ///
    /// Returns `PlaybackContractViolation::Unverified` if the mount has not been checked.
    pub fn verified_progress(&self) -> Result<VideoProgress, PlaybackContractViolation> {
        if !self.verified {
            return Err(PlaybackContractViolation::Unverified);
        }
        VideoProgress::new(self.last_valid_position, self.duration)
            .map_err(|_| PlaybackContractViolation::Unverified)
    }
}
