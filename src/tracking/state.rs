//! Per-frame tracking state machine.
//!
//! ```text
//! AttemptLastFrame -> AttemptLastKeyframe -> { Tracked, Lost }
//!        \_______________________________________/^
//! ```
//!
//! The keyframe attempt only happens when the last frame attempt failed and
//! the last frame is not itself the last keyframe.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingState {
    /// Matching against the mapper's last frame, motion-model initial pose.
    #[default]
    AttemptLastFrame,
    /// Matching against the last keyframe, identity initial pose.
    AttemptLastKeyframe,
    /// A pose was estimated.
    Tracked,
    /// Every attempt failed.
    Lost,
}
