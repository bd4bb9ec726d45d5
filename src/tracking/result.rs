//! Tracking results and diagnostics.
//!
//! These types describe what happened while tracking a single frame:
//! - final state and pose
//! - one report per attempt (reference frame, initial pose, correspondence
//!   count, failure)
//! - timing

use std::fmt;

use crate::error::TrackingError;
use crate::geometry::Pose;
use crate::map::FrameId;
use crate::tracking::TrackingState;

/// Which mapper frame an attempt matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    LastFrame,
    LastKeyframe,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::LastFrame => write!(f, "last frame"),
            ReferenceKind::LastKeyframe => write!(f, "last keyframe"),
        }
    }
}

/// One attempt of the fallback sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptReport {
    pub reference: ReferenceKind,
    pub reference_frame: FrameId,
    pub init_pose: Pose,
    /// Correspondences built (or found below the gate); 0 if matching failed.
    pub correspondences: usize,
    pub failure: Option<TrackingError>,
    pub elapsed_ms: f64,
}

impl AttemptReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Summary of tracking for a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingResult {
    pub frame: FrameId,
    pub state: TrackingState,
    /// Estimated camera-from-world pose, `None` when lost.
    pub pose: Option<Pose>,
    pub attempts: Vec<AttemptReport>,
    pub total_ms: f64,
}

impl TrackingResult {
    pub fn is_tracked(&self) -> bool {
        self.state == TrackingState::Tracked
    }

    /// The pose, or `Lost` with the number of failed attempts.
    pub fn into_pose(self) -> Result<Pose, TrackingError> {
        match (self.state, self.pose) {
            (TrackingState::Tracked, Some(pose)) => Ok(pose),
            _ => Err(TrackingError::Lost {
                attempts: self.attempts.len(),
            }),
        }
    }

    /// Attempt that produced the pose, if any.
    pub fn successful_attempt(&self) -> Option<&AttemptReport> {
        self.attempts.iter().find(|a| a.succeeded())
    }
}
