//! Minimal mapper: remembers the last frame, the last keyframe and the
//! accepted trajectory, and predicts the next pose with a constant velocity
//! model.

use crate::geometry::Pose;
use crate::map::FrameId;
use crate::tracking::motion_model::MotionModel;
use crate::tracking::tracker::Mapper;
use crate::tracking::tracking_frame::Frame;

#[derive(Debug, Clone)]
pub struct FrameHistory {
    last_frame: Frame,
    last_keyframe: Frame,
    motion: MotionModel,
    trajectory: Vec<(FrameId, Pose)>,
}

impl FrameHistory {
    /// Start from an initialized frame, which is also the first keyframe.
    pub fn new(first: Frame, pose: Pose) -> Self {
        let mut motion = MotionModel::new();
        motion.update(&pose);
        Self {
            trajectory: vec![(first.id, pose)],
            last_keyframe: first.clone(),
            last_frame: first,
            motion,
        }
    }

    /// Record a tracked frame with its accepted pose.
    pub fn add_frame(&mut self, frame: Frame, pose: Pose, is_keyframe: bool) {
        self.motion.update(&pose);
        self.trajectory.push((frame.id, pose));
        if is_keyframe {
            self.last_keyframe = frame.clone();
        }
        self.last_frame = frame;
    }

    /// Forget the velocity, e.g. after tracking was lost.
    pub fn reset_motion(&mut self) {
        self.motion.reset();
    }

    pub fn trajectory(&self) -> &[(FrameId, Pose)] {
        &self.trajectory
    }

    pub fn num_frames(&self) -> usize {
        self.trajectory.len()
    }
}

impl Mapper for FrameHistory {
    fn estimate_pose(&self) -> Pose {
        self.motion.predict().unwrap_or_else(Pose::identity)
    }

    fn last_frame(&self) -> &Frame {
        &self.last_frame
    }

    fn last_keyframe(&self) -> &Frame {
        &self.last_keyframe
    }
}
