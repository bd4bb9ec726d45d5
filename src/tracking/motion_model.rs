//! Velocity-based motion model for pose prediction.

use crate::geometry::Pose;

/// Constant velocity motion model over camera-from-world poses.
///
/// With `T_k` the pose of frame `k`, the velocity is `V = T_k * T_{k-1}^-1`
/// and the prediction is `V * T_k`.
#[derive(Debug, Clone, Default)]
pub struct MotionModel {
    last_pose: Option<Pose>,
    velocity: Option<Pose>,
}

impl MotionModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the model with a newly accepted pose.
    pub fn update(&mut self, pose: &Pose) {
        if let Some(last) = self.last_pose {
            self.velocity = Some(pose * &last.inverse());
        }
        self.last_pose = Some(*pose);
    }

    /// Predicted pose of the next frame. The last pose when no velocity is
    /// known yet, `None` before any update.
    pub fn predict(&self) -> Option<Pose> {
        let last = self.last_pose?;
        Some(match self.velocity {
            Some(velocity) => velocity * last,
            None => last,
        })
    }

    pub fn reset(&mut self) {
        self.last_pose = None;
        self.velocity = None;
    }
}
