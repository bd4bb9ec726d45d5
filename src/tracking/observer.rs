//! Optional debugging side channel.
//!
//! After a successful attempt the tracker reports the observed points and the
//! landmarks reprojected with the initial and the refined pose. Observers run
//! after the decision and cannot change it.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use nalgebra::{Vector2, Vector3};
use tracing::debug;

use crate::geometry::Pose;
use crate::map::FrameId;
use crate::tracking::frame::{Camera, Observation};
use crate::tracking::result::ReferenceKind;

/// Observed vs. reprojected points for one tracked frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ReprojectionReport {
    pub frame: FrameId,
    pub image_name: String,
    pub reference: ReferenceKind,
    pub init_pose: Pose,
    pub final_pose: Pose,
    pub observed: Vec<Vector2<f64>>,
    /// `None` where the landmark has no image under the pose.
    pub projected_init: Vec<Option<Vector2<f64>>>,
    pub projected_final: Vec<Option<Vector2<f64>>>,
}

impl ReprojectionReport {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        frame: FrameId,
        image_name: &str,
        reference: ReferenceKind,
        points3d: &[Vector3<f64>],
        observations: &[Observation],
        init_pose: &Pose,
        final_pose: &Pose,
        camera: &Camera,
    ) -> Self {
        Self {
            frame,
            image_name: image_name.to_string(),
            reference,
            init_pose: *init_pose,
            final_pose: *final_pose,
            observed: observations.iter().map(|o| o.point()).collect(),
            projected_init: camera.project_many(&init_pose.transform_many(points3d)),
            projected_final: camera.project_many(&final_pose.transform_many(points3d)),
        }
    }

    /// Mean distance between observed and projected points, over points with
    /// a projection.
    pub fn mean_error(projected: &[Option<Vector2<f64>>], observed: &[Vector2<f64>]) -> Option<f64> {
        let errors: Vec<f64> = projected
            .iter()
            .zip(observed)
            .filter_map(|(p, o)| p.map(|p| (p - o).norm()))
            .collect();
        if errors.is_empty() {
            return None;
        }
        Some(errors.iter().sum::<f64>() / errors.len() as f64)
    }

    pub fn mean_error_init(&self) -> Option<f64> {
        Self::mean_error(&self.projected_init, &self.observed)
    }

    pub fn mean_error_final(&self) -> Option<f64> {
        Self::mean_error(&self.projected_final, &self.observed)
    }
}

pub trait TrackingObserver {
    fn on_reprojection(&self, report: &ReprojectionReport);
}

/// Forwards reports over a bounded channel. Never blocks: reports are
/// dropped while the channel is full.
pub struct ChannelObserver {
    sender: Sender<ReprojectionReport>,
}

impl ChannelObserver {
    pub fn bounded(capacity: usize) -> (Self, Receiver<ReprojectionReport>) {
        let (sender, receiver) = bounded(capacity);
        (Self { sender }, receiver)
    }
}

impl TrackingObserver for ChannelObserver {
    fn on_reprojection(&self, report: &ReprojectionReport) {
        match self.sender.try_send(report.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!("[Observer] channel full, dropping report for {}", report.frame);
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("[Observer] receiver gone, dropping report for {}", report.frame);
            }
        }
    }
}
