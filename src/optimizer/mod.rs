//! Bundle adjustment contract used by the pose solver.
//!
//! The pose solver never touches solver numerics directly. It describes the
//! problem through the [`Optimizer`] trait:
//! - fixed cameras (intrinsics are never refined while tracking)
//! - free rigid poses (6 DoF: rotation vector + translation, camera-from-world)
//! - fixed 3D points
//! - point projection observations with a robust loss
//! - soft orientation priors
//!
//! [`LmBundleAdjuster`] is the built-in implementation.

pub mod pose_ba_lm;
pub mod robust;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::map::CameraId;
use crate::tracking::frame::Camera;

pub use pose_ba_lm::LmBundleAdjuster;
pub use robust::{LossFunction, LossKind};

/// Identifier of a pose variable inside one problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoseId(pub u32);

/// Identifier of a point inside one problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PointId(pub u32);

/// Strategy for the inner linear solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearSolverStrategy {
    /// Sparse direct factorization with Schur elimination of points.
    #[default]
    SparseSchur,
    DenseSchur,
    SparseNormalCholesky,
    DenseQr,
}

/// Standard deviations of the intrinsic parameter priors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntrinsicPriors {
    pub focal_sd: f64,
    pub principal_point_sd: f64,
    pub k1_sd: f64,
    pub k2_sd: f64,
    pub k3_sd: f64,
    pub p1_sd: f64,
    pub p2_sd: f64,
}

impl Default for IntrinsicPriors {
    fn default() -> Self {
        Self {
            focal_sd: 0.01,
            principal_point_sd: 0.01,
            k1_sd: 0.01,
            k2_sd: 0.01,
            k3_sd: 0.01,
            p1_sd: 0.01,
            p2_sd: 0.01,
        }
    }
}

/// Outcome of one optimizer run.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverSummary {
    /// Whether the run ended on a convergence criterion.
    pub converged: bool,
    /// Cost function evaluations performed.
    pub evaluations: usize,
    /// Cost (half squared norm of robustified residuals) before and after.
    pub initial_cost: f64,
    pub final_cost: f64,
    pub num_residual_blocks: usize,
    pub linear_solver: LinearSolverStrategy,
    pub threads: usize,
    /// Recorded priors. Cameras are fixed, so they add no cost terms.
    pub intrinsic_priors: IntrinsicPriors,
    /// Human readable termination reason.
    pub termination: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptimizerError {
    #[error("problem has no free pose")]
    NoFreePoses,
    #[error("unknown pose {0:?}")]
    UnknownPose(PoseId),
    #[error("unknown point {0:?}")]
    UnknownPoint(PointId),
    #[error("unknown camera {0}")]
    UnknownCamera(CameraId),
    #[error("invalid observation scale {0}")]
    InvalidScale(f64),
    #[error("numerical failure: {0}")]
    Numerical(String),
}

/// Nonlinear least-squares engine for bundle adjustment problems.
///
/// Implementations own the problem they are given; one instance serves one
/// problem. Cameras and points added as fixed must come back unchanged.
pub trait Optimizer {
    fn add_fixed_camera(&mut self, camera: &Camera);

    /// Add a pose variable. `rotation` is a rotation vector.
    fn add_free_pose(
        &mut self,
        id: PoseId,
        camera: CameraId,
        rotation: Vector3<f64>,
        translation: Vector3<f64>,
    );

    fn add_fixed_point(&mut self, id: PointId, coordinates: Vector3<f64>);

    /// Observation `(x, y)` of `point` in `pose`, with feature `scale`.
    fn add_point_projection_observation(
        &mut self,
        pose: PoseId,
        point: PointId,
        x: f64,
        y: f64,
        scale: f64,
    );

    /// Soft prior keeping `axis` of the pose aligned with the same world axis.
    fn add_orientation_prior(&mut self, pose: PoseId, axis: Vector3<f64>, weight: f64);

    fn set_loss_function(&mut self, loss: LossFunction);

    fn set_parameter_priors(&mut self, priors: IntrinsicPriors);

    fn set_thread_count(&mut self, threads: usize);

    fn set_iteration_cap(&mut self, iterations: usize);

    fn set_linear_solver_strategy(&mut self, strategy: LinearSolverStrategy);

    fn run(&mut self) -> Result<SolverSummary, OptimizerError>;

    /// `(rotation vector, translation)` of a pose.
    fn get_pose(&self, id: PoseId) -> Option<(Vector3<f64>, Vector3<f64>)>;

    fn get_point(&self, id: PointId) -> Option<Vector3<f64>>;

    fn get_camera(&self, id: CameraId) -> Option<Camera>;
}
