//! Pose-only bundle adjustment using the `levenberg-marquardt` crate.
//!
//! Minimizes
//!
//! ```text
//! E = ½ Σ_ij ρ(|(π(R_i X_j + t_i) - u_ij) / s_ij|²) + ½ Σ_i |w_i (R_i a_i - a_i)|²
//! ```
//!
//! over the free poses `(ω_i, t_i)` (`R_i = exp(ω_i)`), with every camera
//! and every point held constant. The second sum is the orientation prior.
//!
//! Parameter layout: `[ω_0 (3), t_0 (3), ω_1 (3), t_1 (3), ...]` in pose id order.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use nalgebra::{DMatrix, DVector, Dyn, Matrix2x6, Matrix3, Matrix3x6, Owned, Vector2, Vector3};
use tracing::debug;

use crate::geometry::so3::rotate_point_jacobian;
use crate::map::CameraId;
use crate::tracking::frame::{Camera, CameraModel};

use super::robust::LossFunction;
use super::{
    IntrinsicPriors, LinearSolverStrategy, Optimizer, OptimizerError, PointId, PoseId,
    SolverSummary,
};

/// Residual assigned to points that cannot be projected (e.g. behind the camera).
const UNPROJECTABLE_RESIDUAL: f64 = 100.0;

struct PoseVariable {
    camera: CameraId,
    rotation: Vector3<f64>,
    translation: Vector3<f64>,
}

struct ProjectionObservation {
    pose: PoseId,
    point: PointId,
    observed: Vector2<f64>,
    scale: f64,
}

struct OrientationPrior {
    pose: PoseId,
    axis: Vector3<f64>,
    weight: f64,
}

/// Levenberg-Marquardt adjuster for problems whose only variables are poses.
pub struct LmBundleAdjuster {
    cameras: HashMap<CameraId, Camera>,
    poses: BTreeMap<PoseId, PoseVariable>,
    points: HashMap<PointId, Vector3<f64>>,
    observations: Vec<ProjectionObservation>,
    orientation_priors: Vec<OrientationPrior>,
    loss: LossFunction,
    intrinsic_priors: IntrinsicPriors,
    threads: usize,
    max_iterations: usize,
    linear_solver: LinearSolverStrategy,
    ftol: f64,
    xtol: f64,
    gtol: f64,
}

impl LmBundleAdjuster {
    pub fn new() -> Self {
        Self {
            cameras: HashMap::new(),
            poses: BTreeMap::new(),
            points: HashMap::new(),
            observations: Vec::new(),
            orientation_priors: Vec::new(),
            loss: LossFunction::trivial(),
            intrinsic_priors: IntrinsicPriors::default(),
            threads: 1,
            max_iterations: 50,
            linear_solver: LinearSolverStrategy::default(),
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-12,
        }
    }

    /// Resolve ids into a self-contained problem.
    fn build_problem(&self) -> Result<(PoseProblem, Vec<PoseId>), OptimizerError> {
        if self.poses.is_empty() {
            return Err(OptimizerError::NoFreePoses);
        }

        let pose_ids: Vec<PoseId> = self.poses.keys().copied().collect();
        let pose_index: HashMap<PoseId, usize> =
            pose_ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        let mut params = DVector::zeros(pose_ids.len() * 6);
        for (i, pose) in self.poses.values().enumerate() {
            params.fixed_rows_mut::<3>(i * 6).copy_from(&pose.rotation);
            params.fixed_rows_mut::<3>(i * 6 + 3).copy_from(&pose.translation);
        }

        let mut projections = Vec::with_capacity(self.observations.len());
        for obs in &self.observations {
            let &idx = pose_index
                .get(&obs.pose)
                .ok_or(OptimizerError::UnknownPose(obs.pose))?;
            let camera_id = self.poses[&obs.pose].camera;
            let camera = self
                .cameras
                .get(&camera_id)
                .ok_or(OptimizerError::UnknownCamera(camera_id))?;
            let point = *self
                .points
                .get(&obs.point)
                .ok_or(OptimizerError::UnknownPoint(obs.point))?;
            if !(obs.scale.is_finite() && obs.scale > 0.0) {
                return Err(OptimizerError::InvalidScale(obs.scale));
            }
            projections.push(ProjectionTerm {
                pose_index: idx,
                model: camera.model,
                point,
                observed: obs.observed,
                inv_scale: 1.0 / obs.scale,
            });
        }

        let mut priors = Vec::with_capacity(self.orientation_priors.len());
        for prior in &self.orientation_priors {
            let &idx = pose_index
                .get(&prior.pose)
                .ok_or(OptimizerError::UnknownPose(prior.pose))?;
            let norm = prior.axis.norm();
            if !(norm.is_finite() && norm > 0.0) {
                return Err(OptimizerError::Numerical(
                    "orientation prior axis has zero length".into(),
                ));
            }
            priors.push(PriorTerm {
                pose_index: idx,
                axis: prior.axis / norm,
                weight: prior.weight,
            });
        }

        Ok((
            PoseProblem {
                projections,
                priors,
                loss: self.loss,
                params,
            },
            pose_ids,
        ))
    }
}

impl Default for LmBundleAdjuster {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimizer for LmBundleAdjuster {
    fn add_fixed_camera(&mut self, camera: &Camera) {
        self.cameras.insert(camera.id, camera.clone());
    }

    fn add_free_pose(
        &mut self,
        id: PoseId,
        camera: CameraId,
        rotation: Vector3<f64>,
        translation: Vector3<f64>,
    ) {
        self.poses.insert(
            id,
            PoseVariable {
                camera,
                rotation,
                translation,
            },
        );
    }

    fn add_fixed_point(&mut self, id: PointId, coordinates: Vector3<f64>) {
        self.points.insert(id, coordinates);
    }

    fn add_point_projection_observation(
        &mut self,
        pose: PoseId,
        point: PointId,
        x: f64,
        y: f64,
        scale: f64,
    ) {
        self.observations.push(ProjectionObservation {
            pose,
            point,
            observed: Vector2::new(x, y),
            scale,
        });
    }

    fn add_orientation_prior(&mut self, pose: PoseId, axis: Vector3<f64>, weight: f64) {
        self.orientation_priors.push(OrientationPrior { pose, axis, weight });
    }

    fn set_loss_function(&mut self, loss: LossFunction) {
        self.loss = loss;
    }

    fn set_parameter_priors(&mut self, priors: IntrinsicPriors) {
        self.intrinsic_priors = priors;
    }

    fn set_thread_count(&mut self, threads: usize) {
        self.threads = threads.max(1);
    }

    /// Bounds residual evaluations. The LM patience counts multiples of
    /// `params + 1` evaluations, so the cap is converted on `run`.
    fn set_iteration_cap(&mut self, iterations: usize) {
        self.max_iterations = iterations.max(1);
    }

    fn set_linear_solver_strategy(&mut self, strategy: LinearSolverStrategy) {
        self.linear_solver = strategy;
    }

    fn run(&mut self) -> Result<SolverSummary, OptimizerError> {
        let t_start = Instant::now();
        let (problem, pose_ids) = self.build_problem()?;
        let num_residual_blocks = problem.projections.len() + problem.priors.len();
        let patience = self.max_iterations.div_ceil(problem.params.len() + 1).max(1);

        let initial_residuals = problem
            .residuals()
            .ok_or_else(|| OptimizerError::Numerical("non-finite initial residuals".into()))?;
        let initial_cost = 0.5 * initial_residuals.norm_squared();

        // The pose-only normal equations are at most 6n x 6n, so the dense QR
        // inside the LM implementation serves every strategy.
        let solver = LevenbergMarquardt::new()
            .with_patience(patience)
            .with_ftol(self.ftol)
            .with_xtol(self.xtol)
            .with_gtol(self.gtol);
        let (problem, report) = solver.minimize(problem);

        let finite = problem.params.iter().all(|v| v.is_finite());
        let converged = finite
            && matches!(
                report.termination,
                TerminationReason::Converged { .. }
                    | TerminationReason::Orthogonal
                    | TerminationReason::ResidualsZero
                    | TerminationReason::NoImprovementPossible(_)
            );

        if finite {
            for (i, id) in pose_ids.iter().enumerate() {
                if let Some(pose) = self.poses.get_mut(id) {
                    pose.rotation = problem.params.fixed_rows::<3>(i * 6).into_owned();
                    pose.translation = problem.params.fixed_rows::<3>(i * 6 + 3).into_owned();
                }
            }
        }

        debug!(
            "[LmBA] {} poses, {} residual blocks, {} evals, cost {:.3e} -> {:.3e} ({:?}) in {:.2} ms",
            pose_ids.len(),
            num_residual_blocks,
            report.number_of_evaluations,
            initial_cost,
            report.objective_function,
            report.termination,
            t_start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(SolverSummary {
            converged,
            evaluations: report.number_of_evaluations,
            initial_cost,
            final_cost: report.objective_function,
            num_residual_blocks,
            linear_solver: self.linear_solver,
            threads: self.threads,
            intrinsic_priors: self.intrinsic_priors,
            termination: format!("{:?}", report.termination),
        })
    }

    fn get_pose(&self, id: PoseId) -> Option<(Vector3<f64>, Vector3<f64>)> {
        self.poses
            .get(&id)
            .map(|pose| (pose.rotation, pose.translation))
    }

    fn get_point(&self, id: PointId) -> Option<Vector3<f64>> {
        self.points.get(&id).copied()
    }

    fn get_camera(&self, id: CameraId) -> Option<Camera> {
        self.cameras.get(&id).cloned()
    }
}

/// One projection residual block with all ids resolved.
struct ProjectionTerm {
    pose_index: usize,
    model: CameraModel,
    point: Vector3<f64>,
    observed: Vector2<f64>,
    inv_scale: f64,
}

/// One orientation prior residual block.
struct PriorTerm {
    pose_index: usize,
    axis: Vector3<f64>,
    weight: f64,
}

/// The least-squares problem handed to the LM solver.
struct PoseProblem {
    projections: Vec<ProjectionTerm>,
    priors: Vec<PriorTerm>,
    loss: LossFunction,
    params: DVector<f64>,
}

impl PoseProblem {
    fn num_residuals(&self) -> usize {
        self.projections.len() * 2 + self.priors.len() * 3
    }

    fn pose_params(&self, pose_index: usize) -> (Vector3<f64>, Vector3<f64>) {
        let base = pose_index * 6;
        (
            self.params.fixed_rows::<3>(base).into_owned(),
            self.params.fixed_rows::<3>(base + 3).into_owned(),
        )
    }

    /// Raw (unscaled by the loss) projection error and its Jacobian with
    /// respect to `[ω, t]`. `None` Jacobian when the point has no image.
    fn projection_error(&self, term: &ProjectionTerm) -> (Vector2<f64>, Option<Matrix2x6<f64>>) {
        let (omega, t) = self.pose_params(term.pose_index);
        let rotation = nalgebra::UnitQuaternion::from_scaled_axis(omega);
        let p_cam = rotation * term.point + t;

        let Some(projected) = term.model.project(&p_cam) else {
            return (
                Vector2::new(UNPROJECTABLE_RESIDUAL, UNPROJECTABLE_RESIDUAL),
                None,
            );
        };
        let error = (projected - term.observed) * term.inv_scale;

        let jacobian = term.model.projection_jacobian(&p_cam).map(|j_proj| {
            let mut d_pcam = Matrix3x6::zeros();
            d_pcam
                .fixed_view_mut::<3, 3>(0, 0)
                .copy_from(&rotate_point_jacobian(&omega, &term.point));
            d_pcam
                .fixed_view_mut::<3, 3>(0, 3)
                .copy_from(&Matrix3::identity());
            j_proj * d_pcam * term.inv_scale
        });

        (error, jacobian)
    }

    fn prior_error(&self, term: &PriorTerm) -> (Vector3<f64>, Matrix3<f64>) {
        let (omega, _) = self.pose_params(term.pose_index);
        let rotation = nalgebra::UnitQuaternion::from_scaled_axis(omega);
        let error = (rotation * term.axis - term.axis) * term.weight;
        let jacobian = rotate_point_jacobian(&omega, &term.axis) * term.weight;
        (error, jacobian)
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for PoseProblem {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, params: &DVector<f64>) {
        self.params.copy_from(params);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let mut residuals = DVector::zeros(self.num_residuals());

        for (i, term) in self.projections.iter().enumerate() {
            let (error, _) = self.projection_error(term);
            let (robust, _) = self.loss.robustify(&error);
            residuals.fixed_rows_mut::<2>(i * 2).copy_from(&robust);
        }

        let offset = self.projections.len() * 2;
        for (i, term) in self.priors.iter().enumerate() {
            let (error, _) = self.prior_error(term);
            residuals
                .fixed_rows_mut::<3>(offset + i * 3)
                .copy_from(&error);
        }

        residuals.iter().all(|v| v.is_finite()).then_some(residuals)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let mut jacobian = DMatrix::zeros(self.num_residuals(), self.params.len());

        for (i, term) in self.projections.iter().enumerate() {
            let (error, block) = self.projection_error(term);
            let Some(block) = block else {
                continue;
            };
            let (_, correction) = self.loss.robustify(&error);
            jacobian
                .fixed_view_mut::<2, 6>(i * 2, term.pose_index * 6)
                .copy_from(&(correction * block));
        }

        let offset = self.projections.len() * 2;
        for (i, term) in self.priors.iter().enumerate() {
            let (_, block) = self.prior_error(term);
            jacobian
                .fixed_view_mut::<3, 3>(offset + i * 3, term.pose_index * 6)
                .copy_from(&block);
        }

        jacobian.iter().all(|v| v.is_finite()).then_some(jacobian)
    }
}
