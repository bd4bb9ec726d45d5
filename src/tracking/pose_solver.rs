//! Single-pose bundle adjustment against fixed landmarks.
//!
//! One free 6-DoF pose, a fixed camera, fixed points, one robust projection
//! term per correspondence and a weak orientation prior on the camera's up
//! axis. The numerics belong to the [`Optimizer`] the factory produces.

use std::time::Instant;

use nalgebra::Vector3;
use tracing::debug;

use crate::config::SolverConfig;
use crate::error::TrackingError;
use crate::geometry::Pose;
use crate::optimizer::{LmBundleAdjuster, Optimizer, PointId, PoseId};
use crate::tracking::frame::{Camera, Observation};

/// Id of the single free pose in every tracking problem.
const TRACKED_POSE: PoseId = PoseId(0);

/// Produces one fresh optimizer per pose solve.
pub trait OptimizerFactory {
    type Optimizer: Optimizer;

    fn create(&self) -> Self::Optimizer;
}

impl<F, O> OptimizerFactory for F
where
    F: Fn() -> O,
    O: Optimizer,
{
    type Optimizer = O;

    fn create(&self) -> O {
        self()
    }
}

pub struct PoseSolver<F> {
    factory: F,
}

impl PoseSolver<fn() -> LmBundleAdjuster> {
    /// Solver backed by the built-in Levenberg-Marquardt adjuster.
    pub fn levenberg_marquardt() -> Self {
        Self::new(LmBundleAdjuster::new)
    }
}

impl<F: OptimizerFactory> PoseSolver<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    /// Refine `init_pose` so that `points3d` project onto `observations`.
    ///
    /// Returns `SizeMismatch` without creating an optimizer when the inputs
    /// differ in length, `SolverDivergence` without one when they are empty,
    /// and `SolverDivergence` when the optimizer fails,
    /// does not converge, or returns a non-finite pose.
    pub fn estimate(
        &self,
        points3d: &[Vector3<f64>],
        observations: &[Observation],
        init_pose: &Pose,
        camera: &Camera,
        config: &SolverConfig,
    ) -> Result<Pose, TrackingError> {
        if points3d.len() != observations.len() {
            return Err(TrackingError::SizeMismatch {
                points: points3d.len(),
                observations: observations.len(),
            });
        }
        if points3d.is_empty() {
            return Err(TrackingError::SolverDivergence(
                "no correspondences to constrain the pose".into(),
            ));
        }

        let t_setup = Instant::now();
        let mut optimizer = self.factory.create();

        optimizer.add_fixed_camera(camera);
        optimizer.add_free_pose(
            TRACKED_POSE,
            camera.id,
            init_pose.rotation_vector(),
            init_pose.translation,
        );

        for (i, (point, obs)) in points3d.iter().zip(observations).enumerate() {
            let point_id = PointId(i as u32);
            optimizer.add_fixed_point(point_id, *point);
            optimizer.add_point_projection_observation(
                TRACKED_POSE,
                point_id,
                obs.x,
                obs.y,
                obs.scale,
            );
        }

        optimizer.add_orientation_prior(TRACKED_POSE, config.up_axis(), config.up_vector_weight);
        optimizer.set_loss_function(config.loss());
        optimizer.set_parameter_priors(config.intrinsic_priors);
        optimizer.set_thread_count(config.threads);
        optimizer.set_iteration_cap(config.max_iterations);
        optimizer.set_linear_solver_strategy(config.linear_solver);
        let setup_ms = t_setup.elapsed().as_secs_f64() * 1000.0;

        let t_run = Instant::now();
        let summary = optimizer
            .run()
            .map_err(|e| TrackingError::SolverDivergence(e.to_string()))?;
        let run_ms = t_run.elapsed().as_secs_f64() * 1000.0;

        debug!(
            "[PoseSolver] {} observations: setup_ms={:.2} run_ms={:.2} cost {:.3e} -> {:.3e}, {}",
            points3d.len(),
            setup_ms,
            run_ms,
            summary.initial_cost,
            summary.final_cost,
            summary.termination
        );

        if !summary.converged {
            return Err(TrackingError::SolverDivergence(format!(
                "no convergence after {} evaluations ({})",
                summary.evaluations, summary.termination
            )));
        }

        let (rotation, translation) = optimizer.get_pose(TRACKED_POSE).ok_or_else(|| {
            TrackingError::SolverDivergence("optimizer lost the tracked pose".into())
        })?;
        let pose = Pose::from_rotation_vector(rotation, translation);
        if !pose.is_finite() {
            return Err(TrackingError::SolverDivergence("non-finite pose".into()));
        }

        debug!(
            "[PoseSolver] pose moved by {:.4} rad / {:.4} from the initial guess",
            pose.rotation_distance(init_pose),
            pose.translation_distance(init_pose)
        );
        Ok(pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::CameraId;
    use crate::optimizer::{
        IntrinsicPriors, LinearSolverStrategy, LossFunction, LossKind, OptimizerError,
        SolverSummary,
    };
    use crate::tracking::frame::CameraModel;
    use approx::assert_relative_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Record {
        created: usize,
        cameras: Vec<CameraId>,
        poses: Vec<(PoseId, CameraId, Vector3<f64>, Vector3<f64>)>,
        points: usize,
        observations: Vec<(PoseId, PointId, f64, f64, f64)>,
        priors: Vec<(PoseId, Vector3<f64>, f64)>,
        loss: Option<LossFunction>,
        intrinsic_priors: Option<IntrinsicPriors>,
        threads: Option<usize>,
        iterations: Option<usize>,
        linear_solver: Option<LinearSolverStrategy>,
    }

    /// Records the problem; `run` returns a canned outcome and echoes the pose.
    struct RecordingOptimizer {
        record: Rc<RefCell<Record>>,
        converged: bool,
        result: Option<Vector3<f64>>,
    }

    impl Optimizer for RecordingOptimizer {
        fn add_fixed_camera(&mut self, camera: &Camera) {
            self.record.borrow_mut().cameras.push(camera.id);
        }
        fn add_free_pose(&mut self, id: PoseId, camera: CameraId, r: Vector3<f64>, t: Vector3<f64>) {
            self.record.borrow_mut().poses.push((id, camera, r, t));
        }
        fn add_fixed_point(&mut self, _id: PointId, _coordinates: Vector3<f64>) {
            self.record.borrow_mut().points += 1;
        }
        fn add_point_projection_observation(&mut self, pose: PoseId, point: PointId, x: f64, y: f64, scale: f64) {
            self.record.borrow_mut().observations.push((pose, point, x, y, scale));
        }
        fn add_orientation_prior(&mut self, pose: PoseId, axis: Vector3<f64>, weight: f64) {
            self.record.borrow_mut().priors.push((pose, axis, weight));
        }
        fn set_loss_function(&mut self, loss: LossFunction) {
            self.record.borrow_mut().loss = Some(loss);
        }
        fn set_parameter_priors(&mut self, priors: IntrinsicPriors) {
            self.record.borrow_mut().intrinsic_priors = Some(priors);
        }
        fn set_thread_count(&mut self, threads: usize) {
            self.record.borrow_mut().threads = Some(threads);
        }
        fn set_iteration_cap(&mut self, iterations: usize) {
            self.record.borrow_mut().iterations = Some(iterations);
        }
        fn set_linear_solver_strategy(&mut self, strategy: LinearSolverStrategy) {
            self.record.borrow_mut().linear_solver = Some(strategy);
        }
        fn run(&mut self) -> Result<SolverSummary, OptimizerError> {
            Ok(SolverSummary {
                converged: self.converged,
                evaluations: 1,
                initial_cost: 0.0,
                final_cost: 0.0,
                num_residual_blocks: 0,
                linear_solver: LinearSolverStrategy::default(),
                threads: 1,
                intrinsic_priors: IntrinsicPriors::default(),
                termination: "canned".into(),
            })
        }
        fn get_pose(&self, _id: PoseId) -> Option<(Vector3<f64>, Vector3<f64>)> {
            self.result.map(|t| (Vector3::zeros(), t))
        }
        fn get_point(&self, _id: PointId) -> Option<Vector3<f64>> {
            None
        }
        fn get_camera(&self, _id: CameraId) -> Option<Camera> {
            None
        }
    }

    fn recording_solver(
        converged: bool,
        result: Option<Vector3<f64>>,
    ) -> (PoseSolver<impl Fn() -> RecordingOptimizer>, Rc<RefCell<Record>>) {
        let record = Rc::new(RefCell::new(Record::default()));
        let shared = record.clone();
        let solver = PoseSolver::new(move || {
            shared.borrow_mut().created += 1;
            RecordingOptimizer {
                record: shared.clone(),
                converged,
                result,
            }
        });
        (solver, record)
    }

    fn camera() -> Camera {
        Camera::new(CameraId(2), 640, 480, CameraModel::pinhole(1.0))
    }

    fn inputs(n: usize) -> (Vec<Vector3<f64>>, Vec<Observation>) {
        let points = (0..n)
            .map(|i| Vector3::new(i as f64 * 0.1, 0.0, 5.0))
            .collect();
        let observations = (0..n)
            .map(|i| Observation::new(i as f64 * 0.02, 0.0, 0.5))
            .collect();
        (points, observations)
    }

    #[test]
    fn test_problem_structure() {
        let (solver, record) = recording_solver(true, Some(Vector3::new(0.0, 0.0, 1.0)));
        let (points, observations) = inputs(5);
        let init = Pose::from_rotation_vector(Vector3::new(0.0, 0.1, 0.0), Vector3::new(1.0, 2.0, 3.0));
        let config = SolverConfig {
            loss_function: LossKind::Huber,
            threads: 3,
            max_iterations: 7,
            linear_solver: LinearSolverStrategy::DenseSchur,
            ..SolverConfig::default()
        };

        let pose = solver
            .estimate(&points, &observations, &init, &camera(), &config)
            .unwrap();
        assert_eq!(pose.translation, Vector3::new(0.0, 0.0, 1.0));

        let record = record.borrow();
        assert_eq!(record.created, 1);
        assert_eq!(record.cameras, vec![CameraId(2)]);
        assert_eq!(record.poses.len(), 1);
        let (id, cam, r, t) = record.poses[0];
        assert_eq!((id, cam), (PoseId(0), CameraId(2)));
        assert_relative_eq!(r, Vector3::new(0.0, 0.1, 0.0), epsilon = 1e-12);
        assert_eq!(t, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(record.points, 5);
        assert_eq!(record.observations.len(), 5);
        assert_eq!(record.observations[4], (PoseId(0), PointId(4), 0.08, 0.0, 0.5));
        assert_eq!(record.priors, vec![(PoseId(0), Vector3::new(0.0, 0.0, -1.0), 1e-3)]);
        assert_eq!(record.loss, Some(LossFunction::new(LossKind::Huber, 1.0)));
        assert_eq!(record.intrinsic_priors, Some(IntrinsicPriors::default()));
        assert_eq!(record.threads, Some(3));
        assert_eq!(record.iterations, Some(7));
        assert_eq!(record.linear_solver, Some(LinearSolverStrategy::DenseSchur));
    }

    #[test]
    fn test_size_mismatch_never_creates_optimizer() {
        let (solver, record) = recording_solver(true, Some(Vector3::zeros()));
        let (points, observations) = inputs(5);
        let err = solver
            .estimate(&points, &observations[..4], &Pose::identity(), &camera(), &SolverConfig::default())
            .unwrap_err();
        assert_eq!(
            err,
            TrackingError::SizeMismatch {
                points: 5,
                observations: 4
            }
        );
        assert_eq!(record.borrow().created, 0);
    }

    #[test]
    fn test_empty_input_is_divergence() {
        let (solver, record) = recording_solver(true, Some(Vector3::zeros()));
        let err = solver
            .estimate(&[], &[], &Pose::identity(), &camera(), &SolverConfig::default())
            .unwrap_err();
        assert!(matches!(err, TrackingError::SolverDivergence(_)));
        assert_eq!(record.borrow().created, 0);
    }

    #[test]
    fn test_non_convergence_is_divergence() {
        let (solver, _) = recording_solver(false, Some(Vector3::zeros()));
        let (points, observations) = inputs(3);
        let err = solver
            .estimate(&points, &observations, &Pose::identity(), &camera(), &SolverConfig::default())
            .unwrap_err();
        assert!(matches!(err, TrackingError::SolverDivergence(_)));
    }

    #[test]
    fn test_non_finite_pose_is_divergence() {
        let (solver, _) = recording_solver(true, Some(Vector3::new(f64::NAN, 0.0, 0.0)));
        let (points, observations) = inputs(3);
        let err = solver
            .estimate(&points, &observations, &Pose::identity(), &camera(), &SolverConfig::default())
            .unwrap_err();
        assert!(matches!(err, TrackingError::SolverDivergence(_)));
    }

    #[test]
    fn test_levenberg_marquardt_recovers_pose() {
        let truth = Pose::from_rotation_vector(
            Vector3::new(0.03, -0.05, 0.02),
            Vector3::new(0.2, 0.1, -0.3),
        );
        let camera = camera();
        let mut points = Vec::new();
        let mut observations = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                let p = Vector3::new(i as f64 * 0.4 - 1.8, j as f64 * 0.3 - 1.35, 4.0 + (i + j) as f64 * 0.1);
                let uv = camera.project(&truth.transform_point(&p)).unwrap();
                points.push(p);
                observations.push(Observation::new(uv.x, uv.y, 1.0));
            }
        }

        let solver = PoseSolver::levenberg_marquardt();
        let pose = solver
            .estimate(&points, &observations, &Pose::identity(), &camera, &SolverConfig::default())
            .unwrap();
        assert!(pose.rotation_distance(&truth) < 1e-3);
        assert!(pose.translation_distance(&truth) < 1e-3);
    }
}
