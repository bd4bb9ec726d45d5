//! Main tracker: localizes each new frame against the mapper's landmarks.
//!
//! Two attempts at most per frame:
//! 1. landmarks of the mapper's last frame, initial pose from the mapper's
//!    motion prediction
//! 2. if that fails and the last frame is not the last keyframe: landmarks of
//!    the last keyframe, identity initial pose (the temporal gap may be large)
//!
//! The tracker never mutates the map. Adding the tracked frame is the
//! mapper's job.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::error::TrackingError;
use crate::geometry::Pose;
use crate::tracking::TrackingState;
use crate::tracking::correspondence::CorrespondenceBuilder;
use crate::tracking::frame::Camera;
use crate::tracking::matching::{FeatureStore, Matcher};
use crate::tracking::observer::{ReprojectionReport, TrackingObserver};
use crate::tracking::pose_solver::{OptimizerFactory, PoseSolver};
use crate::tracking::result::{AttemptReport, ReferenceKind, TrackingResult};
use crate::tracking::tracking_frame::Frame;

/// The mapping side as seen by the tracker.
pub trait Mapper {
    /// Initial guess for the next frame's pose (identity if unavailable).
    fn estimate_pose(&self) -> Pose;

    fn last_frame(&self) -> &Frame;

    fn last_keyframe(&self) -> &Frame;
}

pub struct Tracker<M, S, F> {
    correspondences: CorrespondenceBuilder<M, S>,
    solver: PoseSolver<F>,
    config: TrackerConfig,
    observer: Option<Box<dyn TrackingObserver + Send + Sync>>,
}

impl<M, S, F> Tracker<M, S, F>
where
    M: Matcher,
    S: FeatureStore,
    F: OptimizerFactory,
{
    pub fn new(matcher: M, features: S, solver: PoseSolver<F>, config: TrackerConfig) -> Self {
        let correspondences = CorrespondenceBuilder::new(
            matcher,
            features,
            config.min_correspondences,
            config.masked_features,
        );
        Self {
            correspondences,
            solver,
            config,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: impl TrackingObserver + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Estimate the camera-from-world pose of `frame`.
    pub fn track(&self, mapper: &impl Mapper, frame: &Frame, camera: &Camera) -> TrackingResult {
        let t_start = Instant::now();
        let mut attempts = Vec::with_capacity(2);
        let mut state = TrackingState::AttemptLastFrame;

        let last_frame = mapper.last_frame();
        let mut pose = self.attempt(
            ReferenceKind::LastFrame,
            last_frame,
            frame,
            mapper.estimate_pose(),
            camera,
            &mut attempts,
        );

        let last_keyframe = mapper.last_keyframe();
        if pose.is_none() && last_frame.id != last_keyframe.id {
            state = TrackingState::AttemptLastKeyframe;
            debug!(
                "[Tracker] {}: falling back to last keyframe {}",
                frame.id, last_keyframe.id
            );
            pose = self.attempt(
                ReferenceKind::LastKeyframe,
                last_keyframe,
                frame,
                Pose::identity(),
                camera,
                &mut attempts,
            );
        }

        let total_ms = t_start.elapsed().as_secs_f64() * 1000.0;
        match pose {
            Some(_) => {
                state = TrackingState::Tracked;
                debug!(
                    "[Tracker] {} tracked after {} attempt(s) in {:.2} ms",
                    frame.id,
                    attempts.len(),
                    total_ms
                );
            }
            None => {
                warn!(
                    "[Tracker] {} lost after {} attempt(s) ({:?})",
                    frame.id,
                    attempts.len(),
                    state
                );
                state = TrackingState::Lost;
            }
        }

        TrackingResult {
            frame: frame.id,
            state,
            pose,
            attempts,
            total_ms,
        }
    }

    /// One build-and-solve attempt against `reference`. Failures are recorded
    /// in `attempts`, never propagated.
    fn attempt(
        &self,
        kind: ReferenceKind,
        reference: &Frame,
        frame: &Frame,
        init_pose: Pose,
        camera: &Camera,
        attempts: &mut Vec<AttemptReport>,
    ) -> Option<Pose> {
        let t_start = Instant::now();
        let mut correspondences = 0;

        let outcome = match self.correspondences.build(reference, frame, camera) {
            Ok(set) => {
                correspondences = set.len();
                self.solver
                    .estimate(
                        set.points3d(),
                        set.observations(),
                        &init_pose,
                        camera,
                        &self.config.solver,
                    )
                    .inspect(|pose| {
                        if let Some(observer) = &self.observer {
                            observer.on_reprojection(&ReprojectionReport::new(
                                frame.id,
                                &frame.image_name,
                                kind,
                                set.points3d(),
                                set.observations(),
                                &init_pose,
                                pose,
                                camera,
                            ));
                        }
                    })
            }
            Err(err) => {
                if let TrackingError::InsufficientMatches { found, .. } = err {
                    correspondences = found;
                }
                Err(err)
            }
        };

        if let Err(err) = &outcome {
            info!(
                "[Tracker] {} against {} {} failed: {}",
                frame.id, kind, reference.id, err
            );
        }

        attempts.push(AttemptReport {
            reference: kind,
            reference_frame: reference.id,
            init_pose,
            correspondences,
            failure: outcome.as_ref().err().cloned(),
            elapsed_ms: t_start.elapsed().as_secs_f64() * 1000.0,
        });
        outcome.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{CameraId, Descriptor, FrameId, Landmark, LandmarkId};
    use crate::optimizer::LmBundleAdjuster;
    use crate::tracking::frame::{CameraModel, Observation};
    use crate::tracking::matching::LandmarkMatches;
    use crate::tracking::observer::ChannelObserver;
    use anyhow::{Result, anyhow};
    use nalgebra::Vector3;
    use std::collections::HashMap;

    /// Identity matching, with a per-reference-frame match count. Frames
    /// without a count make the matcher fail.
    struct CountMatcher {
        counts: HashMap<FrameId, usize>,
    }

    impl Matcher for CountMatcher {
        fn match_landmarks_to_image(
            &self,
            source: &Frame,
            _target: &Frame,
            _camera: &Camera,
            _masked: bool,
        ) -> Result<LandmarkMatches> {
            let n = self
                .counts
                .get(&source.id)
                .copied()
                .ok_or_else(|| anyhow!("no descriptors for {}", source.id))?;
            Ok(LandmarkMatches::from_pairs((0..n).map(|i| (i, i)).collect()))
        }
    }

    struct Projections(Vec<Observation>);

    impl FeatureStore for Projections {
        fn load_points(&self, _frame: FrameId, _masked: bool) -> Result<Vec<Observation>> {
            Ok(self.0.clone())
        }
    }

    struct TwoFrames {
        last: Frame,
        keyframe: Frame,
        prediction: Pose,
    }

    impl Mapper for TwoFrames {
        fn estimate_pose(&self) -> Pose {
            self.prediction
        }
        fn last_frame(&self) -> &Frame {
            &self.last
        }
        fn last_keyframe(&self) -> &Frame {
            &self.keyframe
        }
    }

    fn scene(truth: &Pose, camera: &Camera) -> (Vec<Landmark>, Vec<Observation>) {
        let mut landmarks = Vec::new();
        let mut observations = Vec::new();
        for i in 0..120u64 {
            let p = Vector3::new(
                (i % 12) as f64 * 0.3 - 1.65,
                (i / 12) as f64 * 0.3 - 1.35,
                5.0 + (i % 7) as f64 * 0.25,
            );
            let uv = camera.project(&truth.transform_point(&p)).unwrap();
            landmarks.push(Landmark::new(LandmarkId::new(i), p, Descriptor::zeros()));
            observations.push(Observation::new(uv.x, uv.y, 1.0));
        }
        (landmarks, observations)
    }

    fn tracker(
        counts: &[(u64, usize)],
        observations: Vec<Observation>,
    ) -> Tracker<CountMatcher, Projections, fn() -> LmBundleAdjuster> {
        let matcher = CountMatcher {
            counts: counts.iter().map(|&(id, n)| (FrameId::new(id), n)).collect(),
        };
        Tracker::new(
            matcher,
            Projections(observations),
            PoseSolver::levenberg_marquardt(),
            TrackerConfig::default(),
        )
    }

    fn setup() -> (Camera, Pose, TwoFrames, Vec<Observation>, Frame) {
        let camera = Camera::new(CameraId(0), 640, 480, CameraModel::pinhole(1.0));
        let truth = Pose::from_rotation_vector(Vector3::new(0.0, 0.04, 0.0), Vector3::new(0.1, 0.0, 0.0));
        let (landmarks, observations) = scene(&truth, &camera);
        let mapper = TwoFrames {
            last: Frame::new(FrameId::new(9), "9.png", 9).with_landmarks(landmarks.clone()),
            keyframe: Frame::new(FrameId::new(5), "5.png", 5).with_landmarks(landmarks),
            prediction: Pose::from_rotation_vector(Vector3::new(0.0, 0.03, 0.0), Vector3::new(0.08, 0.0, 0.0)),
        };
        let frame = Frame::new(FrameId::new(10), "10.png", 10);
        (camera, truth, mapper, observations, frame)
    }

    #[test]
    fn test_tracks_against_last_frame() {
        let (camera, truth, mapper, observations, frame) = setup();
        let tracker = tracker(&[(9, 120), (5, 120)], observations);

        let result = tracker.track(&mapper, &frame, &camera);
        assert_eq!(result.state, TrackingState::Tracked);
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.attempts[0].init_pose, mapper.prediction);
        assert_eq!(result.attempts[0].correspondences, 120);
        assert!(result.into_pose().unwrap().rotation_distance(&truth) < 1e-6);
    }

    #[test]
    fn test_falls_back_to_keyframe_with_identity() {
        let (camera, truth, mapper, observations, frame) = setup();
        let tracker = tracker(&[(9, 99), (5, 100)], observations);

        let result = tracker.track(&mapper, &frame, &camera);
        assert_eq!(result.state, TrackingState::Tracked);
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(
            result.attempts[0].failure,
            Some(TrackingError::InsufficientMatches {
                found: 99,
                required: 100
            })
        );
        assert_eq!(result.attempts[1].reference, ReferenceKind::LastKeyframe);
        assert_eq!(result.attempts[1].reference_frame, FrameId::new(5));
        assert_eq!(result.attempts[1].init_pose, Pose::identity());
        assert!(result.into_pose().unwrap().translation_distance(&truth) < 1e-6);
    }

    #[test]
    fn test_matcher_failure_falls_back_to_keyframe() {
        let (camera, truth, mapper, observations, frame) = setup();
        let tracker = tracker(&[(5, 120)], observations);

        let result = tracker.track(&mapper, &frame, &camera);
        assert_eq!(result.state, TrackingState::Tracked);
        assert_eq!(result.attempts.len(), 2);
        assert!(matches!(
            result.attempts[0].failure,
            Some(TrackingError::Collaborator(_))
        ));
        assert_eq!(result.attempts[1].reference, ReferenceKind::LastKeyframe);
        assert_eq!(result.attempts[1].init_pose, Pose::identity());
        assert!(result.attempts[1].succeeded());
        assert!(result.into_pose().unwrap().rotation_distance(&truth) < 1e-6);
    }

    #[test]
    fn test_lost_without_distinct_keyframe() {
        let (camera, _, mut mapper, observations, frame) = setup();
        mapper.keyframe = mapper.last.clone();
        let tracker = tracker(&[(9, 10)], observations);

        let result = tracker.track(&mapper, &frame, &camera);
        assert_eq!(result.state, TrackingState::Lost);
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.into_pose(), Err(TrackingError::Lost { attempts: 1 }));
    }

    #[test]
    fn test_observer_receives_report_after_success() {
        let (camera, _, mapper, observations, frame) = setup();
        let (observer, receiver) = ChannelObserver::bounded(4);
        let tracker = tracker(&[(9, 120)], observations).with_observer(observer);

        assert!(tracker.track(&mapper, &frame, &camera).is_tracked());
        let report = receiver.try_recv().unwrap();
        assert_eq!(report.frame, FrameId::new(10));
        assert_eq!(report.observed.len(), 120);
        assert!(report.mean_error_final().unwrap() < 1e-6);
    }
}
