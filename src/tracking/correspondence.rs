//! 3D-2D correspondences between a reference frame's landmarks and the
//! current frame's detections.

use std::time::Instant;

use nalgebra::Vector3;
use tracing::debug;

use crate::error::TrackingError;
use crate::map::LandmarkId;
use crate::tracking::frame::{Camera, Observation};
use crate::tracking::matching::{FeatureStore, Matcher};
use crate::tracking::tracking_frame::Frame;

/// Parallel sequences of landmark positions and their observations.
///
/// `points3d[i]` is observed at `observations[i]`; both sequences always
/// have the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrespondenceSet {
    points3d: Vec<Vector3<f64>>,
    observations: Vec<Observation>,
    landmark_ids: Vec<LandmarkId>,
}

impl CorrespondenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, landmark: LandmarkId, point: Vector3<f64>, observation: Observation) {
        self.landmark_ids.push(landmark);
        self.points3d.push(point);
        self.observations.push(observation);
    }

    pub fn len(&self) -> usize {
        self.points3d.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points3d.is_empty()
    }

    pub fn points3d(&self) -> &[Vector3<f64>] {
        &self.points3d
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn landmark_ids(&self) -> &[LandmarkId] {
        &self.landmark_ids
    }
}

/// Builds a [`CorrespondenceSet`] from matcher output and enforces the
/// minimum-match gate.
pub struct CorrespondenceBuilder<M, S> {
    matcher: M,
    features: S,
    min_correspondences: usize,
    masked: bool,
}

impl<M: Matcher, S: FeatureStore> CorrespondenceBuilder<M, S> {
    pub fn new(matcher: M, features: S, min_correspondences: usize, masked: bool) -> Self {
        Self {
            matcher,
            features,
            min_correspondences,
            masked,
        }
    }

    /// Associate `source`'s visible landmarks with `target`'s detections.
    ///
    /// Fails with `SizeMismatch` when the matcher returns index lists of
    /// different lengths, `Collaborator` on out-of-range indices or store
    /// errors, and `InsufficientMatches` below the gate.
    pub fn build(
        &self,
        source: &Frame,
        target: &Frame,
        camera: &Camera,
    ) -> Result<CorrespondenceSet, TrackingError> {
        let t_start = Instant::now();

        let matches = self
            .matcher
            .match_landmarks_to_image(source, target, camera, self.masked)?;
        if matches.source_indices.len() != matches.target_indices.len() {
            return Err(TrackingError::SizeMismatch {
                points: matches.source_indices.len(),
                observations: matches.target_indices.len(),
            });
        }

        let landmarks = source.landmark_list();
        let points = self.features.load_points(target.id, self.masked)?;

        let mut set = CorrespondenceSet::new();
        for (&s, &t) in matches.source_indices.iter().zip(&matches.target_indices) {
            let landmark = landmarks.get(s).ok_or_else(|| {
                TrackingError::Collaborator(format!(
                    "landmark index {s} out of range ({} visible in {})",
                    landmarks.len(),
                    source.id
                ))
            })?;
            let &(_, feature) = matches.raw.get(t).ok_or_else(|| {
                TrackingError::Collaborator(format!(
                    "match index {t} out of range ({} raw matches)",
                    matches.raw.len()
                ))
            })?;
            let observation = points.get(feature).ok_or_else(|| {
                TrackingError::Collaborator(format!(
                    "feature index {feature} out of range ({} points in {})",
                    points.len(),
                    target.id
                ))
            })?;
            set.push(landmark.id, landmark.position, *observation);
        }

        debug!(
            "[Correspondence] {} -> {}: matcher count {}, {} correspondences in {:.2} ms",
            source.id,
            target.id,
            matches.count,
            set.len(),
            t_start.elapsed().as_secs_f64() * 1000.0
        );

        if set.len() < self.min_correspondences {
            return Err(TrackingError::InsufficientMatches {
                found: set.len(),
                required: self.min_correspondences,
            });
        }
        Ok(set)
    }
}
