//! Landmark-to-image matching collaborators.
//!
//! Tracking does not detect or describe features itself. It consumes:
//! - a [`Matcher`], associating a reference frame's visible landmarks with a
//!   target frame's detections
//! - a [`FeatureStore`], serving each frame's detections
//!
//! [`FeatureTable`] and [`DescriptorMatcher`] are in-memory implementations.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow, ensure};
use parking_lot::RwLock;
use tracing::debug;

use crate::config::MatcherConfig;
use crate::map::{Descriptor, FrameId};
use crate::tracking::frame::{Camera, Observation};
use crate::tracking::tracking_frame::Frame;

/// Matches between a source frame's landmarks and a target frame's features.
///
/// `source_indices[k]` indexes [`Frame::landmark_list`] of the source frame.
/// `target_indices[k]` indexes `raw`, whose second element is the feature
/// index in the target frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LandmarkMatches {
    pub count: usize,
    pub source_indices: Vec<usize>,
    pub target_indices: Vec<usize>,
    /// `(landmark index, feature index)` pairs.
    pub raw: Vec<(usize, usize)>,
}

impl LandmarkMatches {
    /// Build consistent index lists from raw pairs.
    pub fn from_pairs(raw: Vec<(usize, usize)>) -> Self {
        Self {
            count: raw.len(),
            source_indices: raw.iter().map(|&(landmark, _)| landmark).collect(),
            target_indices: (0..raw.len()).collect(),
            raw,
        }
    }
}

pub trait Matcher {
    /// Feature indices in the result refer to the target's detections as
    /// served by [`FeatureStore::load_points`] with the same `masked` flag.
    fn match_landmarks_to_image(
        &self,
        source: &Frame,
        target: &Frame,
        camera: &Camera,
        masked: bool,
    ) -> Result<LandmarkMatches>;
}

impl<T: Matcher + ?Sized> Matcher for Arc<T> {
    fn match_landmarks_to_image(
        &self,
        source: &Frame,
        target: &Frame,
        camera: &Camera,
        masked: bool,
    ) -> Result<LandmarkMatches> {
        (**self).match_landmarks_to_image(source, target, camera, masked)
    }
}

/// Source of detected 2D points, in normalized image coordinates.
pub trait FeatureStore {
    fn load_points(&self, frame: FrameId, masked: bool) -> Result<Vec<Observation>>;
}

impl<T: FeatureStore + ?Sized> FeatureStore for Arc<T> {
    fn load_points(&self, frame: FrameId, masked: bool) -> Result<Vec<Observation>> {
        (**self).load_points(frame, masked)
    }
}

/// Detections of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameFeatures {
    pub points: Vec<Observation>,
    pub descriptors: Vec<Descriptor>,
    /// `false` for detections excluded by the segmentation mask.
    pub mask: Vec<bool>,
}

impl FrameFeatures {
    pub fn new(points: Vec<Observation>, descriptors: Vec<Descriptor>) -> Result<Self> {
        let mask = vec![true; points.len()];
        Self::with_mask(points, descriptors, mask)
    }

    pub fn with_mask(
        points: Vec<Observation>,
        descriptors: Vec<Descriptor>,
        mask: Vec<bool>,
    ) -> Result<Self> {
        ensure!(
            points.len() == descriptors.len() && points.len() == mask.len(),
            "feature arrays differ in length: {} points, {} descriptors, {} mask entries",
            points.len(),
            descriptors.len(),
            mask.len()
        );
        Ok(Self {
            points,
            descriptors,
            mask,
        })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points and descriptors, restricted to unmasked detections if `masked`.
    pub fn select(&self, masked: bool) -> (Vec<Observation>, Vec<Descriptor>) {
        self.points
            .iter()
            .zip(&self.descriptors)
            .zip(&self.mask)
            .filter(|(_, keep)| !masked || **keep)
            .map(|((p, d), _)| (*p, *d))
            .unzip()
    }
}

/// Thread-safe in-memory feature store keyed by frame id.
#[derive(Debug, Default)]
pub struct FeatureTable {
    frames: RwLock<HashMap<FrameId, FrameFeatures>>,
}

impl FeatureTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, frame: FrameId, features: FrameFeatures) {
        self.frames.write().insert(frame, features);
    }

    pub fn select(&self, frame: FrameId, masked: bool) -> Result<(Vec<Observation>, Vec<Descriptor>)> {
        self.frames
            .read()
            .get(&frame)
            .map(|features| features.select(masked))
            .ok_or_else(|| anyhow!("no features stored for frame {frame}"))
    }
}

impl FeatureStore for FeatureTable {
    fn load_points(&self, frame: FrameId, masked: bool) -> Result<Vec<Observation>> {
        self.select(frame, masked).map(|(points, _)| points)
    }
}

/// Brute-force Hamming matcher between landmark descriptors and the target
/// frame's feature descriptors.
pub struct DescriptorMatcher {
    features: Arc<FeatureTable>,
    config: MatcherConfig,
}

impl DescriptorMatcher {
    pub fn new(features: Arc<FeatureTable>, config: MatcherConfig) -> Self {
        Self { features, config }
    }

    /// Best and second best distances of `query` against `candidates`.
    fn best_two(query: &Descriptor, candidates: &[Descriptor]) -> Option<(usize, u32, Option<u32>)> {
        let mut best: Option<(usize, u32)> = None;
        let mut second: Option<u32> = None;
        for (j, candidate) in candidates.iter().enumerate() {
            let dist = query.distance(candidate);
            match best {
                Some((_, best_dist)) if dist >= best_dist => {
                    if second.map_or(true, |s| dist < s) {
                        second = Some(dist);
                    }
                }
                _ => {
                    second = best.map(|(_, d)| d);
                    best = Some((j, dist));
                }
            }
        }
        best.map(|(j, d)| (j, d, second))
    }

    fn passes_ratio(&self, best: u32, second: Option<u32>) -> bool {
        match second {
            Some(second) => (best as f64) < self.config.nn_ratio * second as f64,
            None => true,
        }
    }
}

impl Matcher for DescriptorMatcher {
    fn match_landmarks_to_image(
        &self,
        source: &Frame,
        target: &Frame,
        _camera: &Camera,
        masked: bool,
    ) -> Result<LandmarkMatches> {
        let (_, features) = self.features.select(target.id, masked)?;
        let landmarks: Vec<Descriptor> = source
            .landmark_list()
            .iter()
            .map(|lm| lm.descriptor)
            .collect();

        let reverse_best: Vec<Option<usize>> = if self.config.cross_check {
            features
                .iter()
                .map(|f| Self::best_two(f, &landmarks).map(|(i, _, _)| i))
                .collect()
        } else {
            Vec::new()
        };

        let mut raw = Vec::new();
        for (i, descriptor) in landmarks.iter().enumerate() {
            let Some((j, best, second)) = Self::best_two(descriptor, &features) else {
                continue;
            };
            if best > self.config.max_descriptor_distance || !self.passes_ratio(best, second) {
                continue;
            }
            if self.config.cross_check && reverse_best[j] != Some(i) {
                continue;
            }
            raw.push((i, j));
        }

        debug!(
            "[Matcher] {} -> {}: {} matches ({} landmarks, {} features)",
            source.id,
            target.id,
            raw.len(),
            landmarks.len(),
            features.len()
        );

        Ok(LandmarkMatches::from_pairs(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{CameraId, Landmark, LandmarkId};
    use crate::tracking::frame::CameraModel;
    use nalgebra::Vector3;

    fn descriptor(seed: u8) -> Descriptor {
        let mut bytes = [0u8; 32];
        for (k, b) in bytes.iter_mut().enumerate() {
            *b = seed.wrapping_mul(37).wrapping_add((k as u8).wrapping_mul(91)) ^ (seed << 3);
        }
        Descriptor(bytes)
    }

    fn flip_bits(d: &Descriptor, n: usize) -> Descriptor {
        let mut out = *d;
        for k in 0..n {
            out.0[k] ^= 1;
        }
        out
    }

    fn camera() -> Camera {
        Camera::new(CameraId(0), 640, 480, CameraModel::pinhole(1.0))
    }

    fn source_frame(n: u8) -> Frame {
        Frame::new(FrameId::new(1), "a.png", 0).with_landmarks((0..n).map(|i| {
            Landmark::new(
                LandmarkId::new(i as u64),
                Vector3::new(i as f64, 0.0, 5.0),
                descriptor(i),
            )
        }))
    }

    #[test]
    fn test_frame_features_length_check() {
        let err = FrameFeatures::new(vec![Observation::new(0.0, 0.0, 1.0)], vec![]);
        assert!(err.is_err());
    }

    #[test]
    fn test_masked_selection() {
        let table = FeatureTable::new();
        let points = vec![
            Observation::new(0.1, 0.0, 1.0),
            Observation::new(0.2, 0.0, 1.0),
            Observation::new(0.3, 0.0, 1.0),
        ];
        let features = FrameFeatures::with_mask(
            points,
            vec![descriptor(0), descriptor(1), descriptor(2)],
            vec![true, false, true],
        )
        .unwrap();
        table.insert(FrameId::new(2), features);

        assert_eq!(table.load_points(FrameId::new(2), true).unwrap().len(), 2);
        assert_eq!(table.load_points(FrameId::new(2), false).unwrap().len(), 3);
        assert!(table.load_points(FrameId::new(9), true).is_err());
    }

    #[test]
    fn test_descriptor_matcher_finds_permuted_features() {
        let source = source_frame(6);
        let target = Frame::new(FrameId::new(2), "b.png", 1);

        // Target features are the landmarks in reverse order, slightly perturbed.
        let order = [5u8, 4, 3, 2, 1, 0];
        let table = Arc::new(FeatureTable::new());
        table.insert(
            target.id,
            FrameFeatures::new(
                order
                    .iter()
                    .map(|&i| Observation::new(i as f64, 0.0, 1.0))
                    .collect(),
                order.iter().map(|&i| flip_bits(&descriptor(i), 3)).collect(),
            )
            .unwrap(),
        );

        let matcher = DescriptorMatcher::new(table, MatcherConfig::default());
        let matches = matcher
            .match_landmarks_to_image(&source, &target, &camera(), true)
            .unwrap();

        assert_eq!(matches.count, 6);
        for (&s, &t) in matches.source_indices.iter().zip(&matches.target_indices) {
            let (landmark, feature) = matches.raw[t];
            assert_eq!(landmark, s);
            assert_eq!(order[feature] as usize, s);
        }
    }

    #[test]
    fn test_feature_indices_follow_masked_flag() {
        let source = source_frame(3);
        let target = Frame::new(FrameId::new(2), "b.png", 1);
        let table = Arc::new(FeatureTable::new());
        table.insert(
            target.id,
            FrameFeatures::with_mask(
                (0..3).map(|i| Observation::new(i as f64, 0.0, 1.0)).collect(),
                (0..3).map(descriptor).collect(),
                vec![false, true, true],
            )
            .unwrap(),
        );
        let matcher = DescriptorMatcher::new(table.clone(), MatcherConfig::default());

        let all = matcher
            .match_landmarks_to_image(&source, &target, &camera(), false)
            .unwrap();
        assert_eq!(all.raw, vec![(0, 0), (1, 1), (2, 2)]);

        let masked = matcher
            .match_landmarks_to_image(&source, &target, &camera(), true)
            .unwrap();
        assert_eq!(masked.raw, vec![(1, 0), (2, 1)]);
        let points = table.load_points(target.id, true).unwrap();
        assert_eq!(points[masked.raw[0].1].x, 1.0);
    }

    #[test]
    fn test_distant_descriptors_are_rejected() {
        let source = source_frame(1);
        let target = Frame::new(FrameId::new(2), "b.png", 1);
        let table = Arc::new(FeatureTable::new());
        let mut far = descriptor(0);
        for b in far.0.iter_mut() {
            *b = !*b;
        }
        table.insert(
            target.id,
            FrameFeatures::new(vec![Observation::new(0.0, 0.0, 1.0)], vec![far]).unwrap(),
        );

        let matcher = DescriptorMatcher::new(table, MatcherConfig::default());
        let matches = matcher
            .match_landmarks_to_image(&source, &target, &camera(), true)
            .unwrap();
        assert_eq!(matches, LandmarkMatches::default());
    }

    #[test]
    fn test_unknown_target_frame_is_an_error() {
        let matcher = DescriptorMatcher::new(Arc::new(FeatureTable::new()), MatcherConfig::default());
        let target = Frame::new(FrameId::new(3), "c.png", 0);
        assert!(
            matcher
                .match_landmarks_to_image(&source_frame(2), &target, &camera(), true)
                .is_err()
        );
    }
}
