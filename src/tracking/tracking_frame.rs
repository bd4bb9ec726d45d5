//! Tracking `Frame` representation.
//!
//! A frame is one timestamped capture plus the landmarks the mapper has
//! associated with it. Detected 2D features are served separately by a
//! [`FeatureStore`](crate::tracking::matching::FeatureStore) keyed by frame id.

use std::collections::BTreeMap;

use crate::map::{FrameId, Landmark, LandmarkId};

#[derive(Debug, Clone)]
pub struct Frame {
    pub id: FrameId,
    pub image_name: String,
    pub timestamp_ns: u64,
    /// Landmarks observed in this frame, ordered by id.
    pub visible_landmarks: BTreeMap<LandmarkId, Landmark>,
}

impl Frame {
    pub fn new(id: FrameId, image_name: impl Into<String>, timestamp_ns: u64) -> Self {
        Self {
            id,
            image_name: image_name.into(),
            timestamp_ns,
            visible_landmarks: BTreeMap::new(),
        }
    }

    pub fn with_landmarks(mut self, landmarks: impl IntoIterator<Item = Landmark>) -> Self {
        self.visible_landmarks
            .extend(landmarks.into_iter().map(|lm| (lm.id, lm)));
        self
    }

    pub fn add_landmark(&mut self, landmark: Landmark) {
        self.visible_landmarks.insert(landmark.id, landmark);
    }

    pub fn num_landmarks(&self) -> usize {
        self.visible_landmarks.len()
    }

    /// Visible landmarks in index order. Matcher indices refer to this order.
    pub fn landmark_list(&self) -> Vec<&Landmark> {
        self.visible_landmarks.values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::Descriptor;
    use nalgebra::Vector3;

    #[test]
    fn test_landmark_list_is_ordered_by_id() {
        let frame = Frame::new(FrameId::new(1), "img_001.png", 0).with_landmarks(
            [5u64, 1, 3].into_iter().map(|i| {
                Landmark::new(
                    LandmarkId::new(i),
                    Vector3::new(i as f64, 0.0, 1.0),
                    Descriptor::zeros(),
                )
            }),
        );

        let ids: Vec<u64> = frame.landmark_list().iter().map(|lm| lm.id.0).collect();
        assert_eq!(ids, vec![1, 3, 5]);
        assert_eq!(frame.landmark_list()[2].position, Vector3::new(5.0, 0.0, 1.0));
        assert_eq!(frame.num_landmarks(), 3);
    }
}
