//! Integer identifiers shared by frames, landmarks and cameras.

use serde::{Deserialize, Serialize};

/// Unique identifier for a captured frame.
///
/// Assigned by the caller in capture order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(pub u64);

impl FrameId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// Unique identifier for a triangulated landmark.
///
/// Stable for the landmark's whole lifetime; ordering of a frame's visible
/// set follows this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LandmarkId(pub u64);

impl LandmarkId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for LandmarkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Identifier of a camera (intrinsics set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct CameraId(pub u32);

impl std::fmt::Display for CameraId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "C{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_id_equality() {
        assert_eq!(FrameId::new(42), FrameId::new(42));
        assert_ne!(FrameId::new(42), FrameId::new(43));
    }

    #[test]
    fn test_id_display() {
        assert_eq!(format!("{}", LandmarkId::new(123)), "L123");
        assert_eq!(format!("{}", FrameId::new(7)), "F7");
        assert_eq!(format!("{}", CameraId(0)), "C0");
    }

    #[test]
    fn test_landmark_ids_sort_numerically() {
        let mut ids = vec![LandmarkId::new(10), LandmarkId::new(2), LandmarkId::new(7)];
        ids.sort();
        assert_eq!(ids, vec![LandmarkId::new(2), LandmarkId::new(7), LandmarkId::new(10)]);
    }
}
