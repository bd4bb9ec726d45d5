//! Read-only map data seen by the tracker.
//!
//! - [`Landmark`] - triangulated 3D points owned by the mapper
//! - [`FrameId`], [`LandmarkId`], [`CameraId`] - integer handles

pub mod landmark;
pub mod types;

pub use landmark::{Descriptor, Landmark, DESCRIPTOR_BYTES};
pub use types::{CameraId, FrameId, LandmarkId};
