//! Frame-level inputs: camera models and 2D observations.

pub mod camera;

use nalgebra::Vector2;

pub use camera::{Camera, CameraModel};

/// A detected 2D feature in normalized image coordinates.
///
/// `scale` is the feature's size; projection residuals are divided by it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub x: f64,
    pub y: f64,
    pub scale: f64,
}

impl Observation {
    pub fn new(x: f64, y: f64, scale: f64) -> Self {
        Self { x, y, scale }
    }

    pub fn point(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }
}
