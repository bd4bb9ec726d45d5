//! Geometry utilities: rigid poses and SO(3) derivatives.

pub mod pose;
pub mod so3;

pub use pose::Pose;
