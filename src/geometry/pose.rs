//! Rigid camera pose.
//!
//! A `Pose` maps world coordinates into the camera frame (camera-from-world,
//! `T_cw`):
//!
//! ```text
//! p_cam = R * p_world + t
//! ```
//!
//! Composition follows the usual transform chaining, `(A * B) p = A (B p)`.

use std::ops::Mul;

use nalgebra::{UnitQuaternion, Vector3};

/// Camera-from-world rigid transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl Pose {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Build a pose from a rotation vector (axis * angle) and a translation.
    pub fn from_rotation_vector(rotation: Vector3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation: UnitQuaternion::from_scaled_axis(rotation),
            translation,
        }
    }

    /// Rotation as a rotation vector (axis * angle).
    pub fn rotation_vector(&self) -> Vector3<f64> {
        self.rotation.scaled_axis()
    }

    /// Transform a world point into the camera frame.
    #[inline]
    pub fn transform_point(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * point + self.translation
    }

    pub fn transform_many(&self, points: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        points.iter().map(|p| self.transform_point(p)).collect()
    }

    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// `self * other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &Pose) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// Optical center in world coordinates.
    pub fn origin(&self) -> Vector3<f64> {
        -(self.rotation.inverse() * self.translation)
    }

    /// Angle (radians) of the rotation taking `self` to `other`.
    pub fn rotation_distance(&self, other: &Pose) -> f64 {
        self.rotation.angle_to(&other.rotation)
    }

    /// Distance between the translation parts.
    pub fn translation_distance(&self, other: &Pose) -> f64 {
        (self.translation - other.translation).norm()
    }

    pub fn is_finite(&self) -> bool {
        self.rotation.coords.iter().all(|v| v.is_finite())
            && self.translation.iter().all(|v| v.is_finite())
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for Pose {
    type Output = Pose;

    fn mul(self, rhs: Pose) -> Pose {
        self.compose(&rhs)
    }
}

impl<'a> Mul<&'a Pose> for &'a Pose {
    type Output = Pose;

    fn mul(self, rhs: &'a Pose) -> Pose {
        self.compose(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_pose(seed: f64) -> Pose {
        Pose::from_rotation_vector(
            Vector3::new(0.1 * seed, -0.2, 0.05 * seed),
            Vector3::new(seed, 2.0, -0.5 * seed),
        )
    }

    #[test]
    fn test_identity_leaves_points_unchanged() {
        let p = Vector3::new(1.0, -2.0, 3.0);
        assert_relative_eq!(Pose::identity().transform_point(&p), p, epsilon = 1e-12);
    }

    #[test]
    fn test_inverse_round_trip() {
        let pose = sample_pose(1.5);
        let p = Vector3::new(0.3, 0.7, 5.0);
        let back = pose.inverse().transform_point(&pose.transform_point(&p));
        assert_relative_eq!(back, p, epsilon = 1e-12);
    }

    #[test]
    fn test_composition_is_associative() {
        let a = sample_pose(1.0);
        let b = sample_pose(2.0);
        let c = sample_pose(-0.7);

        let left = (a * b) * c;
        let right = a * (b * c);

        assert_relative_eq!(left.translation, right.translation, epsilon = 1e-12);
        assert!(left.rotation_distance(&right) < 1e-12);
    }

    #[test]
    fn test_composition_applies_right_operand_first() {
        let a = sample_pose(1.0);
        let b = sample_pose(3.0);
        let p = Vector3::new(1.0, 1.0, 1.0);

        let chained = a.transform_point(&b.transform_point(&p));
        assert_relative_eq!((&a * &b).transform_point(&p), chained, epsilon = 1e-12);
    }

    #[test]
    fn test_origin_maps_to_camera_center() {
        let pose = sample_pose(0.4);
        let center = pose.origin();
        assert_relative_eq!(pose.transform_point(&center), Vector3::zeros(), epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_vector_round_trip() {
        let omega = Vector3::new(0.2, -0.4, 0.9);
        let pose = Pose::from_rotation_vector(omega, Vector3::zeros());
        assert_relative_eq!(pose.rotation_vector(), omega, epsilon = 1e-12);
    }
}
