//! SO(3) helpers for differentiating rotations parameterized by a rotation
//! vector (axis * angle).
//!
//! The pose solver optimizes the rotation vector `ω` directly, so the exact
//! derivative of `exp(ω) p` is needed:
//!
//! ```text
//! ∂(exp(ω) p)/∂ω = -exp(ω) [p]× Jr(ω)
//! ```

use nalgebra::{Matrix3, UnitQuaternion, Vector3};

/// Small angle threshold for numerical stability.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-6;

/// Constructs the skew-symmetric matrix [v]× such that [v]× u = v × u.
///
/// ```text
/// [v]× = |  0   -v_z   v_y |
///        |  v_z   0   -v_x |
///        | -v_y  v_x    0  |
/// ```
#[inline]
#[rustfmt::skip]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Computes the right Jacobian Jr(φ) of SO(3).
///
/// ```text
/// Jr(φ) = I - (1 - cos|φ|)/|φ|² [φ]× + (|φ| - sin|φ|)/|φ|³ [φ]×²
/// ```
///
/// For small angles (|φ| < ε) the first-order form `I - 0.5 [φ]×` is used.
pub fn right_jacobian_so3(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();

    if theta < SMALL_ANGLE_THRESHOLD {
        return Matrix3::identity() - 0.5 * skew(phi);
    }

    let theta_sq = theta * theta;
    let theta_cu = theta_sq * theta;
    let skew_phi = skew(phi);
    let skew_phi_sq = skew_phi * skew_phi;

    Matrix3::identity() - ((1.0 - theta.cos()) / theta_sq) * skew_phi
        + ((theta - theta.sin()) / theta_cu) * skew_phi_sq
}

/// Jacobian of `exp(ω) p` with respect to the rotation vector `ω`.
pub fn rotate_point_jacobian(rotation_vector: &Vector3<f64>, point: &Vector3<f64>) -> Matrix3<f64> {
    let rotation = UnitQuaternion::from_scaled_axis(*rotation_vector);
    -(rotation.to_rotation_matrix().into_inner() * skew(point))
        * right_jacobian_so3(rotation_vector)
}
