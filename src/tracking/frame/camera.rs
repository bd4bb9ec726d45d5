//! Camera models projecting camera-frame points to normalized image coordinates.
//!
//! Normalized coordinates are centered on the image and scaled by
//! `max(width, height)`, so intrinsics are resolution independent.

use nalgebra::{Matrix2, Matrix2x3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::map::CameraId;

/// Points closer than this to the projection singularity are rejected.
const MIN_DEPTH: f64 = 1e-9;

/// Relative step for finite-difference projection Jacobians.
const JACOBIAN_STEP: f64 = 1e-6;

/// Projection model and its intrinsics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "projection_type", rename_all = "snake_case")]
pub enum CameraModel {
    /// Pinhole with two radial distortion terms.
    Perspective { focal: f64, k1: f64, k2: f64 },
    /// Pinhole with separate focal lengths, principal point, radial and
    /// tangential distortion.
    Brown {
        focal_x: f64,
        focal_y: f64,
        c_x: f64,
        c_y: f64,
        k1: f64,
        k2: f64,
        k3: f64,
        p1: f64,
        p2: f64,
    },
    /// Equidistant fisheye with two radial distortion terms.
    Fisheye { focal: f64, k1: f64, k2: f64 },
    /// Equirectangular panorama.
    Spherical,
}

impl CameraModel {
    /// Distortion-free pinhole model.
    pub fn pinhole(focal: f64) -> Self {
        CameraModel::Perspective {
            focal,
            k1: 0.0,
            k2: 0.0,
        }
    }

    /// Project a camera-frame point. Returns `None` when the point has no
    /// image under this model (behind a pinhole camera, at the center of a
    /// panorama).
    pub fn project(&self, p: &Vector3<f64>) -> Option<Vector2<f64>> {
        match *self {
            CameraModel::Perspective { focal, k1, k2 } => {
                if p.z <= MIN_DEPTH {
                    return None;
                }
                let xn = p.x / p.z;
                let yn = p.y / p.z;
                let r2 = xn * xn + yn * yn;
                let d = 1.0 + r2 * (k1 + k2 * r2);
                Some(Vector2::new(focal * d * xn, focal * d * yn))
            }
            CameraModel::Brown {
                focal_x,
                focal_y,
                c_x,
                c_y,
                k1,
                k2,
                k3,
                p1,
                p2,
            } => {
                if p.z <= MIN_DEPTH {
                    return None;
                }
                let xn = p.x / p.z;
                let yn = p.y / p.z;
                let r2 = xn * xn + yn * yn;
                let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));
                let xd = xn * radial + 2.0 * p1 * xn * yn + p2 * (r2 + 2.0 * xn * xn);
                let yd = yn * radial + p1 * (r2 + 2.0 * yn * yn) + 2.0 * p2 * xn * yn;
                Some(Vector2::new(focal_x * xd + c_x, focal_y * yd + c_y))
            }
            CameraModel::Fisheye { focal, k1, k2 } => {
                let l = (p.x * p.x + p.y * p.y).sqrt();
                if l < MIN_DEPTH {
                    return if p.z > 0.0 {
                        Some(Vector2::zeros())
                    } else {
                        None
                    };
                }
                let theta = l.atan2(p.z);
                let theta2 = theta * theta;
                let d = 1.0 + theta2 * (k1 + k2 * theta2);
                let s = focal * d * theta / l;
                Some(Vector2::new(s * p.x, s * p.y))
            }
            CameraModel::Spherical => {
                let horizontal = (p.x * p.x + p.z * p.z).sqrt();
                if horizontal < MIN_DEPTH && p.y.abs() < MIN_DEPTH {
                    return None;
                }
                let lon = p.x.atan2(p.z);
                let lat = (-p.y).atan2(horizontal);
                Some(Vector2::new(
                    lon / (2.0 * std::f64::consts::PI),
                    -lat / (2.0 * std::f64::consts::PI),
                ))
            }
        }
    }

    /// Derivative of [`project`](Self::project) with respect to the
    /// camera-frame point. Analytic for the perspective model, central
    /// differences otherwise.
    pub fn projection_jacobian(&self, p: &Vector3<f64>) -> Option<Matrix2x3<f64>> {
        match *self {
            CameraModel::Perspective { focal, k1, k2 } => {
                if p.z <= MIN_DEPTH {
                    return None;
                }
                let inv_z = 1.0 / p.z;
                let xn = p.x * inv_z;
                let yn = p.y * inv_z;
                let r2 = xn * xn + yn * yn;
                let d = 1.0 + r2 * (k1 + k2 * r2);
                // ∂d/∂r² = k1 + 2 k2 r²
                let dd = k1 + 2.0 * k2 * r2;

                #[rustfmt::skip]
                let d_uv_d_n = Matrix2::new(
                    focal * (d + 2.0 * xn * xn * dd), focal * 2.0 * xn * yn * dd,
                    focal * 2.0 * xn * yn * dd,       focal * (d + 2.0 * yn * yn * dd),
                );
                #[rustfmt::skip]
                let d_n_d_p = Matrix2x3::new(
                    inv_z, 0.0, -xn * inv_z,
                    0.0, inv_z, -yn * inv_z,
                );
                Some(d_uv_d_n * d_n_d_p)
            }
            _ => self.numeric_jacobian(p),
        }
    }

    fn numeric_jacobian(&self, p: &Vector3<f64>) -> Option<Matrix2x3<f64>> {
        let mut jacobian = Matrix2x3::zeros();
        for axis in 0..3 {
            let h = JACOBIAN_STEP * p[axis].abs().max(1.0);
            let mut plus = *p;
            let mut minus = *p;
            plus[axis] += h;
            minus[axis] -= h;
            let column = (self.project(&plus)? - self.project(&minus)?) / (2.0 * h);
            jacobian.set_column(axis, &column);
        }
        Some(jacobian)
    }
}

/// A camera: identity, image size and projection model.
///
/// Intrinsics are never refined while tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub id: CameraId,
    pub width: u32,
    pub height: u32,
    pub model: CameraModel,
}

impl Camera {
    pub fn new(id: CameraId, width: u32, height: u32, model: CameraModel) -> Self {
        Self {
            id,
            width,
            height,
            model,
        }
    }

    pub fn project(&self, p_cam: &Vector3<f64>) -> Option<Vector2<f64>> {
        self.model.project(p_cam)
    }

    pub fn project_many(&self, points_cam: &[Vector3<f64>]) -> Vec<Option<Vector2<f64>>> {
        points_cam.iter().map(|p| self.project(p)).collect()
    }

    pub fn projection_jacobian(&self, p_cam: &Vector3<f64>) -> Option<Matrix2x3<f64>> {
        self.model.projection_jacobian(p_cam)
    }
}
