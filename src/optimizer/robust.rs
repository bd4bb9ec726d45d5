//! Robust loss functions for projection residuals.
//!
//! A loss `ρ(s)` acts on the squared residual norm `s = |e|²`. The adjuster
//! keeps a plain least-squares interface by feeding it the rescaled residual
//!
//! ```text
//! e' = φ(s) e,   φ(s) = sqrt(ρ(s) / s)
//! ```
//!
//! so that `|e'|² = ρ(s)`, with the matching Jacobian
//!
//! ```text
//! ∂e'/∂x = (φ I + 2 φ'(s) e eᵀ) ∂e/∂x
//! ```
//!
//! # Loss Comparison
//!
//! | Loss | ρ(s) for scale a, b = a² | Behavior |
//! |------|--------------------------|----------|
//! | Trivial | s | Plain least squares |
//! | Huber | s if s ≤ b, else 2a√s - b | Linear beyond a |
//! | SoftL1 | 2b(√(1 + s/b) - 1) | Smooth Huber |
//! | Cauchy | b ln(1 + s/b) | Heavy-tailed |
//! | Arctan | a atan(s/a) | Bounded |

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

/// Below this squared norm the loss is treated as quadratic.
const QUADRATIC_REGION: f64 = 1e-16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    Trivial,
    Huber,
    #[serde(rename = "soft_l1")]
    SoftL1,
    Cauchy,
    Arctan,
}

/// Loss kind with its scale parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossFunction {
    pub kind: LossKind,
    pub threshold: f64,
}

impl LossFunction {
    pub fn new(kind: LossKind, threshold: f64) -> Self {
        Self { kind, threshold }
    }

    pub fn trivial() -> Self {
        Self::new(LossKind::Trivial, 1.0)
    }

    /// Evaluate `(ρ(s), ρ'(s))`.
    pub fn evaluate(&self, s: f64) -> (f64, f64) {
        let a = self.threshold;
        let b = a * a;
        match self.kind {
            LossKind::Trivial => (s, 1.0),
            LossKind::Huber => {
                if s > b {
                    let r = s.sqrt();
                    (2.0 * a * r - b, a / r)
                } else {
                    (s, 1.0)
                }
            }
            LossKind::SoftL1 => {
                let tmp = (1.0 + s / b).sqrt();
                (2.0 * b * (tmp - 1.0), 1.0 / tmp)
            }
            LossKind::Cauchy => {
                let sum = 1.0 + s / b;
                (b * sum.ln(), 1.0 / sum)
            }
            LossKind::Arctan => {
                let ratio = s / a;
                (a * s.atan2(a), 1.0 / (1.0 + ratio * ratio))
            }
        }
    }

    /// Rescale a 2D residual and its Jacobian row block in place of the raw
    /// ones, returning `(e', M)` with `∂e'/∂x = M ∂e/∂x`.
    pub fn robustify(&self, residual: &Vector2<f64>) -> (Vector2<f64>, Matrix2<f64>) {
        let s = residual.norm_squared();
        if self.kind == LossKind::Trivial || s < QUADRATIC_REGION {
            return (*residual, Matrix2::identity());
        }
        let (rho, rho_prime) = self.evaluate(s);
        let phi = (rho / s).sqrt();
        let d_phi = (rho_prime * s - rho) / (2.0 * s * s * phi);
        let scaled = residual * phi;
        let correction =
            Matrix2::identity() * phi + residual * residual.transpose() * (2.0 * d_phi);
        (scaled, correction)
    }
}

impl Default for LossFunction {
    fn default() -> Self {
        Self::new(LossKind::SoftL1, 1.0)
    }
}
