//! Tracking error taxonomy.
//!
//! Component failures (`SizeMismatch`, `InsufficientMatches`,
//! `SolverDivergence`, `Collaborator`) are local signals consumed by the
//! tracker's fallback logic. Only `Lost` reaches the caller of `track`.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackingError {
    /// Point and observation sequences differ in length.
    #[error("{points} 3D points but {observations} observations")]
    SizeMismatch { points: usize, observations: usize },

    /// Too few correspondences to attempt solving.
    #[error("only {found} correspondences, need at least {required}")]
    InsufficientMatches { found: usize, required: usize },

    /// The optimizer failed to converge or produced a non-finite pose.
    #[error("pose optimization diverged: {0}")]
    SolverDivergence(String),

    /// A matcher or feature store reported an error or inconsistent data.
    #[error("collaborator failure: {0}")]
    Collaborator(String),

    /// Every tracking attempt for the frame failed.
    #[error("tracking lost after {attempts} attempt(s)")]
    Lost { attempts: usize },
}

impl From<anyhow::Error> for TrackingError {
    fn from(err: anyhow::Error) -> Self {
        TrackingError::Collaborator(format!("{err:#}"))
    }
}
