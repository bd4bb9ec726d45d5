//! Tracker configuration loaded from YAML.
//!
//! Every section is `#[serde(default)]`, so a config file only needs the keys
//! it overrides.

use std::path::Path;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::optimizer::{IntrinsicPriors, LinearSolverStrategy, LossFunction, LossKind};

/// Minimum number of correspondences required to attempt a pose solve.
pub const MIN_CORRESPONDENCES: usize = 100;

#[derive(Debug, Clone, Error)]
pub enum ConfigLoadError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Full tracker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Correspondence gate.
    pub min_correspondences: usize,
    /// Load masked feature points from the feature store.
    pub masked_features: bool,
    pub matcher: MatcherConfig,
    pub solver: SolverConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_correspondences: MIN_CORRESPONDENCES,
            masked_features: true,
            matcher: MatcherConfig::default(),
            solver: SolverConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigLoadError::Io(e.to_string()))?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ConfigLoadError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.min_correspondences == 0 {
            return Err(ConfigLoadError::Invalid(
                "min_correspondences must be positive".into(),
            ));
        }
        self.matcher.validate()?;
        self.solver.validate()
    }
}

/// Descriptor matching thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Max Hamming distance for acceptance.
    pub max_descriptor_distance: u32,
    /// Best / second best ratio test threshold.
    pub nn_ratio: f64,
    /// Keep only mutual best matches.
    pub cross_check: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            max_descriptor_distance: 100,
            nn_ratio: 0.75,
            cross_check: true,
        }
    }
}

impl MatcherConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if !(self.nn_ratio > 0.0 && self.nn_ratio <= 1.0) {
            return Err(ConfigLoadError::Invalid(format!(
                "matcher.nn_ratio must be in (0, 1], got {}",
                self.nn_ratio
            )));
        }
        Ok(())
    }
}

/// Settings passed through to the optimizer for each pose solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub loss_function: LossKind,
    pub loss_function_threshold: f64,
    pub intrinsic_priors: IntrinsicPriors,
    pub threads: usize,
    /// Upper bound on residual evaluations per solve.
    pub max_iterations: usize,
    pub linear_solver: LinearSolverStrategy,
    /// Camera axis anchored by the orientation prior.
    pub up_vector: [f64; 3],
    pub up_vector_weight: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            loss_function: LossKind::SoftL1,
            loss_function_threshold: 1.0,
            intrinsic_priors: IntrinsicPriors::default(),
            threads: 1,
            max_iterations: 50,
            linear_solver: LinearSolverStrategy::SparseSchur,
            up_vector: [0.0, 0.0, -1.0],
            up_vector_weight: 1e-3,
        }
    }
}

impl SolverConfig {
    pub fn loss(&self) -> LossFunction {
        LossFunction::new(self.loss_function, self.loss_function_threshold)
    }

    pub fn up_axis(&self) -> Vector3<f64> {
        Vector3::from(self.up_vector)
    }

    fn validate(&self) -> Result<(), ConfigLoadError> {
        if !(self.loss_function_threshold.is_finite() && self.loss_function_threshold > 0.0) {
            return Err(ConfigLoadError::Invalid(format!(
                "solver.loss_function_threshold must be positive, got {}",
                self.loss_function_threshold
            )));
        }
        if self.threads == 0 {
            return Err(ConfigLoadError::Invalid("solver.threads must be positive".into()));
        }
        if self.max_iterations == 0 {
            return Err(ConfigLoadError::Invalid(
                "solver.max_iterations must be positive".into(),
            ));
        }
        if self.up_axis().norm() == 0.0 {
            return Err(ConfigLoadError::Invalid(
                "solver.up_vector must be non-zero".into(),
            ));
        }
        if !(self.up_vector_weight.is_finite() && self.up_vector_weight >= 0.0) {
            return Err(ConfigLoadError::Invalid(format!(
                "solver.up_vector_weight must be non-negative, got {}",
                self.up_vector_weight
            )));
        }
        Ok(())
    }
}
