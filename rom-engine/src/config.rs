use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::interpolate::{PolynomialDegree, RbfKernel};
use crate::types::{RomError, RomResult};

/// Trusted interval of one named input parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange {
    pub name: String,
    pub min: f64,
    pub max: f64,
}

impl ParameterRange {
    pub fn new(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// What to do when a query falls outside the trusted parameter box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExtrapolationPolicy {
    /// Evaluate silently.
    Allow,
    /// Evaluate and log a warning.
    #[default]
    Warn,
    /// Fail with [`RomError::ExtrapolationRejected`].
    Reject,
}

/// Which column of each training sample the interpolator reproduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CoefficientTarget {
    /// The first snapshot of the sample (its reference state).
    #[default]
    FirstSnapshot,
    /// The column-wise mean of the sample's snapshots.
    SnapshotMean,
}

/// Configuration for POD, DMD and parametric ROM training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RomConfiguration {
    /// Target cumulative energy retained by the POD basis, in (0, 1].
    pub energy_threshold: f64,
    /// Upper bound on retained POD modes and on selected DMD modes.
    pub max_modes: usize,
    /// Lower bound on retained POD modes.
    pub min_modes: usize,
    /// Explicit DMD truncation rank. None keeps the full numerical rank.
    pub dmd_rank: Option<usize>,
    /// Column shift between the two DMD snapshot matrices.
    pub time_delay: usize,
    /// Expected number of offline training samples.
    pub offline_samples: usize,
    /// Ordered, named parameter ranges. Position i describes entry i of a parameter vector.
    pub parameter_ranges: Vec<ParameterRange>,
    /// Run offline decompositions on a multi-threaded pool.
    pub use_accelerated_hardware: bool,
    /// Worker threads for offline training.
    pub parallel_workers: usize,
    /// Working-memory budget for the global snapshot matrix, in MiB.
    pub cache_budget_mb: usize,
    /// Consecutive singular value ratio below which the spectrum is treated as a noise floor.
    pub decay_threshold: f64,
    /// Look-ahead exponent n in the DMD importance |λ|ⁿ·|b|.
    pub importance_horizon: u32,
    /// Radial kernel of the parameter interpolator.
    pub rbf_kernel: RbfKernel,
    /// Polynomial tail of the parameter interpolator.
    pub polynomial_degree: PolynomialDegree,
    /// Policy for queries outside the trusted parameter box.
    pub extrapolation: ExtrapolationPolicy,
    /// Column of each sample reproduced by the interpolator.
    pub coefficient_target: CoefficientTarget,
    /// Maximum number of samples used in validation.
    pub validation_samples: usize,
    /// Nominal wall-clock cost of one high-fidelity solve, in seconds.
    pub reference_solve_seconds: f64,
}

impl Default for RomConfiguration {
    fn default() -> Self {
        Self {
            energy_threshold: 0.99,
            max_modes: 100,
            min_modes: 5,
            dmd_rank: None,
            time_delay: 1,
            offline_samples: 1000,
            parameter_ranges: Vec::new(),
            use_accelerated_hardware: true,
            parallel_workers: 4,
            cache_budget_mb: 1000,
            decay_threshold: 0.01,
            importance_horizon: 10,
            rbf_kernel: RbfKernel::Linear,
            polynomial_degree: PolynomialDegree::Linear,
            extrapolation: ExtrapolationPolicy::Warn,
            coefficient_target: CoefficientTarget::FirstSnapshot,
            validation_samples: 10,
            reference_solve_seconds: 10.0,
        }
    }
}

impl RomConfiguration {
    /// Preset for deep-excavation surrogates.
    pub fn deep_excavation() -> Self {
        Self {
            energy_threshold: 0.995,
            max_modes: 50,
            min_modes: 5,
            offline_samples: 500,
            parallel_workers: 4,
            parameter_ranges: vec![
                ParameterRange::new("excavation_depth", 5.0, 15.0),
                ParameterRange::new("soil_modulus", 20e6, 50e6),
                ParameterRange::new("support_stiffness", 1e7, 1e9),
                ParameterRange::new("groundwater_level", -8.0, -2.0),
            ],
            ..Default::default()
        }
    }

    /// Preset for structural-analysis surrogates.
    pub fn structural() -> Self {
        Self {
            energy_threshold: 0.99,
            max_modes: 100,
            min_modes: 10,
            offline_samples: 1000,
            parallel_workers: 6,
            parameter_ranges: vec![
                ParameterRange::new("load_magnitude", 1000.0, 10000.0),
                ParameterRange::new("material_stiffness", 1e9, 1e11),
                ParameterRange::new("geometry_scale", 0.5, 2.0),
            ],
            ..Default::default()
        }
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> RomResult<()> {
        if !(self.energy_threshold > 0.0 && self.energy_threshold <= 1.0) {
            return Err(RomError::InvalidConfig(format!(
                "energy_threshold must be in (0, 1], got {}",
                self.energy_threshold
            )));
        }
        if self.min_modes == 0 {
            return Err(RomError::InvalidConfig("min_modes must be at least 1".into()));
        }
        if self.min_modes > self.max_modes {
            return Err(RomError::InvalidConfig(format!(
                "min_modes ({}) exceeds max_modes ({})",
                self.min_modes, self.max_modes
            )));
        }
        if self.dmd_rank == Some(0) {
            return Err(RomError::InvalidConfig("dmd_rank must be positive".into()));
        }
        if self.time_delay == 0 {
            return Err(RomError::InvalidConfig("time_delay must be at least 1".into()));
        }
        if self.parallel_workers == 0 {
            return Err(RomError::InvalidConfig(
                "parallel_workers must be at least 1".into(),
            ));
        }
        if !(self.decay_threshold > 0.0 && self.decay_threshold < 1.0) {
            return Err(RomError::InvalidConfig(format!(
                "decay_threshold must be in (0, 1), got {}",
                self.decay_threshold
            )));
        }
        if !(self.reference_solve_seconds > 0.0 && self.reference_solve_seconds.is_finite()) {
            return Err(RomError::InvalidConfig(format!(
                "reference_solve_seconds must be positive, got {}",
                self.reference_solve_seconds
            )));
        }
        self.rbf_kernel.validate()?;

        let mut names = BTreeSet::new();
        for range in &self.parameter_ranges {
            if !names.insert(range.name.as_str()) {
                return Err(RomError::InvalidConfig(format!(
                    "duplicate parameter range `{}`",
                    range.name
                )));
            }
            if !(range.min.is_finite() && range.max.is_finite() && range.min < range.max) {
                return Err(RomError::InvalidConfig(format!(
                    "parameter `{}` needs finite min < max, got [{}, {}]",
                    range.name, range.min, range.max
                )));
            }
        }
        Ok(())
    }

    /// Look up a parameter range by name.
    pub fn range(&self, name: &str) -> Option<&ParameterRange> {
        self.parameter_ranges.iter().find(|r| r.name == name)
    }

    /// Worker threads to use for offline training.
    pub fn effective_workers(&self) -> usize {
        if self.use_accelerated_hardware {
            self.parallel_workers
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(RomConfiguration::default().validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(RomConfiguration::deep_excavation().validate().is_ok());
        assert!(RomConfiguration::structural().validate().is_ok());
        let cfg = RomConfiguration::deep_excavation();
        assert_eq!(cfg.parameter_ranges.len(), 4);
        assert_eq!(cfg.parameter_ranges[3].name, "groundwater_level");
        assert!(cfg.range("groundwater_level").unwrap().contains(-4.0));
    }

    #[test]
    fn test_min_exceeds_max() {
        let cfg = RomConfiguration {
            min_modes: 20,
            max_modes: 10,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(RomError::InvalidConfig(_))));
    }

    #[test]
    fn test_bad_threshold_and_delay() {
        let cfg = RomConfiguration {
            energy_threshold: 1.5,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = RomConfiguration {
            time_delay: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let cfg = RomConfiguration {
            parameter_ranges: vec![ParameterRange::new("depth", 10.0, 5.0)],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_duplicate_range_rejected() {
        let cfg = RomConfiguration {
            parameter_ranges: vec![
                ParameterRange::new("depth", 0.0, 1.0),
                ParameterRange::new("depth", 0.0, 2.0),
            ],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_cpu_only_uses_one_worker() {
        let cfg = RomConfiguration {
            use_accelerated_hardware: false,
            parallel_workers: 8,
            ..Default::default()
        };
        assert_eq!(cfg.effective_workers(), 1);
    }

    #[test]
    fn test_serde_fills_defaults() {
        let cfg: RomConfiguration =
            serde_json::from_str(r#"{"energy_threshold": 0.95, "max_modes": 12}"#).unwrap();
        assert_eq!(cfg.max_modes, 12);
        assert_eq!(cfg.time_delay, 1);
        assert!(cfg.validate().is_ok());
    }
}
