//! # rom-engine
//!
//! Reduced-order modelling of expensive simulations from solution snapshots.
//!
//! - **POD** ([`pod()`], [`PodProcessor`]): centered snapshot SVD or Gram-matrix
//!   eigendecomposition, chosen by matrix shape, with energy and decay truncation
//! - **DMD** ([`dmd()`], [`DmdProcessor`]): exact DMD of a time series with
//!   least-squares amplitudes, continuous-time spectrum and mode importance
//! - **Prediction and analysis** ([`predict_future`], [`dmd_spectrum`],
//!   [`dmd_stability`], [`dmd_reconstruct`]): forecasting and spectral diagnostics
//! - **Parametric ROM** ([`ParametricRom`]): one global POD basis plus an RBF
//!   interpolator from parameters to POD coefficients, with validation metrics
//! - **Persistence** ([`ParametricRom::save_model`], [`ParametricRom::load_model`]):
//!   checksummed single-file bundles written atomically
//!
//! ## Quick Start
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use rom_engine::{ParametricRom, RomConfiguration, SnapshotData};
//!
//! let mut params = BTreeMap::new();
//! let mut database = BTreeMap::new();
//! for s in 0..4 {
//!     let load = 1.0 + s as f64;
//!     let x = faer::Mat::from_fn(50, 6, |i, t| {
//!         let xi = i as f64 / 50.0;
//!         load * (std::f64::consts::PI * xi).sin() + 0.1 * t as f64 * xi
//!     });
//!     params.insert(format!("run{s}"), vec![load]);
//!     database.insert(format!("run{s}"), SnapshotData::new(x));
//! }
//!
//! let config = RomConfiguration { min_modes: 2, max_modes: 10, ..Default::default() };
//! let rom = ParametricRom::new(config).unwrap();
//! let summary = rom.train_parametric_rom(&params, &database).unwrap();
//! assert!(summary.metrics.accuracy_percentage <= 100.0);
//!
//! let field = rom.predict_solution(&[2.5]).unwrap();
//! assert_eq!(field.len(), 50);
//! ```
//!
//! ## References
//!
//! - Sirovich (1987), *Q. Appl. Math.*, 45, 561-571
//! - Schmid (2010), *J. Fluid Mech.*, 656, 5-28
//! - Tu et al. (2014), *J. Comput. Dyn.*, 1, 391-421

pub mod config;
pub mod snapshot;
pub mod types;

pub mod analysis;
pub mod dmd;
pub mod interpolate;
pub mod parametric;
pub mod persistence;
pub mod pod;
pub mod predict;
pub mod utils;

pub use analysis::{
    dmd_reconstruct, dmd_reconstruction_error, dmd_spectrum, dmd_stability, dominant_modes,
    DominantCriterion,
};
pub use config::{CoefficientTarget, ExtrapolationPolicy, ParameterRange, RomConfiguration};
pub use dmd::{dmd, DmdProcessor};
pub use interpolate::{CoefficientInterpolator, ParameterBounds, PolynomialDegree, RbfKernel};
pub use parametric::{
    CancellationToken, ParametricRom, PerformanceMetrics, RomPhase, TrainedRom, TrainingOptions,
    TrainingStage, TrainingSummary, ValidationMode, ValidationReport,
};
pub use persistence::ModelBundle;
pub use pod::{pod, PodProcessor};
pub use predict::predict_future;
pub use snapshot::SnapshotData;
pub use types::{
    DecompositionStrategy, DmdResult, DmdVariant, ModeInfo, PodResult, RomError, RomResult,
    Stability, StabilityResult, C64,
};
