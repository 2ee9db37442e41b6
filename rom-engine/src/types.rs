use faer::Mat;
use serde::{Deserialize, Serialize};

use crate::parametric::TrainingStage;

/// Error types for reduced-order model operations.
#[derive(Debug, thiserror::Error)]
pub enum RomError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("dimension mismatch in {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{0} has not been trained")]
    NotTrained(&'static str),

    #[error("numerical instability: {reason} (condition number {condition_number:.3e})")]
    NumericalInstability {
        reason: String,
        condition_number: f64,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("parameter `{parameter}` = {value} lies outside the trusted range [{min}, {max}]")]
    ExtrapolationRejected {
        parameter: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("training is already in progress on this model")]
    TrainingInProgress,

    #[error("training cancelled before stage `{0}`")]
    Cancelled(TrainingStage),

    #[error("corrupt model file: {0}")]
    CorruptModel(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type RomResult<T> = Result<T, RomError>;

impl RomError {
    pub(crate) fn unstable(reason: impl Into<String>, condition_number: f64) -> Self {
        RomError::NumericalInstability {
            reason: reason.into(),
            condition_number,
        }
    }
}

/// Components of a truncated SVD.
#[derive(Debug, Clone)]
pub struct SvdComponents {
    /// Left singular vectors (m × r).
    pub u: Mat<f64>,
    /// Singular values (r), descending.
    pub s: Vec<f64>,
    /// Right singular vectors (n × r), columns are right singular vectors.
    pub v: Mat<f64>,
}

impl SvdComponents {
    /// Ratio of the largest to the smallest retained singular value.
    pub fn condition_number(&self) -> f64 {
        match (self.s.first(), self.s.last()) {
            (Some(&max), Some(&min)) if min > 0.0 => max / min,
            _ => f64::INFINITY,
        }
    }
}

/// Complex number type (re, im).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct C64 {
    pub re: f64,
    pub im: f64,
}

impl C64 {
    /// Create a new complex number.
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    /// Magnitude |z| = sqrt(re² + im²).
    pub fn norm(&self) -> f64 {
        self.re.hypot(self.im)
    }

    /// Squared magnitude re² + im².
    pub fn norm_sqr(&self) -> f64 {
        self.re * self.re + self.im * self.im
    }

    /// Phase angle atan2(im, re).
    pub fn arg(&self) -> f64 {
        self.im.atan2(self.re)
    }

    /// Complex conjugate (re, -im).
    pub fn conj(&self) -> Self {
        Self {
            re: self.re,
            im: -self.im,
        }
    }

    /// Principal natural logarithm ln|z| + i·arg(z).
    ///
    /// The magnitude is floored at `f64::MIN_POSITIVE` so the result stays finite.
    pub fn ln(&self) -> Self {
        Self {
            re: self.norm().max(f64::MIN_POSITIVE).ln(),
            im: self.arg(),
        }
    }

    /// Raise to a real power: (r e^{iθ})^p = r^p e^{ipθ}.
    pub fn powf(&self, p: f64) -> Self {
        let r = self.norm();
        let theta = self.arg();
        let rp = r.powf(p);
        Self {
            re: rp * (p * theta).cos(),
            im: rp * (p * theta).sin(),
        }
    }

    /// Whether both parts are finite.
    pub fn is_finite(&self) -> bool {
        self.re.is_finite() && self.im.is_finite()
    }

    /// The zero complex number (0 + 0i).
    pub fn zero() -> Self {
        Self { re: 0.0, im: 0.0 }
    }
}

impl std::ops::Add for C64 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            re: self.re + rhs.re,
            im: self.im + rhs.im,
        }
    }
}

impl std::ops::AddAssign for C64 {
    fn add_assign(&mut self, rhs: Self) {
        self.re += rhs.re;
        self.im += rhs.im;
    }
}

impl std::ops::Sub for C64 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self {
            re: self.re - rhs.re,
            im: self.im - rhs.im,
        }
    }
}

impl std::ops::Mul for C64 {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self {
            re: self.re * rhs.re - self.im * rhs.im,
            im: self.re * rhs.im + self.im * rhs.re,
        }
    }
}

impl std::ops::Mul<f64> for C64 {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self {
            re: self.re * rhs,
            im: self.im * rhs,
        }
    }
}

impl std::ops::Div for C64 {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        let denom = rhs.norm_sqr();
        Self {
            re: (self.re * rhs.re + self.im * rhs.im) / denom,
            im: (self.im * rhs.re - self.re * rhs.im) / denom,
        }
    }
}

impl std::ops::Div<f64> for C64 {
    type Output = Self;
    fn div(self, rhs: f64) -> Self {
        Self {
            re: self.re / rhs,
            im: self.im / rhs,
        }
    }
}

/// How the POD basis was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecompositionStrategy {
    /// Thin SVD of the centered snapshot matrix (snapshots < dofs).
    SnapshotSvd,
    /// Eigendecomposition of the snapshot Gram matrix XᵀX/(n-1).
    GramEigen,
}

impl DecompositionStrategy {
    /// Pick the cheaper path for a `dofs × snapshots` matrix.
    pub fn for_shape(n_dofs: usize, n_snapshots: usize) -> Self {
        if n_snapshots < n_dofs {
            DecompositionStrategy::SnapshotSvd
        } else {
            DecompositionStrategy::GramEigen
        }
    }
}

/// Result of a POD computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodResult {
    /// Orthonormal POD basis Φ (n_dofs × r).
    #[serde(with = "crate::persistence::mat_serde")]
    pub basis_vectors: Mat<f64>,
    /// Retained singular values (r), descending and non-negative.
    pub singular_values: Vec<f64>,
    /// Cumulative energy fraction captured by the first k modes (r).
    pub energy_content: Vec<f64>,
    /// Number of retained modes.
    pub truncation_index: usize,
    /// Relative Frobenius error of the rank-r reconstruction of the centered data.
    pub reconstruction_error: f64,
    /// Mean snapshot removed before decomposition (n_dofs).
    pub mean_snapshot: Vec<f64>,
    /// Decomposition path taken.
    pub strategy: DecompositionStrategy,
    /// n_dofs / r.
    pub compression_ratio: f64,
}

impl PodResult {
    /// Number of degrees of freedom of the basis.
    pub fn n_dofs(&self) -> usize {
        self.basis_vectors.nrows()
    }

    /// Φᵀ v.
    pub fn project(&self, v: &[f64]) -> Result<Vec<f64>, RomError> {
        self.check_dofs(v.len())?;
        let phi = &self.basis_vectors;
        Ok((0..self.truncation_index)
            .map(|j| (0..phi.nrows()).map(|i| phi[(i, j)] * v[i]).sum())
            .collect())
    }

    /// Φ c.
    pub fn reconstruct(&self, coefficients: &[f64]) -> Result<Vec<f64>, RomError> {
        if coefficients.len() != self.truncation_index {
            return Err(RomError::DimensionMismatch {
                context: "POD reconstruction",
                expected: self.truncation_index,
                found: coefficients.len(),
            });
        }
        let phi = &self.basis_vectors;
        let mut out = vec![0.0; phi.nrows()];
        for (j, &c) in coefficients.iter().enumerate() {
            for (i, o) in out.iter_mut().enumerate() {
                *o += phi[(i, j)] * c;
            }
        }
        Ok(out)
    }

    /// Φᵀ (v − mean).
    pub fn project_centered(&self, v: &[f64]) -> Result<Vec<f64>, RomError> {
        self.check_dofs(v.len())?;
        let centered: Vec<f64> = v
            .iter()
            .zip(&self.mean_snapshot)
            .map(|(x, m)| x - m)
            .collect();
        self.project(&centered)
    }

    /// mean + Φ c.
    pub fn reconstruct_with_mean(&self, coefficients: &[f64]) -> Result<Vec<f64>, RomError> {
        let mut out = self.reconstruct(coefficients)?;
        for (o, m) in out.iter_mut().zip(&self.mean_snapshot) {
            *o += m;
        }
        Ok(out)
    }

    /// Check internal consistency of the stored artifacts.
    pub fn validate(&self) -> Result<(), RomError> {
        let r = self.truncation_index;
        let consistent = r > 0
            && self.basis_vectors.ncols() == r
            && self.singular_values.len() == r
            && self.energy_content.len() == r
            && self.mean_snapshot.len() == self.basis_vectors.nrows();
        if !consistent {
            return Err(RomError::InvalidInput(format!(
                "inconsistent POD result: r={r}, basis {}x{}, {} singular values, {} energies, mean of {}",
                self.basis_vectors.nrows(),
                self.basis_vectors.ncols(),
                self.singular_values.len(),
                self.energy_content.len(),
                self.mean_snapshot.len()
            )));
        }
        if self.singular_values.windows(2).any(|w| w[1] > w[0])
            || self.singular_values.iter().any(|&s| !(s >= 0.0))
        {
            return Err(RomError::InvalidInput(
                "singular values must be non-negative and descending".into(),
            ));
        }
        if !(self.reconstruction_error >= 0.0) {
            return Err(RomError::InvalidInput(
                "reconstruction error must be non-negative".into(),
            ));
        }
        Ok(())
    }

    fn check_dofs(&self, found: usize) -> Result<(), RomError> {
        if found != self.n_dofs() {
            return Err(RomError::DimensionMismatch {
                context: "POD projection",
                expected: self.n_dofs(),
                found,
            });
        }
        Ok(())
    }
}

/// Which DMD formulation produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DmdVariant {
    /// Full economy SVD of X₁, truncated only at numerical rank.
    Standard,
    /// SVD of X₁ truncated to an explicit rank.
    Exact,
}

/// Result of a DMD computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmdResult {
    /// Discrete-time eigenvalues λ (r).
    pub eigenvalues: Vec<C64>,
    /// DMD modes Φ (n_dofs × r), row-major: `eigenvectors[i][j]` is mode j at dof i.
    pub eigenvectors: Vec<Vec<C64>>,
    /// Initial amplitudes b (r).
    pub amplitudes: Vec<C64>,
    /// Oscillation frequency |Im(ln λ)| / (2π dt), with λ spanning one delayed step `dt`.
    pub frequencies: Vec<f64>,
    /// Growth rate Re(ln λ) / dt, with λ spanning one delayed step `dt`.
    pub growth_rates: Vec<f64>,
    /// Mode indices ordered by importance |λ|ⁿ·|b|.
    pub mode_selection: Vec<usize>,
    /// Rank of the reduced operator.
    pub rank: usize,
    /// Time advanced by one application of the operator: one delayed step,
    /// `time_delay` × the mean time-stamp spacing.
    pub dt: f64,
    /// σ_max / σ_min of the retained SVD of X₁.
    pub condition_number: f64,
    /// ‖Φ b − x₀‖ / ‖x₀‖.
    pub amplitude_residual: f64,
    /// Formulation used.
    pub variant: DmdVariant,
    /// Data dimensions (n_dofs, n_snapshots).
    pub data_dim: (usize, usize),
}

impl DmdResult {
    /// Number of state variables.
    pub fn n_dofs(&self) -> usize {
        self.data_dim.0
    }

    /// Get mode column j.
    pub fn mode(&self, j: usize) -> Vec<C64> {
        self.eigenvectors.iter().map(|row| row[j]).collect()
    }

    /// Check internal consistency of the stored artifacts.
    pub fn validate(&self) -> Result<(), RomError> {
        let r = self.rank;
        let consistent = self.eigenvalues.len() == r
            && self.amplitudes.len() == r
            && self.frequencies.len() == r
            && self.growth_rates.len() == r
            && self.eigenvectors.len() == self.data_dim.0
            && self.eigenvectors.iter().all(|row| row.len() == r)
            && self.mode_selection.iter().all(|&i| i < r);
        if !consistent {
            return Err(RomError::InvalidInput(format!(
                "inconsistent DMD result for rank {r}"
            )));
        }
        if !(self.dt > 0.0) {
            return Err(RomError::InvalidInput("DMD time step must be positive".into()));
        }
        Ok(())
    }
}

/// Information about a single DMD mode.
#[derive(Debug, Clone)]
pub struct ModeInfo {
    /// Mode index.
    pub index: usize,
    /// Complex eigenvalue.
    pub eigenvalue: C64,
    /// Eigenvalue magnitude |λ|.
    pub magnitude: f64,
    /// Oscillation frequency |Im(ln λ)| / (2π dt), where `dt` is one delayed step.
    pub frequency: f64,
    /// Oscillation period (time units).
    pub period: f64,
    /// Growth rate ln|λ| / dt, where `dt` is one delayed step.
    pub growth_rate: f64,
    /// Half-life for decaying modes (positive), doubling time for growing (negative).
    pub half_life: Option<f64>,
    /// Stability classification.
    pub stability: Stability,
    /// Mode amplitude |b|.
    pub amplitude: f64,
    /// Importance |λ|ⁿ·|b|.
    pub importance: f64,
}

/// Stability classification of a mode or system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    Decaying,
    Neutral,
    Growing,
}

impl std::fmt::Display for Stability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stability::Decaying => write!(f, "decaying"),
            Stability::Neutral => write!(f, "neutral"),
            Stability::Growing => write!(f, "growing"),
        }
    }
}

/// Result of stability analysis.
#[derive(Debug, Clone)]
pub struct StabilityResult {
    /// Whether no mode is growing.
    pub is_stable: bool,
    /// Whether any mode is growing.
    pub is_unstable: bool,
    /// Whether any mode is neutral (within tolerance).
    pub is_marginal: bool,
    /// Maximum eigenvalue magnitude.
    pub spectral_radius: f64,
    /// Per-mode stability classification.
    pub mode_stability: Vec<Stability>,
}
