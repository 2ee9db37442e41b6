use std::time::{Duration, Instant};

use faer::{Mat, Side};

use crate::config::RomConfiguration;
use crate::snapshot::SnapshotData;
use crate::types::{DecompositionStrategy, PodResult, RomError, RomResult};
use crate::utils::{
    complete_orthonormal, cumulative_energy, decay_truncation, energy_truncation, frobenius_norm,
    numerical_rank, row_means, thin_svd, validate_matrix,
};

/// Compute a POD basis for a snapshot matrix.
///
/// # Arguments
/// * `snapshots` - Data matrix (n_dofs × n_snapshots), columns are observations.
/// * `config` - Truncation policy (energy threshold, decay ratio, mode bounds).
///
/// # Algorithm
/// 1. Center: Xc = X − x̄ 1ᵀ
/// 2. If n_snapshots < n_dofs: thin SVD Xc = U Σ Vᵀ, Φ = U
///    otherwise: C = XcᵀXc/(n−1), C V = V Λ, σ = sqrt((n−1)λ), Φ = Xc V Σ⁻¹
/// 3. r = clamp(min(r_energy, r_decay), min_modes, max_modes); modes beyond the
///    obtainable min(n_dofs, n_snapshots) are zero-energy orthonormal padding
/// 4. error = ‖Xc − Φ_r Φ_rᵀ Xc‖_F / ‖Xc‖_F
pub fn pod(snapshots: &Mat<f64>, config: &RomConfiguration) -> RomResult<PodResult> {
    validate_matrix(snapshots, 1, 2)?;

    let n_dofs = snapshots.nrows();
    let n_snapshots = snapshots.ncols();
    if config.min_modes > n_dofs {
        return Err(RomError::InsufficientData(format!(
            "min_modes ({}) exceeds the {n_dofs} degrees of freedom",
            config.min_modes
        )));
    }

    let mean_snapshot = row_means(snapshots);
    let centered = Mat::from_fn(n_dofs, n_snapshots, |i, j| {
        snapshots[(i, j)] - mean_snapshot[i]
    });

    let strategy = DecompositionStrategy::for_shape(n_dofs, n_snapshots);
    log::debug!("POD of {n_dofs} x {n_snapshots} snapshot matrix via {strategy:?}");

    let (mut modes, sigma) = match strategy {
        DecompositionStrategy::SnapshotSvd => snapshot_svd(&centered)?,
        DecompositionStrategy::GramEigen => gram_eigen(&centered)?,
    };

    let rank = truncation_rank(&sigma, config).min(n_dofs);
    let available = rank.min(modes.ncols());
    let numeric = numerical_rank(&sigma, n_dofs, n_snapshots).min(available);

    // Modes past the numerical rank carry no information; keep Φ orthonormal.
    let mut basis = Mat::from_fn(n_dofs, rank, |i, j| {
        if j < available {
            modes[(i, j)]
        } else {
            0.0
        }
    });
    if numeric < rank {
        complete_orthonormal(&mut basis, numeric)?;
    }
    modes = basis;

    let energy = cumulative_energy(&sigma);
    let mut singular_values = sigma[..available].to_vec();
    let mut energy_content = energy[..available].to_vec();
    singular_values.resize(rank, 0.0);
    energy_content.resize(rank, 1.0);
    let reconstruction_error = projection_error(&centered, &modes);

    if !reconstruction_error.is_finite() {
        return Err(RomError::unstable(
            "POD reconstruction error is not finite",
            condition_estimate(&sigma),
        ));
    }

    Ok(PodResult {
        basis_vectors: modes,
        singular_values,
        energy_content,
        truncation_index: rank,
        reconstruction_error,
        mean_snapshot,
        strategy,
        compression_ratio: n_dofs as f64 / rank as f64,
    })
}

/// Truncation rank from the energy and decay criteria, clamped to the configured bounds.
///
/// The result may exceed `singular_values.len()` when `min_modes` asks for more
/// modes than the data provides; [`pod`] pads those with zero-energy directions.
pub fn truncation_rank(singular_values: &[f64], config: &RomConfiguration) -> usize {
    let energy_r = energy_truncation(singular_values, config.energy_threshold);
    let decay_r = decay_truncation(singular_values, config.decay_threshold);
    energy_r
        .min(decay_r)
        .clamp(config.min_modes, config.max_modes)
        .max(1)
}

fn snapshot_svd(centered: &Mat<f64>) -> RomResult<(Mat<f64>, Vec<f64>)> {
    let svd = thin_svd(centered)?;
    Ok((svd.u, svd.s))
}

fn gram_eigen(centered: &Mat<f64>) -> RomResult<(Mat<f64>, Vec<f64>)> {
    let n_dofs = centered.nrows();
    let n = centered.ncols();
    let scale = (n - 1) as f64;

    let mut gram = centered.transpose() * centered;
    for j in 0..n {
        for i in 0..n {
            gram[(i, j)] /= scale;
        }
    }

    let eigen = gram.self_adjoint_eigen(Side::Lower).map_err(|e| {
        RomError::unstable(
            format!("Gram eigendecomposition did not converge: {e:?}"),
            f64::INFINITY,
        )
    })?;
    let lambdas = eigen.S().column_vector();
    let vectors = eigen.U();

    // Descending order; at most n_dofs directions can be orthonormal in dof space.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| lambdas[b].total_cmp(&lambdas[a]));
    order.truncate(n_dofs.min(n));

    let k = order.len();
    let sigma: Vec<f64> = order
        .iter()
        .map(|&idx| (lambdas[idx].max(0.0) * scale).sqrt())
        .collect();
    let v_sorted = Mat::from_fn(n, k, |i, j| vectors[(i, order[j])]);

    let xv = centered * &v_sorted;
    let tol = numerical_tolerance(&sigma, n_dofs, n);
    let basis = Mat::from_fn(n_dofs, k, |i, j| {
        if sigma[j] > tol {
            xv[(i, j)] / sigma[j]
        } else {
            0.0
        }
    });
    Ok((basis, sigma))
}

fn numerical_tolerance(sigma: &[f64], nrows: usize, ncols: usize) -> f64 {
    let max_sv = sigma.iter().copied().fold(0.0_f64, f64::max);
    max_sv * nrows.max(ncols) as f64 * f64::EPSILON
}

fn condition_estimate(sigma: &[f64]) -> f64 {
    match (sigma.first(), sigma.iter().rev().find(|&&s| s > 0.0)) {
        (Some(&max), Some(&min)) => max / min,
        _ => f64::INFINITY,
    }
}

fn projection_error(centered: &Mat<f64>, basis: &Mat<f64>) -> f64 {
    let norm = frobenius_norm(centered);
    if norm == 0.0 {
        return 0.0;
    }
    let coefficients = basis.transpose() * centered;
    let reconstructed = basis * &coefficients;
    let mut sum = 0.0;
    for j in 0..centered.ncols() {
        for i in 0..centered.nrows() {
            let d = centered[(i, j)] - reconstructed[(i, j)];
            sum += d * d;
        }
    }
    sum.sqrt() / norm
}

/// Stateful POD processor: owns the most recent decomposition.
#[derive(Debug, Clone)]
pub struct PodProcessor {
    config: RomConfiguration,
    result: Option<PodResult>,
    training_time: Option<Duration>,
}

impl PodProcessor {
    pub fn new(config: RomConfiguration) -> Self {
        Self {
            config,
            result: None,
            training_time: None,
        }
    }

    /// Wrap an existing decomposition, e.g. one restored from disk.
    pub fn from_result(config: RomConfiguration, result: PodResult) -> RomResult<Self> {
        result.validate()?;
        Ok(Self {
            config,
            result: Some(result),
            training_time: None,
        })
    }

    /// Decompose the snapshot matrix and keep the result.
    ///
    /// On failure the previously stored decomposition, if any, is kept.
    pub fn compute_pod_decomposition(&mut self, snapshot: &SnapshotData) -> RomResult<PodResult> {
        snapshot.validate()?;
        let start = Instant::now();
        let result = pod(&snapshot.solutions, &self.config)?;
        let elapsed = start.elapsed();

        log::info!(
            "POD finished in {:.3}s: {} modes ({:?}), compression {:.1}x, reconstruction error {:.2e}",
            elapsed.as_secs_f64(),
            result.truncation_index,
            result.strategy,
            result.compression_ratio,
            result.reconstruction_error
        );

        self.result = Some(result.clone());
        self.training_time = Some(elapsed);
        Ok(result)
    }

    pub fn is_trained(&self) -> bool {
        self.result.is_some()
    }

    pub fn result(&self) -> Option<&PodResult> {
        self.result.as_ref()
    }

    pub fn config(&self) -> &RomConfiguration {
        &self.config
    }

    /// Wall-clock time of the last successful decomposition.
    pub fn training_time(&self) -> Option<Duration> {
        self.training_time
    }

    pub fn compression_ratio(&self) -> Option<f64> {
        self.result.as_ref().map(|r| r.compression_ratio)
    }

    /// Φᵀ v.
    pub fn project_to_pod_space(&self, full_vector: &[f64]) -> RomResult<Vec<f64>> {
        self.trained()?.project(full_vector)
    }

    /// Φ c.
    pub fn reconstruct_from_pod_space(&self, coefficients: &[f64]) -> RomResult<Vec<f64>> {
        self.trained()?.reconstruct(coefficients)
    }

    fn trained(&self) -> RomResult<&PodResult> {
        self.result.as_ref().ok_or(RomError::NotTrained("POD processor"))
    }
}
