use faer::Mat;

use crate::dmd::mode_importance;
use crate::types::{DmdResult, ModeInfo, RomError, Stability, StabilityResult, C64};
use crate::utils::frobenius_norm;

/// Criterion for ranking DMD modes.
#[derive(Debug, Clone, Copy)]
pub enum DominantCriterion {
    /// Sort by |λ|ⁿ·|b| with the given horizon n.
    Importance(u32),
    /// Sort by amplitude |b|.
    Amplitude,
    /// Sort by closeness of |λ| to the unit circle.
    Stability,
}

/// Analyze the DMD eigenvalue spectrum.
///
/// Returns per-mode information in physical time units of `result.dt`.
pub fn dmd_spectrum(result: &DmdResult, horizon: u32) -> Vec<ModeInfo> {
    let importance = mode_importance(&result.eigenvalues, &result.amplitudes, horizon);

    (0..result.rank)
        .map(|i| {
            let lambda = result.eigenvalues[i];
            let magnitude = lambda.norm();
            let frequency = result.frequencies[i];
            let period = if frequency > 1e-14 {
                1.0 / frequency
            } else {
                f64::INFINITY
            };
            let growth_rate = result.growth_rates[i];
            let half_life = if growth_rate.abs() > 1e-14 {
                Some(-(2.0_f64.ln()) / growth_rate)
            } else {
                None
            };

            ModeInfo {
                index: i,
                eigenvalue: lambda,
                magnitude,
                frequency,
                period,
                growth_rate,
                half_life,
                stability: classify_eigenvalue(magnitude, 1e-6),
                amplitude: result.amplitudes[i].norm(),
                importance: importance[i],
            }
        })
        .collect()
}

/// Analyze system stability.
pub fn dmd_stability(result: &DmdResult, tol: f64) -> StabilityResult {
    let mode_stability: Vec<Stability> = result
        .eigenvalues
        .iter()
        .map(|lambda| classify_eigenvalue(lambda.norm(), tol))
        .collect();

    let spectral_radius = result
        .eigenvalues
        .iter()
        .map(|lambda| lambda.norm())
        .fold(0.0_f64, f64::max);

    let is_unstable = mode_stability.contains(&Stability::Growing);

    StabilityResult {
        is_stable: !is_unstable,
        is_unstable,
        is_marginal: mode_stability.contains(&Stability::Neutral),
        spectral_radius,
        mode_stability,
    }
}

/// Reconstruct the fitted trajectory from DMD modes.
///
/// X_recon[:, k] = Re Σᵢ φᵢ · bᵢ · λᵢᵏ,  k = 0..n_steps
///
/// If `modes_subset` is provided, only the specified mode indices are used.
pub fn dmd_reconstruct(
    result: &DmdResult,
    n_steps: usize,
    modes_subset: Option<&[usize]>,
) -> Result<Mat<f64>, RomError> {
    let n_dofs = result.n_dofs();
    let rank = result.rank;

    let indices: Vec<usize> = match modes_subset {
        Some(idx) => {
            if let Some(&bad) = idx.iter().find(|&&i| i >= rank) {
                return Err(RomError::InvalidInput(format!(
                    "mode index {bad} out of range (rank={rank})"
                )));
            }
            idx.to_vec()
        }
        None => (0..rank).collect(),
    };

    let mut recon = Mat::<f64>::zeros(n_dofs, n_steps);
    for k in 0..n_steps {
        let evolved: Vec<C64> = indices
            .iter()
            .map(|&j| result.amplitudes[j] * result.eigenvalues[j].powf(k as f64))
            .collect();
        for i in 0..n_dofs {
            let mut val = C64::zero();
            for (&j, &e) in indices.iter().zip(&evolved) {
                val += result.eigenvectors[i][j] * e;
            }
            recon[(i, k)] = val.re;
        }
    }

    Ok(recon)
}

/// Relative Frobenius error between the DMD reconstruction and the data it was fitted on.
pub fn dmd_reconstruction_error(result: &DmdResult, observed: &Mat<f64>) -> Result<f64, RomError> {
    if observed.nrows() != result.n_dofs() {
        return Err(RomError::DimensionMismatch {
            context: "DMD reconstruction error",
            expected: result.n_dofs(),
            found: observed.nrows(),
        });
    }
    let n_time = observed.ncols();
    let recon = dmd_reconstruct(result, n_time, None)?;

    let mut sum_sq = 0.0;
    for k in 0..n_time {
        for i in 0..observed.nrows() {
            let diff = recon[(i, k)] - observed[(i, k)];
            sum_sq += diff * diff;
        }
    }
    let norm = frobenius_norm(observed);
    Ok(if norm > 0.0 { sum_sq.sqrt() / norm } else { sum_sq.sqrt() })
}

/// Extract the indices of the `n` dominant modes.
pub fn dominant_modes(result: &DmdResult, n: usize, criterion: DominantCriterion) -> Vec<usize> {
    let rank = result.rank;
    let scores: Vec<f64> = match criterion {
        DominantCriterion::Importance(horizon) => {
            mode_importance(&result.eigenvalues, &result.amplitudes, horizon)
        }
        DominantCriterion::Amplitude => result.amplitudes.iter().map(C64::norm).collect(),
        DominantCriterion::Stability => result
            .eigenvalues
            .iter()
            .map(|lambda| -(lambda.norm() - 1.0).abs())
            .collect(),
    };

    let mut order: Vec<usize> = (0..rank).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order.truncate(n.min(rank));
    order
}

fn classify_eigenvalue(magnitude: f64, tol: f64) -> Stability {
    if magnitude > 1.0 + tol {
        Stability::Growing
    } else if magnitude < 1.0 - tol {
        Stability::Decaying
    } else {
        Stability::Neutral
    }
}
