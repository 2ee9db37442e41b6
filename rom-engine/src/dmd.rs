use std::time::Instant;

use faer::Mat;

use crate::config::RomConfiguration;
use crate::predict::predict_future;
use crate::snapshot::SnapshotData;
use crate::types::{DmdResult, DmdVariant, RomError, RomResult, C64};
use crate::utils::{numerical_rank, thin_svd, truncate_svd, vec_norm};

/// Perform Dynamic Mode Decomposition on a time-ordered snapshot sequence.
///
/// # Arguments
/// * `snapshot` - Snapshots (n_dofs × n_time), columns are time-ordered.
///   Time stamps, when present, set the physical time step.
/// * `config` - Uses `time_delay`, `dmd_rank`, `max_modes` and `importance_horizon`.
///
/// # Algorithm
/// 1. Split X into X₁ = X[:, 0..n-d] and X₂ = X[:, d..n]
/// 2. SVD: X₁ ≈ U Σ Vᵀ, truncated to `dmd_rank` or the numerical rank
/// 3. Reduced operator: Ã = Uᵀ X₂ V Σ⁻¹
/// 4. Eigendecomposition: Ã W = W Λ
/// 5. DMD modes: Φ = X₂ V Σ⁻¹ W
/// 6. Amplitudes: b = argmin ‖Φ b − x₀‖
/// 7. Continuous-time spectrum: ln(λ)/dt
pub fn dmd(snapshot: &SnapshotData, config: &RomConfiguration) -> RomResult<DmdResult> {
    snapshot.validate()?;
    let x = &snapshot.solutions;
    let n_dofs = x.nrows();
    let n_time = x.ncols();

    if n_time < 2 {
        return Err(RomError::InsufficientData(format!(
            "DMD needs at least 2 time snapshots, got {n_time}"
        )));
    }
    let delay = config.time_delay.max(1);
    if delay >= n_time {
        return Err(RomError::InsufficientData(format!(
            "time delay {delay} leaves no snapshot pairs among {n_time} snapshots"
        )));
    }

    // Split into X1 (current) and X2 (shifted by `delay`)
    let n_pairs = n_time - delay;
    let x1 = x.as_ref().subcols(0, n_pairs).to_owned();
    let x2 = x.as_ref().subcols(delay, n_pairs).to_owned();

    let full_svd = thin_svd(&x1)?;
    let numeric = numerical_rank(&full_svd.s, n_dofs, n_pairs);
    if numeric == 0 {
        return Err(RomError::unstable(
            "snapshot matrix X1 is numerically zero",
            f64::INFINITY,
        ));
    }

    let (rank, variant) = match config.dmd_rank {
        Some(r) if r < full_svd.s.len() => (r.min(numeric), DmdVariant::Exact),
        _ => (numeric, DmdVariant::Standard),
    };
    let svd = truncate_svd(&full_svd, rank);
    let condition_number = svd.condition_number();
    let s = &svd.s;

    // Reduced DMD matrix: Ã = Uᵀ X₂ V Σ⁻¹
    let ut_x2 = svd.u.transpose() * &x2;
    let ut_x2_v = &ut_x2 * &svd.v;
    let mut a_tilde = Mat::<f64>::zeros(rank, rank);
    for i in 0..rank {
        for j in 0..rank {
            a_tilde[(i, j)] = ut_x2_v[(i, j)] / s[j];
        }
    }

    let eigen = a_tilde.as_ref().eigen().map_err(|e| {
        RomError::unstable(
            format!("eigendecomposition of reduced operator failed: {e:?}"),
            condition_number,
        )
    })?;
    let eigenvalues_diag = eigen.S().column_vector();
    let eigenvectors = eigen.U();

    let mut eigenvalues = Vec::with_capacity(rank);
    let mut w_re = Mat::<f64>::zeros(rank, rank);
    let mut w_im = Mat::<f64>::zeros(rank, rank);
    for j in 0..rank {
        let ev = eigenvalues_diag[j];
        eigenvalues.push(C64::new(ev.re, ev.im));
        for i in 0..rank {
            let v = eigenvectors[(i, j)];
            w_re[(i, j)] = v.re;
            w_im[(i, j)] = v.im;
        }
    }
    if eigenvalues.iter().any(|ev| !ev.is_finite())
        || (0..rank).any(|j| (0..rank).any(|i| !(w_re[(i, j)].is_finite() && w_im[(i, j)].is_finite())))
    {
        return Err(RomError::unstable(
            "reduced operator produced non-finite eigenpairs",
            condition_number,
        ));
    }

    // DMD modes: Φ = X₂ V Σ⁻¹ W
    let x2_v = &x2 * &svd.v;
    let mut x2_v_sinv = Mat::<f64>::zeros(n_dofs, rank);
    for i in 0..n_dofs {
        for j in 0..rank {
            x2_v_sinv[(i, j)] = x2_v[(i, j)] / s[j];
        }
    }
    let modes_re = &x2_v_sinv * &w_re;
    let modes_im = &x2_v_sinv * &w_im;

    let mut modes = vec![vec![C64::zero(); rank]; n_dofs];
    for (i, row) in modes.iter_mut().enumerate() {
        for (j, m) in row.iter_mut().enumerate() {
            *m = C64::new(modes_re[(i, j)], modes_im[(i, j)]);
        }
    }

    let x0: Vec<f64> = (0..n_dofs).map(|i| x1[(i, 0)]).collect();
    let amplitudes = solve_amplitudes(&modes, &x0, rank)
        .map_err(|_| RomError::unstable("DMD modes are linearly dependent", condition_number))?;
    let amplitude_residual = fit_residual(&modes, &amplitudes, &x0);

    let dt = delay as f64 * snapshot.mean_time_step();
    let (frequencies, growth_rates) = continuous_spectrum(&eigenvalues, dt);
    let mode_selection = select_modes(
        &eigenvalues,
        &amplitudes,
        config.importance_horizon,
        config.max_modes,
    );

    let result = DmdResult {
        eigenvalues,
        eigenvectors: modes,
        amplitudes,
        frequencies,
        growth_rates,
        mode_selection,
        rank,
        dt,
        condition_number,
        amplitude_residual,
        variant,
        data_dim: (n_dofs, n_time),
    };
    result.validate()?;
    Ok(result)
}

/// Frequencies |Im λ_c|/(2π) and growth rates Re λ_c of λ_c = ln(λ)/dt.
pub fn continuous_spectrum(eigenvalues: &[C64], dt: f64) -> (Vec<f64>, Vec<f64>) {
    eigenvalues
        .iter()
        .map(|lambda| {
            let lc = lambda.ln() / dt;
            (lc.im.abs() / (2.0 * std::f64::consts::PI), lc.re)
        })
        .unzip()
}

/// Importance |λ|ⁿ·|b| of each mode.
pub fn mode_importance(eigenvalues: &[C64], amplitudes: &[C64], horizon: u32) -> Vec<f64> {
    eigenvalues
        .iter()
        .zip(amplitudes)
        .map(|(lambda, b)| lambda.norm().powi(horizon as i32) * b.norm())
        .collect()
}

/// Mode indices sorted by descending importance, at most `max_modes` of them.
pub fn select_modes(
    eigenvalues: &[C64],
    amplitudes: &[C64],
    horizon: u32,
    max_modes: usize,
) -> Vec<usize> {
    let importance = mode_importance(eigenvalues, amplitudes, horizon);
    let mut order: Vec<usize> = (0..importance.len()).collect();
    order.sort_by(|&a, &b| importance[b].total_cmp(&importance[a]));
    order.truncate(max_modes);
    order
}

/// Solve for amplitudes b via least-squares: Φ b ≈ x₀.
pub(crate) fn solve_amplitudes(
    modes: &[Vec<C64>],
    x0: &[f64],
    rank: usize,
) -> Result<Vec<C64>, RomError> {
    // Normal equations: Φᴴ Φ b = Φᴴ x₀
    let mut gram = vec![vec![C64::zero(); rank]; rank];
    let mut rhs = vec![C64::zero(); rank];

    for i in 0..rank {
        for j in 0..rank {
            let mut val = C64::zero();
            for row in modes {
                val += row[i].conj() * row[j];
            }
            gram[i][j] = val;
        }
        let mut val = C64::zero();
        for (row, &x) in modes.iter().zip(x0) {
            val += row[i].conj() * C64::new(x, 0.0);
        }
        rhs[i] = val;
    }

    complex_solve(&gram, &rhs)
}

/// ‖Φ b − x₀‖ / ‖x₀‖ (absolute when x₀ = 0).
pub(crate) fn fit_residual(modes: &[Vec<C64>], amplitudes: &[C64], x0: &[f64]) -> f64 {
    let mut sum = 0.0;
    for (row, &x) in modes.iter().zip(x0) {
        let mut val = C64::zero();
        for (m, &b) in row.iter().zip(amplitudes) {
            val += *m * b;
        }
        sum += (val - C64::new(x, 0.0)).norm_sqr();
    }
    let norm = vec_norm(x0);
    if norm > 0.0 {
        sum.sqrt() / norm
    } else {
        sum.sqrt()
    }
}

/// Solve a complex linear system Ax = b using Gaussian elimination.
fn complex_solve(a: &[Vec<C64>], b: &[C64]) -> Result<Vec<C64>, RomError> {
    let n = b.len();
    let mut aug: Vec<Vec<C64>> = a
        .iter()
        .zip(b)
        .map(|(row, &rhs)| {
            let mut new_row = row.clone();
            new_row.push(rhs);
            new_row
        })
        .collect();

    let scale = a
        .iter()
        .flat_map(|row| row.iter().map(C64::norm))
        .fold(0.0_f64, f64::max);
    let tol = scale * n as f64 * f64::EPSILON;

    for col in 0..n {
        // Partial pivoting
        let mut max_norm = aug[col][col].norm();
        let mut max_row = col;
        for (row, r) in aug.iter().enumerate().skip(col + 1) {
            let norm = r[col].norm();
            if norm > max_norm {
                max_norm = norm;
                max_row = row;
            }
        }
        if max_norm <= tol || max_norm == 0.0 {
            return Err(RomError::unstable("singular normal equations", f64::INFINITY));
        }
        aug.swap(col, max_row);

        let pivot = aug[col][col];
        for row in (col + 1)..n {
            let factor = aug[row][col] / pivot;
            for j in col..=n {
                let sub = factor * aug[col][j];
                aug[row][j] = aug[row][j] - sub;
            }
        }
    }

    // Back substitution
    let mut x = vec![C64::zero(); n];
    for i in (0..n).rev() {
        let mut sum = aug[i][n];
        for j in (i + 1)..n {
            sum = sum - aug[i][j] * x[j];
        }
        x[i] = sum / aug[i][i];
    }

    Ok(x)
}

/// Stateful DMD processor: owns the most recent decomposition.
#[derive(Debug, Clone)]
pub struct DmdProcessor {
    config: RomConfiguration,
    result: Option<DmdResult>,
}

impl DmdProcessor {
    pub fn new(config: RomConfiguration) -> Self {
        Self {
            config,
            result: None,
        }
    }

    /// Wrap an existing decomposition, e.g. one restored from disk.
    pub fn from_result(config: RomConfiguration, result: DmdResult) -> RomResult<Self> {
        result.validate()?;
        Ok(Self {
            config,
            result: Some(result),
        })
    }

    pub fn compute_dmd_decomposition(&mut self, snapshot: &SnapshotData) -> RomResult<DmdResult> {
        let start = Instant::now();
        let result = dmd(snapshot, &self.config)?;
        log::info!(
            "DMD finished in {:.3}s: rank {} ({:?}), condition number {:.2e}, amplitude residual {:.2e}",
            start.elapsed().as_secs_f64(),
            result.rank,
            result.variant,
            result.condition_number,
            result.amplitude_residual
        );
        self.result = Some(result.clone());
        Ok(result)
    }

    pub fn is_trained(&self) -> bool {
        self.result.is_some()
    }

    pub fn result(&self) -> Option<&DmdResult> {
        self.result.as_ref()
    }

    /// Extrapolate the fitted dynamics; see [`predict_future`].
    pub fn predict_future(&self, n_steps: usize, dt: f64) -> RomResult<Mat<f64>> {
        let result = self.result.as_ref().ok_or(RomError::NotTrained("DMD processor"))?;
        predict_future(result, n_steps, dt)
    }
}
