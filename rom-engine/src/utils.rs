use faer::Mat;

use crate::types::{RomError, SvdComponents};

/// Validate that a matrix meets minimum dimension requirements and contains no NaN/Inf.
pub fn validate_matrix(x: &Mat<f64>, min_rows: usize, min_cols: usize) -> Result<(), RomError> {
    let (rows, cols) = (x.nrows(), x.ncols());
    if rows < min_rows {
        return Err(RomError::InvalidInput(format!(
            "matrix has {rows} rows, need at least {min_rows}"
        )));
    }
    if cols < min_cols {
        return Err(RomError::InvalidInput(format!(
            "matrix has {cols} columns, need at least {min_cols}"
        )));
    }
    for j in 0..cols {
        for i in 0..rows {
            if !x[(i, j)].is_finite() {
                return Err(RomError::InvalidInput(
                    "matrix contains NaN or Inf values".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Smallest r whose leading singular values capture `threshold` of the total energy.
pub fn energy_truncation(singular_values: &[f64], threshold: f64) -> usize {
    let n = singular_values.len();
    let total: f64 = singular_values.iter().map(|s| s * s).sum();
    if total == 0.0 {
        return n.min(1);
    }
    let mut cumulative = 0.0;
    for (i, &s) in singular_values.iter().enumerate() {
        cumulative += s * s;
        if cumulative / total >= threshold {
            return i + 1;
        }
    }
    n
}

/// Smallest r such that σ_r / σ_{r-1} drops below `ratio` (0-based σ_r), else all values.
pub fn decay_truncation(singular_values: &[f64], ratio: f64) -> usize {
    for (i, w) in singular_values.windows(2).enumerate() {
        // A zero leading value means everything after it is zero too.
        if w[0] == 0.0 || w[1] / w[0] < ratio {
            return i + 1;
        }
    }
    singular_values.len()
}

/// Cumulative energy fraction of each leading subset of singular values.
pub fn cumulative_energy(singular_values: &[f64]) -> Vec<f64> {
    let total: f64 = singular_values.iter().map(|s| s * s).sum();
    let mut cumulative = 0.0;
    singular_values
        .iter()
        .map(|s| {
            cumulative += s * s;
            if total > 0.0 {
                (cumulative / total).min(1.0)
            } else {
                1.0
            }
        })
        .collect()
}

/// Number of singular values above the default pseudo-inverse tolerance.
pub fn numerical_rank(singular_values: &[f64], nrows: usize, ncols: usize) -> usize {
    let max_sv = singular_values.iter().copied().fold(0.0_f64, f64::max);
    let tol = max_sv * nrows.max(ncols) as f64 * f64::EPSILON;
    singular_values.iter().filter(|&&s| s > tol).count()
}

/// Thin SVD with singular values in descending order.
pub fn thin_svd(x: &Mat<f64>) -> Result<SvdComponents, RomError> {
    let svd = x
        .thin_svd()
        .map_err(|e| RomError::unstable(format!("SVD did not converge: {e:?}"), f64::INFINITY))?;
    let s_col = svd.S().column_vector();
    let s: Vec<f64> = (0..s_col.nrows()).map(|i| s_col[i].abs()).collect();
    Ok(SvdComponents {
        u: svd.U().to_owned(),
        s,
        v: svd.V().to_owned(),
    })
}

/// Keep the leading `rank` triplets of an SVD.
pub fn truncate_svd(svd: &SvdComponents, rank: usize) -> SvdComponents {
    SvdComponents {
        u: svd.u.as_ref().subcols(0, rank).to_owned(),
        s: svd.s[..rank].to_vec(),
        v: svd.v.as_ref().subcols(0, rank).to_owned(),
    }
}

/// Compute the Moore-Penrose pseudo-inverse via SVD.
pub fn pinv(a: &Mat<f64>, tol: Option<f64>) -> Result<Mat<f64>, RomError> {
    let svd = thin_svd(a)?;
    let max_sv = svd.s.iter().copied().fold(0.0_f64, f64::max);

    let tol = tol.unwrap_or_else(|| {
        let max_dim = a.nrows().max(a.ncols()) as f64;
        max_sv * max_dim * f64::EPSILON
    });

    // pinv(A) = V S_inv U^T
    let m = a.nrows();
    let n = a.ncols();
    let mut result = Mat::<f64>::zeros(n, m);

    for (idx, &si) in svd.s.iter().enumerate() {
        if si > tol {
            let si_inv = 1.0 / si;
            for j in 0..n {
                for i in 0..m {
                    result[(j, i)] += svd.v[(j, idx)] * si_inv * svd.u[(i, idx)];
                }
            }
        }
    }

    Ok(result)
}

/// Compute row means of a matrix.
pub fn row_means(x: &Mat<f64>) -> Vec<f64> {
    let (nrows, ncols) = (x.nrows(), x.ncols());
    let mut means = vec![0.0; nrows];
    if ncols == 0 {
        return means;
    }
    for (i, mean) in means.iter_mut().enumerate() {
        let mut sum = 0.0;
        for j in 0..ncols {
            sum += x[(i, j)];
        }
        *mean = sum / ncols as f64;
    }
    means
}

/// Frobenius norm.
pub fn frobenius_norm(x: &Mat<f64>) -> f64 {
    let mut sum = 0.0;
    for j in 0..x.ncols() {
        for i in 0..x.nrows() {
            sum += x[(i, j)] * x[(i, j)];
        }
    }
    sum.sqrt()
}

/// Euclidean norm of a slice.
pub fn vec_norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// ‖a − b‖ / ‖b‖, or the absolute error when ‖b‖ = 0.
pub fn relative_l2_error(a: &[f64], b: &[f64]) -> f64 {
    let diff: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt();
    let reference = vec_norm(b);
    if reference > 0.0 {
        diff / reference
    } else {
        diff
    }
}

/// Replace columns `from..` of `basis` with unit vectors orthogonal to all earlier columns.
///
/// Candidates are the standard basis vectors, orthogonalized with two passes of
/// modified Gram-Schmidt.
pub fn complete_orthonormal(basis: &mut Mat<f64>, from: usize) -> Result<(), RomError> {
    let m = basis.nrows();
    let r = basis.ncols();
    if r > m {
        return Err(RomError::InvalidInput(format!(
            "cannot hold {r} orthonormal vectors in dimension {m}"
        )));
    }
    let mut candidate = 0;
    for col in from..r {
        loop {
            if candidate >= m {
                return Err(RomError::unstable(
                    "failed to complete orthonormal basis",
                    f64::INFINITY,
                ));
            }
            let mut v = vec![0.0; m];
            v[candidate] = 1.0;
            candidate += 1;
            for _ in 0..2 {
                for k in 0..col {
                    let dot: f64 = (0..m).map(|i| basis[(i, k)] * v[i]).sum();
                    for (i, vi) in v.iter_mut().enumerate() {
                        *vi -= dot * basis[(i, k)];
                    }
                }
            }
            let norm = vec_norm(&v);
            if norm > 1e-8 {
                for (i, vi) in v.iter().enumerate() {
                    basis[(i, col)] = vi / norm;
                }
                break;
            }
        }
    }
    Ok(())
}
