use faer::Mat;

use crate::types::{DmdResult, RomError, C64};

/// Extrapolate the fitted linear dynamics forward in time.
///
/// x(t) = Re( Σᵢ φᵢ · bᵢ · λᵢ^(t / dt_model) ),  t = k · dt,  k = 1..=n_steps
///
/// `dt_model` is the time advanced by one application of the fitted operator
/// (`result.dt`); passing `dt = result.dt` yields integer powers λᵏ.
/// Time is measured from the first snapshot the decomposition was fitted on.
///
/// # Returns
/// Matrix (n_dofs × n_steps) of predicted states.
pub fn predict_future(result: &DmdResult, n_steps: usize, dt: f64) -> Result<Mat<f64>, RomError> {
    if n_steps == 0 {
        return Err(RomError::InvalidInput(
            "n_steps must be positive".to_string(),
        ));
    }
    if !(dt > 0.0 && dt.is_finite()) {
        return Err(RomError::InvalidInput(format!(
            "prediction time step must be positive, got {dt}"
        )));
    }

    let n_dofs = result.n_dofs();
    let rank = result.rank;
    let ratio = dt / result.dt;

    let mut predictions = Mat::<f64>::zeros(n_dofs, n_steps);
    let mut evolved = vec![C64::zero(); rank];

    for k in 0..n_steps {
        let exponent = (k + 1) as f64 * ratio;
        for (j, e) in evolved.iter_mut().enumerate() {
            *e = result.amplitudes[j] * result.eigenvalues[j].powf(exponent);
        }
        for i in 0..n_dofs {
            let mut val = C64::zero();
            for j in 0..rank {
                val += result.eigenvectors[i][j] * evolved[j];
            }
            predictions[(i, k)] = val.re;
        }
    }

    Ok(predictions)
}
