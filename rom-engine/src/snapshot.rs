use std::collections::BTreeMap;

use faer::Mat;

use crate::types::{RomError, RomResult};
use crate::utils::validate_matrix;

/// Raw training data: solution vectors as columns, plus optional parameter
/// and time-stamp information aligned with those columns.
#[derive(Debug, Clone)]
pub struct SnapshotData {
    /// Solution snapshots (n_dofs × n_snapshots).
    pub solutions: Mat<f64>,
    /// Parameter values (n_params × n_snapshots), aligned with `solutions` columns.
    pub parameters: Option<Mat<f64>>,
    /// Strictly increasing time of each column.
    pub time_stamps: Option<Vec<f64>>,
    /// Opaque mesh description carried alongside the data.
    pub mesh_info: BTreeMap<String, String>,
    /// Free-form annotations.
    pub metadata: BTreeMap<String, String>,
}

impl SnapshotData {
    pub fn new(solutions: Mat<f64>) -> Self {
        Self {
            solutions,
            parameters: None,
            time_stamps: None,
            mesh_info: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Mat<f64>) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Attach a single parameter vector to every column.
    pub fn with_parameter_vector(self, values: &[f64]) -> Self {
        let n = self.n_snapshots();
        let tiled = Mat::from_fn(values.len(), n, |i, _| values[i]);
        self.with_parameters(tiled)
    }

    pub fn with_time_stamps(mut self, time_stamps: Vec<f64>) -> Self {
        self.time_stamps = Some(time_stamps);
        self
    }

    pub fn with_mesh_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.mesh_info.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn n_dofs(&self) -> usize {
        self.solutions.nrows()
    }

    pub fn n_snapshots(&self) -> usize {
        self.solutions.ncols()
    }

    /// Column j of the solution matrix.
    pub fn column(&self, j: usize) -> Vec<f64> {
        (0..self.n_dofs()).map(|i| self.solutions[(i, j)]).collect()
    }

    /// Mean spacing of the time stamps, or 1.0 when none are present.
    pub fn mean_time_step(&self) -> f64 {
        match &self.time_stamps {
            Some(ts) if ts.len() > 1 => (ts[ts.len() - 1] - ts[0]) / (ts.len() - 1) as f64,
            _ => 1.0,
        }
    }

    /// Check column alignment, finiteness and time ordering.
    pub fn validate(&self) -> RomResult<()> {
        validate_matrix(&self.solutions, 1, 1)?;
        let n = self.n_snapshots();

        if let Some(params) = &self.parameters {
            if params.ncols() != n {
                return Err(RomError::DimensionMismatch {
                    context: "snapshot parameters",
                    expected: n,
                    found: params.ncols(),
                });
            }
            validate_matrix(params, 0, 0)?;
        }

        if let Some(ts) = &self.time_stamps {
            if ts.len() != n {
                return Err(RomError::DimensionMismatch {
                    context: "snapshot time stamps",
                    expected: n,
                    found: ts.len(),
                });
            }
            if ts.iter().any(|t| !t.is_finite()) {
                return Err(RomError::InvalidInput(
                    "time stamps contain NaN or Inf values".into(),
                ));
            }
            if ts.windows(2).any(|w| w[1] <= w[0]) {
                return Err(RomError::InvalidInput(
                    "time stamps must be strictly increasing".into(),
                ));
            }
        }
        Ok(())
    }
}
