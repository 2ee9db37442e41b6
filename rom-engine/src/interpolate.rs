//! Parameter → POD-coefficient interpolation.
//!
//! Radial basis function interpolation with an optional polynomial tail,
//! solved as the saddle-point system
//!
//! ```text
//! [ K  P ] [ w ]   [ Y ]
//! [ Pᵀ 0 ] [ c ] = [ 0 ]
//! ```
//!
//! with `K_ij = φ(‖xᵢ − xⱼ‖)` on parameters normalized to the training box.
//! The system is inverted with the SVD pseudo-inverse, so degenerate sample
//! layouts (e.g. all samples on a line) still produce the minimum-norm
//! interpolant. Nearest-neighbour lookup is the fallback when no acceptable
//! RBF fit exists.

use faer::Mat;
use serde::{Deserialize, Serialize};

use crate::config::{ExtrapolationPolicy, ParameterRange};
use crate::types::{RomError, RomResult};
use crate::utils::pinv;

/// Largest accepted nodal residual of an RBF fit, relative to the data scale.
const NODAL_TOLERANCE: f64 = 1e-6;

/// Radial kernel φ(r).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RbfKernel {
    /// φ(r) = r
    Linear,
    /// φ(r) = r³
    Cubic,
    /// φ(r) = r² ln r
    ThinPlateSpline,
    /// φ(r) = exp(−(εr)²)
    Gaussian { epsilon: f64 },
}

impl RbfKernel {
    pub fn eval(&self, r: f64) -> f64 {
        match *self {
            RbfKernel::Linear => r,
            RbfKernel::Cubic => r * r * r,
            RbfKernel::ThinPlateSpline => {
                if r > 0.0 {
                    r * r * r.ln()
                } else {
                    0.0
                }
            }
            RbfKernel::Gaussian { epsilon } => (-(epsilon * r).powi(2)).exp(),
        }
    }

    pub fn validate(&self) -> RomResult<()> {
        match *self {
            RbfKernel::Gaussian { epsilon } if !(epsilon > 0.0 && epsilon.is_finite()) => {
                Err(RomError::InvalidConfig(format!(
                    "Gaussian kernel needs a positive epsilon, got {epsilon}"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Polynomial tail appended to the RBF expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolynomialDegree {
    None,
    Constant,
    Linear,
}

impl PolynomialDegree {
    fn n_terms(&self, dim: usize) -> usize {
        match self {
            PolynomialDegree::None => 0,
            PolynomialDegree::Constant => 1,
            PolynomialDegree::Linear => 1 + dim,
        }
    }

    fn terms(&self, x: &[f64]) -> Vec<f64> {
        match self {
            PolynomialDegree::None => Vec::new(),
            PolynomialDegree::Constant => vec![1.0],
            PolynomialDegree::Linear => std::iter::once(1.0).chain(x.iter().copied()).collect(),
        }
    }
}

/// Affine map of parameters onto the unit box spanned by the training samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterScaling {
    lower: Vec<f64>,
    scale: Vec<f64>,
}

impl ParameterScaling {
    pub fn from_points(points: &[Vec<f64>]) -> Self {
        let dim = points.first().map_or(0, Vec::len);
        let mut lower = vec![f64::INFINITY; dim];
        let mut upper = vec![f64::NEG_INFINITY; dim];
        for p in points {
            for (d, &v) in p.iter().enumerate() {
                lower[d] = lower[d].min(v);
                upper[d] = upper[d].max(v);
            }
        }
        let scale = lower
            .iter()
            .zip(&upper)
            .map(|(lo, hi)| if hi > lo { hi - lo } else { 1.0 })
            .collect();
        Self { lower, scale }
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    pub fn normalize(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.lower.iter().zip(&self.scale))
            .map(|(v, (lo, s))| (v - lo) / s)
            .collect()
    }

    fn validate(&self) -> RomResult<()> {
        if self.lower.len() != self.scale.len() {
            return Err(RomError::DimensionMismatch {
                context: "parameter scaling",
                expected: self.lower.len(),
                found: self.scale.len(),
            });
        }
        if self.lower.iter().any(|v| !v.is_finite())
            || self.scale.iter().any(|s| !(*s > 0.0 && s.is_finite()))
        {
            return Err(RomError::InvalidInput(
                "parameter scaling must be finite with positive extents".into(),
            ));
        }
        Ok(())
    }
}

/// Axis-aligned box of trusted parameter values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBounds {
    pub ranges: Vec<ParameterRange>,
}

impl ParameterBounds {
    /// Configured ranges when present, otherwise the bounding box of the training points.
    pub fn new(configured: &[ParameterRange], points: &[Vec<f64>]) -> Self {
        if !configured.is_empty() {
            return Self {
                ranges: configured.to_vec(),
            };
        }
        let dim = points.first().map_or(0, Vec::len);
        let ranges = (0..dim)
            .map(|d| {
                let (lo, hi) = points.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                    (lo.min(p[d]), hi.max(p[d]))
                });
                ParameterRange::new(format!("p{d}"), lo, hi)
            })
            .collect();
        Self { ranges }
    }

    /// First parameter outside its range, if any.
    pub fn violation(&self, x: &[f64]) -> Option<(&ParameterRange, f64)> {
        self.ranges
            .iter()
            .zip(x)
            .find(|(range, v)| !range.contains(**v))
            .map(|(range, &v)| (range, v))
    }

    /// Apply an extrapolation policy to a query.
    pub fn check(&self, x: &[f64], policy: ExtrapolationPolicy) -> RomResult<()> {
        let Some((range, value)) = self.violation(x) else {
            return Ok(());
        };
        match policy {
            ExtrapolationPolicy::Allow => Ok(()),
            ExtrapolationPolicy::Warn => {
                log::warn!(
                    "extrapolating: parameter `{}` = {value} outside [{}, {}]",
                    range.name,
                    range.min,
                    range.max
                );
                Ok(())
            }
            ExtrapolationPolicy::Reject => Err(RomError::ExtrapolationRejected {
                parameter: range.name.clone(),
                value,
                min: range.min,
                max: range.max,
            }),
        }
    }
}

/// RBF interpolant with polynomial tail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbfInterpolator {
    kernel: RbfKernel,
    degree: PolynomialDegree,
    scaling: ParameterScaling,
    /// Normalized training points.
    centers: Vec<Vec<f64>>,
    /// Kernel weights (n_centers × n_outputs).
    weights: Vec<Vec<f64>>,
    /// Polynomial coefficients (n_terms × n_outputs).
    poly: Vec<Vec<f64>>,
}

impl RbfInterpolator {
    pub fn fit(
        points: &[Vec<f64>],
        values: &[Vec<f64>],
        kernel: RbfKernel,
        degree: PolynomialDegree,
    ) -> RomResult<Self> {
        let (dim, n_out) = check_training_set(points, values)?;
        kernel.validate()?;

        let scaling = ParameterScaling::from_points(points);
        let centers: Vec<Vec<f64>> = points.iter().map(|p| scaling.normalize(p)).collect();
        check_distinct(&centers)?;

        let n = centers.len();
        let q = degree.n_terms(dim);
        let size = n + q;

        let mut system = Mat::<f64>::zeros(size, size);
        for i in 0..n {
            for j in 0..n {
                system[(i, j)] = kernel.eval(distance(&centers[i], &centers[j]));
            }
            for (k, t) in degree.terms(&centers[i]).into_iter().enumerate() {
                system[(i, n + k)] = t;
                system[(n + k, i)] = t;
            }
        }
        let rhs = Mat::from_fn(size, n_out, |i, j| if i < n { values[i][j] } else { 0.0 });

        let inverse = pinv(&system, None)?;
        let solution = &inverse * &rhs;

        let weights = (0..n)
            .map(|i| (0..n_out).map(|j| solution[(i, j)]).collect())
            .collect();
        let poly = (0..q)
            .map(|k| (0..n_out).map(|j| solution[(n + k, j)]).collect())
            .collect();

        let interpolator = Self {
            kernel,
            degree,
            scaling,
            centers,
            weights,
            poly,
        };
        interpolator.check_nodal_residual(points, values)?;
        Ok(interpolator)
    }

    pub fn kernel(&self) -> RbfKernel {
        self.kernel
    }

    pub fn n_centers(&self) -> usize {
        self.centers.len()
    }

    pub fn n_outputs(&self) -> usize {
        self.weights.first().or(self.poly.first()).map_or(0, Vec::len)
    }

    /// Check that centers, weights and the polynomial tail agree in shape.
    pub fn validate(&self) -> RomResult<()> {
        self.kernel.validate()?;
        self.scaling.validate()?;
        let dim = self.scaling.dim();
        if self.centers.is_empty() {
            return Err(RomError::InsufficientData("RBF interpolator has no centers".into()));
        }
        check_rows(&self.centers, dim, "RBF centers")?;
        if self.weights.len() != self.centers.len() {
            return Err(RomError::DimensionMismatch {
                context: "RBF weights",
                expected: self.centers.len(),
                found: self.weights.len(),
            });
        }
        let q = self.degree.n_terms(dim);
        if self.poly.len() != q {
            return Err(RomError::DimensionMismatch {
                context: "RBF polynomial tail",
                expected: q,
                found: self.poly.len(),
            });
        }
        let n_out = self.n_outputs();
        check_rows(&self.weights, n_out, "RBF weights")?;
        check_rows(&self.poly, n_out, "RBF polynomial tail")
    }

    pub fn evaluate(&self, x: &[f64]) -> RomResult<Vec<f64>> {
        check_query(x, self.scaling.dim())?;
        let z = self.scaling.normalize(x);
        let mut out = vec![0.0; self.n_outputs()];

        for (center, w) in self.centers.iter().zip(&self.weights) {
            let phi = self.kernel.eval(distance(&z, center));
            for (o, &wj) in out.iter_mut().zip(w) {
                *o += phi * wj;
            }
        }
        for (t, c) in self.degree.terms(&z).into_iter().zip(&self.poly) {
            for (o, &cj) in out.iter_mut().zip(c) {
                *o += t * cj;
            }
        }
        Ok(out)
    }

    fn check_nodal_residual(&self, points: &[Vec<f64>], values: &[Vec<f64>]) -> RomResult<()> {
        let scale = values
            .iter()
            .flat_map(|v| v.iter().map(|x| x.abs()))
            .fold(0.0_f64, f64::max)
            .max(f64::MIN_POSITIVE);
        let mut worst = 0.0_f64;
        for (p, v) in points.iter().zip(values) {
            let fitted = self.evaluate(p)?;
            for (a, b) in fitted.iter().zip(v) {
                worst = worst.max((a - b).abs() / scale);
            }
        }
        if !(worst <= NODAL_TOLERANCE) {
            return Err(RomError::unstable(
                format!("RBF fit misses its nodes by {worst:.2e} (relative)"),
                f64::INFINITY,
            ));
        }
        Ok(())
    }
}

/// Piecewise-constant lookup of the closest training point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearestNeighbor {
    scaling: ParameterScaling,
    points: Vec<Vec<f64>>,
    values: Vec<Vec<f64>>,
}

impl NearestNeighbor {
    pub fn fit(points: &[Vec<f64>], values: &[Vec<f64>]) -> RomResult<Self> {
        check_training_set(points, values)?;
        let scaling = ParameterScaling::from_points(points);
        Ok(Self {
            points: points.iter().map(|p| scaling.normalize(p)).collect(),
            values: values.to_vec(),
            scaling,
        })
    }

    pub fn evaluate(&self, x: &[f64]) -> RomResult<Vec<f64>> {
        check_query(x, self.scaling.dim())?;
        let z = self.scaling.normalize(x);
        let nearest = self
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| (i, distance(&z, p)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
            .ok_or_else(|| RomError::InsufficientData("no training points".into()))?;
        Ok(self.values[nearest].clone())
    }

    pub fn n_outputs(&self) -> usize {
        self.values.first().map_or(0, Vec::len)
    }

    pub fn validate(&self) -> RomResult<()> {
        self.scaling.validate()?;
        if self.points.is_empty() {
            return Err(RomError::InsufficientData(
                "nearest-neighbour lookup has no points".into(),
            ));
        }
        if self.points.len() != self.values.len() {
            return Err(RomError::DimensionMismatch {
                context: "nearest-neighbour values",
                expected: self.points.len(),
                found: self.values.len(),
            });
        }
        check_rows(&self.points, self.scaling.dim(), "nearest-neighbour points")?;
        check_rows(&self.values, self.n_outputs(), "nearest-neighbour values")
    }
}

/// Interpolator from parameter vectors to POD coefficients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoefficientInterpolator {
    Rbf(RbfInterpolator),
    NearestNeighbor(NearestNeighbor),
}

impl CoefficientInterpolator {
    /// Fit an RBF interpolant, falling back to nearest-neighbour lookup when the
    /// RBF system cannot reproduce its nodes or only one sample exists.
    pub fn fit(
        points: &[Vec<f64>],
        values: &[Vec<f64>],
        kernel: RbfKernel,
        degree: PolynomialDegree,
    ) -> RomResult<Self> {
        if points.len() < 2 {
            return Ok(Self::NearestNeighbor(NearestNeighbor::fit(points, values)?));
        }
        match RbfInterpolator::fit(points, values, kernel, degree) {
            Ok(rbf) => Ok(Self::Rbf(rbf)),
            Err(RomError::NumericalInstability { reason, .. }) => {
                log::warn!("RBF interpolation rejected ({reason}); using nearest neighbour");
                Ok(Self::NearestNeighbor(NearestNeighbor::fit(points, values)?))
            }
            Err(e) => Err(e),
        }
    }

    pub fn evaluate(&self, x: &[f64]) -> RomResult<Vec<f64>> {
        match self {
            Self::Rbf(rbf) => rbf.evaluate(x),
            Self::NearestNeighbor(nn) => nn.evaluate(x),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Rbf(_) => "rbf",
            Self::NearestNeighbor(_) => "nearest-neighbor",
        }
    }

    pub fn n_parameters(&self) -> usize {
        match self {
            Self::Rbf(rbf) => rbf.scaling.dim(),
            Self::NearestNeighbor(nn) => nn.scaling.dim(),
        }
    }

    /// Length of every coefficient vector this interpolator produces.
    pub fn n_outputs(&self) -> usize {
        match self {
            Self::Rbf(rbf) => rbf.n_outputs(),
            Self::NearestNeighbor(nn) => nn.n_outputs(),
        }
    }

    pub fn validate(&self) -> RomResult<()> {
        match self {
            Self::Rbf(rbf) => rbf.validate(),
            Self::NearestNeighbor(nn) => nn.validate(),
        }
    }
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

fn check_training_set(points: &[Vec<f64>], values: &[Vec<f64>]) -> RomResult<(usize, usize)> {
    if points.is_empty() {
        return Err(RomError::InsufficientData(
            "interpolator needs at least one training point".into(),
        ));
    }
    if points.len() != values.len() {
        return Err(RomError::DimensionMismatch {
            context: "interpolator training values",
            expected: points.len(),
            found: values.len(),
        });
    }
    let dim = points[0].len();
    let n_out = values[0].len();
    for p in points {
        if p.len() != dim {
            return Err(RomError::DimensionMismatch {
                context: "interpolator training points",
                expected: dim,
                found: p.len(),
            });
        }
    }
    for v in values {
        if v.len() != n_out {
            return Err(RomError::DimensionMismatch {
                context: "interpolator training values",
                expected: n_out,
                found: v.len(),
            });
        }
    }
    if points.iter().chain(values).flatten().any(|x| !x.is_finite()) {
        return Err(RomError::InvalidInput(
            "interpolator training data contains NaN or Inf".into(),
        ));
    }
    Ok((dim, n_out))
}

/// Every row has `len` finite entries.
fn check_rows(rows: &[Vec<f64>], len: usize, context: &'static str) -> RomResult<()> {
    if let Some(row) = rows.iter().find(|row| row.len() != len) {
        return Err(RomError::DimensionMismatch {
            context,
            expected: len,
            found: row.len(),
        });
    }
    if rows.iter().flatten().any(|v| !v.is_finite()) {
        return Err(RomError::InvalidInput(format!("{context} contain NaN or Inf")));
    }
    Ok(())
}

fn check_query(x: &[f64], dim: usize) -> RomResult<()> {
    if x.len() != dim {
        return Err(RomError::DimensionMismatch {
            context: "interpolator query",
            expected: dim,
            found: x.len(),
        });
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(RomError::InvalidInput("query contains NaN or Inf".into()));
    }
    Ok(())
}

/// Reject training sets with coincident parameter points.
pub fn check_distinct_points(points: &[Vec<f64>]) -> RomResult<()> {
    let scaling = ParameterScaling::from_points(points);
    let normalized: Vec<Vec<f64>> = points.iter().map(|p| scaling.normalize(p)).collect();
    check_distinct(&normalized)
}

fn check_distinct(centers: &[Vec<f64>]) -> RomResult<()> {
    for i in 0..centers.len() {
        for j in (i + 1)..centers.len() {
            if distance(&centers[i], &centers[j]) < 1e-12 {
                return Err(RomError::InvalidInput(format!(
                    "training points {i} and {j} coincide"
                )));
            }
        }
    }
    Ok(())
}
