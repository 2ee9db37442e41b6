//! Parametric reduced-order model.
//!
//! Training builds one global POD basis from every sample's snapshots, then
//! fits an interpolator from parameter vectors to POD coefficients. The
//! trained artifacts form an immutable [`TrainedRom`] held behind an `Arc`;
//! re-training and loading swap the `Arc` as a whole, so a prediction that
//! started against one model finishes against that same model.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use faer::Mat;
use parking_lot::RwLock;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{CoefficientTarget, RomConfiguration};
use crate::dmd::dmd;
use crate::interpolate::{check_distinct_points, CoefficientInterpolator, ParameterBounds};
use crate::persistence::{load_bundle, save_bundle, ModelBundle};
use crate::pod::pod;
use crate::predict::predict_future;
use crate::snapshot::SnapshotData;
use crate::types::{DmdResult, PodResult, RomError, RomResult};
use crate::utils::relative_l2_error;

/// Discrete steps of offline training, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingStage {
    Assemble,
    Decompose,
    Project,
    FitInterpolator,
    Validate,
}

impl fmt::Display for TrainingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrainingStage::Assemble => "assemble",
            TrainingStage::Decompose => "decompose",
            TrainingStage::Project => "project",
            TrainingStage::FitInterpolator => "fit-interpolator",
            TrainingStage::Validate => "validate",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a [`ParametricRom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomPhase {
    Untrained,
    Training,
    Trained,
}

/// Cooperative cancellation flag, checked between training stages.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Called with each stage just before it runs.
pub type ProgressCallback = Arc<dyn Fn(TrainingStage) + Send + Sync>;

/// Optional hooks for a training run.
#[derive(Clone, Default)]
pub struct TrainingOptions {
    pub cancel: Option<CancellationToken>,
    pub progress: Option<ProgressCallback>,
}

impl TrainingOptions {
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_progress(mut self, f: impl Fn(TrainingStage) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(f));
        self
    }

    fn enter(&self, stage: TrainingStage) -> RomResult<()> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            log::info!("training cancelled before {stage}");
            return Err(RomError::Cancelled(stage));
        }
        if let Some(progress) = &self.progress {
            progress(stage);
        }
        log::debug!("training stage: {stage}");
        Ok(())
    }
}

/// How validation samples were held out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationMode {
    /// Interpolator refitted without the sample under test.
    LeaveOneOut,
    /// Interpolator evaluated at its own training points.
    InSample,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub mode: ValidationMode,
    pub n_samples: usize,
    pub average_error: f64,
    pub max_error: f64,
    pub average_speedup: f64,
    pub max_speedup: f64,
    /// Relative L2 error per validated sample name.
    pub sample_errors: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub speedup_factor: f64,
    /// (1 − average validation error) · 100, in [0, 100].
    pub accuracy_percentage: f64,
    pub compression_ratio: f64,
}

#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub n_samples: usize,
    pub n_columns: usize,
    pub n_modes: usize,
    pub pod_reconstruction_error: f64,
    pub interpolator: &'static str,
    pub validation: ValidationReport,
    pub metrics: PerformanceMetrics,
    pub training_time: Duration,
    pub version: u64,
}

/// Immutable artifacts of one successful training run.
#[derive(Debug, Clone)]
pub struct TrainedRom {
    pub config: RomConfiguration,
    pub pod: PodResult,
    pub interpolator: CoefficientInterpolator,
    pub bounds: ParameterBounds,
    pub metrics: PerformanceMetrics,
    pub dmd: Option<DmdResult>,
    pub version: u64,
}

impl TrainedRom {
    /// mean + Φ · interpolate(parameters).
    pub fn predict(&self, parameters: &[f64]) -> RomResult<Vec<f64>> {
        let expected = self.interpolator.n_parameters();
        if parameters.len() != expected {
            return Err(RomError::DimensionMismatch {
                context: "prediction parameters",
                expected,
                found: parameters.len(),
            });
        }
        self.bounds.check(parameters, self.config.extrapolation)?;
        let coefficients = self.interpolator.evaluate(parameters)?;
        self.pod.reconstruct_with_mean(&coefficients)
    }

    fn to_bundle(&self) -> ModelBundle {
        ModelBundle {
            config: self.config.clone(),
            pod: self.pod.clone(),
            dmd: self.dmd.clone(),
            interpolator: self.interpolator.clone(),
            bounds: self.bounds.clone(),
            metrics: self.metrics.clone(),
            trained: true,
            version: self.version,
        }
    }

    fn from_bundle(bundle: ModelBundle) -> Self {
        Self {
            config: bundle.config,
            pod: bundle.pod,
            interpolator: bundle.interpolator,
            bounds: bundle.bounds,
            metrics: bundle.metrics,
            dmd: bundle.dmd,
            version: bundle.version,
        }
    }
}

struct Slot {
    config: RomConfiguration,
    phase: RomPhase,
    current: Option<Arc<TrainedRom>>,
    /// Highest version handed out so far.
    version: u64,
}

/// Parameter-space surrogate built from a database of high-fidelity solutions.
///
/// All methods take `&self`; share the instance across threads with an `Arc`.
/// While a re-training runs, predictions are served by the previous model.
pub struct ParametricRom {
    slot: RwLock<Slot>,
}

impl ParametricRom {
    pub fn new(config: RomConfiguration) -> RomResult<Self> {
        config.validate()?;
        Ok(Self {
            slot: RwLock::new(Slot {
                config,
                phase: RomPhase::Untrained,
                current: None,
                version: 0,
            }),
        })
    }

    /// Restore a trained model saved with [`ParametricRom::save_model`].
    pub fn from_file(path: impl AsRef<Path>) -> RomResult<Self> {
        let bundle = load_bundle(path.as_ref())?;
        let rom = TrainedRom::from_bundle(bundle);
        Ok(Self {
            slot: RwLock::new(Slot {
                config: rom.config.clone(),
                phase: RomPhase::Trained,
                version: rom.version,
                current: Some(Arc::new(rom)),
            }),
        })
    }

    pub fn phase(&self) -> RomPhase {
        self.slot.read().phase
    }

    pub fn config(&self) -> RomConfiguration {
        self.slot.read().config.clone()
    }

    /// The model currently serving predictions.
    pub fn trained(&self) -> Option<Arc<TrainedRom>> {
        self.slot.read().current.clone()
    }

    pub fn metrics(&self) -> Option<PerformanceMetrics> {
        self.trained().map(|rom| rom.metrics.clone())
    }

    /// Version of the serving model, 0 if none.
    pub fn version(&self) -> u64 {
        self.trained().map_or(0, |rom| rom.version)
    }

    pub fn train_parametric_rom(
        &self,
        parameter_samples: &BTreeMap<String, Vec<f64>>,
        solution_database: &BTreeMap<String, SnapshotData>,
    ) -> RomResult<TrainingSummary> {
        self.train_with(parameter_samples, solution_database, &TrainingOptions::default())
    }

    /// Train with cancellation and progress hooks.
    ///
    /// On success the new model replaces the old one atomically. On any
    /// failure, cancellation included, the instance ends up `Untrained`.
    pub fn train_with(
        &self,
        parameter_samples: &BTreeMap<String, Vec<f64>>,
        solution_database: &BTreeMap<String, SnapshotData>,
        options: &TrainingOptions,
    ) -> RomResult<TrainingSummary> {
        let config = {
            let mut slot = self.slot.write();
            if slot.phase == RomPhase::Training {
                return Err(RomError::TrainingInProgress);
            }
            slot.phase = RomPhase::Training;
            slot.config.clone()
        };
        let guard = TrainingGuard {
            slot: &self.slot,
            armed: true,
        };

        let start = Instant::now();
        let outcome = rayon::ThreadPoolBuilder::new()
            .num_threads(config.effective_workers())
            .build()
            .map_err(|e| RomError::InvalidConfig(format!("cannot build training pool: {e}")))
            .and_then(|pool| {
                pool.install(|| run_training(&config, parameter_samples, solution_database, options))
            });

        guard.disarm();
        let mut slot = self.slot.write();
        match outcome {
            Ok((mut rom, mut summary)) => {
                slot.version += 1;
                rom.version = slot.version;
                summary.version = slot.version;
                summary.training_time = start.elapsed();
                log::info!(
                    "trained model v{} in {:.3}s: {} samples, {} modes, accuracy {:.2}%",
                    summary.version,
                    summary.training_time.as_secs_f64(),
                    summary.n_samples,
                    summary.n_modes,
                    summary.metrics.accuracy_percentage
                );
                slot.current = Some(Arc::new(rom));
                slot.phase = RomPhase::Trained;
                Ok(summary)
            }
            Err(e) => {
                log::warn!("training failed: {e}");
                slot.current = None;
                slot.phase = RomPhase::Untrained;
                Err(e)
            }
        }
    }

    /// Full-order solution for a parameter vector.
    pub fn predict_solution(&self, parameters: &[f64]) -> RomResult<Vec<f64>> {
        let rom = self.trained().ok_or(RomError::NotTrained("ParametricRom"))?;
        rom.predict(parameters)
    }

    /// Prediction from named parameter values, ordered by `parameter_ranges`.
    pub fn predict_named(&self, parameters: &BTreeMap<String, f64>) -> RomResult<Vec<f64>> {
        let rom = self.trained().ok_or(RomError::NotTrained("ParametricRom"))?;
        let ranges = &rom.config.parameter_ranges;
        if ranges.is_empty() {
            return Err(RomError::InvalidConfig(
                "named prediction requires configured parameter_ranges".into(),
            ));
        }
        if let Some(unknown) = parameters.keys().find(|k| rom.config.range(k).is_none()) {
            return Err(RomError::InvalidInput(format!("unknown parameter `{unknown}`")));
        }
        let ordered = ranges
            .iter()
            .map(|r| {
                parameters
                    .get(&r.name)
                    .copied()
                    .ok_or_else(|| RomError::InvalidInput(format!("missing parameter `{}`", r.name)))
            })
            .collect::<RomResult<Vec<f64>>>()?;
        rom.predict(&ordered)
    }

    /// Fit a DMD model of a trajectory and attach it to the serving model.
    pub fn fit_dynamics(&self, trajectory: &SnapshotData) -> RomResult<DmdResult> {
        let config = self
            .trained()
            .ok_or(RomError::NotTrained("ParametricRom"))?
            .config
            .clone();
        let result = dmd(trajectory, &config)?;

        let mut slot = self.slot.write();
        if slot.phase == RomPhase::Training {
            return Err(RomError::TrainingInProgress);
        }
        let current = slot.current.clone().ok_or(RomError::NotTrained("ParametricRom"))?;
        if result.n_dofs() != current.pod.n_dofs() {
            return Err(RomError::DimensionMismatch {
                context: "dynamics trajectory",
                expected: current.pod.n_dofs(),
                found: result.n_dofs(),
            });
        }
        slot.version += 1;
        let mut next = (*current).clone();
        next.dmd = Some(result.clone());
        next.version = slot.version;
        slot.current = Some(Arc::new(next));
        log::info!("attached rank-{} DMD model as v{}", result.rank, slot.version);
        Ok(result)
    }

    /// Extrapolate the attached DMD model; see [`predict_future`].
    pub fn predict_dynamics(&self, n_steps: usize, dt: f64) -> RomResult<Mat<f64>> {
        let rom = self.trained().ok_or(RomError::NotTrained("ParametricRom"))?;
        let result = rom.dmd.as_ref().ok_or(RomError::NotTrained("dynamics model"))?;
        predict_future(result, n_steps, dt)
    }

    pub fn save_model(&self, path: impl AsRef<Path>) -> RomResult<()> {
        let rom = self.trained().ok_or(RomError::NotTrained("ParametricRom"))?;
        save_bundle(path.as_ref(), &rom.to_bundle())
    }

    /// Replace the serving model with one read from disk.
    ///
    /// The file is fully verified first; on error the instance is unchanged.
    pub fn load_model(&self, path: impl AsRef<Path>) -> RomResult<()> {
        let bundle = load_bundle(path.as_ref())?;
        let mut slot = self.slot.write();
        if slot.phase == RomPhase::Training {
            return Err(RomError::TrainingInProgress);
        }
        let rom = TrainedRom::from_bundle(bundle);
        slot.version = slot.version.max(rom.version);
        slot.config = rom.config.clone();
        slot.current = Some(Arc::new(rom));
        slot.phase = RomPhase::Trained;
        Ok(())
    }
}

/// Clears the slot to `Untrained` if training unwinds before it is disarmed.
struct TrainingGuard<'a> {
    slot: &'a RwLock<Slot>,
    armed: bool,
}

impl TrainingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TrainingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            log::warn!("training aborted by a panic; model reset to untrained");
            let mut slot = self.slot.write();
            slot.current = None;
            slot.phase = RomPhase::Untrained;
        }
    }
}

/// Training inputs flattened into one global snapshot matrix.
struct Assembly<'a> {
    names: Vec<&'a str>,
    points: Vec<Vec<f64>>,
    samples: Vec<&'a SnapshotData>,
    global: SnapshotData,
}

/// Interpolator inputs that do not depend on the POD basis.
struct InterpolationLayout {
    bounds: ParameterBounds,
    targets: Vec<Vec<f64>>,
}

fn run_training(
    config: &RomConfiguration,
    parameter_samples: &BTreeMap<String, Vec<f64>>,
    solution_database: &BTreeMap<String, SnapshotData>,
    options: &TrainingOptions,
) -> RomResult<(TrainedRom, TrainingSummary)> {
    options.enter(TrainingStage::Assemble)?;
    let assembly = assemble(config, parameter_samples, solution_database)?;

    options.enter(TrainingStage::Decompose)?;
    let (pod_result, layout) = rayon::join(
        || pod(&assembly.global.solutions, config),
        || prepare_layout(config, &assembly),
    );
    let pod_result = pod_result?;
    let layout = layout?;

    options.enter(TrainingStage::Project)?;
    let coefficients = layout
        .targets
        .par_iter()
        .map(|t| pod_result.project_centered(t))
        .collect::<RomResult<Vec<_>>>()?;

    options.enter(TrainingStage::FitInterpolator)?;
    let interpolator = CoefficientInterpolator::fit(
        &assembly.points,
        &coefficients,
        config.rbf_kernel,
        config.polynomial_degree,
    )?;
    log::info!(
        "fitted {} interpolator over {} parameter points",
        interpolator.kind(),
        assembly.points.len()
    );

    options.enter(TrainingStage::Validate)?;
    let validation = validate(
        config,
        &assembly,
        &pod_result,
        &interpolator,
        &coefficients,
        &layout.targets,
    )?;

    let metrics = PerformanceMetrics {
        speedup_factor: validation.average_speedup,
        accuracy_percentage: ((1.0 - validation.average_error) * 100.0).clamp(0.0, 100.0),
        compression_ratio: pod_result.compression_ratio,
    };
    let summary = TrainingSummary {
        n_samples: assembly.names.len(),
        n_columns: assembly.global.n_snapshots(),
        n_modes: pod_result.truncation_index,
        pod_reconstruction_error: pod_result.reconstruction_error,
        interpolator: interpolator.kind(),
        validation,
        metrics: metrics.clone(),
        training_time: Duration::ZERO,
        version: 0,
    };
    let rom = TrainedRom {
        config: config.clone(),
        pod: pod_result,
        interpolator,
        bounds: layout.bounds,
        metrics,
        dmd: None,
        version: 0,
    };
    Ok((rom, summary))
}

fn assemble<'a>(
    config: &RomConfiguration,
    parameter_samples: &BTreeMap<String, Vec<f64>>,
    solution_database: &'a BTreeMap<String, SnapshotData>,
) -> RomResult<Assembly<'a>> {
    if solution_database.is_empty() {
        return Err(RomError::InsufficientData(
            "solution database contains no samples".into(),
        ));
    }

    let mut names = Vec::with_capacity(solution_database.len());
    let mut points: Vec<Vec<f64>> = Vec::with_capacity(solution_database.len());
    let mut samples = Vec::with_capacity(solution_database.len());
    for (name, data) in solution_database {
        data.validate()?;
        let params = parameter_samples.get(name).ok_or_else(|| {
            RomError::InvalidInput(format!("no parameter vector for sample `{name}`"))
        })?;
        if params.iter().any(|v| !v.is_finite()) {
            return Err(RomError::InvalidInput(format!(
                "parameters of sample `{name}` contain NaN or Inf"
            )));
        }
        let expected_len = match (config.parameter_ranges.len(), points.first()) {
            (0, Some(first)) => Some(first.len()),
            (0, None) => None,
            (n, _) => Some(n),
        };
        if let Some(expected) = expected_len.filter(|&e| e != params.len()) {
            return Err(RomError::DimensionMismatch {
                context: "sample parameter vector",
                expected,
                found: params.len(),
            });
        }
        if let Some(first) = samples.first().map(|s: &&SnapshotData| s.n_dofs()) {
            if data.n_dofs() != first {
                return Err(RomError::DimensionMismatch {
                    context: "sample dof count",
                    expected: first,
                    found: data.n_dofs(),
                });
            }
        }
        names.push(name.as_str());
        points.push(params.clone());
        samples.push(data);
    }

    if samples.len() < config.offline_samples {
        log::warn!(
            "training on {} samples, fewer than the {} configured offline samples",
            samples.len(),
            config.offline_samples
        );
    }

    let columns: Vec<(usize, usize)> = samples
        .iter()
        .enumerate()
        .flat_map(|(s, data)| (0..data.n_snapshots()).map(move |j| (s, j)))
        .collect();
    let n_dofs = samples[0].n_dofs();
    let n_params = points[0].len();

    let bytes = n_dofs * columns.len() * std::mem::size_of::<f64>();
    if bytes > config.cache_budget_mb * 1024 * 1024 {
        log::warn!(
            "global snapshot matrix needs {:.1} MiB, above the {} MiB budget",
            bytes as f64 / (1024.0 * 1024.0),
            config.cache_budget_mb
        );
    }

    let solutions = Mat::from_fn(n_dofs, columns.len(), |i, c| {
        let (s, j) = columns[c];
        samples[s].solutions[(i, j)]
    });
    let parameters = Mat::from_fn(n_params, columns.len(), |k, c| points[columns[c].0][k]);
    log::debug!(
        "assembled {} x {} global snapshot matrix from {} samples",
        n_dofs,
        columns.len(),
        samples.len()
    );

    Ok(Assembly {
        names,
        points,
        samples,
        global: SnapshotData::new(solutions).with_parameters(parameters),
    })
}

fn prepare_layout(config: &RomConfiguration, assembly: &Assembly<'_>) -> RomResult<InterpolationLayout> {
    check_distinct_points(&assembly.points)?;
    let bounds = ParameterBounds::new(&config.parameter_ranges, &assembly.points);
    let targets = assembly
        .samples
        .iter()
        .map(|data| target_column(data, config.coefficient_target))
        .collect();
    Ok(InterpolationLayout { bounds, targets })
}

fn target_column(data: &SnapshotData, target: CoefficientTarget) -> Vec<f64> {
    match target {
        CoefficientTarget::FirstSnapshot => data.column(0),
        CoefficientTarget::SnapshotMean => {
            let n = data.n_snapshots() as f64;
            (0..data.n_dofs())
                .map(|i| (0..data.n_snapshots()).map(|j| data.solutions[(i, j)]).sum::<f64>() / n)
                .collect()
        }
    }
}

fn validate(
    config: &RomConfiguration,
    assembly: &Assembly<'_>,
    pod_result: &PodResult,
    interpolator: &CoefficientInterpolator,
    coefficients: &[Vec<f64>],
    targets: &[Vec<f64>],
) -> RomResult<ValidationReport> {
    let n = assembly.names.len();
    let m = config.validation_samples.clamp(1, n);
    let mode = if n >= 3 {
        ValidationMode::LeaveOneOut
    } else {
        ValidationMode::InSample
    };
    let held_out: Vec<usize> = (0..m).map(|k| k * n / m).collect();

    let results = held_out
        .par_iter()
        .map(|&i| -> RomResult<(usize, f64, f64)> {
            let model = match mode {
                ValidationMode::InSample => interpolator.clone(),
                ValidationMode::LeaveOneOut => {
                    let points: Vec<Vec<f64>> = without(&assembly.points, i);
                    let values: Vec<Vec<f64>> = without(coefficients, i);
                    CoefficientInterpolator::fit(
                        &points,
                        &values,
                        config.rbf_kernel,
                        config.polynomial_degree,
                    )?
                }
            };
            let start = Instant::now();
            let c = model.evaluate(&assembly.points[i])?;
            let predicted = pod_result.reconstruct_with_mean(&c)?;
            let elapsed = start.elapsed().as_secs_f64().max(1e-9);
            Ok((
                i,
                relative_l2_error(&predicted, &targets[i]),
                config.reference_solve_seconds / elapsed,
            ))
        })
        .collect::<RomResult<Vec<_>>>()?;

    let count = results.len() as f64;
    let average_error = results.iter().map(|r| r.1).sum::<f64>() / count;
    let max_error = results.iter().map(|r| r.1).fold(0.0, f64::max);
    let average_speedup = results.iter().map(|r| r.2).sum::<f64>() / count;
    let max_speedup = results.iter().map(|r| r.2).fold(0.0, f64::max);
    let sample_errors = results
        .iter()
        .map(|&(i, err, _)| (assembly.names[i].to_string(), err))
        .collect();

    log::info!(
        "validation ({mode:?}, {} samples): mean error {average_error:.3e}, max error {max_error:.3e}, mean speedup {average_speedup:.1}x",
        results.len()
    );

    Ok(ValidationReport {
        mode,
        n_samples: results.len(),
        average_error,
        max_error,
        average_speedup,
        max_speedup,
        sample_errors,
    })
}

fn without<T: Clone>(items: &[T], skip: usize) -> Vec<T> {
    items
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != skip)
        .map(|(_, v)| v.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExtrapolationPolicy, ParameterRange};
    use crate::utils::relative_l2_error;
    use std::f64::consts::PI;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Mutex;

    /// Samples whose fields live in a three-function spatial subspace.
    fn make_database(
        n_samples: usize,
        n_dofs: usize,
        n_time: usize,
    ) -> (BTreeMap<String, Vec<f64>>, BTreeMap<String, SnapshotData>) {
        let mut params = BTreeMap::new();
        let mut db = BTreeMap::new();
        for s in 0..n_samples {
            let a = 1.0 + 0.3 * s as f64;
            let b = (0.7 * s as f64).cos();
            let x = Mat::from_fn(n_dofs, n_time, |i, t| {
                let xi = i as f64 / n_dofs as f64;
                let t = t as f64;
                a * (PI * xi).sin() * (1.0 + 0.05 * t)
                    + b * (2.0 * PI * xi).sin()
                    + 0.2 * (0.3 * t).cos() * (3.0 * PI * xi).sin()
            });
            let name = format!("sample_{s:02}");
            params.insert(name.clone(), vec![a, b]);
            db.insert(name, SnapshotData::new(x));
        }
        (params, db)
    }

    fn small_config() -> RomConfiguration {
        RomConfiguration {
            min_modes: 4,
            max_modes: 10,
            offline_samples: 4,
            parallel_workers: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_predict_reproduces_training_sample() {
        let (params, db) = make_database(10, 1000, 20);
        let rom = ParametricRom::new(RomConfiguration::default()).unwrap();
        let summary = rom.train_parametric_rom(&params, &db).unwrap();

        assert_eq!(rom.phase(), RomPhase::Trained);
        assert_eq!(summary.n_samples, 10);
        assert_eq!(summary.n_columns, 200);
        assert_eq!(summary.validation.mode, ValidationMode::LeaveOneOut);

        let name = "sample_03";
        let predicted = rom.predict_solution(&params[name]).unwrap();
        let truth = db[name].column(0);
        let err = relative_l2_error(&predicted, &truth);
        assert!(err < 1e-6, "self-consistency error {err}");
    }

    #[test]
    fn test_predict_before_training() {
        let rom = ParametricRom::new(RomConfiguration::default()).unwrap();
        assert_eq!(rom.phase(), RomPhase::Untrained);
        assert!(matches!(
            rom.predict_solution(&[1.0, 2.0]),
            Err(RomError::NotTrained(_))
        ));
        assert!(rom.metrics().is_none());
        assert_eq!(rom.version(), 0);
    }

    #[test]
    fn test_metrics_are_bounded() {
        let (params, db) = make_database(6, 80, 8);
        let rom = ParametricRom::new(small_config()).unwrap();
        let summary = rom.train_parametric_rom(&params, &db).unwrap();
        let m = rom.metrics().unwrap();
        assert!((0.0..=100.0).contains(&m.accuracy_percentage));
        assert!(m.speedup_factor > 0.0);
        assert_eq!(m.compression_ratio, 80.0 / summary.n_modes as f64);
        assert_eq!(summary.validation.n_samples, 6);
        assert!(summary.validation.max_error >= summary.validation.average_error);
    }

    #[test]
    fn test_two_samples_validate_in_sample() {
        let (params, db) = make_database(2, 40, 5);
        let rom = ParametricRom::new(small_config()).unwrap();
        let summary = rom.train_parametric_rom(&params, &db).unwrap();
        assert_eq!(summary.validation.mode, ValidationMode::InSample);
        assert!(summary.validation.average_error < 1e-6);
    }

    #[test]
    fn test_empty_database_rejected() {
        let rom = ParametricRom::new(small_config()).unwrap();
        assert!(matches!(
            rom.train_parametric_rom(&BTreeMap::new(), &BTreeMap::new()),
            Err(RomError::InsufficientData(_))
        ));
        assert_eq!(rom.phase(), RomPhase::Untrained);
    }

    #[test]
    fn test_missing_parameters_rejected() {
        let (mut params, db) = make_database(3, 20, 4);
        params.remove("sample_01");
        let rom = ParametricRom::new(small_config()).unwrap();
        assert!(matches!(
            rom.train_parametric_rom(&params, &db),
            Err(RomError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_mismatched_dofs_rejected() {
        let (params, mut db) = make_database(3, 20, 4);
        db.insert("sample_01".into(), SnapshotData::new(Mat::zeros(21, 4)));
        let rom = ParametricRom::new(small_config()).unwrap();
        assert!(matches!(
            rom.train_parametric_rom(&params, &db),
            Err(RomError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_cancellation_leaves_untrained() {
        let (params, db) = make_database(4, 30, 5);
        let rom = ParametricRom::new(small_config()).unwrap();
        rom.train_parametric_rom(&params, &db).unwrap();

        let token = CancellationToken::new();
        let trigger = token.clone();
        let options = TrainingOptions::default()
            .with_cancellation(token)
            .with_progress(move |stage| {
                if stage == TrainingStage::Project {
                    trigger.cancel();
                }
            });
        let err = rom.train_with(&params, &db, &options).unwrap_err();
        assert!(matches!(err, RomError::Cancelled(TrainingStage::FitInterpolator)));
        assert_eq!(rom.phase(), RomPhase::Untrained);
        assert!(rom.predict_solution(&params["sample_00"]).is_err());
    }

    #[test]
    fn test_progress_reports_every_stage() {
        let (params, db) = make_database(3, 20, 4);
        let rom = ParametricRom::new(small_config()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let options = TrainingOptions::default().with_progress(move |s| sink.lock().unwrap().push(s));
        rom.train_with(&params, &db, &options).unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                TrainingStage::Assemble,
                TrainingStage::Decompose,
                TrainingStage::Project,
                TrainingStage::FitInterpolator,
                TrainingStage::Validate,
            ]
        );
    }

    #[test]
    fn test_panic_during_training_resets_phase() {
        let (params, db) = make_database(3, 20, 4);
        let rom = ParametricRom::new(small_config()).unwrap();
        rom.train_parametric_rom(&params, &db).unwrap();

        let options = TrainingOptions::default().with_progress(|stage| {
            if stage == TrainingStage::Validate {
                panic!("progress sink failed");
            }
        });
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| rom.train_with(&params, &db, &options)));
        assert!(outcome.is_err());
        assert_eq!(rom.phase(), RomPhase::Untrained);
        assert!(rom.trained().is_none());

        let summary = rom.train_parametric_rom(&params, &db).unwrap();
        assert_eq!(rom.phase(), RomPhase::Trained);
        assert_eq!(summary.version, 2);
    }

    #[test]
    fn test_retrain_during_training_is_rejected() {
        let (params, db) = make_database(3, 20, 4);
        let rom = Arc::new(ParametricRom::new(small_config()).unwrap());
        let observed = Arc::new(Mutex::new(None));

        let inner = Arc::clone(&rom);
        let inner_params = params.clone();
        let inner_db = db.clone();
        let sink = Arc::clone(&observed);
        let options = TrainingOptions::default().with_progress(move |stage| {
            if stage == TrainingStage::Decompose {
                let nested = inner.train_parametric_rom(&inner_params, &inner_db);
                *sink.lock().unwrap() = Some(matches!(nested, Err(RomError::TrainingInProgress)));
            }
        });
        rom.train_with(&params, &db, &options).unwrap();
        assert_eq!(*observed.lock().unwrap(), Some(true));
        assert_eq!(rom.version(), 1);
    }

    #[test]
    fn test_reject_policy_outside_ranges() {
        let (params, db) = make_database(4, 30, 5);
        let config = RomConfiguration {
            extrapolation: ExtrapolationPolicy::Reject,
            parameter_ranges: vec![
                ParameterRange::new("load", 0.5, 2.5),
                ParameterRange::new("phase", -1.0, 1.0),
            ],
            ..small_config()
        };
        let rom = ParametricRom::new(config).unwrap();
        rom.train_parametric_rom(&params, &db).unwrap();

        assert!(rom.predict_solution(&[1.2, 0.0]).is_ok());
        assert!(matches!(
            rom.predict_solution(&[3.0, 0.0]),
            Err(RomError::ExtrapolationRejected { ref parameter, .. }) if parameter == "load"
        ));

        let named: BTreeMap<String, f64> =
            [("load".to_string(), 1.2), ("phase".to_string(), 0.0)].into();
        assert_eq!(
            rom.predict_named(&named).unwrap(),
            rom.predict_solution(&[1.2, 0.0]).unwrap()
        );
        let partial: BTreeMap<String, f64> = [("load".to_string(), 1.2)].into();
        assert!(matches!(rom.predict_named(&partial), Err(RomError::InvalidInput(_))));
    }

    #[test]
    fn test_parameter_length_matches_ranges() {
        let (params, db) = make_database(3, 20, 4);
        let config = RomConfiguration {
            parameter_ranges: vec![ParameterRange::new("only", 0.0, 10.0)],
            ..small_config()
        };
        let rom = ParametricRom::new(config).unwrap();
        assert!(matches!(
            rom.train_parametric_rom(&params, &db),
            Err(RomError::DimensionMismatch { expected: 1, found: 2, .. })
        ));
    }

    #[test]
    fn test_concurrent_predictions_during_retrain() {
        let (params, db) = make_database(5, 60, 6);
        let rom = Arc::new(ParametricRom::new(small_config()).unwrap());
        rom.train_parametric_rom(&params, &db).unwrap();
        let query = params["sample_02"].clone();
        let expected = rom.predict_solution(&query).unwrap();

        std::thread::scope(|scope| {
            let trainer = {
                let rom = Arc::clone(&rom);
                let (params, db) = (params.clone(), db.clone());
                scope.spawn(move || rom.train_parametric_rom(&params, &db).map(|s| s.version))
            };
            for _ in 0..4 {
                let rom = Arc::clone(&rom);
                let query = query.clone();
                let expected = expected.clone();
                scope.spawn(move || {
                    for _ in 0..20 {
                        let got = rom.predict_solution(&query).unwrap();
                        assert!(relative_l2_error(&got, &expected) < 1e-8);
                    }
                });
            }
            assert_eq!(trainer.join().unwrap().unwrap(), 2);
        });
    }

    #[test]
    fn test_fit_and_predict_dynamics() {
        let (params, db) = make_database(3, 25, 12);
        let rom = ParametricRom::new(small_config()).unwrap();
        assert!(matches!(
            rom.predict_dynamics(3, 1.0),
            Err(RomError::NotTrained(_))
        ));
        rom.train_parametric_rom(&params, &db).unwrap();
        assert!(matches!(
            rom.predict_dynamics(3, 1.0),
            Err(RomError::NotTrained("dynamics model"))
        ));

        // Damped rotation carried by two spatial shapes.
        let trajectory = SnapshotData::new(Mat::from_fn(25, 12, |i, t| {
            let xi = i as f64 / 25.0;
            let (t, r) = (t as f64, 0.9_f64.powi(t as i32));
            r * ((0.4 * t).cos() * (PI * xi).sin() + (0.4 * t).sin() * (2.0 * PI * xi).sin())
        }));
        let result = rom.fit_dynamics(&trajectory).unwrap();
        assert_eq!(result.rank, 2);
        assert_eq!(rom.version(), 2);
        let future = rom.predict_dynamics(4, result.dt).unwrap();
        assert_eq!(future.nrows(), 25);
        assert_eq!(future.ncols(), 4);

        let wrong = SnapshotData::new(Mat::from_fn(7, 5, |i, j| (i + j) as f64));
        assert!(matches!(
            rom.fit_dynamics(&wrong),
            Err(RomError::DimensionMismatch { .. })
        ));
    }
}
