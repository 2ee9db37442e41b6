//! End-to-end tests across POD, DMD, parametric training and persistence.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use faer::Mat;
use rom_engine::utils::relative_l2_error;
use rom_engine::*;

/// Four separable space-time modes with amplitudes 1, 0.5, 0.25, 0.01.
fn make_separable_field(n_dofs: usize, n_time: usize) -> Mat<f64> {
    let amps = [1.0, 0.5, 0.25, 0.01];
    Mat::from_fn(n_dofs, n_time, |i, t| {
        let xi = (i as f64 + 0.5) / n_dofs as f64;
        amps.iter()
            .enumerate()
            .map(|(k, a)| {
                let k = (k + 1) as f64;
                a * (k * PI * xi).sin() * (2.0 * PI * k * t as f64 / n_time as f64).cos()
            })
            .sum()
    })
}

/// Block-diagonal system of five scaled rotations.
fn block_rotation_system() -> (Mat<f64>, Vec<C64>) {
    let radii = [0.99, 0.97, 0.95, 0.93, 0.90];
    let angles: [f64; 5] = [0.1, 0.3, 0.5, 0.8, 1.2];
    let mut a = Mat::<f64>::zeros(10, 10);
    let mut eigenvalues = Vec::new();
    for (b, (&r, &th)) in radii.iter().zip(&angles).enumerate() {
        let (c, s) = (r * th.cos(), r * th.sin());
        a[(2 * b, 2 * b)] = c;
        a[(2 * b, 2 * b + 1)] = -s;
        a[(2 * b + 1, 2 * b)] = s;
        a[(2 * b + 1, 2 * b + 1)] = c;
        eigenvalues.push(C64::new(c, s));
        eigenvalues.push(C64::new(c, -s));
    }
    (a, eigenvalues)
}

fn simulate(a: &Mat<f64>, x0: &[f64], n_time: usize) -> Mat<f64> {
    let n = x0.len();
    let mut x = Mat::<f64>::zeros(n, n_time);
    for i in 0..n {
        x[(i, 0)] = x0[i];
    }
    for k in 1..n_time {
        for i in 0..n {
            x[(i, k)] = (0..n).map(|j| a[(i, j)] * x[(j, k - 1)]).sum();
        }
    }
    x
}

fn make_database(
    n_samples: usize,
    n_dofs: usize,
    n_time: usize,
) -> (BTreeMap<String, Vec<f64>>, BTreeMap<String, SnapshotData>) {
    let mut params = BTreeMap::new();
    let mut db = BTreeMap::new();
    for s in 0..n_samples {
        let depth = 5.0 + s as f64;
        let stiffness = 20.0 + 3.0 * (s as f64 * 1.3).sin();
        let x = Mat::from_fn(n_dofs, n_time, |i, t| {
            let xi = i as f64 / n_dofs as f64;
            let t = t as f64 / n_time as f64;
            depth * (PI * xi).sin() * (1.0 + 0.2 * t)
                + stiffness * 0.01 * (2.0 * PI * xi).sin()
                + 0.1 * (2.0 * PI * t).sin() * (3.0 * PI * xi).sin()
        });
        let name = format!("case_{s:02}");
        params.insert(name.clone(), vec![depth, stiffness]);
        db.insert(name, SnapshotData::new(x).with_metadata("solver", "synthetic"));
    }
    (params, db)
}

fn trained_rom() -> (ParametricRom, BTreeMap<String, Vec<f64>>, BTreeMap<String, SnapshotData>) {
    let (params, db) = make_database(6, 120, 10);
    let config = RomConfiguration {
        min_modes: 4,
        max_modes: 20,
        offline_samples: 6,
        ..Default::default()
    };
    let rom = ParametricRom::new(config).unwrap();
    rom.train_parametric_rom(&params, &db).unwrap();
    (rom, params, db)
}

// ============================================================================
// POD
// ============================================================================

#[test]
fn pod_truncation_and_error_on_50x20() {
    let x = make_separable_field(50, 20);
    let config = RomConfiguration {
        energy_threshold: 0.99,
        min_modes: 2,
        max_modes: 15,
        ..Default::default()
    };
    let mut processor = PodProcessor::new(config);
    let result = processor
        .compute_pod_decomposition(&SnapshotData::new(x))
        .unwrap();

    assert!((2..=15).contains(&result.truncation_index));
    assert!(result.reconstruction_error < 0.05);
    assert_eq!(result.strategy, DecompositionStrategy::SnapshotSvd);
    assert!(result.energy_content.windows(2).all(|w| w[1] >= w[0] - 1e-15));
}

#[test]
fn pod_round_trip_bounded_by_reconstruction_error() {
    let x = make_separable_field(40, 60);
    let config = RomConfiguration {
        min_modes: 2,
        ..Default::default()
    };
    let result = pod(&x, &config).unwrap();
    assert_eq!(result.strategy, DecompositionStrategy::GramEigen);

    let n = x.ncols();
    let col = |j: usize| (0..x.nrows()).map(|i| x[(i, j)]).collect::<Vec<_>>();
    let mean = &result.mean_snapshot;
    let mut num = 0.0;
    let mut den = 0.0;
    for j in 0..n {
        let v = col(j);
        let back = result
            .reconstruct_with_mean(&result.project_centered(&v).unwrap())
            .unwrap();
        for i in 0..v.len() {
            num += (v[i] - back[i]).powi(2);
            den += (v[i] - mean[i]).powi(2);
        }
    }
    assert!((num / den).sqrt() <= result.reconstruction_error + 1e-10);
}

// ============================================================================
// DMD
// ============================================================================

#[test]
fn dmd_recovers_linear_system_eigenvalues() {
    let (a, truth) = block_rotation_system();
    let x0: Vec<f64> = (0..10).map(|i| 1.0 + 0.1 * i as f64).collect();
    let data = SnapshotData::new(simulate(&a, &x0, 30));

    let mut processor = DmdProcessor::new(RomConfiguration::default());
    let result = processor.compute_dmd_decomposition(&data).unwrap();
    assert_eq!(result.rank, 10);

    for lambda in &truth {
        let closest = result
            .eigenvalues
            .iter()
            .map(|mu| (*mu - *lambda).norm())
            .fold(f64::INFINITY, f64::min);
        assert_abs_diff_eq!(closest, 0.0, epsilon = 1e-6);
    }

    let stab = dmd_stability(&result, 1e-6);
    assert!(stab.is_stable);
    assert_relative_eq!(stab.spectral_radius, 0.99, epsilon = 1e-6);
}

#[test]
fn dmd_amplitudes_fit_initial_condition() {
    let (a, _) = block_rotation_system();
    let x0: Vec<f64> = (0..10).map(|i| (i as f64 * 0.7).cos()).collect();
    let data = SnapshotData::new(simulate(&a, &x0, 30));
    let result = dmd(&data, &RomConfiguration::default()).unwrap();

    for i in 0..10 {
        let mut v = C64::zero();
        for j in 0..result.rank {
            v += result.eigenvectors[i][j] * result.amplitudes[j];
        }
        assert_abs_diff_eq!(v.re, x0[i], epsilon = 1e-6);
    }
    assert!(result.amplitude_residual < 1e-8);
}

#[test]
fn dmd_rank_and_selection_bounds() {
    let (a, _) = block_rotation_system();
    let x0 = vec![1.0; 10];
    let data = SnapshotData::new(simulate(&a, &x0, 30));
    let config = RomConfiguration {
        dmd_rank: Some(4),
        min_modes: 1,
        max_modes: 3,
        ..Default::default()
    };
    let result = dmd(&data, &config).unwrap();
    assert!(result.rank <= 4);
    assert_eq!(result.variant, DmdVariant::Exact);
    assert!(result.mode_selection.len() <= 3);
    assert!(result.mode_selection.iter().all(|&i| i < result.rank));
}

#[test]
fn dmd_forecast_continues_trajectory() {
    let (a, _) = block_rotation_system();
    let x0 = vec![0.5; 10];
    let full = simulate(&a, &x0, 40);
    let train = Mat::from_fn(10, 30, |i, j| full[(i, j)]);
    let result = dmd(&SnapshotData::new(train), &RomConfiguration::default()).unwrap();

    // Column k of the forecast is state k + 1.
    let forecast = predict_future(&result, 39, result.dt).unwrap();
    for i in 0..10 {
        assert_abs_diff_eq!(forecast[(i, 38)], full[(i, 39)], epsilon = 1e-6);
    }
}

#[test]
fn dmd_needs_two_snapshots() {
    let data = SnapshotData::new(Mat::from_fn(3, 1, |i, _| i as f64));
    assert!(matches!(
        dmd(&data, &RomConfiguration::default()),
        Err(RomError::InsufficientData(_))
    ));
}

// ============================================================================
// Parametric ROM
// ============================================================================

#[test]
fn parametric_rom_self_consistency() {
    let (params, db) = make_database(10, 1000, 20);
    let rom = ParametricRom::new(RomConfiguration::default()).unwrap();
    let summary = rom.train_parametric_rom(&params, &db).unwrap();

    assert_eq!(summary.n_samples, 10);
    let m = rom.metrics().unwrap();
    assert!((0.0..=100.0).contains(&m.accuracy_percentage));

    for name in ["case_00", "case_04", "case_09"] {
        let predicted = rom.predict_solution(&params[name]).unwrap();
        let err = relative_l2_error(&predicted, &db[name].column(0));
        assert_abs_diff_eq!(err, 0.0, epsilon = 1e-6);
    }
}

#[test]
fn parametric_rom_not_trained() {
    let rom = ParametricRom::new(RomConfiguration::default()).unwrap();
    assert!(matches!(
        rom.predict_solution(&[5.0, 20.0]),
        Err(RomError::NotTrained(_))
    ));
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        rom.save_model(dir.path().join("rom.json")),
        Err(RomError::NotTrained(_))
    ));
}

#[test]
fn parametric_rom_snapshot_mean_target() {
    let (params, db) = make_database(5, 60, 8);
    let config = RomConfiguration {
        min_modes: 4,
        coefficient_target: CoefficientTarget::SnapshotMean,
        ..Default::default()
    };
    let rom = ParametricRom::new(config).unwrap();
    rom.train_parametric_rom(&params, &db).unwrap();

    let data = &db["case_02"];
    let mean: Vec<f64> = (0..data.n_dofs())
        .map(|i| (0..data.n_snapshots()).map(|j| data.solutions[(i, j)]).sum::<f64>() / 8.0)
        .collect();
    let predicted = rom.predict_solution(&params["case_02"]).unwrap();
    assert_abs_diff_eq!(relative_l2_error(&predicted, &mean), 0.0, epsilon = 1e-6);
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn saved_model_reproduces_predictions() {
    let (rom, params, _) = trained_rom();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("excavation.rom.json");
    rom.save_model(&path).unwrap();

    let restored = ParametricRom::from_file(&path).unwrap();
    assert_eq!(restored.phase(), RomPhase::Trained);
    assert_eq!(restored.version(), rom.version());
    assert_eq!(restored.metrics(), rom.metrics());
    assert_eq!(restored.config(), rom.config());

    for query in [params["case_01"].clone(), vec![7.5, 21.0]] {
        let a = rom.predict_solution(&query).unwrap();
        let b = restored.predict_solution(&query).unwrap();
        assert_eq!(a, b);
    }
}

#[test]
fn saved_dynamics_survive_reload() {
    let (rom, _, db) = trained_rom();
    let fitted = rom.fit_dynamics(&db["case_03"]).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rom.json");
    rom.save_model(&path).unwrap();

    let restored = ParametricRom::from_file(&path).unwrap();
    let a = rom.predict_dynamics(3, fitted.dt).unwrap();
    let b = restored.predict_dynamics(3, fitted.dt).unwrap();
    for i in 0..a.nrows() {
        for j in 0..a.ncols() {
            assert_eq!(a[(i, j)], b[(i, j)]);
        }
    }
}

#[test]
fn corrupt_file_leaves_model_untouched() {
    let (rom, params, _) = trained_rom();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rom.json");
    rom.save_model(&path).unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] = if bytes[mid] == b'1' { b'2' } else { b'1' };
    std::fs::write(&path, &bytes).unwrap();

    let before = rom.predict_solution(&params["case_02"]).unwrap();
    let version = rom.version();
    assert!(rom.load_model(&path).is_err());
    assert_eq!(rom.version(), version);
    assert_eq!(rom.predict_solution(&params["case_02"]).unwrap(), before);
    assert!(ParametricRom::from_file(&path).is_err());
}

#[test]
fn load_model_replaces_untrained_instance() {
    let (rom, params, _) = trained_rom();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rom.json");
    rom.save_model(&path).unwrap();

    let fresh = ParametricRom::new(RomConfiguration::structural()).unwrap();
    fresh.load_model(&path).unwrap();
    assert_eq!(fresh.phase(), RomPhase::Trained);
    assert_eq!(fresh.config(), rom.config());
    assert_eq!(
        fresh.predict_solution(&params["case_04"]).unwrap(),
        rom.predict_solution(&params["case_04"]).unwrap()
    );
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn partial_config_json_uses_defaults() {
    let config: RomConfiguration =
        serde_json::from_str(r#"{ "energy_threshold": 0.95, "max_modes": 12 }"#).unwrap();
    assert_eq!(config.energy_threshold, 0.95);
    assert_eq!(config.max_modes, 12);
    assert_eq!(config.min_modes, RomConfiguration::default().min_modes);
    assert!(config.validate().is_ok());
}

#[test]
fn invalid_config_rejected_at_construction() {
    let config = RomConfiguration {
        energy_threshold: 1.5,
        ..Default::default()
    };
    assert!(matches!(
        ParametricRom::new(config),
        Err(RomError::InvalidConfig(_))
    ));
}
