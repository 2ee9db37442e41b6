//! Parametric surrogate of a synthetic excavation settlement field.

use std::collections::BTreeMap;

use rom_engine::{ParametricRom, RomConfiguration, SnapshotData};

/// Surface settlement along a 1-D profile for a staged excavation.
fn settlement(depth: f64, modulus: f64, stiffness: f64, water: f64, n_dofs: usize, n_stages: usize) -> faer::Mat<f64> {
    faer::Mat::from_fn(n_dofs, n_stages, |i, k| {
        let x = i as f64 / (n_dofs - 1) as f64 * 40.0;
        let stage = (k + 1) as f64 / n_stages as f64;
        let trough = (-(x / (0.5 * depth)).powi(2)).exp();
        let support = 1.0 / (1.0 + stiffness.log10() - 7.0);
        -stage * depth / (modulus / 1e6) * (trough + 0.3 * support * (-x / 15.0).exp())
            - 0.002 * (water + 8.0) * stage
    })
}

fn main() {
    let config = RomConfiguration {
        offline_samples: 24,
        ..RomConfiguration::deep_excavation()
    };

    let mut params = BTreeMap::new();
    let mut database = BTreeMap::new();
    for s in 0..24 {
        let f = s as f64 / 23.0;
        let depth = 5.0 + 10.0 * f;
        let modulus = 20e6 + 30e6 * ((3.0 * f).sin().abs());
        let stiffness = 10f64.powf(7.0 + 2.0 * ((5.0 * f).cos() * 0.5 + 0.5));
        let water = -8.0 + 6.0 * ((7.0 * f).sin() * 0.5 + 0.5);
        let name = format!("run{s:02}");
        params.insert(name.clone(), vec![depth, modulus, stiffness, water]);
        database.insert(
            name,
            SnapshotData::new(settlement(depth, modulus, stiffness, water, 400, 8))
                .with_mesh_info("profile", "surface, 0-40 m"),
        );
    }

    let rom = ParametricRom::new(config).unwrap();
    let summary = rom.train_parametric_rom(&params, &database).unwrap();

    println!("Parametric ROM");
    println!(
        "  Samples: {} ({} snapshot columns)",
        summary.n_samples, summary.n_columns
    );
    println!(
        "  POD modes: {} (reconstruction error {:.2e})",
        summary.n_modes, summary.pod_reconstruction_error
    );
    println!("  Interpolator: {}", summary.interpolator);
    println!(
        "  Validation ({:?}): mean error {:.3e}, max error {:.3e}",
        summary.validation.mode, summary.validation.average_error, summary.validation.max_error
    );
    println!(
        "  Accuracy: {:.2}%, speedup {:.0}x, compression {:.1}x",
        summary.metrics.accuracy_percentage,
        summary.metrics.speedup_factor,
        summary.metrics.compression_ratio
    );

    let query: BTreeMap<String, f64> = [
        ("excavation_depth".to_string(), 11.0),
        ("soil_modulus".to_string(), 32e6),
        ("support_stiffness".to_string(), 2e8),
        ("groundwater_level".to_string(), -4.5),
    ]
    .into();
    let field = rom.predict_named(&query).unwrap();
    let max_settlement = field.iter().copied().fold(0.0_f64, f64::min);
    println!("\nPrediction at depth 11 m:");
    println!("  Max settlement: {:.4} m", max_settlement);

    let path = std::env::temp_dir().join("excavation.rom.json");
    rom.save_model(&path).unwrap();
    let restored = ParametricRom::from_file(&path).unwrap();
    println!("  Reloaded model v{} from {}", restored.version(), path.display());
}
