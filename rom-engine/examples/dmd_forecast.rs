//! DMD of a travelling-wave signal: spectrum, stability and forecast.

use rom_engine::{
    dmd_spectrum, dmd_stability, DmdProcessor, RomConfiguration, SnapshotData,
};

fn main() {
    let (n_dofs, n_time) = (64, 120);
    let dt = 0.05;
    let data = faer::Mat::from_fn(n_dofs, n_time, |i, j| {
        let x = i as f64 / n_dofs as f64 * std::f64::consts::TAU;
        let t = j as f64 * dt;
        (x - 2.0 * t).sin() * (-0.1 * t).exp() + 0.3 * (3.0 * x + 5.0 * t).cos()
    });
    let snapshots =
        SnapshotData::new(data).with_time_stamps((0..n_time).map(|j| j as f64 * dt).collect());

    let config = RomConfiguration::default();
    let horizon = config.importance_horizon;
    let mut processor = DmdProcessor::new(config);
    let result = processor.compute_dmd_decomposition(&snapshots).unwrap();

    println!("DMD Decomposition");
    println!("  Rank: {}", result.rank);
    println!("  dt: {}", result.dt);

    println!("\nEigenvalue Spectrum:");
    for m in dmd_spectrum(&result, horizon) {
        println!(
            "  Mode {}: |λ|={:.4}, freq={:.4} Hz, growth={:+.4}/s, {}",
            m.index, m.magnitude, m.frequency, m.growth_rate, m.stability
        );
    }

    let stab = dmd_stability(&result, 1e-6);
    println!("\nStability:");
    println!("  Stable: {}", stab.is_stable);
    println!("  Spectral radius: {:.6}", stab.spectral_radius);

    let forecast = processor.predict_future(40, dt).unwrap();
    println!("\nForecast 40 steps past t0:");
    println!("  x[0]: {:.4} -> {:.4}", forecast[(0, 0)], forecast[(0, 39)]);
}
