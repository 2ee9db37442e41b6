use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rom_engine::*;

fn make_field(n_dofs: usize, n_time: usize, load: f64) -> faer::Mat<f64> {
    faer::Mat::from_fn(n_dofs, n_time, |i, j| {
        let x = i as f64 / n_dofs as f64;
        let t = j as f64 * 0.05;
        load * (std::f64::consts::PI * x).sin() * (1.0 + 0.1 * t)
            + 0.2 * (3.0 * x + t).sin()
            + 0.05 * (7.0 * x).cos() * (2.0 * t).sin()
    })
}

fn bench_pod(c: &mut Criterion) {
    let mut group = c.benchmark_group("pod");
    let config = RomConfiguration {
        min_modes: 2,
        ..Default::default()
    };

    // Both shape regimes: snapshot SVD and Gram eigendecomposition.
    for &(n_dofs, n_time) in &[(500, 50), (2000, 100), (50, 500), (100, 2000)] {
        let data = make_field(n_dofs, n_time, 1.0);
        group.bench_function(format!("{n_dofs}x{n_time}"), |b| {
            b.iter(|| pod(black_box(&data), black_box(&config)).unwrap())
        });
    }

    group.finish();
}

fn bench_dmd(c: &mut Criterion) {
    let mut group = c.benchmark_group("dmd");

    for &(n_dofs, n_time) in &[(10, 200), (100, 200), (1000, 100)] {
        let data = SnapshotData::new(make_field(n_dofs, n_time, 1.0));
        let config = RomConfiguration {
            dmd_rank: Some(10),
            ..Default::default()
        };
        group.bench_function(format!("{n_dofs}x{n_time}"), |b| {
            b.iter(|| dmd(black_box(&data), black_box(&config)).unwrap())
        });
    }

    group.finish();
}

fn bench_parametric(c: &mut Criterion) {
    let mut params = BTreeMap::new();
    let mut database = BTreeMap::new();
    for s in 0..20 {
        let load = 1.0 + 0.25 * s as f64;
        let name = format!("case{s:02}");
        params.insert(name.clone(), vec![load, (s as f64 * 0.9).cos()]);
        database.insert(name, SnapshotData::new(make_field(1000, 20, load)));
    }
    let config = RomConfiguration {
        offline_samples: 20,
        ..Default::default()
    };

    let mut group = c.benchmark_group("parametric");
    group.sample_size(10);

    group.bench_function("train_20x1000x20", |b| {
        b.iter(|| {
            let rom = ParametricRom::new(config.clone()).unwrap();
            rom.train_parametric_rom(black_box(&params), black_box(&database))
                .unwrap()
        })
    });

    let rom = ParametricRom::new(config.clone()).unwrap();
    rom.train_parametric_rom(&params, &database).unwrap();
    group.bench_function("predict_solution", |b| {
        b.iter(|| rom.predict_solution(black_box(&[2.1, 0.3])).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_pod, bench_dmd, bench_parametric);
criterion_main!(benches);
