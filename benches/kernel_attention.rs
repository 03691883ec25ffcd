//! Kernel attention and full forward pass benchmarks.
//!
//! Run with: cargo bench --bench kernel_attention

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kgforecast::core::ForecastWindow;
use kgforecast::gnn::{CategoricalSpec, GnnConfig, KernelAttention, KernelGnn, KernelSettings, LearnedAdjacency};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn node_features(batch: usize, nodes: usize, features: usize) -> Array3<f32> {
    Array3::from_shape_fn((batch, nodes, features), |(b, t, c)| {
        ((b * 31 + t * 7 + c) as f32 * 0.013).sin()
    })
}

fn kernel_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernel_attention");
    for &(past, future) in &[(48, 12), (200, 65)] {
        let window = ForecastWindow::new(past, future);
        let mut rng = StdRng::seed_from_u64(42);
        let adjacency = LearnedAdjacency::new(window, &mut rng).unwrap().build();
        let kernel = KernelAttention::new(8, 16, window, KernelSettings::default(), &mut rng);
        let x = node_features(8, window.total(), 8);
        let y = node_features(8, past, 1);

        group.bench_with_input(
            BenchmarkId::new("forward", format!("{}x{}", past, future)),
            &(x, y),
            |b, (x, y)| b.iter(|| kernel.forward(black_box(x), black_box(y), &adjacency).unwrap()),
        );
    }
    group.finish();
}

fn model_benchmark(c: &mut Criterion) {
    let config = GnnConfig::new(ForecastWindow::new(200, 65))
        .with_categorical(CategoricalSpec::new("hour", 24, 4))
        .with_categorical(CategoricalSpec::new("weekday", 7, 2));
    let mut rng = StdRng::seed_from_u64(7);
    let model = KernelGnn::new(config, &mut rng).unwrap();
    let raw = Array3::from_shape_fn((4, 265, 5), |(_, t, col)| match col {
        0 => (t % 24) as f32,
        1 => ((t / 24) % 7) as f32,
        _ => (t as f32 * 0.05).cos(),
    });

    c.bench_function("kernel_gnn_forward_200x65", |b| {
        b.iter(|| model.forward(black_box(&raw)).unwrap())
    });
}

criterion_group!(benches, kernel_benchmark, model_benchmark);
criterion_main!(benches);
