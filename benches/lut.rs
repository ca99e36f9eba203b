use criterion::{criterion_group, criterion_main, Criterion, black_box};

use glam::Vec3;
use meadow::grass::{Gradient, LutImage, SurfaceMaterial};

fn catalog(count: usize) -> Vec<Option<SurfaceMaterial>> {
    (0..count)
        .map(|i| {
            let t = i as f32 / count as f32;
            let gradient = Gradient::new(
                vec![(0.0, [0.1, 0.4 + t * 0.2, 0.1]), (0.6, [0.3, 0.6, 0.2]), (1.0, [0.8, 0.8, 0.4])],
                vec![(0.0, 1.0), (1.0, 0.5)],
            );
            // Every fourth slot empty to exercise the placeholder path
            (i % 4 != 3).then(|| {
                SurfaceMaterial::new(format!("surface_{i}"))
                    .with_gradient(gradient)
                    .with_sizes(Vec3::new(0.5, 0.4, 0.5), Vec3::new(1.0, 1.2, 1.0))
            })
        })
        .collect()
}

fn bench_lut_build_small(c: &mut Criterion) {
    let materials = catalog(8);

    c.bench_function("lut_build_8x64", |b| {
        b.iter(|| LutImage::build(black_box(&materials), 64, false));
    });
}

fn bench_lut_build_large(c: &mut Criterion) {
    let materials = catalog(64);

    c.bench_function("lut_build_64x256", |b| {
        b.iter(|| LutImage::build(black_box(&materials), 256, false));
    });
}

fn bench_gradient_evaluate(c: &mut Criterion) {
    let gradient = Gradient::new(
        vec![(0.0, [0.1, 0.5, 0.1]), (0.3, [0.2, 0.6, 0.1]), (0.7, [0.4, 0.7, 0.2]), (1.0, [0.9, 0.9, 0.5])],
        vec![(0.0, 1.0), (1.0, 0.0)],
    );

    c.bench_function("gradient_evaluate_1k", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for i in 0..1000 {
                acc += gradient.evaluate(black_box(i as f32 / 1000.0))[1];
            }
            acc
        });
    });
}

criterion_group!(benches, bench_lut_build_small, bench_lut_build_large, bench_gradient_evaluate);
criterion_main!(benches);
