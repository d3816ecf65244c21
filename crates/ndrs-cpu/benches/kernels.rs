//! Benchmarks for the elementwise and matmul kernels
//!
//! Tracks broadcast overhead against same-shape operation and the gemm
//! blocking across a few square sizes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndrs_cpu::{add, matmul, NdArray};
use rand::Rng;

fn random_array(shape: &[usize]) -> NdArray {
    let len: usize = shape.iter().product();
    let mut rng = rand::rng();
    let data: Vec<f64> = (0..len).map(|_| rng.random::<f64>()).collect();
    NdArray::from_f64(&data, shape).unwrap()
}

fn bench_broadcast_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast_add");

    let cases = [
        (vec![1000, 1000], vec![1000, 1000]),
        (vec![1000, 1000], vec![1000]),
        (vec![1000, 1], vec![1, 1000]),
    ];

    for (shape_a, shape_b) in cases.iter() {
        let a = random_array(shape_a);
        let b = random_array(shape_b);
        let id = format!("{shape_a:?}_+_{shape_b:?}");
        group.bench_with_input(BenchmarkId::new("add", &id), &(&a, &b), |bench, (a, b)| {
            bench.iter(|| black_box(add(a, b).unwrap()));
        });
    }
    group.finish();
}

fn bench_matmul(c: &mut Criterion) {
    let mut group = c.benchmark_group("matmul");
    group.sample_size(10);

    for n in [64usize, 256, 512] {
        let a = random_array(&[n, n]);
        let b = random_array(&[n, n]);
        group.bench_with_input(BenchmarkId::from_parameter(n), &(&a, &b), |bench, (a, b)| {
            bench.iter(|| black_box(matmul(a, b).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_broadcast_add, bench_matmul);
criterion_main!(benches);
