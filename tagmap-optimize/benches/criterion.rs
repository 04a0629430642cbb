use criterion::{criterion_group, criterion_main, Criterion};
use tagmap_core::WeightPreset;
use tagmap_graph::{GraphBuilder, Prescaling};
use tagmap_optimize::GraphOptimizer;

#[path = "../tests/common/mod.rs"]
mod common;

fn optimize_loop(c: &mut Criterion) {
    let capture = common::noisy_loop(1, 40);
    let builder = GraphBuilder::new(Prescaling::FullCov, WeightPreset::SensibleDefault.weights());
    let optimizer = GraphOptimizer::default();
    c.bench_function("optimize_loop_40", |b| {
        b.iter(|| {
            let mut graph = builder.build(&capture).unwrap();
            optimizer.optimize(&mut graph).unwrap()
        })
    });
}

fn build_loop(c: &mut Criterion) {
    let capture = common::noisy_loop(1, 400);
    let builder = GraphBuilder::new(Prescaling::FullCov, WeightPreset::SensibleDefault.weights());
    c.bench_function("build_loop_400", |b| b.iter(|| builder.build(&capture).unwrap()));
}

criterion_group!(
    name = optimize;
    config = Criterion::default().sample_size(10);
    targets = optimize_loop, build_loop
);
criterion_main!(optimize);
