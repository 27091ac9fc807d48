//! Benchmarks for plan enumeration and tile generation.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tiletune::analysis::{extract_features, tiled_block_features_str};
use tiletune::autotuning::{BlockGenerator, Plan, PlanOptions, TileOptions, TilePlanGenerator};
use tiletune::ir::{Affine, Block, DataType, Index, RefDir, Refinement, TensorShape};

fn conv_block() -> Block {
    let scalar = |n| TensorShape::dense(DataType::Float32, &vec![1; n]);
    let mut b = Block::new("conv");
    b.idxs = vec![
        Index::new("n", 4),
        Index::new("x", 28),
        Index::new("y", 28),
        Index::new("co", 64),
        Index::new("ci", 32),
    ];
    b.refs = vec![
        Refinement::new(
            RefDir::In,
            "I",
            vec![Affine::index("n"), Affine::index("x"), Affine::index("y"), Affine::index("ci")],
            scalar(4),
        ),
        Refinement::new(RefDir::In, "K", vec![Affine::index("ci"), Affine::index("co")], scalar(2)),
        Refinement::new(
            RefDir::Out,
            "O",
            vec![Affine::index("n"), Affine::index("x"), Affine::index("y"), Affine::index("co")],
            scalar(4),
        )
        .with_agg_op("add"),
    ];
    b
}

/// Benchmark plan enumeration.
fn bench_plan_enumeration(c: &mut Criterion) {
    let block = conv_block();
    let options = PlanOptions::default().only_po2(true);

    c.bench_function("enumerate_conv_po2", |b| {
        b.iter(|| {
            let mut generator = TilePlanGenerator::new(black_box(&block), &options);
            generator.generate().len()
        })
    });
}

/// Benchmark materializing one plan.
fn bench_plan_blocks(c: &mut Criterion) {
    let block = conv_block();
    let options = TileOptions::default();
    let plan = Plan(vec![1, 4, 4, 16, 8]);

    c.bench_function("materialize_conv_plan", |b| {
        b.iter(|| {
            let generator = BlockGenerator::new(&block, &options);
            let mut out = Vec::new();
            generator.generate_plan_blocks(0, black_box(&plan), &mut out).unwrap();
            out
        })
    });
}

/// Benchmark feature extraction and parsing.
fn bench_features(c: &mut Criterion) {
    let block = conv_block();
    let options = TileOptions::default();
    let generator = BlockGenerator::new(&block, &options);
    let mut out = Vec::new();
    generator.generate_plan_blocks(0, &Plan(vec![2, 7, 7, 16, 8]), &mut out).unwrap();
    let tiled = out.remove(0);
    let inner = tiled.sub_block(0).and_then(|m| m.sub_block(0)).unwrap().clone();

    c.bench_function("tiled_block_features", |b| {
        b.iter(|| tiled_block_features_str(black_box(&inner)).unwrap())
    });
    c.bench_function("extract_features", |b| {
        b.iter(|| extract_features(black_box(&tiled.comments)).unwrap())
    });
}

criterion_group!(benches, bench_plan_enumeration, bench_plan_blocks, bench_features);
criterion_main!(benches);
