//! Contraction benchmarks across representative tree shapes.

use criterion::{Criterion, criterion_group, criterion_main};

use einsum_loops::notation::parse_tree;
use einsum_loops::{ContractionConfig, DataType, EvalBindings, TensorMut, TensorRef};

fn bench_matmul(c: &mut Criterion) {
    let expr = parse_tree("[km,nk->nm]").unwrap();
    let (mut tree, leaves, root) = expr
        .build(&[&[64, 64], &[64, 64]], DataType::F32)
        .unwrap();
    tree.compile(root, &ContractionConfig::default()).unwrap();

    let a = vec![0.5f32; 64 * 64];
    let b = vec![0.25f32; 64 * 64];
    let mut out = vec![0.0f32; 64 * 64];

    c.bench_function("matmul_64", |bencher| {
        bencher.iter(|| {
            let mut bindings = EvalBindings::new();
            bindings
                .bind(leaves[0], TensorRef::F32(&a))
                .bind(leaves[1], TensorRef::F32(&b))
                .bind_output(root, TensorMut::F32(&mut out));
            tree.eval(&mut bindings);
        })
    });
}

fn bench_chain(c: &mut Criterion) {
    let expr = parse_tree("[[ij,jk->ik],kl->il]").unwrap();
    let (mut tree, leaves, root) = expr
        .build(&[&[32, 48], &[48, 32], &[32, 40]], DataType::F32)
        .unwrap();
    tree.compile(root, &ContractionConfig::default()).unwrap();

    let a = vec![0.5f32; 32 * 48];
    let b = vec![0.25f32; 48 * 32];
    let d = vec![0.125f32; 32 * 40];
    let mut out = vec![0.0f32; 32 * 40];

    c.bench_function("chain_3", |bencher| {
        bencher.iter(|| {
            let mut bindings = EvalBindings::new();
            bindings
                .bind(leaves[0], TensorRef::F32(&a))
                .bind(leaves[1], TensorRef::F32(&b))
                .bind(leaves[2], TensorRef::F32(&d))
                .bind_output(root, TensorMut::F32(&mut out));
            tree.eval(&mut bindings);
        })
    });
}

fn bench_batched_threaded(c: &mut Criterion) {
    let expr = parse_tree("[bkm,bnk->bnm]").unwrap();
    let (mut tree, leaves, root) = expr
        .build(&[&[16, 32, 32], &[16, 32, 32]], DataType::F32)
        .unwrap();
    tree.compile(root, &ContractionConfig::default()).unwrap();
    tree.threading_intra_op(root, rayon::current_num_threads())
        .unwrap();

    let a = vec![0.5f32; 16 * 32 * 32];
    let b = vec![0.25f32; 16 * 32 * 32];
    let mut out = vec![0.0f32; 16 * 32 * 32];

    c.bench_function("batched_threaded_16x32", |bencher| {
        bencher.iter(|| {
            let mut bindings = EvalBindings::new();
            bindings
                .bind(leaves[0], TensorRef::F32(&a))
                .bind(leaves[1], TensorRef::F32(&b))
                .bind_output(root, TensorMut::F32(&mut out));
            tree.eval(&mut bindings);
        })
    });
}

criterion_group!(benches, bench_matmul, bench_chain, bench_batched_threaded);
criterion_main!(benches);
