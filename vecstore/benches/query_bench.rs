use criterion::{black_box, criterion_group, criterion_main, Criterion};
use facevault_vecstore::{HnswConfig, VectorIndex};

fn random_unit_vec(dim: usize, seed: u64) -> Vec<f32> {
    let mut v = Vec::with_capacity(dim);
    let mut state = seed;
    for _ in 0..dim {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        v.push(((state >> 33) as f32) / (u32::MAX as f32) - 0.5);
    }
    facevault_vecstore::l2_normalize(&mut v);
    v
}

fn indexed(dim: usize, n: usize, staged: usize) -> VectorIndex {
    let idx = VectorIndex::new(HnswConfig::new(dim));
    for i in 0..n {
        idx.stage(&random_unit_vec(dim, i as u64 + 1), &format!("user-{i:05}"));
    }
    idx.rebuild().ok();
    for i in 0..staged {
        idx.stage(&random_unit_vec(dim, 1_000_000 + i as u64), &format!("late-{i:05}"));
    }
    idx
}

fn bench_query(c: &mut Criterion) {
    let dim = 512;
    let query = random_unit_vec(dim, 424242);

    let idx = indexed(dim, 2_000, 0);
    c.bench_function("vecstore_query_512d_2000_indexed", |b| {
        b.iter(|| {
            let _ = black_box(idx.query(black_box(&query), 5));
        });
    });

    let idx = indexed(dim, 2_000, 32);
    c.bench_function("vecstore_query_512d_2000_indexed_32_staged", |b| {
        b.iter(|| {
            let _ = black_box(idx.query(black_box(&query), 5));
        });
    });
}

fn bench_rebuild(c: &mut Criterion) {
    let dim = 512;

    c.bench_function("vecstore_rebuild_512d_500", |b| {
        b.iter_with_setup(
            || {
                let idx = VectorIndex::new(HnswConfig::new(dim));
                for i in 0..500 {
                    idx.stage(&random_unit_vec(dim, i as u64 + 1), &format!("user-{i:05}"));
                }
                idx
            },
            |idx| {
                let _ = black_box(idx.rebuild());
            },
        );
    });
}

criterion_group!(benches, bench_query, bench_rebuild);
criterion_main!(benches);
