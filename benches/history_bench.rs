//! Benchmarks for the tracehist history tree
//!
//! Run with: cargo bench

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tempfile::tempdir;

use tracehist::history::{HistoryPipeline, HistoryTree, Interval, StateValue, TreeParams};

fn bench_params() -> TreeParams {
    TreeParams {
        block_size: 64 * 1024,
        max_children: 50,
        provider_version: 0,
        cache_slots: 256,
    }
}

fn make_intervals(count: usize) -> Vec<Interval> {
    (0..count)
        .map(|i| {
            Interval::new(
                i as i64 * 10,
                i as i64 * 10 + 9,
                (i % 64) as u32,
                StateValue::Long(i as i64),
            )
            .unwrap()
        })
        .collect()
}

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");

    let interval = Interval::new(0, 1000, 42, StateValue::Str("running".into())).unwrap();

    group.bench_function("interval_encode", |b| {
        let mut buf = Vec::with_capacity(64);
        b.iter(|| {
            buf.clear();
            black_box(&interval).write_to(&mut buf);
        })
    });

    group.finish();
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");

    for size in [1_000, 10_000] {
        let intervals = make_intervals(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("direct_{}", size), |b| {
            b.iter_custom(|iters| {
                let mut total = std::time::Duration::ZERO;
                for _ in 0..iters {
                    let dir = tempdir().unwrap();
                    let tree =
                        HistoryTree::create(dir.path().join("b.ht"), 0, bench_params()).unwrap();

                    let start = std::time::Instant::now();
                    for interval in &intervals {
                        tree.insert(black_box(interval.clone())).unwrap();
                    }
                    total += start.elapsed();
                }
                total
            })
        });

        group.bench_function(format!("pipelined_{}", size), |b| {
            b.iter_custom(|iters| {
                let mut total = std::time::Duration::ZERO;
                for _ in 0..iters {
                    let dir = tempdir().unwrap();
                    let tree = Arc::new(
                        HistoryTree::create(dir.path().join("b.ht"), 0, bench_params()).unwrap(),
                    );
                    let pipeline = HistoryPipeline::new(10_000);
                    pipeline.attach(Arc::clone(&tree)).unwrap();

                    let start = std::time::Instant::now();
                    for interval in &intervals {
                        pipeline
                            .insert_past_state(
                                interval.start,
                                interval.end,
                                interval.quark,
                                interval.value.clone(),
                            )
                            .unwrap();
                    }
                    pipeline.drain().unwrap();
                    total += start.elapsed();

                    pipeline.close(size as i64 * 10).unwrap();
                }
                total
            })
        });
    }

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");

    let dir = tempdir().unwrap();
    let path = dir.path().join("b.ht");
    let n = 100_000usize;
    {
        let tree = HistoryTree::create(&path, 0, bench_params()).unwrap();
        for interval in make_intervals(n) {
            tree.insert(interval).unwrap();
        }
        tree.close(n as i64 * 10).unwrap();
    }
    let tree = HistoryTree::open(&path, 0, 256).unwrap();
    let span = n as i64 * 10;

    group.bench_function("point_query", |b| {
        let mut t = 0i64;
        b.iter(|| {
            t = (t + 9973) % span;
            tree.query_state(black_box((t as u32 / 10) % 64), black_box(t))
                .unwrap()
        })
    });

    group.bench_function("range_query_1000", |b| {
        b.iter(|| {
            tree.query_range(black_box(7), 0, 100_000)
                .unwrap()
                .count()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_serialization, bench_insert, bench_query);
criterion_main!(benches);
