//! Microbenchmarks for the append path and the retention pass.
//!
//! Run with: `cargo bench -p airlog -- append`

#![allow(missing_docs, clippy::cast_precision_loss)]

use airlog::retention::consolidate;
use airlog::{LogStore, MetricRecord, RetentionPolicy, StoreConfig};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

const BASE_TIME: f64 = 1_700_000_000.0;

/// Opens a fresh log in a temp directory.
fn setup_store() -> (LogStore, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let store = LogStore::open(temp_dir.path().join("bench.csv"), StoreConfig::default()).unwrap();
    (store, temp_dir)
}

/// A batch shaped like one climate module reading.
fn batch(size: usize, ts: f64) -> Vec<MetricRecord> {
    (0..size)
        .map(|i| MetricRecord::new(format!("metric_{i}"), 20.0 + i as f64 * 0.5, ts))
        .collect()
}

fn bench_append_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("append/batch_size");

    for size in [1usize, 2, 5, 20] {
        let (store, _dir) = setup_store();
        let mut ts = BASE_TIME;

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                ts += 1.0;
                store.append(black_box(&batch(size, ts))).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_append_contended(c: &mut Criterion) {
    let (store, _dir) = setup_store();
    let store = Arc::new(store);

    c.bench_function("append/4_threads_x_100", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let store = Arc::clone(&store);
                    thread::spawn(move || {
                        for i in 0..100 {
                            let ts = BASE_TIME + f64::from(t * 100 + i);
                            store.append(&batch(5, ts)).unwrap();
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        });
    });
}

fn bench_consolidate(c: &mut Criterion) {
    let policy = RetentionPolicy::default();
    let now = BASE_TIME + 8.0 * 86_400.0;
    // One reading per second per metric over the last eight days, subsampled.
    let records: Vec<_> = (0..100_000u32)
        .map(|i| MetricRecord::new(if i % 2 == 0 { "CO" } else { "O3" }, f64::from(i % 50), now - f64::from(i) * 6.9))
        .collect();

    c.bench_function("retention/consolidate_100k", |b| {
        b.iter(|| consolidate(black_box(records.clone()), now, &policy));
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let (store, _dir) = setup_store();
    for i in 0..2_000 {
        store.append(&batch(5, BASE_TIME + f64::from(i))).unwrap();
    }

    c.bench_function("snapshot/10k_rows", |b| {
        b.iter(|| black_box(store.snapshot().unwrap()));
    });
}

criterion_group!(
    benches,
    bench_append_batch,
    bench_append_contended,
    bench_consolidate,
    bench_snapshot,
);
criterion_main!(benches);
