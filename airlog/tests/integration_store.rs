//! Integration tests for the log store lifecycle and concurrent access.
//!
//! These tests exercise bootstrap, round-trip, and the guarantee that
//! concurrent appenders never produce a row a snapshot could see half of.

use airlog::error::{AirlogError, StoreError};
use airlog::{LogStore, MetricRecord, StoreConfig};
use std::collections::HashSet;
use std::fs::{self, File};
use std::sync::mpsc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

const BASE_TIME: f64 = 1_700_000_000.0;

/// Key for set comparison; f64 is not `Hash`.
fn key(record: &MetricRecord) -> (String, u64, u64) {
    (
        record.metric.clone(),
        record.value.to_bits(),
        record.timestamp.to_bits(),
    )
}

#[test]
fn test_bootstrap_creates_nested_directories() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("persist").join("a").join("b").join("table.csv");

    let store = LogStore::open(&path, StoreConfig::default()).unwrap();

    assert!(path.exists());
    assert_eq!(store.path(), path);
    assert_eq!(fs::read_to_string(&path).unwrap(), "metric,value,timestamp\n");
}

#[test]
fn test_round_trip_as_set() {
    let temp_dir = tempdir().unwrap();
    let store = LogStore::open(temp_dir.path().join("table.csv"), StoreConfig::default()).unwrap();

    let records: Vec<_> = (0u32..250)
        .map(|i| {
            let metric = ["CO", "O3", "NO2", "pm2.5", "pm10"][(i % 5) as usize];
            MetricRecord::new(metric, f64::from(i) * 0.1, BASE_TIME + f64::from(i) / 7.0)
        })
        .collect();

    for chunk in records.chunks(17) {
        store.append(chunk).unwrap();
    }

    let snapshot = store.snapshot().unwrap();
    assert_eq!(snapshot.len(), records.len());

    let expected: HashSet<_> = records.iter().map(key).collect();
    let actual: HashSet<_> = snapshot.iter().map(key).collect();
    assert_eq!(expected, actual);
}

#[test]
fn test_reopen_preserves_records() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("table.csv");

    {
        let store = LogStore::open(&path, StoreConfig::default()).unwrap();
        store
            .append(&[MetricRecord::new("IAQ", 51.0, BASE_TIME)])
            .unwrap();
    }

    let store = LogStore::open(&path, StoreConfig::default()).unwrap();
    store
        .append(&[MetricRecord::new("IAQ", 52.0, BASE_TIME + 1.0)])
        .unwrap();

    let values: Vec<_> = store.snapshot().unwrap().iter().map(|r| r.value).collect();
    assert_eq!(values, vec![51.0, 52.0]);
}

#[test]
fn test_foreign_file_rejected() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("table.csv");
    fs::write(&path, "time,co2\n1,400\n").unwrap();

    let result = LogStore::open(&path, StoreConfig::default());
    assert!(matches!(
        result,
        Err(AirlogError::Store(StoreError::SchemaMismatch { .. }))
    ));
    // The foreign file is left alone.
    assert_eq!(fs::read_to_string(&path).unwrap(), "time,co2\n1,400\n");
}

#[test]
fn test_concurrent_appends_and_snapshots() {
    const WRITERS: u32 = 8;
    const BATCHES: u32 = 50;
    const BATCH_SIZE: u32 = 5;

    let temp_dir = tempdir().unwrap();
    let config = StoreConfig {
        snapshot_retries: 0,
        ..StoreConfig::default()
    };
    let store = Arc::new(LogStore::open(temp_dir.path().join("table.csv"), config).unwrap());
    let done = Arc::new(AtomicBool::new(false));

    // Readers must never see a partial row: with zero retries any transient
    // state would surface as an error.
    let readers: Vec<_> = (0..2)
        .map(|_| {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut last_len = 0;
                let mut snapshots = 0u32;
                loop {
                    let finished = done.load(Ordering::Relaxed);
                    let snapshot = store.snapshot().unwrap();
                    assert!(snapshot.len() >= last_len, "log shrank without retention");
                    assert_eq!(snapshot.len() % BATCH_SIZE as usize, 0, "partial batch observed");
                    last_len = snapshot.len();
                    snapshots += 1;
                    if finished {
                        return snapshots;
                    }
                }
            })
        })
        .collect();

    let writers: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let metric = format!("writer_{writer}");
                for batch in 0..BATCHES {
                    let records: Vec<_> = (0..BATCH_SIZE)
                        .map(|i| {
                            let seq = batch * BATCH_SIZE + i;
                            MetricRecord::new(metric.as_str(), f64::from(seq), BASE_TIME + f64::from(seq))
                        })
                        .collect();
                    store.append(&records).unwrap();
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Relaxed);
    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }

    let snapshot = store.snapshot().unwrap();
    assert_eq!(snapshot.len(), (WRITERS * BATCHES * BATCH_SIZE) as usize);

    // Every writer's rows are all present, each exactly once.
    for writer in 0..WRITERS {
        let metric = format!("writer_{writer}");
        let mut seqs: Vec<_> = snapshot
            .iter()
            .filter(|r| r.metric == metric)
            .map(|r| r.value)
            .collect();
        seqs.sort_by(f64::total_cmp);
        let expected: Vec<_> = (0..BATCHES * BATCH_SIZE).map(f64::from).collect();
        assert_eq!(seqs, expected);
    }

    // Rows in the file are well formed.
    let content = fs::read_to_string(store.path()).unwrap();
    assert!(content.ends_with('\n'));
    assert!(content.lines().skip(1).all(|line| line.split(',').count() == 3));
}

#[test]
fn test_snapshot_retries_until_writer_finishes_row() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("table.csv");
    let config = StoreConfig {
        snapshot_retries: 20,
        retry_backoff: Duration::from_millis(10),
        ..StoreConfig::default()
    };
    let store = LogStore::open(&path, config).unwrap();

    // Simulate a foreign writer caught mid-row, finishing shortly after.
    fs::write(&path, "metric,value,timestamp\nCO,1,17000").unwrap();
    let finisher = {
        let path = path.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            fs::write(&path, "metric,value,timestamp\nCO,1,1700000000\n").unwrap();
        })
    };

    let snapshot = store.snapshot().unwrap();
    finisher.join().unwrap();
    assert_eq!(snapshot, vec![MetricRecord::new("CO", 1.0, BASE_TIME)]);
}

#[test]
fn test_lock_file_excludes_other_handles() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("table.csv");
    let store = Arc::new(LogStore::open(&path, StoreConfig::default()).unwrap());
    assert!(store.lock_path().exists());

    // A separate open of the lock file stands in for another process.
    let other = File::open(store.lock_path()).unwrap();
    other.lock().unwrap();

    let (tx, rx) = mpsc::channel();
    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            store
                .append(&[MetricRecord::new("CO", 1.0, BASE_TIME)])
                .unwrap();
            tx.send(()).unwrap();
        })
    };

    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(fs::read_to_string(&path).unwrap(), "metric,value,timestamp\n");

    other.unlock().unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    writer.join().unwrap();
    assert_eq!(store.snapshot().unwrap().len(), 1);
}

#[test]
fn test_retention_lock_survives_rewrite() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("table.csv");
    let writer = LogStore::open(&path, StoreConfig::default()).unwrap();
    let maintainer = LogStore::open(&path, StoreConfig::default()).unwrap();

    writer
        .append(&[MetricRecord::new("CO", 1.0, BASE_TIME)])
        .unwrap();
    maintainer.retain_and_consolidate_at(BASE_TIME).unwrap();
    writer
        .append(&[MetricRecord::new("CO", 2.0, BASE_TIME + 1.0)])
        .unwrap();

    // The writer's next append lands in the renamed file, not the old inode.
    let values: Vec<_> = maintainer.snapshot().unwrap().iter().map(|r| r.value).collect();
    assert_eq!(values, vec![1.0, 2.0]);
}
