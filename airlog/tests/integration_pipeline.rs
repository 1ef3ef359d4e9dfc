//! Integration tests for the acquisition pipeline.
//!
//! Drivers are built on in-memory links that replay canned sensor output,
//! then run on real acquisition threads against a real log file.

use airlog::codec::framed::{HEAD, TAIL};
use airlog::error::{AirlogError, CodecError};
use airlog::pipeline::{run_cycle, spawn_acquisition};
use airlog::{DriverSettings, LogStore, Mediator, SensorDriver, SensorIdentity, StoreConfig};
use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

/// Replays fixed bytes, then times out like an idle serial port.
struct ReplayLink {
    input: VecDeque<u8>,
}

impl ReplayLink {
    fn new(chunks: &[&[u8]]) -> Self {
        Self {
            input: chunks.iter().flat_map(|c| c.iter().copied()).collect(),
        }
    }
}

impl Read for ReplayLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.input.is_empty() {
            thread::sleep(Duration::from_millis(1));
            return Err(io::Error::new(ErrorKind::TimedOut, "idle"));
        }
        let n = buf.len().min(self.input.len());
        for (slot, byte) in buf.iter_mut().zip(self.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ReplayLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn settings() -> DriverSettings {
    DriverSettings {
        read_timeout: Duration::from_millis(20),
        line_retries: 1,
        framed_command_delay: Duration::ZERO,
        co2_settle: Duration::ZERO,
        ..DriverSettings::default()
    }
}

fn pm_reply(pm25: u16, pm10: u16, corrupt: bool) -> Vec<u8> {
    let mut frame = vec![HEAD, 0xC0];
    frame.extend_from_slice(&pm25.to_le_bytes());
    frame.extend_from_slice(&pm10.to_le_bytes());
    frame.extend_from_slice(&[0x01, 0x02]);
    let checksum = frame[2..8].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    frame.push(if corrupt { checksum ^ 0xFF } else { checksum });
    frame.push(TAIL);
    frame
}

fn wait_for(deadline: Duration, mut done: impl FnMut() -> bool) {
    let start = Instant::now();
    while !done() && start.elapsed() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_cycles_through_checksum_fault() {
    let temp_dir = tempdir().unwrap();
    let store = LogStore::open(temp_dir.path().join("table.csv"), StoreConfig::default()).unwrap();
    let good = pm_reply(123, 456, false);
    let bad = pm_reply(1, 2, true);
    let link = ReplayLink::new(&[&good, &bad, &good]);
    let mut driver = SensorDriver::for_link(SensorIdentity::PM, link, &settings()).unwrap();
    let mediator = Mediator::default();

    assert_eq!(run_cycle(&mut driver, &mediator, &store).unwrap(), 2);
    assert!(matches!(
        run_cycle(&mut driver, &mediator, &store),
        Err(AirlogError::Codec(CodecError::ChecksumMismatch { .. }))
    ));
    assert_eq!(run_cycle(&mut driver, &mediator, &store).unwrap(), 2);
    // Link is now idle: an empty reading, not an error.
    assert_eq!(run_cycle(&mut driver, &mediator, &store).unwrap(), 0);

    let snapshot = store.snapshot().unwrap();
    let values: Vec<_> = snapshot.iter().map(|r| (r.metric.as_str(), r.value)).collect();
    assert_eq!(
        values,
        vec![("pm2.5", 12.3), ("pm10", 45.6), ("pm2.5", 12.3), ("pm10", 45.6)]
    );
}

#[test]
fn test_faulty_sensor_does_not_stall_others() {
    let temp_dir = tempdir().unwrap();
    let store = Arc::new(LogStore::open(temp_dir.path().join("table.csv"), StoreConfig::default()).unwrap());
    let shutdown = Arc::new(AtomicBool::new(false));

    let bad = pm_reply(1, 2, true);
    let pm_link = ReplayLink::new(&[&bad, &bad, &bad]);
    let co_link = ReplayLink::new(&[
        b"0001, 37, 23, 41, 1, 2, 3, 00, 01, 02, 03\r\n",
        b"0001, 38, 23, 41, 1, 2, 3, 00, 01, 02, 04\r\n",
    ]);
    let voc_link = ReplayLink::new(&[
        b"{\"temperature\": 21.5, \"pressure\": 1010, \"humidity\": 45, \"IAQ\": 50, \"eqCO2\": 500}\n",
    ]);

    let handles: Vec<_> = [
        (SensorIdentity::PM, pm_link),
        (SensorIdentity::CO, co_link),
        (SensorIdentity::VOC, voc_link),
    ]
    .into_iter()
    .map(|(identity, link)| {
        let driver = SensorDriver::for_link(identity, link, &settings()).unwrap();
        spawn_acquisition(driver, Mediator::default(), Arc::clone(&store), Arc::clone(&shutdown)).unwrap()
    })
    .collect();

    wait_for(Duration::from_secs(5), || {
        store.snapshot().map(|s| s.len() >= 7).unwrap_or(false)
    });
    shutdown.store(true, Ordering::Relaxed);

    let names: Vec<_> = handles
        .iter()
        .map(|h| h.thread().name().map(str::to_string))
        .collect();
    assert_eq!(
        names,
        vec![Some("PM".to_string()), Some("CO".to_string()), Some("VOC".to_string())]
    );

    let written: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(written, vec![0, 2, 5]);

    let snapshot = store.snapshot().unwrap();
    let mut co: Vec<_> = snapshot.iter().filter(|r| r.metric == "CO").map(|r| r.value).collect();
    co.sort_by(f64::total_cmp);
    assert_eq!(co, vec![37.0, 38.0]);
    assert!(snapshot.iter().all(|r| !r.metric.starts_with("pm")));
}
