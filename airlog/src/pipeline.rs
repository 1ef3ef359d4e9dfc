//! Acquisition and maintenance threads.
//!
//! Each sensor gets one thread running read -> transform -> append in a
//! loop. A separate maintenance thread periodically runs the store's
//! retention pass. Every thread shares the store as an `Arc<LogStore>` and
//! watches a shared shutdown flag; nothing else is shared between them.
//!
//! A failed cycle is logged and the loop moves on, so one faulty sensor
//! never stops the others.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::driver::SensorDriver;
use crate::error::Result;
use crate::mediator::Mediator;
use crate::record::now_secs;
use crate::retention::RetentionReport;
use crate::store::LogStore;

/// Pause after a failed cycle so a dead link does not spin.
pub const ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Granularity at which sleeping loops re-check the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Name of the maintenance thread.
pub const MAINTENANCE_THREAD: &str = "maintenance";

/// Performs one read -> transform -> append cycle.
///
/// Returns the number of records written.
///
/// # Errors
///
/// Propagates codec errors from the read and store errors from the append.
pub fn run_cycle(driver: &mut SensorDriver, mediator: &Mediator, store: &LogStore) -> Result<usize> {
    let raw = driver.read_data()?;
    let records = mediator.transform(&raw, driver.identity(), now_secs());
    store.append(&records)?;

    debug!(identity = %driver.identity(), fields = raw.len(), records = records.len(), "cycle complete");
    Ok(records.len())
}

/// Runs [`run_cycle`] until `shutdown` is set, logging every failure.
///
/// Returns the total number of records written.
pub fn acquisition_loop(
    mut driver: SensorDriver,
    mediator: Mediator,
    store: Arc<LogStore>,
    shutdown: Arc<AtomicBool>,
) -> u64 {
    let identity = driver.identity();
    info!(%identity, "acquisition started");

    let mut written = 0u64;
    while !shutdown.load(Ordering::Relaxed) {
        match run_cycle(&mut driver, &mediator, &store) {
            Ok(count) => written += count as u64,
            Err(e) => {
                warn!(%identity, error = %e, "acquisition cycle failed");
                sleep_unless_shutdown(ERROR_PAUSE, &shutdown);
            }
        }
    }

    info!(%identity, written, "acquisition stopped");
    written
}

/// Runs one retention pass, logging the outcome.
pub fn maintenance_tick(store: &LogStore) -> Option<RetentionReport> {
    match store.retain_and_consolidate() {
        Ok(report) => Some(report),
        Err(e) => {
            error!(path = %store.path().display(), error = %e, "retention pass failed");
            None
        }
    }
}

/// Sleeps `interval` then runs [`maintenance_tick`], until `shutdown` is set.
///
/// Returns the number of successful passes.
pub fn maintenance_loop(store: Arc<LogStore>, interval: Duration, shutdown: Arc<AtomicBool>) -> u64 {
    info!(interval_secs = interval.as_secs_f64(), "maintenance started");

    let mut passes = 0u64;
    while sleep_unless_shutdown(interval, &shutdown) {
        if maintenance_tick(&store).is_some() {
            passes += 1;
        }
    }

    info!(passes, "maintenance stopped");
    passes
}

/// Spawns a named acquisition thread for `driver`.
///
/// The thread is named after the sensor identity.
///
/// # Errors
///
/// Returns an error if the OS refuses to create the thread.
pub fn spawn_acquisition(
    driver: SensorDriver,
    mediator: Mediator,
    store: Arc<LogStore>,
    shutdown: Arc<AtomicBool>,
) -> io::Result<JoinHandle<u64>> {
    thread::Builder::new()
        .name(driver.identity().to_string())
        .spawn(move || acquisition_loop(driver, mediator, store, shutdown))
}

/// Spawns the maintenance thread.
///
/// # Errors
///
/// Returns an error if the OS refuses to create the thread.
pub fn spawn_maintenance(
    store: Arc<LogStore>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) -> io::Result<JoinHandle<u64>> {
    thread::Builder::new()
        .name(MAINTENANCE_THREAD.to_string())
        .spawn(move || maintenance_loop(store, interval, shutdown))
}

/// Sleeps up to `duration`, waking early on shutdown.
///
/// Returns `false` if shutdown was requested.
pub(crate) fn sleep_unless_shutdown(duration: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SHUTDOWN_POLL));
    }
}
