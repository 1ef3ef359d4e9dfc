//! Per-window views of recent records for dashboard-style consumers.
//!
//! A refresher thread periodically snapshots the store and, for each
//! [`Lookback`] window, publishes a [`LookbackView`] into a
//! [`KeyedCache`]. Readers of one window never wait on a refresh of another.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::KeyedCache;
use crate::error::Result;
use crate::pipeline::sleep_unless_shutdown;
use crate::query::{group_by_metric, newest_timestamp, records_since};
use crate::record::{MetricRecord, now_secs};
use crate::store::LogStore;

/// Name of the lookback refresh thread.
pub const LOOKBACK_THREAD: &str = "lookback";

/// A trailing time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Lookback {
    /// Last minute.
    OneMinute,
    /// Last five minutes.
    FiveMinutes,
    /// Last hour.
    OneHour,
    /// Last eight hours.
    EightHours,
    /// Last day.
    OneDay,
}

impl Lookback {
    /// Every window, shortest first.
    pub const ALL: [Self; 5] = [
        Self::OneMinute,
        Self::FiveMinutes,
        Self::OneHour,
        Self::EightHours,
        Self::OneDay,
    ];

    /// Window length in seconds.
    pub const fn seconds(self) -> u64 {
        match self {
            Self::OneMinute => 60,
            Self::FiveMinutes => 5 * 60,
            Self::OneHour => 3600,
            Self::EightHours => 8 * 3600,
            Self::OneDay => 24 * 3600,
        }
    }

    /// Short label, e.g. `5m` or `8h`.
    pub const fn label(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::OneHour => "1h",
            Self::EightHours => "8h",
            Self::OneDay => "24h",
        }
    }

    /// Parses a label produced by [`Lookback::label`].
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|window| window.label() == label)
    }
}

impl fmt::Display for Lookback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Records of one window, grouped by metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookbackView {
    /// Records per metric, each sorted by timestamp.
    pub records: BTreeMap<String, Vec<MetricRecord>>,
    /// Seconds since the newest record in the window, if any.
    pub newest_age: Option<f64>,
}

impl LookbackView {
    /// Builds the view of `window` ending at `now` from a store snapshot.
    #[allow(clippy::cast_precision_loss)] // window lengths are small
    pub fn build(snapshot: &[MetricRecord], window: Lookback, now: f64) -> Self {
        let recent = records_since(snapshot, window.seconds() as f64, now);
        let newest_age = newest_timestamp(&recent).map(|newest| now - newest);
        Self {
            records: group_by_metric(recent),
            newest_age,
        }
    }

    /// Total records across all metrics.
    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    /// True if the window holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Refreshes every window's view in `cache`.
///
/// Each window takes its own snapshot, so a failure for one window is
/// logged and the remaining windows still refresh. Returns the number of
/// windows refreshed.
pub fn refresh_lookback_cache(store: &LogStore, cache: &KeyedCache<Lookback, LookbackView>, now: f64) -> usize {
    let mut refreshed = 0;
    for window in Lookback::ALL {
        match refresh_window(store, cache, window, now) {
            Ok(()) => refreshed += 1,
            Err(e) => warn!(%window, error = %e, "lookback refresh failed"),
        }
    }
    refreshed
}

fn refresh_window(
    store: &LogStore,
    cache: &KeyedCache<Lookback, LookbackView>,
    window: Lookback,
    now: f64,
) -> Result<()> {
    let snapshot = store.snapshot()?;
    let view = LookbackView::build(&snapshot, window, now);
    debug!(%window, records = view.len(), "lookback refreshed");
    cache.set(window, view);
    Ok(())
}

/// Refreshes the cache every `interval` until `shutdown` is set.
pub fn lookback_refresh_loop(
    store: Arc<LogStore>,
    cache: Arc<KeyedCache<Lookback, LookbackView>>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        refresh_lookback_cache(&store, &cache, now_secs());
        if !sleep_unless_shutdown(interval, &shutdown) {
            break;
        }
    }
}

/// Spawns the lookback refresh thread.
///
/// # Errors
///
/// Returns an error if the OS refuses to create the thread.
pub fn spawn_lookback_refresh(
    store: Arc<LogStore>,
    cache: Arc<KeyedCache<Lookback, LookbackView>>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(LOOKBACK_THREAD.to_string())
        .spawn(move || lookback_refresh_loop(store, cache, interval, shutdown))
}
