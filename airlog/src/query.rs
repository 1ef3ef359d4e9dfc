//! Read-side helpers over a store snapshot.
//!
//! The log is an unordered bag of records, so everything here works on a
//! materialized snapshot and sorts where order matters.

use std::collections::BTreeMap;

use crate::record::{MetricRecord, now_secs};

/// Records newer than `horizon_seconds` before `now`.
///
/// The bound is exclusive: a record exactly `horizon_seconds` old is not
/// included.
pub fn records_since(snapshot: &[MetricRecord], horizon_seconds: f64, now: f64) -> Vec<MetricRecord> {
    let cutoff = now - horizon_seconds;
    snapshot
        .iter()
        .filter(|record| record.timestamp > cutoff)
        .cloned()
        .collect()
}

/// [`records_since`] relative to the current wall clock.
pub fn records_since_now(snapshot: &[MetricRecord], horizon_seconds: f64) -> Vec<MetricRecord> {
    records_since(snapshot, horizon_seconds, now_secs())
}

/// Splits records by metric name, each group sorted by timestamp.
pub fn group_by_metric<I>(records: I) -> BTreeMap<String, Vec<MetricRecord>>
where
    I: IntoIterator<Item = MetricRecord>,
{
    let mut groups: BTreeMap<String, Vec<MetricRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.metric.clone()).or_default().push(record);
    }
    for group in groups.values_mut() {
        group.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    }
    groups
}

/// The latest timestamp among `records`, if any.
pub fn newest_timestamp(records: &[MetricRecord]) -> Option<f64> {
    records
        .iter()
        .map(|record| record.timestamp)
        .max_by(f64::total_cmp)
}
