//! Retention and downsampling of the record log.
//!
//! A retention pass splits the log by age relative to `now`:
//!
//! ```text
//!   dropped        │        consolidated         │   full resolution
//! ─────────────────┼─────────────────────────────┼──────────────────► time
//!          now - retention              now - full_resolution       now
//! ```
//!
//! Records in the middle band are grouped by `(metric, bucket floor)` and
//! coalesced with a [`ConsolidationFn`] into one record stamped at the bucket
//! floor. Every supported function maps a single value to itself, so a
//! consolidated record is a fixed point and a second pass at the same `now`
//! changes nothing.
//!
//! Both horizons are rounded down to bucket boundaries, so a bucket is only
//! consolidated once every record it can hold is past the full-resolution
//! window, and a later pass never folds new samples into an earlier mean.
//!
//! The drop horizon is rounded down to a bucket boundary. A bucket that
//! straddles `now - retention` therefore survives whole until its floor falls
//! past the horizon; otherwise its consolidated record (stamped at the floor)
//! would be dropped by the next pass.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::record::MetricRecord;

/// Function used to combine the values that fall into one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConsolidationFn {
    /// Arithmetic mean.
    #[default]
    Average,

    /// Minimum value.
    Min,

    /// Maximum value.
    Max,

    /// Value of the record that came last in log order.
    Last,
}

impl ConsolidationFn {
    /// Applies this function to a bucket's values.
    ///
    /// Non-finite values are ignored. Returns `None` if nothing is left.
    ///
    /// ```rust
    /// use airlog::ConsolidationFn;
    ///
    /// let values = [1.0, 2.0, f64::NAN, 4.0];
    /// assert_eq!(ConsolidationFn::Min.apply(&values), Some(1.0));
    /// assert_eq!(ConsolidationFn::Max.apply(&values), Some(4.0));
    /// assert_eq!(ConsolidationFn::Last.apply(&values), Some(4.0));
    /// assert!(ConsolidationFn::Average.apply(&[]).is_none());
    /// ```
    #[allow(clippy::cast_precision_loss)] // bucket sizes are far below 2^52
    pub fn apply(self, values: &[f64]) -> Option<f64> {
        let mut valid = values.iter().copied().filter(|v| v.is_finite()).peekable();
        valid.peek()?;

        Some(match self {
            Self::Average => {
                let (sum, count) = valid.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                sum / count as f64
            }
            Self::Min => valid.fold(f64::INFINITY, f64::min),
            Self::Max => valid.fold(f64::NEG_INFINITY, f64::max),
            Self::Last => valid.last()?,
        })
    }
}

/// How long records are kept and when they are downsampled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Records older than this are dropped.
    #[serde(with = "crate::config::duration_serde")]
    pub retention: Duration,

    /// Records younger than this are kept as written.
    #[serde(with = "crate::config::duration_serde")]
    pub full_resolution: Duration,

    /// Width of a consolidation bucket.
    #[serde(with = "crate::config::duration_serde")]
    pub bucket: Duration,

    /// How a bucket's values are combined.
    #[serde(default)]
    pub consolidation_fn: ConsolidationFn,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(7 * 24 * 3600),
            full_resolution: Duration::from_secs(3600),
            bucket: Duration::from_secs(60),
            consolidation_fn: ConsolidationFn::Average,
        }
    }
}

impl RetentionPolicy {
    /// Checks the policy for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPolicy`] if the bucket is zero or the
    /// full-resolution window exceeds the retention window.
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_zero() {
            return Err(ConfigError::InvalidPolicy {
                reason: "bucket cannot be zero".to_string(),
            }
            .into());
        }

        if self.full_resolution > self.retention {
            return Err(ConfigError::InvalidPolicy {
                reason: format!(
                    "full resolution window ({:?}) must be <= retention ({:?})",
                    self.full_resolution, self.retention
                ),
            }
            .into());
        }

        Ok(())
    }

    /// Start of the bucket containing `timestamp`.
    pub fn bucket_floor(&self, timestamp: f64) -> f64 {
        let width = self.bucket.as_secs_f64();
        (timestamp / width).floor() * width
    }
}

/// Counts from one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionReport {
    /// Records removed for being past the retention horizon.
    pub dropped: usize,
    /// Records that went into consolidation.
    pub consolidated_from: usize,
    /// Bucket records that came out of consolidation.
    pub consolidated_into: usize,
    /// Records kept at full resolution.
    pub kept_recent: usize,
}

impl RetentionReport {
    /// Total records after the pass.
    pub fn total_after(&self) -> usize {
        self.consolidated_into + self.kept_recent
    }
}

/// Runs one retention pass over `records`.
///
/// Output is the consolidated records ordered by metric then bucket,
/// followed by the full-resolution records in their original order.
pub fn consolidate(
    records: Vec<MetricRecord>,
    now: f64,
    policy: &RetentionPolicy,
) -> (Vec<MetricRecord>, RetentionReport) {
    let drop_before = policy.bucket_floor(now - policy.retention.as_secs_f64());
    let consolidate_before = policy.bucket_floor(now - policy.full_resolution.as_secs_f64());

    let mut report = RetentionReport::default();
    let mut buckets: BTreeMap<(String, BucketKey), Vec<f64>> = BTreeMap::new();
    let mut recent = Vec::new();

    for record in records {
        if record.timestamp < drop_before {
            report.dropped += 1;
        } else if record.timestamp < consolidate_before {
            report.consolidated_from += 1;
            let floor = policy.bucket_floor(record.timestamp);
            buckets
                .entry((record.metric, BucketKey(floor)))
                .or_default()
                .push(record.value);
        } else {
            recent.push(record);
        }
    }

    let mut out: Vec<MetricRecord> = buckets
        .into_iter()
        .filter_map(|((metric, BucketKey(floor)), values)| {
            let value = policy.consolidation_fn.apply(&values)?;
            Some(MetricRecord::new(metric, value, floor))
        })
        .collect();

    report.consolidated_into = out.len();
    report.kept_recent = recent.len();
    out.extend(recent);
    (out, report)
}

/// A bucket floor ordered by `f64::total_cmp`.
#[derive(Debug, Clone, Copy)]
struct BucketKey(f64);

impl PartialEq for BucketKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for BucketKey {}

impl PartialOrd for BucketKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BucketKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}
