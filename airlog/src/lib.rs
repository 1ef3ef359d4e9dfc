//! # airlog
//!
//! Environmental sensor ingestion and an append-only time-series log.
//!
//! airlog reads gas analyzers, a climate/VOC module, a particulate sensor and
//! a CO2 sensor over serial or I2C, turns each sensor's wire protocol into
//! timestamped `(metric, value, timestamp)` records, and appends them to a
//! single CSV log shared by every acquisition thread. A maintenance pass
//! drops old records and downsamples aging ones in place.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - One thread per sensor; a failing sensor never stalls the others
//! - Each append batch lands as one contiguous write under the store lock
//! - Snapshots never observe a partial row
//! - Retention is idempotent: consolidated buckets are fixed points
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//!
//! use airlog::{DriverSettings, LogStore, Mediator, SensorDriver, SensorIdentity, StoreConfig};
//! use airlog::pipeline::spawn_acquisition;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(LogStore::open("persist/table.csv", StoreConfig::default())?);
//! let shutdown = Arc::new(AtomicBool::new(false));
//!
//! let driver = SensorDriver::open_serial(SensorIdentity::CO, "/dev/ttyUSB0", &DriverSettings::default())?;
//! let handle = spawn_acquisition(driver, Mediator::default(), Arc::clone(&store), shutdown)?;
//!
//! for record in store.snapshot()? {
//!     println!("{} {} {}", record.metric, record.value, record.timestamp);
//! }
//! # handle.join().ok();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`SensorDriver`]: Owns one sensor's codec; `read_data` yields a [`RawReading`]
//! - [`Mediator`]: Pure mapping from a reading to [`MetricRecord`]s
//! - [`LogStore`]: The shared CSV log: append, snapshot, retention
//! - [`KeyedCache`]: Map with one lock per key, used for lookback views
//!
//! ## Modules
//!
//! - [`codec`]: Wire protocols (ASCII line, JSON line, framed, fixed offset, I2C register)
//! - [`driver`]: Identity to codec construction
//! - [`mediator`]: Reading to record rules
//! - [`store`]: Log file lifecycle, append, snapshot
//! - [`retention`]: Retention policy and consolidation pass
//! - [`query`]: Snapshot filtering and grouping
//! - [`cache`]: Keyed-lock cache
//! - [`lookback`]: Per-window views refreshed from the store
//! - [`pipeline`]: Acquisition and maintenance threads
//! - [`config`]: Sensor map and driver settings
//! - [`error`]: Error types

pub mod cache;
pub mod codec;
pub mod config;
pub mod driver;
pub mod error;
pub mod lookback;
pub mod mediator;
pub mod pipeline;
pub mod query;
pub mod record;
pub mod retention;
pub mod store;

// Re-export primary API types at crate root for convenience.
pub use cache::{KeyGuard, KeyedCache};
pub use codec::{RetryPolicy, SensorCodec};
pub use config::{DriverSettings, SensorMap};
pub use driver::SensorDriver;
pub use error::{AirlogError, Result};
pub use lookback::{Lookback, LookbackView};
pub use mediator::{Mediator, transform};
pub use record::{FieldValue, MetricRecord, RawReading, SensorIdentity, now_secs};
pub use retention::{ConsolidationFn, RetentionPolicy, RetentionReport};
pub use store::{LogStore, StoreConfig};
