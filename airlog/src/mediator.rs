//! Turns raw sensor readings into metric records.
//!
//! The mediator is pure: given the same reading, identity and clock value it
//! always yields the same records, and it never fails. Fields that are
//! missing or cannot be read as a finite number are skipped.

use crate::record::{MetricRecord, RawReading, SensorIdentity};

/// Fields the climate/VOC module contributes to the log.
pub const VOC_FIELDS: [&str; 5] = ["temperature", "pressure", "humidity", "IAQ", "eqCO2"];

/// Fields the particulate sensor contributes to the log.
pub const PM_FIELDS: [&str; 2] = ["pm2.5", "pm10"];

/// CO2 readings above this many ppm are treated as sensor glitches.
pub const DEFAULT_CO2_CEILING_PPM: f64 = 5000.0;

/// Per-identity reading-to-record rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mediator {
    /// CO2 values strictly above this are dropped.
    pub co2_ceiling_ppm: f64,
}

impl Default for Mediator {
    fn default() -> Self {
        Self {
            co2_ceiling_ppm: DEFAULT_CO2_CEILING_PPM,
        }
    }
}

impl Mediator {
    /// Converts one reading into records stamped with `now`.
    pub fn transform(&self, raw: &RawReading, identity: SensorIdentity, now: f64) -> Vec<MetricRecord> {
        match identity {
            SensorIdentity::O3 | SensorIdentity::CO | SensorIdentity::NO2 => {
                collect(raw, &[identity.as_str()], now)
            }
            SensorIdentity::VOC => collect(raw, &VOC_FIELDS, now),
            SensorIdentity::PM => collect(raw, &PM_FIELDS, now),
            SensorIdentity::CO2 => collect(raw, &[identity.as_str()], now)
                .into_iter()
                .filter(|record| record.value <= self.co2_ceiling_ppm)
                .collect(),
        }
    }
}

/// [`Mediator::transform`] with the default rules.
pub fn transform(raw: &RawReading, identity: SensorIdentity, now: f64) -> Vec<MetricRecord> {
    Mediator::default().transform(raw, identity, now)
}

fn collect(raw: &RawReading, fields: &[&str], now: f64) -> Vec<MetricRecord> {
    fields
        .iter()
        .filter_map(|field| raw.number(field).map(|value| MetricRecord::new(*field, value, now)))
        .collect()
}
