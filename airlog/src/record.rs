//! Core data types: metric records, raw sensor readings, and sensor identities.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, RecordError};

/// A single timestamped measurement, the only row type the log stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Metric name, e.g. `"CO"` or `"pm2.5"`.
    pub metric: String,
    /// Measured value.
    pub value: f64,
    /// Unix time in seconds.
    pub timestamp: f64,
}

impl MetricRecord {
    /// Creates a new record.
    pub fn new(metric: impl Into<String>, value: f64, timestamp: f64) -> Self {
        Self {
            metric: metric.into(),
            value,
            timestamp,
        }
    }

    /// Checks that the record can be written as one log row.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] if the metric name is empty or contains a
    /// `,`, `\r` or `\n`, or if the value or timestamp is not finite.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.metric.is_empty() {
            return Err(RecordError::InvalidMetric {
                metric: self.metric.clone(),
                reason: "metric name is empty",
            });
        }
        if self.metric.contains([',', '\r', '\n']) {
            return Err(RecordError::InvalidMetric {
                metric: self.metric.clone(),
                reason: "metric name contains a separator",
            });
        }
        if !self.value.is_finite() {
            return Err(RecordError::InvalidValue {
                metric: self.metric.clone(),
                value: self.value,
            });
        }
        if !self.timestamp.is_finite() {
            return Err(RecordError::InvalidTimestamp {
                metric: self.metric.clone(),
                timestamp: self.timestamp,
            });
        }
        Ok(())
    }
}

/// One field of a [`RawReading`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Text as it came off the wire.
    Text(String),
    /// A decoded number.
    Number(f64),
    /// The sensor reported the field but gave no value.
    Absent,
}

impl FieldValue {
    /// Interprets the field as a finite number, parsing text if needed.
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Self::Number(v) => *v,
            Self::Text(s) => s.trim().parse::<f64>().ok()?,
            Self::Absent => return None,
        };
        value.is_finite().then_some(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// The unordered field map produced by a single codec read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawReading {
    fields: HashMap<String, FieldValue>,
}

impl RawReading {
    /// Creates an empty reading.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Returns a field by name.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Returns a field as a finite number, if present and numeric.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(FieldValue::as_f64)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the read produced no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates over `(name, value)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for RawReading {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut reading = Self::new();
        for (k, v) in iter {
            reading.insert(k, v);
        }
        reading
    }
}

/// Identifies a physical sensor, its wire protocol, and its mediator rule.
#[allow(clippy::upper_case_acronyms)] // chemical formulas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SensorIdentity {
    /// Ozone gas analyzer.
    O3,
    /// Carbon monoxide gas analyzer.
    CO,
    /// Nitrogen dioxide gas analyzer.
    NO2,
    /// Climate and VOC module.
    VOC,
    /// Particulate matter sensor.
    PM,
    /// Carbon dioxide sensor.
    CO2,
}

impl SensorIdentity {
    /// Every identity, in a stable order.
    pub const ALL: [Self; 6] = [Self::O3, Self::CO, Self::NO2, Self::VOC, Self::PM, Self::CO2];

    /// The upper-case name, also used as the metric name for single-gas sensors.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::O3 => "O3",
            Self::CO => "CO",
            Self::NO2 => "NO2",
            Self::VOC => "VOC",
            Self::PM => "PM",
            Self::CO2 => "CO2",
        }
    }

    /// True for the electrochemical gas analyzers that speak the ASCII line protocol.
    pub const fn is_single_gas(self) -> bool {
        matches!(self, Self::O3 | Self::CO | Self::NO2)
    }
}

impl fmt::Display for SensorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorIdentity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|identity| identity.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownIdentity {
                name: s.to_string(),
            })
    }
}

/// Current wall-clock time as unix seconds.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}
