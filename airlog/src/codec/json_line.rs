//! JSON line codec for the climate/VOC module.
//!
//! The module prints one JSON object per line, e.g.
//! `{"temperature": 23.1, "pressure": 1012.4, "humidity": 40.2, "IAQ": 51, "eqCO2": 600}`.

use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use super::{Line, Link, SensorCodec, read_line};
use crate::error::{CodecError, Result};
use crate::record::{FieldValue, RawReading};

/// Codec that parses newline-delimited JSON objects.
#[derive(Debug)]
pub struct JsonLineCodec<L> {
    link: L,
    timeout: Duration,
}

impl<L: Link> JsonLineCodec<L> {
    /// Wraps a link; `timeout` bounds each line read.
    pub fn new(link: L, timeout: Duration) -> Self {
        Self { link, timeout }
    }

    /// Parses one line into a reading; anything but a JSON object is empty.
    pub fn parse(line: &[u8]) -> RawReading {
        let object = match serde_json::from_slice::<Value>(line) {
            Ok(Value::Object(object)) => object,
            Ok(other) => {
                warn!(kind = json_kind(&other), "climate module sent a non-object line");
                return RawReading::new();
            }
            Err(e) => {
                warn!(error = %e, "climate module sent unparseable JSON");
                return RawReading::new();
            }
        };

        object
            .into_iter()
            .filter_map(|(name, value)| {
                let field = match value {
                    Value::Number(n) => FieldValue::Number(n.as_f64()?),
                    Value::String(s) => FieldValue::Text(s),
                    Value::Null => FieldValue::Absent,
                    _ => return None,
                };
                Some((name, field))
            })
            .collect()
    }
}

impl<L: Link> SensorCodec for JsonLineCodec<L> {
    fn read(&mut self) -> Result<RawReading> {
        match read_line(&mut self.link, self.timeout).map_err(CodecError::Io)? {
            Line::Complete(line) => Ok(Self::parse(&line)),
            Line::TimedOut(partial) => {
                warn!(len = partial.len(), "climate module line timed out");
                Ok(RawReading::new())
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
