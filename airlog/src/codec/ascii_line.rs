//! ASCII line codec for the electrochemical gas analyzers (O3, CO, NO2).
//!
//! The analyzer streams one comma-space separated line per measurement:
//!
//! ```text
//! 012345678901, 37, 23, 41, 29012, 25433, 31455, 00, 01, 02, 03\r\n
//! ```
//!
//! A single `c` byte wakes the analyzer into continuous output. When a read
//! comes back empty the wake byte is re-sent and the read retried a bounded
//! number of times.

use std::time::Duration;

use tracing::{debug, warn};

use super::{Line, Link, SensorCodec, read_line};
use crate::error::{CodecError, Result};
use crate::record::{RawReading, SensorIdentity};

/// Byte that puts the analyzer into continuous output mode.
pub const WAKE_COMMAND: &[u8] = b"c";

/// Field separator within a line.
const SEPARATOR: &str = ", ";

/// Length of the line trailer (`\r\n`).
const TRAILER_LEN: usize = 2;

/// Number of positional fields in a line.
pub const FIELD_COUNT: usize = 11;

/// Concentration unit every analyzer reports in.
pub const GAS_UNIT: &str = "ppb";

/// Codec for the gas analyzers' ASCII line protocol.
#[derive(Debug)]
pub struct AsciiLineCodec<L> {
    link: L,
    gas: SensorIdentity,
    unit: &'static str,
    timeout: Duration,
    retries: u32,
}

impl<L: Link> AsciiLineCodec<L> {
    /// Wraps a link and sends the initial wake command.
    ///
    /// `timeout` bounds each line read; `retries` is how many extra
    /// wake-and-read attempts follow an empty read.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Io`] if the wake command cannot be written.
    pub fn new(link: L, gas: SensorIdentity, timeout: Duration, retries: u32) -> Result<Self> {
        let mut codec = Self {
            link,
            gas,
            unit: GAS_UNIT,
            timeout,
            retries,
        };
        codec.wake()?;
        Ok(codec)
    }

    /// The positional labels for this analyzer's line format.
    pub fn labels(&self) -> [&'static str; FIELD_COUNT] {
        [
            "serial_number",
            self.gas.as_str(),
            "temp",
            "humidity",
            "raw_value",
            "temp_digital",
            "humidity_digital",
            "day",
            "hour",
            "minute",
            "second",
        ]
    }

    fn wake(&mut self) -> Result<()> {
        self.link.write_all(WAKE_COMMAND).map_err(CodecError::Io)?;
        self.link.flush().map_err(CodecError::Io)?;
        Ok(())
    }

    /// Reads one line and strips its trailer; unterminated input counts as empty.
    fn read_text(&mut self) -> Result<String> {
        match read_line(&mut self.link, self.timeout).map_err(CodecError::Io)? {
            Line::Complete(mut bytes) => {
                bytes.truncate(bytes.len().saturating_sub(TRAILER_LEN));
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            Line::TimedOut(bytes) => {
                if !bytes.is_empty() {
                    debug!(gas = %self.gas, len = bytes.len(), "discarding unterminated line");
                }
                Ok(String::new())
            }
        }
    }

    /// Maps a stripped line onto the label list.
    pub fn parse(&self, text: &str) -> RawReading {
        let fields: Vec<&str> = text.split(SEPARATOR).collect();
        if fields.len() != FIELD_COUNT {
            warn!(
                gas = %self.gas,
                expected = FIELD_COUNT,
                found = fields.len(),
                "malformed analyzer line"
            );
            return RawReading::new();
        }

        let mut reading: RawReading = self.labels().into_iter().zip(fields).collect();
        reading.insert("unit", self.unit);
        reading
    }
}

impl<L: Link> SensorCodec for AsciiLineCodec<L> {
    fn read(&mut self) -> Result<RawReading> {
        for attempt in 0..=self.retries {
            let text = self.read_text()?;
            if !text.is_empty() {
                return Ok(self.parse(&text));
            }
            if attempt < self.retries {
                debug!(gas = %self.gas, attempt, "empty line, re-sending wake command");
                self.wake()?;
            }
        }

        warn!(gas = %self.gas, retries = self.retries, "no data from analyzer");
        Ok(RawReading::new())
    }
}
