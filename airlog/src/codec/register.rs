//! Register-read codec for the CO2 sensor wired over I2C.
//!
//! Each read writes a 4-byte read-RAM request
//! (`cmd, 0x00, register, (cmd + register) & 0xFF`), waits for the sensor to
//! settle, and reads 4 bytes back. The concentration is the big-endian
//! `u16` in bytes 1 and 2.
//!
//! Bus faults are retried per [`RetryPolicy`]. The default policy retries
//! forever, blocking the owning acquisition thread until the bus recovers;
//! no other sensor's thread is affected.

use std::thread;
use std::time::Duration;

use embedded_hal::i2c::I2c;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::SensorCodec;
use crate::error::{CodecError, Result};
use crate::record::RawReading;

/// Default 7-bit bus address of the sensor.
pub const DEFAULT_ADDRESS: u8 = 0x68;

/// Read-RAM command byte.
pub const READ_RAM: u8 = 0x22;

/// RAM address of the CO2 value.
pub const CO2_REGISTER: u8 = 0x08;

/// Field name the concentration is reported under.
pub const CO2_FIELD: &str = "CO2";

/// Builds a read request for `register`.
pub const fn encode_request(cmd: u8, register: u8) -> [u8; 4] {
    [cmd, 0x00, register, cmd.wrapping_add(register)]
}

/// How a codec retries after a communication fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per read; `None` retries until the bus recovers.
    pub max_attempts: Option<u32>,
    /// Pause between attempts.
    #[serde(with = "crate::config::duration_serde")]
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Retry forever, pausing `backoff` between attempts.
    pub const fn unbounded(backoff: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff,
        }
    }

    /// Give up after `max_attempts` attempts.
    pub const fn bounded(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(Duration::from_millis(100))
    }
}

/// Codec for the CO2 sensor over an `embedded-hal` I2C bus.
#[derive(Debug)]
pub struct RegisterCodec<I> {
    bus: I,
    address: u8,
    settle: Duration,
    retry: RetryPolicy,
}

impl<I: I2c> RegisterCodec<I> {
    /// Wraps a bus at [`DEFAULT_ADDRESS`].
    pub fn new(bus: I, settle: Duration, retry: RetryPolicy) -> Self {
        Self {
            bus,
            address: DEFAULT_ADDRESS,
            settle,
            retry,
        }
    }

    /// Talks to a sensor at a non-default address.
    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    /// One request/reply exchange.
    fn transact(&mut self) -> std::result::Result<u16, CodecError> {
        let bus_fault = |e: I::Error| CodecError::Bus {
            reason: format!("{e:?}"),
        };

        self.bus
            .write(self.address, &encode_request(READ_RAM, CO2_REGISTER))
            .map_err(bus_fault)?;
        thread::sleep(self.settle);

        let mut reply = [0u8; 4];
        self.bus.read(self.address, &mut reply).map_err(bus_fault)?;
        Ok((u16::from(reply[1]) << 8) | u16::from(reply[2]))
    }
}

impl<I: I2c + Send> SensorCodec for RegisterCodec<I> {
    fn read(&mut self) -> Result<RawReading> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.transact() {
                Ok(ppm) => {
                    let mut reading = RawReading::new();
                    reading.insert(CO2_FIELD, f64::from(ppm));
                    return Ok(reading);
                }
                Err(e) => {
                    warn!(address = self.address, attempt = attempts, error = %e, "CO2 read failed");
                    if self.retry.max_attempts.is_some_and(|max| attempts >= max) {
                        return Err(CodecError::RetriesExhausted { attempts }.into());
                    }
                    thread::sleep(self.retry.backoff);
                }
            }
        }
    }
}
