//! Framed binary codec with checksum for the particulate matter sensor.
//!
//! # Frame Layout
//!
//! Commands sent to the sensor:
//!
//! ```text
//! ┌──────┬────────┬──────────────┬─────┬─────┬──────────┬──────┐
//! │ 0xAA │ 0xB4   │ payload (13) │ ID1 │ ID2 │ checksum │ 0xAB │
//! └──────┴────────┴──────────────┴─────┴─────┴──────────┴──────┘
//! ```
//!
//! The checksum is the sum of payload and ID bytes modulo 256. The frame up
//! to and including ID2 is 17 bytes; checksum and tail make 19 on the wire.
//!
//! Replies are 10 bytes:
//!
//! ```text
//! ┌──────┬──────┬──────────────┬──────────┬──────┐
//! │ 0xAA │ cmd  │ data (6)     │ checksum │ 0xAB │
//! └──────┴──────┴──────────────┴──────────┴──────┘
//! ```
//!
//! For a measurement, data holds PM2.5 and PM10 as little-endian `u16`
//! tenths of µg/m³, followed by the device ID.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::{Link, SensorCodec, read_up_to};
use crate::error::{CodecError, Result};
use crate::record::RawReading;

/// Frame start marker.
pub const HEAD: u8 = 0xAA;

/// Frame end marker.
pub const TAIL: u8 = 0xAB;

/// Command frame identifier.
pub const CMD_ID: u8 = 0xB4;

/// Payload length of a command frame.
pub const PAYLOAD_LEN: usize = 13;

/// Most argument bytes a command carries after its command byte.
pub const MAX_ARGS: usize = PAYLOAD_LEN - 1;

/// Length of every reply frame.
pub const REPLY_LEN: usize = 10;

/// Device ID addressing every sensor on the link.
pub const BROADCAST_ID: [u8; 2] = [0xFF, 0xFF];

/// Command bytes (first payload byte).
pub mod command {
    /// Set or query the reporting mode.
    pub const REPORT_MODE: u8 = 0x02;
    /// Request a measurement.
    pub const QUERY: u8 = 0x04;
    /// Put the fan and laser to sleep or wake them.
    pub const SLEEP: u8 = 0x06;
    /// Set the duty-cycle work period.
    pub const WORK_PERIOD: u8 = 0x08;
    /// Second payload byte selecting "write" for settable commands.
    pub const WRITE: u8 = 0x01;
}

/// Encodes a command frame.
///
/// `args` follow the command byte and are zero-padded to fill the payload.
///
/// # Errors
///
/// Returns [`CodecError::PayloadTooLong`] if `args` is longer than
/// [`MAX_ARGS`].
pub fn encode_command(cmd: u8, args: &[u8], id: [u8; 2]) -> std::result::Result<Vec<u8>, CodecError> {
    if args.len() > MAX_ARGS {
        return Err(CodecError::PayloadTooLong {
            max: MAX_ARGS,
            actual: args.len(),
        });
    }

    let mut frame = Vec::with_capacity(PAYLOAD_LEN + 6);
    frame.push(HEAD);
    frame.push(CMD_ID);
    frame.push(cmd);
    frame.extend_from_slice(args);
    frame.resize(2 + PAYLOAD_LEN, 0);
    frame.extend_from_slice(&id);

    let checksum = frame[2..].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    frame.push(checksum);
    frame.push(TAIL);
    Ok(frame)
}

/// Checks a full-length reply's checksum over its data bytes `[2..8]`.
///
/// # Errors
///
/// Returns [`CodecError::ShortReply`] if `reply` is shorter than
/// [`REPLY_LEN`], or [`CodecError::ChecksumMismatch`] if byte 8 does not
/// equal the low byte of the data sum.
pub fn verify_reply(reply: &[u8]) -> std::result::Result<(), CodecError> {
    check_reply_len(reply)?;

    let expected = reply[2..8].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    let actual = reply[8];
    if expected != actual {
        return Err(CodecError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

/// Decodes `(pm2.5, pm10)` in µg/m³ from a verified measurement reply.
///
/// # Errors
///
/// Returns [`CodecError::ShortReply`] if `reply` is shorter than
/// [`REPLY_LEN`].
pub fn decode_measurement(reply: &[u8]) -> std::result::Result<(f64, f64), CodecError> {
    check_reply_len(reply)?;

    let pm25 = u16::from_le_bytes([reply[2], reply[3]]);
    let pm10 = u16::from_le_bytes([reply[4], reply[5]]);
    Ok((f64::from(pm25) / 10.0, f64::from(pm10) / 10.0))
}

fn check_reply_len(reply: &[u8]) -> std::result::Result<(), CodecError> {
    if reply.len() < REPLY_LEN {
        return Err(CodecError::ShortReply {
            expected: REPLY_LEN,
            actual: reply.len(),
        });
    }
    Ok(())
}

/// Codec for the particulate sensor's query/reply protocol.
#[derive(Debug)]
pub struct FramedCodec<L> {
    link: L,
    command_delay: Duration,
    timeout: Duration,
    device_id: [u8; 2],
}

impl<L: Link> FramedCodec<L> {
    /// Wraps a link addressed to every device.
    ///
    /// `command_delay` is the mandatory pause before each query; `timeout`
    /// bounds each reply read.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Io`] if the link cannot be flushed.
    pub fn new(mut link: L, command_delay: Duration, timeout: Duration) -> Result<Self> {
        link.flush().map_err(CodecError::Io)?;
        Ok(Self {
            link,
            command_delay,
            timeout,
            device_id: BROADCAST_ID,
        })
    }

    /// Addresses a specific device instead of broadcasting.
    pub fn with_device_id(mut self, device_id: [u8; 2]) -> Self {
        self.device_id = device_id;
        self
    }

    /// Switches between active reporting and query-only mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the link fails or the reply checksum is wrong.
    pub fn set_report_mode(&mut self, active: bool) -> Result<()> {
        let mode = if active { 0x00 } else { 0x01 };
        self.execute(command::REPORT_MODE, &[command::WRITE, mode])
            .map(drop)
    }

    /// Puts the sensor to sleep or wakes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the link fails or the reply checksum is wrong.
    pub fn set_sleep(&mut self, sleeping: bool) -> Result<()> {
        let state = if sleeping { 0x00 } else { 0x01 };
        self.execute(command::SLEEP, &[command::WRITE, state]).map(drop)
    }

    /// Sets the work period in minutes; `0` means continuous.
    ///
    /// # Errors
    ///
    /// Returns an error if the link fails or the reply checksum is wrong.
    pub fn set_work_period(&mut self, minutes: u8) -> Result<()> {
        self.execute(command::WORK_PERIOD, &[command::WRITE, minutes])
            .map(drop)
    }

    /// Sends a command and reads its reply.
    ///
    /// Returns `None` when the reply is short or missing; a full reply is
    /// checksum-verified.
    fn execute(&mut self, cmd: u8, args: &[u8]) -> Result<Option<Vec<u8>>> {
        let frame = encode_command(cmd, args, self.device_id)?;
        self.link.write_all(&frame).map_err(CodecError::Io)?;
        self.link.flush().map_err(CodecError::Io)?;

        let reply = read_up_to(&mut self.link, REPLY_LEN, self.timeout).map_err(CodecError::Io)?;
        if reply.len() < REPLY_LEN {
            debug!(cmd, len = reply.len(), "short reply from particulate sensor");
            return Ok(None);
        }

        verify_reply(&reply)?;
        Ok(Some(reply))
    }
}

impl<L: Link> SensorCodec for FramedCodec<L> {
    fn read(&mut self) -> Result<RawReading> {
        thread::sleep(self.command_delay);

        let Some(reply) = self.execute(command::QUERY, &[])? else {
            warn!("no measurement from particulate sensor");
            return Ok(RawReading::new());
        };

        let (pm25, pm10) = decode_measurement(&reply)?;
        let mut reading = RawReading::new();
        reading.insert("pm2.5", pm25);
        reading.insert("pm10", pm10);
        Ok(reading)
    }
}
