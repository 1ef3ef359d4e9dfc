//! Wire protocol codecs, one per sensor family.
//!
//! Every codec implements [`SensorCodec`]: a single blocking `read()` that
//! returns a [`RawReading`] or fails. Transient link trouble (timeouts,
//! short reads, unparseable lines) degrades to an empty reading; only
//! integrity faults and hard I/O errors are returned as errors.
//!
//! | Family | Codec | Link |
//! |--------|-------|------|
//! | O3 / CO / NO2 analyzers | [`AsciiLineCodec`] | serial |
//! | climate / VOC module | [`JsonLineCodec`] | serial |
//! | particulate sensor | [`FramedCodec`] | serial |
//! | CO2 | [`FixedOffsetCodec`] | serial |
//! | CO2 (alternate wiring) | [`RegisterCodec`] | I2C |
//!
//! Serial codecs are generic over any [`Link`], which in production is a
//! `Box<dyn serialport::SerialPort>` and in tests an in-memory fake.

pub mod ascii_line;
pub mod fixed_offset;
pub mod framed;
pub mod json_line;
pub mod register;

use std::io::{self, ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::record::RawReading;

pub use ascii_line::AsciiLineCodec;
pub use fixed_offset::FixedOffsetCodec;
pub use framed::FramedCodec;
pub use json_line::JsonLineCodec;
pub use register::{RegisterCodec, RetryPolicy};

/// Pause between polls of a link that has no byte ready.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// The single capability every sensor protocol exposes.
///
/// A codec owns its link and is never shared between threads; `Send` lets
/// it be moved into the acquisition thread that owns it.
pub trait SensorCodec: Send {
    /// Performs one blocking read from the sensor.
    ///
    /// # Errors
    ///
    /// Returns an error on integrity faults (e.g. checksum mismatch) or
    /// unrecoverable link failures. Timeouts and malformed data yield an
    /// empty [`RawReading`] instead.
    fn read(&mut self) -> Result<RawReading>;
}

/// A bidirectional byte link to a sensor.
pub trait Link: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> Link for T {}

/// Result of reading up to a newline.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Line {
    /// A newline arrived; the bytes include it.
    Complete(Vec<u8>),
    /// The deadline passed first; whatever arrived is returned.
    TimedOut(Vec<u8>),
}

/// Reads one byte, mapping "nothing available yet" to `Ok(None)`.
pub(crate) fn read_byte<L: Read + ?Sized>(link: &mut L) -> io::Result<Option<u8>> {
    let mut buf = [0u8; 1];
    match link.read(&mut buf) {
        Ok(0) => Ok(None),
        Ok(_) => Ok(Some(buf[0])),
        Err(e)
            if matches!(
                e.kind(),
                ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
            ) =>
        {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Reads bytes one at a time until `\n` or until `timeout` elapses.
pub(crate) fn read_line<L: Read + ?Sized>(link: &mut L, timeout: Duration) -> io::Result<Line> {
    let deadline = Instant::now() + timeout;
    let mut line = Vec::new();

    loop {
        match read_byte(link)? {
            Some(byte) => {
                line.push(byte);
                if byte == b'\n' {
                    return Ok(Line::Complete(line));
                }
            }
            None => thread::sleep(POLL_INTERVAL),
        }
        if Instant::now() >= deadline {
            return Ok(Line::TimedOut(line));
        }
    }
}

/// Reads up to `len` bytes, stopping early when `timeout` elapses.
///
/// Mirrors a serial `read(size)` with a timeout: the result may be short.
pub(crate) fn read_up_to<L: Read + ?Sized>(
    link: &mut L,
    len: usize,
    timeout: Duration,
) -> io::Result<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    let mut buf = vec![0u8; len];
    let mut filled = 0;

    while filled < len {
        match link.read(&mut buf[filled..]) {
            Ok(0) => thread::sleep(POLL_INTERVAL),
            Ok(n) => filled += n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(e),
        }
        if filled < len && Instant::now() >= deadline {
            break;
        }
    }

    buf.truncate(filled);
    Ok(buf)
}
