//! Fixed-offset binary codec for the serial CO2 sensor.
//!
//! A fixed 7-byte read-RAM request is sent, the sensor is given time to
//! settle, and the 7-byte reply carries the concentration big-endian at
//! offsets 3 and 4.

use std::thread;
use std::time::Duration;

use tracing::warn;

use super::{Link, SensorCodec, read_up_to};
use crate::error::{CodecError, Result};
use crate::record::RawReading;

/// Read-CO2 request.
pub const READ_CO2_COMMAND: [u8; 7] = [0xFE, 0x44, 0x00, 0x08, 0x02, 0x9F, 0x25];

/// Length of the reply.
pub const REPLY_LEN: usize = 7;

/// Field name the concentration is reported under.
pub const CO2_FIELD: &str = "CO2";

/// Codec for the serial CO2 sensor.
#[derive(Debug)]
pub struct FixedOffsetCodec<L> {
    link: L,
    settle: Duration,
    timeout: Duration,
}

impl<L: Link> FixedOffsetCodec<L> {
    /// Wraps a link; `settle` is the pause between request and reply.
    pub fn new(link: L, settle: Duration, timeout: Duration) -> Self {
        Self {
            link,
            settle,
            timeout,
        }
    }

    /// Decodes ppm from a full reply.
    pub fn decode(reply: &[u8]) -> f64 {
        f64::from(u16::from(reply[3]) * 256 + u16::from(reply[4]))
    }
}

impl<L: Link> SensorCodec for FixedOffsetCodec<L> {
    fn read(&mut self) -> Result<RawReading> {
        self.link.write_all(&READ_CO2_COMMAND).map_err(CodecError::Io)?;
        self.link.flush().map_err(CodecError::Io)?;
        thread::sleep(self.settle);

        let reply = read_up_to(&mut self.link, REPLY_LEN, self.timeout).map_err(CodecError::Io)?;
        if reply.len() < REPLY_LEN {
            warn!(len = reply.len(), "short reply from CO2 sensor");
            return Ok(RawReading::new());
        }

        let mut reading = RawReading::new();
        reading.insert(CO2_FIELD, Self::decode(&reply));
        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::testing::FakeLink;

    fn fake_codec(input: &[u8]) -> FixedOffsetCodec<FakeLink> {
        FixedOffsetCodec::new(FakeLink::with_input(input), Duration::ZERO, Duration::from_millis(20))
    }

    #[test]
    fn test_reads_concentration() {
        // 0x01 * 256 + 0x90 = 400 ppm
        let mut codec = fake_codec(&[0xFE, 0x44, 0x02, 0x01, 0x90, 0x00, 0x00]);
        let reading = codec.read().unwrap();

        assert_eq!(reading.number(CO2_FIELD), Some(400.0));
        assert_eq!(codec.link.written, READ_CO2_COMMAND);
    }

    #[test]
    fn test_decode_full_scale() {
        assert_eq!(FixedOffsetCodec::<FakeLink>::decode(&[0, 0, 0, 0xFF, 0xFF, 0, 0]), 65535.0);
    }

    #[test]
    fn test_short_reply_is_empty() {
        let mut codec = fake_codec(&[0xFE, 0x44, 0x02]);
        assert!(codec.read().unwrap().is_empty());
    }
}
