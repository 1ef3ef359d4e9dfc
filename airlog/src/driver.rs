//! Sensor drivers: one per physical sensor, owning its codec.
//!
//! A driver is built once per identity and moved into that sensor's
//! acquisition thread. The identity decides the codec:
//!
//! | Identity | Codec |
//! |----------|-------|
//! | O3, CO, NO2 | [`AsciiLineCodec`] |
//! | VOC | [`JsonLineCodec`] |
//! | PM | [`FramedCodec`] |
//! | CO2 | [`FixedOffsetCodec`] (serial) or [`RegisterCodec`](crate::codec::RegisterCodec) via [`SensorDriver::with_codec`] |

use std::fmt;
use std::path::Path;

use tracing::{debug, info};

use crate::codec::{AsciiLineCodec, FixedOffsetCodec, FramedCodec, JsonLineCodec, Link, SensorCodec};
use crate::config::DriverSettings;
use crate::error::{CodecError, Result};
use crate::record::{RawReading, SensorIdentity};

/// A sensor identity paired with the codec that speaks its protocol.
pub struct SensorDriver {
    identity: SensorIdentity,
    codec: Box<dyn SensorCodec>,
}

impl SensorDriver {
    /// Builds the codec for `identity` on an already-open link.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Io`] if the codec's initial command cannot be
    /// written to the link.
    pub fn for_link<L: Link + 'static>(
        identity: SensorIdentity,
        link: L,
        settings: &DriverSettings,
    ) -> Result<Self> {
        let codec: Box<dyn SensorCodec> = match identity {
            SensorIdentity::O3 | SensorIdentity::CO | SensorIdentity::NO2 => Box::new(
                AsciiLineCodec::new(link, identity, settings.read_timeout, settings.line_retries)?,
            ),
            SensorIdentity::VOC => Box::new(JsonLineCodec::new(link, settings.read_timeout)),
            SensorIdentity::PM => Box::new(FramedCodec::new(
                link,
                settings.framed_command_delay,
                settings.read_timeout,
            )?),
            SensorIdentity::CO2 => Box::new(FixedOffsetCodec::new(
                link,
                settings.co2_settle,
                settings.read_timeout,
            )),
        };
        debug!(%identity, "driver constructed");
        Ok(Self { identity, codec })
    }

    /// Opens a serial device and builds the codec for `identity` on it.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::OpenPort`] if the device cannot be opened, or
    /// any error from [`SensorDriver::for_link`].
    pub fn open_serial<P: AsRef<Path>>(
        identity: SensorIdentity,
        path: P,
        settings: &DriverSettings,
    ) -> Result<Self> {
        let path = path.as_ref();
        let port = serialport::new(path.to_string_lossy(), settings.baud_rate)
            .timeout(settings.read_timeout)
            .open()
            .map_err(|e| CodecError::OpenPort {
                path: path.display().to_string(),
                source: e,
            })?;
        info!(%identity, device = %path.display(), baud = settings.baud_rate, "opened serial port");
        Self::for_link(identity, port, settings)
    }

    /// Wraps an arbitrary codec, e.g. the I2C CO2 codec.
    pub fn with_codec(identity: SensorIdentity, codec: Box<dyn SensorCodec>) -> Self {
        Self { identity, codec }
    }

    /// The sensor this driver reads.
    pub fn identity(&self) -> SensorIdentity {
        self.identity
    }

    /// Performs one blocking read from the sensor.
    ///
    /// # Errors
    ///
    /// Propagates the codec's integrity and link errors.
    pub fn read_data(&mut self) -> Result<RawReading> {
        self.codec.read()
    }
}

impl fmt::Debug for SensorDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorDriver")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
