//! Configuration: which device each sensor is attached to, and the timing
//! constants the codecs use.
//!
//! The sensor map is a flat JSON object keyed by identity:
//!
//! ```json
//! { "O3": "ttyUSB0", "CO": "ttyUSB1", "VOC": "ttyACM0", "PM": "ttyUSB2" }
//! ```
//!
//! Bare device names are resolved under `/dev/`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::record::SensorIdentity;

/// Directory bare device names are resolved against.
const DEVICE_DIR: &str = "/dev";

/// Maps each configured sensor to the device path it is attached to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorMap {
    devices: BTreeMap<SensorIdentity, PathBuf>,
}

impl SensorMap {
    /// Loads a sensor map from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, is not a JSON
    /// object of strings, or names an unknown identity.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let raw: BTreeMap<String, String> =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                source: e,
            })?;
        Self::from_names(raw)
    }

    /// Builds a map from `(identity name, device)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownIdentity`] for an unrecognized name.
    pub fn from_names<I, K, V>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut devices = BTreeMap::new();
        for (name, device) in entries {
            let identity: SensorIdentity = name.as_ref().parse()?;
            devices.insert(identity, resolve_device(device.as_ref()));
        }
        Ok(Self { devices })
    }

    /// Device path for an identity, if configured.
    pub fn device(&self, identity: SensorIdentity) -> Option<&Path> {
        self.devices.get(&identity).map(PathBuf::as_path)
    }

    /// Iterates over configured sensors in identity order.
    pub fn iter(&self) -> impl Iterator<Item = (SensorIdentity, &Path)> {
        self.devices.iter().map(|(id, path)| (*id, path.as_path()))
    }

    /// Number of configured sensors.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True if no sensors are configured.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

fn resolve_device(device: &str) -> PathBuf {
    let path = Path::new(device);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        Path::new(DEVICE_DIR).join(path)
    }
}

/// Link and timing settings shared by the serial drivers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriverSettings {
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Upper bound on a single line or reply read.
    #[serde(with = "duration_serde")]
    pub read_timeout: Duration,
    /// Extra wake-and-read attempts for the ASCII analyzers.
    pub line_retries: u32,
    /// Pause before each particulate query.
    #[serde(with = "duration_serde")]
    pub framed_command_delay: Duration,
    /// Pause between CO2 request and reply.
    #[serde(with = "duration_serde")]
    pub co2_settle: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            read_timeout: Duration::from_secs(5),
            line_retries: 3,
            framed_command_delay: Duration::from_millis(800),
            co2_settle: Duration::from_millis(500),
        }
    }
}

/// Serde helpers for `Duration` fields.
///
/// Durations are serialized as total seconds (f64) for human readability
/// in JSON configuration files.
pub(crate) mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AirlogError;
    use tempfile::tempdir;

    #[test]
    fn test_load_sensor_map() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"O3": "ttyUSB0", "PM": "/dev/serial/by-id/pm", "VOC": "ttyACM0"}"#)
            .unwrap();

        let map = SensorMap::load(&path).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.device(SensorIdentity::O3), Some(Path::new("/dev/ttyUSB0")));
        assert_eq!(map.device(SensorIdentity::PM), Some(Path::new("/dev/serial/by-id/pm")));
        assert_eq!(map.device(SensorIdentity::CO2), None);

        let order: Vec<_> = map.iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec![SensorIdentity::O3, SensorIdentity::VOC, SensorIdentity::PM]);
    }

    #[test]
    fn test_unknown_identity_rejected() {
        let result = SensorMap::from_names([("SO2", "ttyUSB0")]);
        assert!(matches!(
            result,
            Err(AirlogError::Config(ConfigError::UnknownIdentity { .. }))
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let result = SensorMap::load(dir.path().join("absent.json"));
        assert!(matches!(result, Err(AirlogError::Config(ConfigError::Read { .. }))));
    }

    #[test]
    fn test_driver_settings_serde() {
        let settings = DriverSettings::default();
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("\"read_timeout\":5.0"));
        let back: DriverSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }
}
