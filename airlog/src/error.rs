//! Error types for the airlog acquisition pipeline and time-series log.

use thiserror::Error;

/// The main error type for all airlog operations.
///
/// This enum covers every failure the core can surface, from sensor link
/// faults to store I/O and configuration loading.
#[derive(Error, Debug)]
pub enum AirlogError {
    /// Error opening, reading, or rewriting the durable log.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A record was rejected before it reached the log.
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// Error talking to a sensor or decoding its reply.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Error loading or validating configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors that can occur when opening, appending to, or reading the log.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The directory that should contain the log could not be created.
    #[error("failed to access store directory '{path}': {source}")]
    DirectoryAccess {
        /// The path that could not be accessed.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing the log file failed.
    #[error("I/O error on log '{path}': {source}")]
    Io {
        /// The log file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The log exists but its header is not `metric,value,timestamp`.
    #[error("log '{path}' has unexpected header '{found}'")]
    SchemaMismatch {
        /// The log file path.
        path: String,
        /// The header line that was found.
        found: String,
    },

    /// A write was attempted on a store opened read-only.
    #[error("log '{path}' is open read-only")]
    ReadOnly {
        /// The log file path.
        path: String,
    },

    /// The log stayed unparseable across every snapshot attempt.
    #[error("log '{path}' unreadable after {attempts} attempts: {reason}")]
    Unreadable {
        /// The log file path.
        path: String,
        /// How many reads were attempted.
        attempts: u32,
        /// What was wrong with the last read.
        reason: String,
    },
}

/// Errors raised when a record cannot be written under the fixed schema.
#[derive(Error, Debug)]
pub enum RecordError {
    /// The metric name is empty or contains a separator character.
    #[error("invalid metric name '{metric}': {reason}")]
    InvalidMetric {
        /// The offending metric name.
        metric: String,
        /// Why the name is invalid.
        reason: &'static str,
    },

    /// The value is NaN or infinite.
    #[error("invalid value {value} for metric '{metric}'")]
    InvalidValue {
        /// The metric the value belongs to.
        metric: String,
        /// The invalid value.
        value: f64,
    },

    /// The timestamp is NaN or infinite.
    #[error("invalid timestamp {timestamp} for metric '{metric}'")]
    InvalidTimestamp {
        /// The metric the timestamp belongs to.
        metric: String,
        /// The invalid timestamp.
        timestamp: f64,
    },
}

/// Errors that can occur on a sensor link.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The link failed with an unrecoverable I/O error.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A framed reply failed its checksum.
    #[error("checksum mismatch: computed {expected:#04x}, reply carried {actual:#04x}")]
    ChecksumMismatch {
        /// Checksum computed over the data bytes.
        expected: u8,
        /// Checksum byte found in the reply.
        actual: u8,
    },

    /// Command arguments do not fit in a frame's payload.
    #[error("command arguments are {actual} bytes, at most {max} fit")]
    PayloadTooLong {
        /// Largest argument length a frame carries.
        max: usize,
        /// Length that was supplied.
        actual: usize,
    },

    /// A reply was shorter than a full frame.
    #[error("reply is {actual} bytes, expected {expected}")]
    ShortReply {
        /// Length of a full reply frame.
        expected: usize,
        /// Length that was received.
        actual: usize,
    },

    /// The I2C bus reported a fault.
    #[error("bus fault: {reason}")]
    Bus {
        /// Debug rendering of the bus error.
        reason: String,
    },

    /// A bounded retry policy gave up.
    #[error("gave up after {attempts} attempts")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The serial device could not be opened.
    #[error("failed to open serial port '{path}': {source}")]
    OpenPort {
        /// The device path.
        path: String,
        /// The underlying serialport error.
        #[source]
        source: serialport::Error,
    },
}

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config '{path}': {source}")]
    Read {
        /// The config file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON of the expected shape.
    #[error("failed to parse config '{path}': {source}")]
    Parse {
        /// The config file path.
        path: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A sensor name did not match any known identity.
    #[error("unknown sensor identity '{name}'")]
    UnknownIdentity {
        /// The unrecognized name.
        name: String,
    },

    /// A retention policy is internally inconsistent.
    #[error("invalid retention policy: {reason}")]
    InvalidPolicy {
        /// Description of what is invalid.
        reason: String,
    },
}

/// Type alias for `Result<T, AirlogError>`.
pub type Result<T> = std::result::Result<T, AirlogError>;
