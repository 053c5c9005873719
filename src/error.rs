//! Error types for the arpwarden core.

use std::io;

use thiserror::Error;

/// Main error type for arpwarden operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("network error: {0}")]
    Net(#[from] NetError),

    #[error("metrics exporter error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("validation failed: {0}")]
    Validation(String),
}

/// Network-related errors.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("invalid MAC address {0:?}")]
    InvalidMac(String),

    #[error("invalid IPv4 address {0:?}")]
    InvalidIp(String),

    #[error("adapter not found: {0:?}")]
    AdapterNotFound(String),

    #[error("failed to open capture device: {0}")]
    CaptureOpen(String),

    #[error("could not determine a usable network topology")]
    TopologyIncomplete,

    #[error("core is not initialized")]
    NotInitialized,

    #[error("no capture handle open for transmission")]
    NotTransmitted,

    #[error("failed to send frame: {0}")]
    SendFailed(String),

    #[error("malformed ARP frame: {0}")]
    MalformedFrame(String),

    #[error("platform query failed: {0}")]
    Platform(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error is the "no handle open" transmission failure.
    ///
    /// Callers distinguishing a degraded core (capture never opened) from a
    /// genuine send rejection branch on this.
    pub const fn is_not_transmitted(&self) -> bool {
        matches!(self, Self::Net(NetError::NotTransmitted))
    }
}
