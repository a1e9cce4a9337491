use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("timeout: {0}")]
    Timeout(String),
    /// The firmware answered with an `ERROR` paragraph. Holds the full device text.
    #[error("device error: {0}")]
    Device(String),
    /// The firmware answered `not implemented yet`, or the feature is absent on this version.
    #[error("not supported by firmware: {0}")]
    Unsupported(String),
    #[error("could not decode {what} after {attempts} attempts: {source}")]
    Decode {
        what: &'static str,
        attempts: u32,
        #[source]
        source: serde_json::Error,
    },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid argument: {0}")]
    Validation(String),
    #[error("brightness is ambiguous for color {0}, use the color instead")]
    AmbiguousBrightness(String),
    #[error("device {0} is already opened by another session")]
    Locked(String),
    #[error("device not found: {0}")]
    NotFound(String),
    #[error("device not ready: {0}")]
    NotReady(String),
}

pub type Result<T> = std::result::Result<T, DriverError>;
