//! Error types for voxcrypt
//!
//! Uses thiserror for ergonomic error definitions with clear messages
//! that guide users toward fixing common issues.
//!
//! Nothing in here crosses the real-time callback boundary: the flow
//! controllers never return errors, they silence-fill or log instead.

use thiserror::Error;

/// Top-level error type for the voxcrypt application
#[derive(Error, Debug)]
pub enum VoxcryptError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Audio graph error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("PTT error: {0}")]
    Ptt(#[from] PttError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to the host audio graph and sample handling
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio connection failed: {0}")]
    Connection(String),

    #[error("Audio device not found: '{0}'")]
    DeviceNotFound(String),

    #[error("Audio device not found: '{requested}'\n{available}")]
    DeviceNotFoundWithList { requested: String, available: String },

    #[error("Audio stream error: {0}")]
    StreamError(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("Rate converter error: {0}")]
    Converter(String),

    #[error("Cannot read audio file '{path}': {reason}")]
    File { path: String, reason: String },
}

/// Errors raised while opening a codec session
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unsupported codec mode: {0}")]
    UnsupportedMode(String),

    #[error("Invalid codec geometry: {0}")]
    Geometry(String),

    #[error("Key material in '{path}' is unusable: {reason}")]
    KeyMaterial { path: String, reason: String },
}

/// Errors related to push-to-talk GPIO lines
#[derive(Error, Debug)]
pub enum PttError {
    #[error("Cannot open GPIO chip '{0}'. Is the user in the 'gpio' group?")]
    ChipAccess(String),

    #[error("Cannot request GPIO line {offset} on '{chip}': {reason}")]
    LineRequest {
        chip: String,
        offset: u32,
        reason: String,
    },

    #[error("GPIO line I/O failed: {0}")]
    LineIo(String),

    #[error("GPIO is not supported on this platform")]
    NotSupported,
}

/// Result type alias using VoxcryptError
pub type Result<T> = std::result::Result<T, VoxcryptError>;

#[cfg(target_os = "linux")]
impl From<gpio_cdev::Error> for PttError {
    fn from(e: gpio_cdev::Error) -> Self {
        PttError::LineIo(e.to_string())
    }
}
