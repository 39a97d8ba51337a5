//! Codec session interface
//!
//! A codec session turns fixed-size speech frames into modem frames and
//! back, at its own native rates. The flow controllers only see frame
//! geometry and the two transforms; what happens inside a frame is the
//! engine's business.
//!
//! Sessions are built from an immutable config snapshot and replaced
//! wholesale on reload.

pub mod loopback;

use crate::config::{CodecMode, Config};
use crate::error::CodecError;
use std::path::Path;
use std::sync::Arc;

/// Length of the master key read from the key file
pub const MASTER_KEY_LENGTH: usize = 32;

/// Whether frames leave the session encrypted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionStatus {
    Plaintext,
    Encrypted,
}

impl std::fmt::Display for EncryptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncryptionStatus::Plaintext => write!(f, "plaintext"),
            EncryptionStatus::Encrypted => write!(f, "encrypted"),
        }
    }
}

/// Opaque codec/cipher session
///
/// All methods are called from the process callback and must not block.
pub trait CodecSession: Send {
    /// Speech-side sample rate in Hz
    fn speech_sample_rate(&self) -> u32;

    /// Modem-side sample rate in Hz
    fn modem_sample_rate(&self) -> u32;

    /// Nominal speech samples per frame
    fn speech_samples_per_frame(&self) -> usize;

    /// Nominal modem samples per frame
    fn modem_samples_per_frame(&self) -> usize;

    fn max_speech_samples_per_frame(&self) -> usize;

    fn max_modem_samples_per_frame(&self) -> usize;

    /// Modem samples the next `decode` call consumes
    ///
    /// May change from frame to frame; re-query before every decode.
    fn needed_modem_samples(&self) -> usize;

    /// Decode one modem frame, writing speech into `speech`
    ///
    /// `modem` holds exactly `needed_modem_samples()` samples and
    /// `speech` at least `max_speech_samples_per_frame()`. Returns the
    /// number of speech samples produced, which may be zero.
    fn decode(&mut self, modem: &[i16], speech: &mut [i16]) -> usize;

    /// Encode one speech frame, writing modem samples into `modem`
    ///
    /// `speech` holds exactly `speech_samples_per_frame()` samples and
    /// `modem` at least `max_modem_samples_per_frame()`.
    fn encode(&mut self, speech: &[i16], modem: &mut [i16]) -> usize;

    fn encryption_status(&self) -> EncryptionStatus;

    /// Start a fresh key epoch on the next encoded frame
    fn force_rekey_next_frame(&mut self);

    /// Snapshot the session was built from
    fn config(&self) -> &Config;
}

/// Factory function to create a codec session from a config snapshot
pub fn create_session(config: Arc<Config>) -> Result<Box<dyn CodecSession>, CodecError> {
    tracing::info!(
        "Creating codec session: mode={:?}, rate={} Hz, frame={} samples, crypto={}",
        config.codec.mode,
        config.codec.sample_rate,
        config.codec.frame_samples,
        config.crypto.enabled
    );

    let key = if config.crypto.enabled {
        Some(load_key(&config.crypto.key_path())?)
    } else {
        None
    };

    match config.codec.mode {
        CodecMode::Loopback => Ok(Box::new(loopback::LoopbackSession::new(config, key)?)),
    }
}

/// Read the master key from `path`
///
/// The file must hold at least [`MASTER_KEY_LENGTH`] bytes; only the
/// first [`MASTER_KEY_LENGTH`] are used.
pub fn load_key(path: &Path) -> Result<[u8; MASTER_KEY_LENGTH], CodecError> {
    let key_error = |reason: String| CodecError::KeyMaterial {
        path: path.display().to_string(),
        reason,
    };

    let bytes = std::fs::read(path).map_err(|e| key_error(e.to_string()))?;
    if bytes.len() < MASTER_KEY_LENGTH {
        return Err(key_error(format!(
            "expected {} bytes, found {}",
            MASTER_KEY_LENGTH,
            bytes.len()
        )));
    }

    let mut key = [0u8; MASTER_KEY_LENGTH];
    key.copy_from_slice(&bytes[..MASTER_KEY_LENGTH]);
    if key.iter().all(|&b| b == 0) {
        return Err(key_error("key is all zeroes".to_string()));
    }

    tracing::debug!("Loaded master key from {:?}", path);
    Ok(key)
}
