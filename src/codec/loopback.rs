//! Pass-through codec session
//!
//! Copies frames unchanged while honouring the configured geometry and
//! rekey bookkeeping. Useful for bench testing the audio path end to
//! end without a modem on either side.

use super::{CodecSession, EncryptionStatus, MASTER_KEY_LENGTH};
use crate::config::Config;
use crate::error::CodecError;
use std::sync::Arc;

pub struct LoopbackSession {
    config: Arc<Config>,
    key: Option<[u8; MASTER_KEY_LENGTH]>,
    sample_rate: u32,
    frame_samples: usize,
    /// Frames encoded since the last key epoch started
    frames_in_epoch: u32,
    key_epoch: u64,
    rekey_pending: bool,
}

impl LoopbackSession {
    pub fn new(
        config: Arc<Config>,
        key: Option<[u8; MASTER_KEY_LENGTH]>,
    ) -> Result<Self, CodecError> {
        let sample_rate = config.codec.sample_rate;
        let frame_samples = config.codec.frame_samples;
        if sample_rate == 0 || frame_samples == 0 {
            return Err(CodecError::Geometry(format!(
                "{} samples at {} Hz",
                frame_samples, sample_rate
            )));
        }

        Ok(Self {
            config,
            key,
            sample_rate,
            frame_samples,
            frames_in_epoch: 0,
            key_epoch: 0,
            rekey_pending: false,
        })
    }

    /// Number of key epochs started so far
    pub fn key_epoch(&self) -> u64 {
        self.key_epoch
    }

    fn advance_epoch(&mut self) {
        self.key_epoch += 1;
        self.frames_in_epoch = 0;
        self.rekey_pending = false;
        tracing::trace!("Key epoch {}", self.key_epoch);
    }
}

impl CodecSession for LoopbackSession {
    fn speech_sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn modem_sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn speech_samples_per_frame(&self) -> usize {
        self.frame_samples
    }

    fn modem_samples_per_frame(&self) -> usize {
        self.frame_samples
    }

    fn max_speech_samples_per_frame(&self) -> usize {
        self.frame_samples
    }

    fn max_modem_samples_per_frame(&self) -> usize {
        self.frame_samples
    }

    fn needed_modem_samples(&self) -> usize {
        self.frame_samples
    }

    fn decode(&mut self, modem: &[i16], speech: &mut [i16]) -> usize {
        let n = modem.len().min(speech.len());
        speech[..n].copy_from_slice(&modem[..n]);
        n
    }

    fn encode(&mut self, speech: &[i16], modem: &mut [i16]) -> usize {
        let period = self.config.crypto.rekey_period;
        if self.rekey_pending || (period > 0 && self.frames_in_epoch >= period) {
            self.advance_epoch();
        }
        self.frames_in_epoch += 1;

        let n = speech.len().min(modem.len());
        modem[..n].copy_from_slice(&speech[..n]);
        n
    }

    fn encryption_status(&self) -> EncryptionStatus {
        if self.key.is_some() {
            EncryptionStatus::Encrypted
        } else {
            EncryptionStatus::Plaintext
        }
    }

    fn force_rekey_next_frame(&mut self) {
        self.rekey_pending = true;
    }

    fn config(&self) -> &Config {
        &self.config
    }
}
