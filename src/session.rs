//! Codec session lifecycle
//!
//! A [`SessionBundle`] is the codec session plus the two rate converters
//! and frame scratch that go with it. Bundles are never patched: a
//! reload builds a complete new bundle and swaps it in whole.

use crate::audio::converter::RateConverter;
use crate::audio::{ProcessHandler, SharedHandler};
use crate::codec::{self, CodecSession, EncryptionStatus};
use crate::config::Config;
use crate::error::{AudioError, VoxcryptError};
use crate::flow::{nominal_resampled_frames, Engine, FlowController};
use std::sync::{Arc, Mutex};

/// Which way audio flows through the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Modem in, decoded voice out
    Receive,
    /// Voice in, modem out
    Transmit,
}

impl Direction {
    /// Short name used for PID files and the CLI
    pub fn name(&self) -> &'static str {
        match self {
            Direction::Receive => "rx",
            Direction::Transmit => "tx",
        }
    }

    /// Host period requested for this direction
    ///
    /// A non-zero override from the config wins. Otherwise the period is
    /// the codec frame resampled to the host rate: the speech frame when
    /// receiving, the modem frame when transmitting.
    pub fn period(&self, config: &Config, codec: &dyn CodecSession, host_rate: u32) -> usize {
        let (configured, samples, rate, what) = match self {
            Direction::Receive => (
                config.audio.rx_period,
                codec.speech_samples_per_frame(),
                codec.speech_sample_rate(),
                "Speech",
            ),
            Direction::Transmit => (
                config.audio.tx_period,
                codec.modem_samples_per_frame(),
                codec.modem_sample_rate(),
                "Modem",
            ),
        };

        if configured != 0 {
            tracing::info!("Buffer size: {} from config file", configured);
            return configured as usize;
        }

        let period = nominal_resampled_frames(samples, rate, host_rate);
        tracing::info!(
            "Buffer size: {}, {} frame size: {}, {} sample rate: {}",
            period,
            what,
            samples,
            what,
            rate
        );
        period
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl From<crate::cli::Side> for Direction {
    fn from(side: crate::cli::Side) -> Self {
        match side {
            crate::cli::Side::Rx => Direction::Receive,
            crate::cli::Side::Tx => Direction::Transmit,
        }
    }
}

/// Codec session with its converters and frame scratch
pub struct SessionBundle {
    pub codec: Box<dyn CodecSession>,
    /// Host block → codec input rate
    pub input: RateConverter,
    /// Codec output rate → host block
    pub output: RateConverter,
    /// One max-size speech frame
    pub speech: Vec<i16>,
    /// One max-size modem frame
    pub modem: Vec<i16>,
    direction: Direction,
    period: usize,
}

impl SessionBundle {
    /// Build a complete bundle from a config snapshot
    pub fn build(
        config: Arc<Config>,
        direction: Direction,
        host_rate: u32,
    ) -> Result<Self, VoxcryptError> {
        let codec = codec::create_session(Arc::clone(&config))?;
        Self::with_codec(&config, codec, direction, host_rate)
    }

    /// Build a bundle around an already constructed codec session
    ///
    /// Period overrides are still taken from `config`.
    pub fn with_codec(
        config: &Config,
        codec: Box<dyn CodecSession>,
        direction: Direction,
        host_rate: u32,
    ) -> Result<Self, VoxcryptError> {
        let period = direction.period(config, codec.as_ref(), host_rate);

        let speech_rate = codec.speech_sample_rate();
        let modem_rate = codec.modem_sample_rate();
        let max_speech = codec.max_speech_samples_per_frame();
        let max_modem = codec.max_modem_samples_per_frame();

        let bundle = match direction {
            Direction::Receive => {
                let modem_frames = nominal_resampled_frames(max_modem, modem_rate, host_rate);
                let speech_frames = nominal_resampled_frames(max_speech, speech_rate, host_rate);

                let mut input = RateConverter::new(host_rate, modem_rate, modem_frames * 2)?;
                let mut output = RateConverter::new(speech_rate, host_rate, speech_frames * 2)?;

                // Settle filter latency so output tracks input one for one
                input.enqueue_zeroes(period);
                input.clear();
                output.enqueue_zeroes(max_speech);
                output.clear();

                Self::assemble(codec, input, output, direction, period)
            }
            Direction::Transmit => {
                let speech_frames = nominal_resampled_frames(
                    codec.speech_samples_per_frame(),
                    speech_rate,
                    host_rate,
                );
                let modem_frames = nominal_resampled_frames(
                    codec.modem_samples_per_frame(),
                    modem_rate,
                    host_rate,
                );

                let input = RateConverter::new(host_rate, speech_rate, speech_frames * 2)?;
                let output = RateConverter::new(modem_rate, host_rate, modem_frames * 2)?;

                Self::assemble(codec, input, output, direction, period)
            }
        };

        tracing::debug!(
            "Session bundle ({}): host {} Hz, speech {} Hz x {}, modem {} Hz x {}",
            direction,
            host_rate,
            speech_rate,
            bundle.codec.speech_samples_per_frame(),
            modem_rate,
            bundle.codec.modem_samples_per_frame()
        );

        Ok(bundle)
    }

    fn assemble(
        codec: Box<dyn CodecSession>,
        input: RateConverter,
        output: RateConverter,
        direction: Direction,
        period: usize,
    ) -> Self {
        let speech = vec![0; codec.max_speech_samples_per_frame()];
        let modem = vec![0; codec.max_modem_samples_per_frame()];
        Self {
            codec,
            input,
            output,
            speech,
            modem,
            direction,
            period,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Host period this bundle was sized for
    pub fn period(&self) -> usize {
        self.period
    }

    /// Point both converters at the current host and codec rates
    ///
    /// Called every callback; a no-op unless a rate moved.
    pub fn track_rates(&mut self, host_rate: u32) {
        let (input, output) = match self.direction {
            Direction::Receive => (
                (host_rate, self.codec.modem_sample_rate()),
                (self.codec.speech_sample_rate(), host_rate),
            ),
            Direction::Transmit => (
                (host_rate, self.codec.speech_sample_rate()),
                (self.codec.modem_sample_rate(), host_rate),
            ),
        };

        if let Err(e) = self.input.set_rates(input.0, input.1) {
            tracing::error!("Input converter: {}", e);
        }
        if let Err(e) = self.output.set_rates(output.0, output.1) {
            tracing::error!("Output converter: {}", e);
        }
    }
}

/// Owns the live engine and swaps sessions on reload
pub struct SessionManager<F: FlowController> {
    engine: Arc<Mutex<Engine<F>>>,
    direction: Direction,
}

impl<F: FlowController + 'static> SessionManager<F> {
    pub fn new(
        config: Arc<Config>,
        direction: Direction,
        host_rate: u32,
        flow: F,
    ) -> Result<Self, VoxcryptError> {
        let session = SessionBundle::build(config, direction, host_rate)?;
        Ok(Self {
            engine: Arc::new(Mutex::new(Engine::new(session, flow))),
            direction,
        })
    }

    /// Handler to register with the audio graph
    pub fn handler(&self) -> SharedHandler {
        let engine: Arc<Mutex<dyn ProcessHandler>> = self.engine.clone();
        engine
    }

    /// Replace the codec session and converters with ones built from `config`
    ///
    /// The new bundle is fully constructed before anything is touched,
    /// so a failure leaves the running session intact. Call only while
    /// the graph is deactivated.
    pub fn reload(&self, config: Arc<Config>, host_rate: u32) -> Result<(), VoxcryptError> {
        tracing::info!("Reloading {} session", self.direction);

        let bundle = SessionBundle::build(Arc::clone(&config), self.direction, host_rate)?;

        let previous = {
            let mut engine = self.lock()?;
            engine.flow.reconfigure(&config)?;
            std::mem::replace(&mut engine.session, bundle)
        };
        drop(previous);

        tracing::info!("{} session reloaded", self.direction);
        Ok(())
    }

    /// Run `f` against the engine from the control loop
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut Engine<F>) -> R) -> Result<R, VoxcryptError> {
        let mut engine = self.lock()?;
        Ok(f(&mut engine))
    }

    pub fn period(&self) -> Result<usize, VoxcryptError> {
        self.with_engine(|engine| engine.session.period())
    }

    pub fn encryption_status(&self) -> Result<EncryptionStatus, VoxcryptError> {
        self.with_engine(|engine| engine.session.codec.encryption_status())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Engine<F>>, VoxcryptError> {
        self.engine.lock().map_err(|_| {
            VoxcryptError::Audio(AudioError::StreamError(
                "audio engine lock poisoned".to_string(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ProcessBlock;

    #[derive(Default)]
    struct CountingFlow {
        calls: usize,
        reconfigured: usize,
    }

    impl FlowController for CountingFlow {
        fn process(&mut self, _session: &mut SessionBundle, block: &mut ProcessBlock<'_>) {
            self.calls += 1;
            block.output.fill(0.0);
        }

        fn reconfigure(&mut self, _config: &Config) -> Result<(), VoxcryptError> {
            self.reconfigured += 1;
            Ok(())
        }
    }

    #[test]
    fn test_derived_periods() {
        let config = Config::default();
        let rx = SessionBundle::build(Arc::new(config.clone()), Direction::Receive, 48000).unwrap();
        assert_eq!(rx.period(), 1920);

        let mut config = config;
        config.audio.tx_period = 256;
        let tx = SessionBundle::build(Arc::new(config), Direction::Transmit, 48000).unwrap();
        assert_eq!(tx.period(), 256);
    }

    #[test]
    fn test_rx_bundle_starts_empty_after_priming() {
        let rx = SessionBundle::build(Arc::new(Config::default()), Direction::Receive, 48000).unwrap();
        assert_eq!(rx.input.available_elems(), 0);
        assert_eq!(rx.output.available_elems(), 0);
        assert_eq!(rx.input.input_rate(), 48000);
        assert_eq!(rx.input.output_rate(), 8000);
        assert_eq!(rx.speech.len(), 320);
    }

    #[test]
    fn test_reload_swaps_session() {
        let manager = SessionManager::new(
            Arc::new(Config::default()),
            Direction::Transmit,
            48000,
            CountingFlow::default(),
        )
        .unwrap();
        assert_eq!(manager.period().unwrap(), 1920);

        let mut config = Config::default();
        config.codec.frame_samples = 160;
        manager.reload(Arc::new(config), 48000).unwrap();

        assert_eq!(manager.period().unwrap(), 960);
        let reconfigured = manager.with_engine(|e| e.flow.reconfigured).unwrap();
        assert_eq!(reconfigured, 1);
    }

    #[test]
    fn test_failed_reload_keeps_running_session() {
        let manager = SessionManager::new(
            Arc::new(Config::default()),
            Direction::Receive,
            48000,
            CountingFlow::default(),
        )
        .unwrap();

        let mut config = Config::default();
        config.crypto.enabled = true;
        config.crypto.key_file = Some("/nonexistent/voxcrypt.key".into());
        assert!(manager.reload(Arc::new(config), 48000).is_err());

        assert_eq!(manager.period().unwrap(), 1920);
        assert_eq!(
            manager.encryption_status().unwrap(),
            EncryptionStatus::Plaintext
        );
        let reconfigured = manager.with_engine(|e| e.flow.reconfigured).unwrap();
        assert_eq!(reconfigured, 0);
    }

    #[test]
    fn test_handler_drives_flow() {
        let manager = SessionManager::new(
            Arc::new(Config::default()),
            Direction::Receive,
            8000,
            CountingFlow::default(),
        )
        .unwrap();

        let handler = manager.handler();
        let input = [0.0f32; 16];
        let mut output = [1.0f32; 16];
        let mut side = [0.0f32; 16];
        {
            let mut block = ProcessBlock {
                sample_rate: 8000,
                input: &input,
                output: &mut output,
                side: &mut side,
            };
            handler.lock().unwrap().process(&mut block);
        }

        assert!(output.iter().all(|&s| s == 0.0));
        assert_eq!(manager.with_engine(|e| e.flow.calls).unwrap(), 1);
    }
}
