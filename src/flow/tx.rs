//! Transmit flow: voice and prompts in, modem samples out
//!
//! While transmit intent is held, queued prompt samples are taken first
//! and the rest of the block is filled from the microphone (or silence
//! when only prompt audio is keeping the transmitter up). Whole speech
//! frames are encoded and the modem port is only fed once a full
//! resampled modem frame's worth of blocks is buffered.
//!
//! On the rising edge both converters are primed and cleared. On the
//! falling edge everything still queued is pushed through the encoder,
//! the final partial frame zero-padded, and drained to the port over
//! the following callbacks before the hang timer may release the PTT
//! line.

use super::{nominal_resampled_frames, FlowController};
use crate::audio::notification::NotificationMixer;
use crate::audio::ProcessBlock;
use crate::config::Config;
use crate::error::VoxcryptError;
use crate::ptt::{Edge, PttCoordinator};
use crate::session::SessionBundle;

/// Prompt scratch allocated up front; grows only if the host block is larger
const INITIAL_SCRATCH_FRAMES: usize = 4096;

pub struct TxFlow {
    prompts: NotificationMixer,
    ptt: PttCoordinator,
    scratch: Vec<f32>,
}

impl TxFlow {
    pub fn new(prompts: NotificationMixer, ptt: PttCoordinator) -> Self {
        Self {
            prompts,
            ptt,
            scratch: vec![0.0; INITIAL_SCRATCH_FRAMES],
        }
    }

    pub fn ptt(&self) -> &PttCoordinator {
        &self.ptt
    }

    fn transmit_block(
        &mut self,
        session: &mut SessionBundle,
        block: &mut ProcessBlock<'_>,
        mic_enabled: bool,
        edge: Edge,
    ) {
        let frames = block.frames();
        let n_speech = session.codec.speech_samples_per_frame();
        let n_modem = session.codec.modem_samples_per_frame();

        if edge == Edge::Rising {
            session.input.enqueue_zeroes(frames);
            session.input.clear();
            session.output.enqueue_zeroes(n_modem);
            session.output.clear();
        }

        if self.scratch.len() < frames {
            self.scratch.resize(frames, 0.0);
        }
        let from_prompt = self.prompts.take_into(&mut self.scratch[..frames]);
        if from_prompt > 0 {
            session.input.enqueue(&self.scratch[..from_prompt]);
        }

        // Offset the live audio so prompts add no delay to it
        if mic_enabled {
            session.input.enqueue(&block.input[from_prompt..frames]);
        } else {
            session.input.enqueue_zeroes(frames - from_prompt);
        }

        while n_speech > 0 && session.input.available_elems() >= n_speech {
            let speech = &mut session.speech[..n_speech];
            session.input.dequeue(speech);

            let produced = session.codec.encode(speech, &mut session.modem);
            session.output.enqueue(&session.modem[..produced]);
        }

        let modem_frames = nominal_resampled_frames(
            n_modem,
            session.codec.modem_sample_rate(),
            block.sample_rate,
        );
        let required = frames * ((modem_frames + frames - 1) / frames);
        if session.output.available_elems() >= required {
            session.output.dequeue(block.output);
        } else {
            block.output.fill(0.0);
        }
    }

    fn idle_block(&mut self, session: &mut SessionBundle, block: &mut ProcessBlock<'_>, edge: Edge) {
        let frames = block.frames();

        if edge == Edge::Falling {
            drain_to_output(session, frames);
        }

        // Several callbacks' worth may still be queued
        let available = session.output.available_elems().min(frames);
        session.output.dequeue(&mut block.output[..available]);
        block.output[available..].fill(0.0);

        // Fresh key material for the next transmission
        session.codec.force_rekey_next_frame();

        self.ptt.finish_idle_cycle(available == 0);
    }
}

/// Encode every sample still queued and flush both converters
fn drain_to_output(session: &mut SessionBundle, frames: usize) {
    let n_speech = session.codec.speech_samples_per_frame();
    if n_speech == 0 {
        return;
    }

    session.input.flush(n_speech * 2);

    while session.input.available_elems() != 0 {
        let take = n_speech.min(session.input.available_elems());
        let speech = &mut session.speech[..n_speech];
        // Zero-pad a final partial frame
        speech.fill(0);
        session.input.dequeue(&mut speech[..take]);

        let produced = session.codec.encode(speech, &mut session.modem);
        session.output.enqueue(&session.modem[..produced]);
    }

    session.output.flush(frames * 2);
}

impl FlowController for TxFlow {
    fn process(&mut self, session: &mut SessionBundle, block: &mut ProcessBlock<'_>) {
        session.track_rates(block.sample_rate);
        block.side.fill(0.0);

        let mic_enabled = self.ptt.transmit_requested();
        let intent = mic_enabled || !self.prompts.is_empty();
        let edge = self.ptt.begin_cycle(intent);

        if intent {
            self.transmit_block(session, block, mic_enabled, edge);
        } else {
            self.idle_block(session, block, edge);
        }
    }

    fn reconfigure(&mut self, config: &Config) -> Result<(), VoxcryptError> {
        self.ptt.reconfigure(&config.ptt)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::notification;
    use crate::ptt::tests::MockLine;
    use crate::ptt::{PttInput, PttOutput};
    use crate::session::Direction;
    use crate::state::PttState;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    const FRAME: usize = 40;
    const BLOCK: usize = 32;

    struct Rig {
        flow: TxFlow,
        session: SessionBundle,
        sender: notification::NotificationSender,
        mic: MockLine,
        key: MockLine,
    }

    impl Rig {
        fn new() -> Self {
            let mut config = Config::default();
            config.codec.frame_samples = FRAME;
            let session =
                SessionBundle::build(Arc::new(config), Direction::Transmit, 8000).unwrap();

            let mic = MockLine::default();
            let key = MockLine::default();
            let ptt = PttCoordinator::new(
                PttInput::Line(Box::new(mic.clone())),
                PttOutput::Line {
                    line: Box::new(key.clone()),
                    last_level: Some(false),
                },
                4,
            );
            let (sender, mixer) = notification::channel(4096);
            Self {
                flow: TxFlow::new(mixer, ptt),
                session,
                sender,
                mic,
                key,
            }
        }

        fn run(&mut self, value: f32) -> Vec<f32> {
            let input = vec![value; BLOCK];
            let mut output = vec![9.0f32; BLOCK];
            let mut side = vec![9.0f32; BLOCK];
            let mut block = ProcessBlock {
                sample_rate: 8000,
                input: &input,
                output: &mut output,
                side: &mut side,
            };
            self.flow.process(&mut self.session, &mut block);
            output
        }
    }

    #[test]
    fn test_idle_outputs_silence_and_leaves_line_released() {
        let mut rig = Rig::new();
        for _ in 0..5 {
            assert!(rig.run(0.5).iter().all(|&s| s == 0.0));
        }
        assert!(rig.key.writes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_output_waits_for_full_modem_frame() {
        let mut rig = Rig::new();
        rig.mic.level.store(true, Ordering::SeqCst);

        // Threshold is 2 blocks (64 samples) to cover a 40-sample frame
        assert!(rig.run(0.5).iter().all(|&s| s == 0.0));
        assert!(rig.key.level.load(Ordering::SeqCst));
        assert!(rig.run(0.5).iter().all(|&s| s == 0.0));
        // 96 in, 80 encoded
        let out = rig.run(0.5);
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-3));
    }

    #[test]
    fn test_falling_edge_drains_everything() {
        let mut rig = Rig::new();
        rig.mic.level.store(true, Ordering::SeqCst);
        for _ in 0..3 {
            rig.run(0.5);
        }
        rig.mic.level.store(false, Ordering::SeqCst);

        // 96 samples in, 32 already out; 64 remain as live audio
        let mut live = 0;
        for _ in 0..20 {
            let out = rig.run(0.0);
            live += out.iter().filter(|&&s| (s - 0.5).abs() < 1e-3).count();
        }
        assert_eq!(live, 64);
        assert_eq!(rig.session.output.available_elems(), 0);
        assert_eq!(rig.flow.ptt().state(), PttState::Idle);
        assert_eq!(*rig.key.writes.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn test_rising_edge_discards_leftovers() {
        let mut rig = Rig::new();
        rig.mic.level.store(true, Ordering::SeqCst);
        rig.run(0.5);
        rig.mic.level.store(false, Ordering::SeqCst);
        for _ in 0..10 {
            rig.run(0.0);
        }

        rig.session.input.enqueue(&[0.75f32; 7]);
        rig.mic.level.store(true, Ordering::SeqCst);
        rig.run(0.25);
        rig.run(0.25);
        let out = rig.run(0.25);
        assert!(out.iter().all(|&s| (s - 0.25).abs() < 1e-3));
    }

    #[test]
    fn test_prompt_keys_transmitter_and_comes_first() {
        let mut rig = Rig::new();
        rig.sender.queue(&[0.125; 40]);

        let mut outputs = Vec::new();
        for _ in 0..3 {
            outputs.extend(rig.run(0.5));
        }
        assert!(rig.key.level.load(Ordering::SeqCst));

        // Mic is off: prompt samples, then silence instead of live audio
        let nonzero: Vec<f32> = outputs.iter().copied().filter(|&s| s != 0.0).collect();
        assert_eq!(nonzero.len(), 32);
        assert!(nonzero.iter().all(|&s| (s - 0.125).abs() < 1e-3));
    }

    #[test]
    fn test_read_failure_keeps_transmitting() {
        let mut rig = Rig::new();
        rig.mic.fail_reads.store(true, Ordering::SeqCst);
        rig.run(0.5);
        assert_eq!(rig.flow.ptt().state(), PttState::Transmitting);
        assert!(rig.key.level.load(Ordering::SeqCst));
    }
}
