//! Integration tests for the flow controllers
//!
//! Drives RxFlow and TxFlow through the public API. The scripted codec
//! tests run everything at 8 kHz so the converters pass samples straight
//! through and counts can be checked exactly. The 48 kHz tests use the
//! loopback codec at its default 8 kHz geometry, so both converters
//! resample and levels are checked within a tolerance.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use voxcrypt::audio::notification::{self, NotificationSender};
use voxcrypt::audio::ProcessBlock;
use voxcrypt::codec::{CodecSession, EncryptionStatus};
use voxcrypt::config::Config;
use voxcrypt::error::PttError;
use voxcrypt::flow::{FlowController, RxFlow, TxFlow};
use voxcrypt::gpio::GpioLine;
use voxcrypt::ptt::{PttCoordinator, PttInput, PttOutput};
use voxcrypt::session::{Direction, SessionBundle};
use voxcrypt::state::PttState;

const RATE: u32 = 8000;
const BLOCK: usize = 32;
const FRAME: usize = 40;
const VOICE: f32 = 0.5;

/// Pass-through codec whose decoder wants a different frame size each call
struct ScriptedCodec {
    config: Config,
    decode_sizes: Vec<usize>,
    next: usize,
    decoded: Arc<Mutex<Vec<usize>>>,
    encoded: Arc<AtomicUsize>,
    rekeys: Arc<AtomicUsize>,
}

#[derive(Clone, Default)]
struct Probes {
    decoded: Arc<Mutex<Vec<usize>>>,
    encoded: Arc<AtomicUsize>,
    rekeys: Arc<AtomicUsize>,
}

impl ScriptedCodec {
    fn new(decode_sizes: Vec<usize>, probes: &Probes) -> Self {
        Self {
            config: Config::default(),
            decode_sizes,
            next: 0,
            decoded: Arc::clone(&probes.decoded),
            encoded: Arc::clone(&probes.encoded),
            rekeys: Arc::clone(&probes.rekeys),
        }
    }

    fn max_frame(&self) -> usize {
        self.decode_sizes.iter().copied().max().unwrap_or(FRAME).max(FRAME)
    }
}

impl CodecSession for ScriptedCodec {
    fn speech_sample_rate(&self) -> u32 {
        RATE
    }

    fn modem_sample_rate(&self) -> u32 {
        RATE
    }

    fn speech_samples_per_frame(&self) -> usize {
        FRAME
    }

    fn modem_samples_per_frame(&self) -> usize {
        FRAME
    }

    fn max_speech_samples_per_frame(&self) -> usize {
        self.max_frame()
    }

    fn max_modem_samples_per_frame(&self) -> usize {
        self.max_frame()
    }

    fn needed_modem_samples(&self) -> usize {
        self.decode_sizes[self.next % self.decode_sizes.len()]
    }

    fn decode(&mut self, modem: &[i16], speech: &mut [i16]) -> usize {
        assert_eq!(modem.len(), self.needed_modem_samples());
        speech[..modem.len()].copy_from_slice(modem);
        self.decoded.lock().unwrap().push(modem.len());
        self.next += 1;
        modem.len()
    }

    fn encode(&mut self, speech: &[i16], modem: &mut [i16]) -> usize {
        assert_eq!(speech.len(), FRAME);
        modem[..FRAME].copy_from_slice(speech);
        self.encoded.fetch_add(1, Ordering::SeqCst);
        FRAME
    }

    fn encryption_status(&self) -> EncryptionStatus {
        EncryptionStatus::Plaintext
    }

    fn force_rekey_next_frame(&mut self) {
        self.rekeys.fetch_add(1, Ordering::SeqCst);
    }

    fn config(&self) -> &Config {
        &self.config
    }
}

/// Output line recording the level after every write
#[derive(Clone, Default)]
struct KeyLine {
    writes: Arc<Mutex<Vec<bool>>>,
}

impl KeyLine {
    fn keyed(&self) -> bool {
        self.writes.lock().unwrap().last().copied().unwrap_or(false)
    }
}

impl GpioLine for KeyLine {
    fn get_value(&mut self) -> Result<bool, PttError> {
        Ok(self.keyed())
    }

    fn set_value(&mut self, value: bool) -> Result<(), PttError> {
        self.writes.lock().unwrap().push(value);
        Ok(())
    }
}

fn run<F: FlowController>(flow: &mut F, session: &mut SessionBundle, input: &[f32]) -> Vec<f32> {
    run_at(flow, session, input, RATE)
}

fn run_at<F: FlowController>(
    flow: &mut F,
    session: &mut SessionBundle,
    input: &[f32],
    sample_rate: u32,
) -> Vec<f32> {
    let mut output = vec![9.0f32; input.len()];
    let mut side = vec![9.0f32; input.len()];
    let mut block = ProcessBlock {
        sample_rate,
        input,
        output: &mut output,
        side: &mut side,
    };
    flow.process(session, &mut block);
    output
}

fn count_voice(samples: &[f32], level: f32) -> usize {
    count_near(samples, level, 1e-3)
}

fn count_near(samples: &[f32], level: f32, tolerance: f32) -> usize {
    samples.iter().filter(|&&s| (s - level).abs() < tolerance).count()
}

#[test]
fn test_rx_variable_frame_sizes_consume_all_input() {
    let probes = Probes::default();
    let codec = ScriptedCodec::new(vec![30, 50], &probes);
    let mut session =
        SessionBundle::with_codec(&Config::default(), Box::new(codec), Direction::Receive, RATE)
            .unwrap();
    assert_eq!(session.period(), FRAME);

    let (_sender, mixer) = notification::channel(BLOCK);
    let mut flow = RxFlow::new(mixer);

    let mut heard = 0;
    for _ in 0..10 {
        let out = run(&mut flow, &mut session, &[VOICE; BLOCK]);
        heard += count_voice(&out, VOICE);
    }

    // 320 samples in, 4 x (30 + 50) decoded
    assert_eq!(*probes.decoded.lock().unwrap(), vec![30, 50, 30, 50, 30, 50, 30, 50]);
    assert_eq!(session.input.available_elems(), 0);
    assert_eq!(heard + session.output.available_elems(), 320);
    assert!(flow.underflows() > 0);
}

#[test]
fn test_rx_never_emits_more_than_one_block() {
    let probes = Probes::default();
    let codec = ScriptedCodec::new(vec![80], &probes);
    let mut session =
        SessionBundle::with_codec(&Config::default(), Box::new(codec), Direction::Receive, RATE)
            .unwrap();
    let (_sender, mixer) = notification::channel(BLOCK);
    let mut flow = RxFlow::new(mixer);

    // One 96-sample block decodes one 80-sample frame
    let out = run(&mut flow, &mut session, &[VOICE; 96]);
    assert_eq!(count_voice(&out, VOICE), 80);
    assert!(out[80..].iter().all(|&s| s == 0.0));

    let out = run(&mut flow, &mut session, &[VOICE; 16]);
    assert_eq!(count_voice(&out, VOICE), 0);
    assert_eq!(session.input.available_elems(), 32);
}

struct TxRig {
    flow: TxFlow,
    session: SessionBundle,
    prompts: NotificationSender,
    toggle: Arc<std::sync::atomic::AtomicBool>,
    key: KeyLine,
    probes: Probes,
}

impl TxRig {
    fn new() -> Self {
        let probes = Probes::default();
        let codec = ScriptedCodec::new(vec![FRAME], &probes);
        let session = SessionBundle::with_codec(
            &Config::default(),
            Box::new(codec),
            Direction::Transmit,
            RATE,
        )
        .unwrap();

        let key = KeyLine::default();
        let ptt = PttCoordinator::new(
            PttInput::Software,
            PttOutput::Line {
                line: Box::new(key.clone()),
                last_level: Some(false),
            },
            4,
        );
        let toggle = ptt.toggle_handle();
        let (prompts, mixer) = notification::channel(1024);

        Self {
            flow: TxFlow::new(mixer, ptt),
            session,
            prompts,
            toggle,
            key,
            probes,
        }
    }

    fn press(&self) {
        self.toggle.store(true, Ordering::SeqCst);
    }

    fn step(&mut self, input: &[f32]) -> Vec<f32> {
        run(&mut self.flow, &mut self.session, input)
    }
}

#[test]
fn test_tx_full_transmission() {
    let mut rig = TxRig::new();

    // Idle: silence, line untouched
    let out = rig.step(&[VOICE; BLOCK]);
    assert!(out.iter().all(|&s| s == 0.0));
    assert!(rig.key.writes.lock().unwrap().is_empty());

    rig.press();
    let mut sent = 0;
    for _ in 0..5 {
        let out = rig.step(&[VOICE; BLOCK]);
        sent += count_voice(&out, VOICE);
        assert!(rig.key.keyed());
    }
    assert_eq!(rig.probes.encoded.load(Ordering::SeqCst), 4);

    // Release: everything encoded must reach the port before unkeying
    rig.press();
    let mut unkeyed_at = None;
    for i in 0..20 {
        let out = rig.step(&[VOICE; BLOCK]);
        let voice = count_voice(&out, VOICE);
        sent += voice;
        if voice > 0 {
            assert!(rig.key.keyed(), "unkeyed while audio was still going out");
        }
        if unkeyed_at.is_none() && !rig.key.keyed() {
            unkeyed_at = Some(i);
        }
    }

    assert_eq!(sent, 160);
    assert!(unkeyed_at.is_some());
    assert_eq!(*rig.key.writes.lock().unwrap(), vec![true, false]);
    assert!(rig.probes.rekeys.load(Ordering::SeqCst) > 0);
}

#[test]
fn test_tx_partial_final_frame_is_zero_padded() {
    let mut rig = TxRig::new();

    rig.press();
    // 48 samples: one full frame plus 8 left over
    rig.step(&[VOICE; BLOCK]);
    rig.step(&[VOICE; 16]);
    assert_eq!(rig.probes.encoded.load(Ordering::SeqCst), 1);

    rig.press();
    let mut sent = 0;
    for _ in 0..20 {
        sent += count_voice(&rig.step(&[0.0; BLOCK]), VOICE);
    }

    // 8 leftover samples plus the flushed zeroes make three more frames
    assert_eq!(rig.probes.encoded.load(Ordering::SeqCst), 4);
    assert_eq!(sent, 48);
    assert!(!rig.key.keyed());
}

#[test]
fn test_tx_prompt_keys_transmitter_without_ptt() {
    let mut rig = TxRig::new();
    const PROMPT: f32 = 0.25;

    assert_eq!(rig.prompts.queue(&[PROMPT; 80]), 80);

    let mut sent = 0;
    let mut keyed_blocks = 0;
    for _ in 0..30 {
        // Mic is live but PTT was never pressed
        let out = rig.step(&[VOICE; BLOCK]);
        sent += count_voice(&out, PROMPT);
        assert_eq!(count_voice(&out, VOICE), 0);
        if rig.key.keyed() {
            keyed_blocks += 1;
        }
    }

    assert_eq!(sent, 80);
    assert!(keyed_blocks >= 3);
    assert_eq!(*rig.key.writes.lock().unwrap(), vec![true, false]);
}

const HOST_RATE: u32 = 48000;
/// Default loopback frame (320 at 8 kHz) at the host rate
const HOST_PERIOD: usize = 1920;
const RESAMPLED: f32 = 0.05;

fn resampling_session(direction: Direction) -> SessionBundle {
    let session =
        SessionBundle::build(Arc::new(Config::default()), direction, HOST_RATE).unwrap();
    assert_eq!(session.period(), HOST_PERIOD);
    session
}

#[test]
fn test_rx_resampling_keeps_queues_bounded() {
    let mut session = resampling_session(Direction::Receive);
    let n_modem = session.codec.needed_modem_samples();
    let (_sender, mixer) = notification::channel(HOST_PERIOD);
    let mut flow = RxFlow::new(mixer);

    let mut heard = 0;
    for i in 0..200 {
        let out = run_at(&mut flow, &mut session, &[VOICE; HOST_PERIOD], HOST_RATE);
        let voice = count_near(&out, VOICE, RESAMPLED);
        heard += voice;

        // Every frame that can decode does, and output never piles up
        assert!(session.input.available_elems() < n_modem);
        assert!(session.output.available_elems() < 2 * HOST_PERIOD);
        if i >= 100 {
            assert!(voice >= HOST_PERIOD - 20, "block {} carried {} voice samples", i, voice);
        }
    }

    assert!(heard >= 200 * HOST_PERIOD * 95 / 100);
    // Only the first blocks run short
    assert!(flow.underflows() <= 2);
}

#[test]
fn test_tx_resampling_delivers_whole_transmission() {
    let mut session = resampling_session(Direction::Transmit);
    let key = KeyLine::default();
    let ptt = PttCoordinator::new(
        PttInput::Software,
        PttOutput::Line {
            line: Box::new(key.clone()),
            last_level: Some(false),
        },
        4,
    );
    let toggle: Arc<AtomicBool> = ptt.toggle_handle();
    let (_prompts, mixer) = notification::channel(HOST_PERIOD);
    let mut flow = TxFlow::new(mixer, ptt);

    toggle.store(true, Ordering::SeqCst);
    let mut sent = 0;
    for _ in 0..5 {
        let out = run_at(&mut flow, &mut session, &[VOICE; HOST_PERIOD], HOST_RATE);
        sent += count_near(&out, VOICE, RESAMPLED);
        assert!(key.keyed());
    }

    toggle.store(true, Ordering::SeqCst);
    for i in 0..40 {
        let out = run_at(&mut flow, &mut session, &[VOICE; HOST_PERIOD], HOST_RATE);
        let voice = count_near(&out, VOICE, RESAMPLED);
        if voice > 0 {
            assert!(key.keyed(), "unkeyed with voice still going out at block {}", i);
        }
        sent += voice;
    }

    // 9600 samples spoken; only the filter edges fall outside the tolerance
    let spoken = 5 * HOST_PERIOD;
    assert!(sent >= spoken - 200, "{} of {} samples delivered", sent, spoken);
    assert!(sent <= spoken + 200, "{} samples delivered for {}", sent, spoken);

    assert_eq!(session.output.available_elems(), 0);
    assert_eq!(flow.ptt().state(), PttState::Idle);
    assert_eq!(*key.writes.lock().unwrap(), vec![true, false]);
}
