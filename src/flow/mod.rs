//! Per-callback flow control
//!
//! A flow controller moves one host block through the session bundle:
//! host samples into the input converter, whole codec frames through
//! the codec, codec output into the output converter and back out to
//! the host. Both directions share the same shape:
//!
//! ```text
//!   host in ──► input conv ──► codec ──► output conv ──► host out
//!                 (host→codec)            (codec→host)
//! ```
//!
//! Input is always drained into the codec before output is drained to
//! the host, so each block's output reflects everything available at
//! the start of that block.

pub mod rx;
pub mod tx;

pub use rx::RxFlow;
pub use tx::TxFlow;

use crate::audio::{ProcessBlock, ProcessHandler};
use crate::config::Config;
use crate::error::VoxcryptError;
use crate::session::SessionBundle;

/// Direction-specific scheduling of one host block
pub trait FlowController: Send {
    /// Process one block. Runs on the audio thread; must not block.
    fn process(&mut self, session: &mut SessionBundle, block: &mut ProcessBlock<'_>);

    /// Apply a new config snapshot. Called with the graph deactivated.
    fn reconfigure(&mut self, _config: &Config) -> Result<(), VoxcryptError> {
        Ok(())
    }

    /// Log and reset per-session counters. Called with the graph deactivated.
    fn report(&mut self) {}
}

/// The live session paired with its flow controller
pub struct Engine<F> {
    pub session: SessionBundle,
    pub flow: F,
}

impl<F: FlowController> Engine<F> {
    pub fn new(session: SessionBundle, flow: F) -> Self {
        Self { session, flow }
    }
}

impl<F: FlowController> ProcessHandler for Engine<F> {
    fn process(&mut self, block: &mut ProcessBlock<'_>) {
        self.flow.process(&mut self.session, block);
    }
}

/// Frames needed to carry `samples` at `from_rate` once converted to `to_rate`
///
/// Rounds up so a host block of this size always covers a full frame.
pub fn nominal_resampled_frames(samples: usize, from_rate: u32, to_rate: u32) -> usize {
    let from_rate = from_rate.max(1) as u64;
    ((samples as u64 * to_rate as u64 + from_rate - 1) / from_rate) as usize
}
