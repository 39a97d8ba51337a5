//! Host audio graph
//!
//! The graph invokes a periodic process callback with one fixed-size
//! block per port. Everything the daemon does with audio happens inside
//! that callback; the graph itself only moves samples between devices
//! and the handler.
//!
//! Uses cpal, which works with PipeWire, PulseAudio, and ALSA backends.

pub mod converter;
pub mod cpal_graph;
pub mod notification;
pub mod wav;

use crate::config::AudioConfig;
use crate::error::AudioError;
use crate::session::Direction;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Port buffers for one callback invocation
///
/// All slices hold exactly one host block of mono f32 samples.
pub struct ProcessBlock<'a> {
    /// Host sample rate, re-read every callback
    pub sample_rate: u32,
    /// Capture port (modem in for RX, voice in for TX)
    pub input: &'a [f32],
    /// Main playback port (voice out for RX, modem out for TX)
    pub output: &'a mut [f32],
    /// Notification port
    pub side: &'a mut [f32],
}

impl ProcessBlock<'_> {
    /// Host block size in frames
    pub fn frames(&self) -> usize {
        self.output.len()
    }
}

/// Periodic process callback
pub trait ProcessHandler: Send {
    /// Fill the output ports for one block. Must not block.
    fn process(&mut self, block: &mut ProcessBlock<'_>);
}

/// Handler shared between the control loop and the audio thread
///
/// The audio thread only ever uses `try_lock`; the control loop takes
/// the lock while the graph is deactivated.
pub type SharedHandler = Arc<Mutex<dyn ProcessHandler>>;

/// Host audio graph
pub trait AudioGraph {
    /// Host sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Start invoking `handler` once per `period` frames
    fn activate(&mut self, period: usize, handler: SharedHandler) -> Result<(), AudioError>;

    /// Stop the callback. Returns once no further invocation can happen.
    fn deactivate(&mut self);
}

/// Factory function to create the host graph for one direction
///
/// Stream failures after activation are reported on `faults`.
pub fn create_graph(
    config: &AudioConfig,
    direction: Direction,
    faults: mpsc::UnboundedSender<AudioError>,
) -> Result<Box<dyn AudioGraph>, AudioError> {
    Ok(Box::new(cpal_graph::CpalGraph::new(config, direction, faults)?))
}
