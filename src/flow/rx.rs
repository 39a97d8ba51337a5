//! Receive flow: modem samples in, decoded voice out
//!
//! The decode loop runs as long as the input converter holds enough
//! samples for the codec's next frame, re-asking the codec how many it
//! wants after every frame. Output is at most one host block per
//! callback; a short block is padded with silence.

use super::FlowController;
use crate::audio::notification::NotificationMixer;
use crate::audio::ProcessBlock;
use crate::session::SessionBundle;

pub struct RxFlow {
    notifications: NotificationMixer,
    /// Callbacks that could not fill the voice port
    underflows: u64,
}

impl RxFlow {
    pub fn new(notifications: NotificationMixer) -> Self {
        Self {
            notifications,
            underflows: 0,
        }
    }

    pub fn underflows(&self) -> u64 {
        self.underflows
    }
}

impl FlowController for RxFlow {
    fn report(&mut self) {
        tracing::debug!("RX underflowed on {} callbacks this session", self.underflows);
        self.underflows = 0;
    }

    fn process(&mut self, session: &mut SessionBundle, block: &mut ProcessBlock<'_>) {
        let frames = block.frames();
        session.track_rates(block.sample_rate);

        session.input.enqueue(block.input);

        let mut needed = session.codec.needed_modem_samples();
        while needed > 0 && session.input.available_elems() >= needed {
            let modem = &mut session.modem[..needed];
            session.input.dequeue(modem);

            let produced = session.codec.decode(modem, &mut session.speech);
            session.output.enqueue(&session.speech[..produced]);

            // Variable-rate codecs change this frame to frame
            needed = session.codec.needed_modem_samples();
        }

        let available = session.output.available_elems().min(frames);
        session.output.dequeue(&mut block.output[..available]);
        if available < frames {
            block.output[available..].fill(0.0);
            self.underflows += 1;
            tracing::trace!("RX underflow: {} of {} frames", available, frames);
        }

        self.notifications.mix_into(block.side);
    }
}
