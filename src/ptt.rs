//! Push-to-talk coordination
//!
//! Derives transmit intent from the PTT input (hardware line or software
//! toggle), detects edges between callbacks and drives the keying output
//! through a dead-key hang timer:
//!
//! ```text
//!            intent               intent dropped
//!   Idle ─────────────► Transmitting ─────────────► Releasing{hang}
//!    ▲                       ▲                          │  │
//!    │                       └───────── intent ─────────┘  │
//!    └──────── hang expired on drained periods ────────────┘
//! ```
//!
//! Everything here runs inside the transmit callback. Signal handlers
//! only set the shared toggle flag.

use crate::config::PttConfig;
use crate::error::PttError;
use crate::gpio::{self, GpioLine};
use crate::state::PttState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Where transmit intent comes from
pub enum PttInput {
    /// No PTT input; the microphone is always live
    Unwired,
    /// Toggled by `voxcrypt ptt` / SIGUSR2
    Software,
    /// Hardware input line
    Line(Box<dyn GpioLine>),
}

/// Keying output
pub enum PttOutput {
    Unwired,
    Line {
        line: Box<dyn GpioLine>,
        /// Last level successfully written
        last_level: Option<bool>,
    },
}

/// Change in transmit intent since the previous callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
    Steady,
}

/// Push-to-talk state machine
pub struct PttCoordinator {
    input: PttInput,
    output: PttOutput,
    /// Set asynchronously, consumed by the callback
    toggle_request: Arc<AtomicBool>,
    software_level: bool,
    state: PttState,
    hang_periods: u32,
}

impl PttCoordinator {
    pub fn new(input: PttInput, output: PttOutput, hang_periods: u32) -> Self {
        Self {
            input,
            output,
            toggle_request: Arc::new(AtomicBool::new(false)),
            software_level: false,
            state: PttState::new(),
            hang_periods,
        }
    }

    /// Open the lines described by `config`
    pub fn from_config(config: &PttConfig) -> Result<Self, PttError> {
        let (input, output) = open_lines(config)?;
        Ok(Self::new(input, output, config.hang_periods))
    }

    /// Reopen the lines for a new config snapshot
    ///
    /// The current lines are released first: the kernel refuses a second
    /// request for a line that is still held, and a reload keeps the same
    /// offsets. If opening fails the coordinator is left unwired. Keying
    /// state and the software PTT level carry over, and the output is
    /// re-asserted if the transmitter was keyed.
    pub fn reconfigure(&mut self, config: &PttConfig) -> Result<(), PttError> {
        self.rewire(config, open_lines)
    }

    fn rewire<F>(&mut self, config: &PttConfig, open: F) -> Result<(), PttError>
    where
        F: FnOnce(&PttConfig) -> Result<(PttInput, PttOutput), PttError>,
    {
        self.input = PttInput::Unwired;
        self.output = PttOutput::Unwired;

        let (input, output) = open(config)?;
        self.input = input;
        self.output = output;
        self.hang_periods = config.hang_periods;

        if self.state.keyed() {
            tracing::debug!("Restoring PTT output after reconfigure ({})", self.state);
            self.drive(true);
        }
        Ok(())
    }

    /// Flag shared with the control loop to request a software PTT toggle
    pub fn toggle_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.toggle_request)
    }

    pub fn state(&self) -> PttState {
        self.state
    }

    /// Whether the operator is asking to transmit
    ///
    /// A pending toggle request is applied first. A failed line read
    /// counts as asserted so a flaky input cannot silently mute the
    /// transmitter.
    pub fn transmit_requested(&mut self) -> bool {
        if self.toggle_request.swap(false, Ordering::AcqRel) {
            self.software_level = !self.software_level;
            tracing::debug!("Software PTT {}", if self.software_level { "on" } else { "off" });
        }

        match self.input {
            PttInput::Unwired => true,
            PttInput::Software => self.software_level,
            PttInput::Line(ref mut line) => match line.get_value() {
                Ok(level) => level,
                Err(e) => {
                    tracing::error!("Error reading PTT input: {}", e);
                    true
                }
            },
        }
    }

    /// Record this callback's transmit intent and report the edge
    ///
    /// Any intent keys the output line and cancels a running hang timer.
    pub fn begin_cycle(&mut self, intent: bool) -> Edge {
        let was_transmitting = self.state.is_transmitting();

        if intent {
            if self.state.is_releasing() {
                tracing::trace!("PTT re-asserted during hang, line stays keyed");
            }
            self.state = PttState::Transmitting;
            self.drive(true);
            if was_transmitting {
                Edge::Steady
            } else {
                Edge::Rising
            }
        } else if was_transmitting {
            self.state = PttState::Releasing {
                remaining: self.hang_periods,
            };
            Edge::Falling
        } else {
            Edge::Steady
        }
    }

    /// Advance the hang timer after a non-transmitting callback
    ///
    /// `drained` says whether the callback found no queued output left.
    /// Periods that still emitted audio do not count.
    pub fn finish_idle_cycle(&mut self, drained: bool) {
        if !drained {
            return;
        }

        if let PttState::Releasing { remaining } = self.state {
            if remaining == 0 {
                self.drive(false);
                self.state = PttState::Idle;
            } else {
                self.state = PttState::Releasing {
                    remaining: remaining - 1,
                };
            }
        }
    }

    /// Write the keying line only when the level changes
    fn drive(&mut self, level: bool) {
        if let PttOutput::Line {
            ref mut line,
            ref mut last_level,
        } = self.output
        {
            if *last_level == Some(level) {
                return;
            }
            match line.set_value(level) {
                Ok(()) => *last_level = Some(level),
                Err(e) => tracing::warn!("Failed to set PTT output: {}", e),
            }
        }
    }
}

fn open_lines(config: &PttConfig) -> Result<(PttInput, PttOutput), PttError> {
    if !config.enabled {
        return Ok((PttInput::Unwired, PttOutput::Unwired));
    }

    let input = match config.input_gpio {
        Some(offset) => PttInput::Line(gpio::open_input(
            &config.chip,
            offset,
            config.active_low,
            config.bias,
        )?),
        None => PttInput::Software,
    };

    let output = match config.output_gpio {
        Some(offset) => PttOutput::Line {
            line: gpio::open_output(
                &config.chip,
                offset,
                config.output_active_low,
                config.output_bias,
                config.output_drive,
            )?,
            // Requested de-asserted
            last_level: Some(false),
        },
        None => PttOutput::Unwired,
    };

    tracing::info!(
        "PTT input: {}, output: {}",
        match input {
            PttInput::Unwired => "none".to_string(),
            PttInput::Software => "software toggle".to_string(),
            PttInput::Line(_) => format!("{}:{}", config.chip, config.input_gpio.unwrap_or_default()),
        },
        match config.output_gpio {
            Some(offset) => format!("{}:{}", config.chip, offset),
            None => "none".to_string(),
        }
    );

    Ok((input, output))
}
