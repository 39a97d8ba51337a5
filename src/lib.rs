//! Voxcrypt: encrypted digital voice bridge for radio audio interfaces
//!
//! This library provides the core functionality for:
//! - Driving a periodic audio callback via cpal (PipeWire, PulseAudio, ALSA)
//! - Converting between the host rate and the codec's speech/modem rates
//! - Running a voice codec session in the receive or transmit direction
//! - Keying the radio through a GPIO push-to-talk line with a hang timer
//! - Mixing startup and prompt audio alongside the codec stream
//!
//! # Architecture
//!
//! ```text
//!                       ┌─────────────────────────────────────┐
//!                       │        Daemon (control loop)        │
//!                       │ SIGHUP / SIGUSR1 / SIGUSR2 / watch  │
//!                       └─────────────────────────────────────┘
//!                          │ reload            │ prompts
//!                          ▼                   ▼
//!                 ┌────────────────┐   ┌────────────────┐
//!                 │ SessionManager │   │  Notification  │
//!                 │ (swap bundles) │   │  queue (ring)  │
//!                 └────────────────┘   └────────────────┘
//!                          │                   │
//!                          ▼                   ▼
//!   ┌──────────┐   ┌─────────────────────────────────────┐   ┌──────────┐
//!   │ capture  │──▶│   process callback (one per period) │──▶│ playback │
//!   │  (cpal)  │   │                                     │   │  (cpal)  │
//!   └──────────┘   │  RX: modem ─▶ convert ─▶ decode     │   └──────────┘
//!                  │             ─▶ convert ─▶ voice     │
//!                  │  TX: voice ─▶ convert ─▶ encode     │
//!                  │             ─▶ convert ─▶ modem     │
//!                  └─────────────────────────────────────┘
//!                                     │ key / unkey
//!                                     ▼
//!                            ┌────────────────┐
//!                            │ PttCoordinator │
//!                            │   (gpio-cdev)  │
//!                            └────────────────┘
//! ```

pub mod audio;
pub mod cli;
pub mod codec;
pub mod config;
pub mod daemon;
pub mod error;
pub mod flow;
pub mod gpio;
pub mod ptt;
pub mod session;
pub mod state;

pub use cli::{Cli, Commands, Side};
pub use config::Config;
pub use daemon::Daemon;
pub use error::{Result, VoxcryptError};
pub use session::{Direction, SessionBundle, SessionManager};
