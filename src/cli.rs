// Command-line interface definitions for voxcrypt
//
// This module is separate so it can be used by both the binary (main.rs)
// and build.rs for generating man pages.

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "voxcrypt")]
#[command(author, version, about = "Encrypted digital voice bridge for radio audio interfaces")]
#[command(long_about = "
Voxcrypt bridges a sound card to a voice codec. The receiver turns
modem audio into speech; the transmitter turns speech into modem audio
and keys the radio through a GPIO push-to-talk line.

SETUP:
  1. Add yourself to the audio and gpio groups
  2. Write ~/.config/voxcrypt/config.toml (see `voxcrypt config`)
  3. Place the key file at /etc/key (or set crypto.key_file)
  4. Run: voxcrypt rx  and  voxcrypt tx

CONTROL:
  voxcrypt reload rx|tx   Re-read the config and rebuild the session
  voxcrypt play rx|tx     Play /tmp/notify.wav (rx) or send /tmp/tts.wav (tx)
  voxcrypt ptt            Toggle software push-to-talk on the transmitter
")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<std::path::PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Override the host block size in frames (0 = derive from codec)
    #[arg(long, value_name = "FRAMES")]
    pub period: Option<u32>,

    /// Override the key file
    #[arg(long, value_name = "FILE")]
    pub key_file: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the receiver: modem audio in, decoded voice out
    Rx,

    /// Run the transmitter: voice in, modem audio out
    Tx,

    /// Ask a running daemon to reload its configuration (SIGHUP)
    Reload {
        #[arg(value_enum)]
        direction: Side,
    },

    /// Ask a running daemon to play its prompt file (SIGUSR1)
    Play {
        #[arg(value_enum)]
        direction: Side,
    },

    /// Toggle software push-to-talk on the running transmitter (SIGUSR2)
    Ptt,

    /// Show current configuration
    Config,
}

/// Daemon selector for control commands
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Side {
    Rx,
    Tx,
}
