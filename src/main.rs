//! Voxcrypt - encrypted digital voice bridge
//!
//! Run `voxcrypt rx` and `voxcrypt tx` to start the receive and transmit
//! daemons. `voxcrypt reload|play|ptt` signal a running daemon.

use clap::Parser;
use tracing_subscriber::EnvFilter;
use voxcrypt::cli::{Cli, Commands};
use voxcrypt::config::{self, CliOverrides, Config};
use voxcrypt::daemon::{self, ControlRequest, Daemon};
use voxcrypt::session::Direction;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let overrides = CliOverrides {
        period: cli.period,
        key_file: cli.key_file.clone(),
    };

    // Load configuration before logging so the file can set the level
    let config = config::load_with_overrides(cli.config.as_deref(), &overrides)?;

    // Initialize logging
    let log_level = if cli.quiet {
        "error".to_string()
    } else {
        match cli.verbose {
            0 => config.diagnostics.log_level.clone(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("voxcrypt={},warn", log_level))),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Rx => run_daemon(config, cli.config, overrides, Direction::Receive).await?,
        Commands::Tx => run_daemon(config, cli.config, overrides, Direction::Transmit).await?,
        Commands::Reload { direction } => {
            daemon::send_control(&config.state_dir(), direction.into(), ControlRequest::Reload)?;
        }
        Commands::Play { direction } => {
            daemon::send_control(
                &config.state_dir(),
                direction.into(),
                ControlRequest::PlayPrompt,
            )?;
        }
        Commands::Ptt => {
            daemon::send_control(&config.state_dir(), Direction::Transmit, ControlRequest::TogglePtt)?;
        }
        Commands::Config => show_config(&config, cli.config.as_deref())?,
    }

    Ok(())
}

async fn run_daemon(
    config: Config,
    config_path: Option<std::path::PathBuf>,
    overrides: CliOverrides,
    direction: Direction,
) -> anyhow::Result<()> {
    let mut daemon = Daemon::new(config, config_path, overrides, direction);
    daemon.run().await?;
    Ok(())
}

/// Print the effective configuration as TOML
fn show_config(config: &Config, path: Option<&std::path::Path>) -> anyhow::Result<()> {
    println!("# Effective configuration");
    if let Some(path) = config::resolve_config_path(path) {
        let status = if path.exists() { "" } else { " (not found, using defaults)" };
        println!("# Config file: {}{}", path.display(), status);
    }
    println!("# Key file: {}", config.crypto.key_path().display());
    println!("# State directory: {}\n", config.state_dir().display());
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
