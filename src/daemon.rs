//! Daemon module - control loop
//!
//! Owns the audio graph and the session manager for one direction and
//! turns signals into reloads, prompt playback and PTT toggles. Session
//! state is only ever replaced between `deactivate` and `activate`; the
//! process callback never sees a half-built session.

use crate::audio::notification::{self, NotificationSender, NotificationSounds};
use crate::audio::{self, wav, AudioGraph};
use crate::config::{self, CliOverrides, Config};
use crate::error::{AudioError, Result, VoxcryptError};
use crate::flow::{FlowController, RxFlow, TxFlow};
use crate::ptt::PttCoordinator;
use crate::session::{Direction, SessionManager};
use notify::{Config as WatchConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

/// Zero-length file written once the transmitter is running
pub const TX_READY_MARKER: &str = "tx_initialized";

/// PID file used to reach the daemon for `direction`
pub fn pid_file_path(state_dir: &Path, direction: Direction) -> PathBuf {
    state_dir.join(format!("{}.pid", direction.name()))
}

/// Write PID file for external control via signals
fn write_pid_file(state_dir: &Path, direction: Direction) -> Option<PathBuf> {
    let pid_path = pid_file_path(state_dir, direction);

    if let Err(e) = std::fs::create_dir_all(state_dir) {
        tracing::warn!("Failed to create state directory: {}", e);
        return None;
    }

    let pid = std::process::id();
    if let Err(e) = std::fs::write(&pid_path, pid.to_string()) {
        tracing::warn!("Failed to write PID file: {}", e);
        return None;
    }

    tracing::debug!("PID file written: {:?} (pid={})", pid_path, pid);
    Some(pid_path)
}

fn write_marker(path: &Path) -> bool {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!("Failed to create marker directory: {}", e);
            return false;
        }
    }
    match std::fs::write(path, b"") {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Failed to write {:?}: {}", path, e);
            false
        }
    }
}

/// Log the flow's session counters
fn report<F: FlowController + 'static>(manager: &SessionManager<F>) {
    if let Err(e) = manager.with_engine(|engine| engine.flow.report()) {
        tracing::warn!("Could not read session counters: {}", e);
    }
}

/// Remove a PID or marker file on shutdown
fn cleanup_file(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!("Failed to remove {:?}: {}", path, e);
        }
    }
}

/// Whether a watcher event touches the config file
fn is_config_event(event: &Event, file_name: &OsStr) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event.paths.iter().any(|p| p.file_name() == Some(file_name))
}

/// Watch the config file's directory and raise a reload on change
///
/// The directory is watched rather than the file so editors that
/// replace the file on save are still picked up.
fn watch_config(path: &Path, reloads: mpsc::UnboundedSender<()>) -> Option<RecommendedWatcher> {
    let file_name = path.file_name()?.to_os_string();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if is_config_event(&event, &file_name) {
                    let _ = reloads.send(());
                }
            }
            Err(e) => tracing::warn!("Config watch error: {:?}", e),
        },
        WatchConfig::default(),
    );

    let mut watcher = match watcher {
        Ok(watcher) => watcher,
        Err(e) => {
            tracing::warn!("Failed to create config watcher: {}", e);
            return None;
        }
    };

    if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
        tracing::warn!("Failed to watch {:?}: {}", dir, e);
        return None;
    }

    tracing::info!("Watching {:?} for changes", path);
    Some(watcher)
}

/// Direction-specific pieces of the control loop
enum Role {
    Receive { sounds: NotificationSounds },
    Transmit { toggle: Arc<AtomicBool> },
}

/// Main daemon for one direction
pub struct Daemon {
    config: Arc<Config>,
    config_path: Option<PathBuf>,
    overrides: CliOverrides,
    direction: Direction,
    pid_file_path: Option<PathBuf>,
    marker_path: Option<PathBuf>,
}

impl Daemon {
    pub fn new(
        config: Config,
        config_path: Option<PathBuf>,
        overrides: CliOverrides,
        direction: Direction,
    ) -> Self {
        Self {
            config: Arc::new(config),
            config_path,
            overrides,
            direction,
            pid_file_path: None,
            marker_path: None,
        }
    }

    /// Run the daemon until a shutdown signal or a fatal error
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!("Starting voxcrypt {} daemon", self.direction);

        let (fault_tx, mut faults) = mpsc::unbounded_channel();
        let mut graph = audio::create_graph(&self.config.audio, self.direction, fault_tx)?;
        let host_rate = graph.sample_rate();

        let capacity = (self.config.notify.queue_seconds as usize * host_rate as usize).max(1);
        let (prompts, mixer) = notification::channel(capacity);

        let result = match self.direction {
            Direction::Receive => {
                let sounds = NotificationSounds::load(&self.config.notify, host_rate);
                let manager = SessionManager::new(
                    Arc::clone(&self.config),
                    self.direction,
                    host_rate,
                    RxFlow::new(mixer),
                )?;
                let role = Role::Receive { sounds };
                self.serve(graph.as_mut(), &manager, prompts, role, &mut faults)
                    .await
            }
            Direction::Transmit => {
                let ptt = PttCoordinator::from_config(&self.config.ptt)?;
                let toggle = ptt.toggle_handle();
                let manager = SessionManager::new(
                    Arc::clone(&self.config),
                    self.direction,
                    host_rate,
                    TxFlow::new(mixer, ptt),
                )?;
                let role = Role::Transmit { toggle };
                self.serve(graph.as_mut(), &manager, prompts, role, &mut faults)
                    .await
            }
        };

        graph.deactivate();

        if let Some(ref path) = self.marker_path {
            cleanup_file(path);
        }
        if let Some(ref path) = self.pid_file_path {
            cleanup_file(path);
        }

        tracing::info!("Daemon stopped");
        result
    }

    async fn serve<F: FlowController + 'static>(
        &mut self,
        graph: &mut dyn AudioGraph,
        manager: &SessionManager<F>,
        mut prompts: NotificationSender,
        mut role: Role,
        faults: &mut mpsc::UnboundedReceiver<AudioError>,
    ) -> Result<()> {
        let mut sighup = signal(SignalKind::hangup())
            .map_err(|e| VoxcryptError::Config(format!("Failed to set up SIGHUP handler: {}", e)))?;
        let mut sigusr1 = signal(SignalKind::user_defined1())
            .map_err(|e| VoxcryptError::Config(format!("Failed to set up SIGUSR1 handler: {}", e)))?;
        let mut sigusr2 = signal(SignalKind::user_defined2())
            .map_err(|e| VoxcryptError::Config(format!("Failed to set up SIGUSR2 handler: {}", e)))?;
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| VoxcryptError::Config(format!("Failed to set up SIGTERM handler: {}", e)))?;
        let mut sigquit = signal(SignalKind::quit())
            .map_err(|e| VoxcryptError::Config(format!("Failed to set up SIGQUIT handler: {}", e)))?;

        // Sender stays alive for the whole loop so recv() only yields real events
        let (reload_tx, mut reload_rx) = mpsc::unbounded_channel();
        let _watcher = if self.config.daemon.watch_config {
            match config::resolve_config_path(self.config_path.as_deref()) {
                Some(path) => watch_config(&path, reload_tx.clone()),
                None => {
                    tracing::warn!("No config file to watch");
                    None
                }
            }
        } else {
            None
        };

        self.activate(graph, manager, &mut prompts, &role)?;
        self.pid_file_path = write_pid_file(&self.config.state_dir(), self.direction);

        let outcome = loop {
            tokio::select! {
                _ = sighup.recv() => {
                    tracing::info!("Received SIGHUP, reloading...");
                    self.reload(graph, manager, &mut prompts, &mut role)?;
                }

                Some(()) = reload_rx.recv() => {
                    tracing::info!("Config file changed, reloading...");
                    while reload_rx.try_recv().is_ok() {}
                    self.reload(graph, manager, &mut prompts, &mut role)?;
                }

                _ = sigusr1.recv() => {
                    tracing::debug!("Received SIGUSR1 (play prompt)");
                    self.play_prompt(manager, &mut prompts, graph.sample_rate());
                }

                _ = sigusr2.recv() => {
                    match role {
                        Role::Transmit { ref toggle } => {
                            tracing::debug!("Received SIGUSR2 (toggle PTT)");
                            toggle.store(true, Ordering::Release);
                        }
                        Role::Receive { .. } => {
                            tracing::debug!("Ignoring SIGUSR2: receiver has no PTT");
                        }
                    }
                }

                Some(fault) = faults.recv() => {
                    tracing::error!("Audio host stopped: {}", fault);
                    break Err(fault.into());
                }

                // Handle graceful shutdown (SIGINT from Ctrl+C)
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received SIGINT, shutting down...");
                    break Ok(());
                }

                // Handle graceful shutdown (SIGTERM from systemctl stop)
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, shutting down...");
                    break Ok(());
                }

                _ = sigquit.recv() => {
                    tracing::info!("Received SIGQUIT, shutting down...");
                    break Ok(());
                }
            }
        };

        graph.deactivate();
        report(manager);
        outcome
    }

    /// Start the callback and announce the session
    fn activate<F: FlowController + 'static>(
        &mut self,
        graph: &mut dyn AudioGraph,
        manager: &SessionManager<F>,
        prompts: &mut NotificationSender,
        role: &Role,
    ) -> Result<()> {
        let period = manager.period()?;
        graph.activate(period, manager.handler())?;
        tracing::info!(
            "{} active: {} frames per period at {} Hz",
            self.direction,
            period,
            graph.sample_rate()
        );

        match role {
            Role::Receive { sounds } => {
                let status = manager.encryption_status()?;
                tracing::info!("Session is {}", status);
                prompts.queue(sounds.for_status(status));
            }
            Role::Transmit { .. } => {
                let marker = self.config.state_dir().join(TX_READY_MARKER);
                if write_marker(&marker) {
                    self.marker_path = Some(marker);
                }
            }
        }

        Ok(())
    }

    /// Deactivate, rebuild the session from a fresh config, reactivate
    ///
    /// Any failure here is fatal: the graph stays deactivated and the
    /// error propagates out of the control loop. Audio devices are
    /// opened once at startup and are not re-read.
    fn reload<F: FlowController + 'static>(
        &mut self,
        graph: &mut dyn AudioGraph,
        manager: &SessionManager<F>,
        prompts: &mut NotificationSender,
        role: &mut Role,
    ) -> Result<()> {
        graph.deactivate();
        report(manager);

        let config = Arc::new(config::load_with_overrides(
            self.config_path.as_deref(),
            &self.overrides,
        )?);
        let host_rate = graph.sample_rate();
        manager.reload(Arc::clone(&config), host_rate)?;

        if let Role::Receive { ref mut sounds } = role {
            *sounds = NotificationSounds::load(&config.notify, host_rate);
        }
        self.config = config;

        self.activate(graph, manager, prompts, role)
    }

    /// Queue the direction's prompt file for playback
    ///
    /// The transmitter leads the prompt with silence so the far end can
    /// synchronize before speech starts.
    fn play_prompt<F: FlowController + 'static>(
        &self,
        manager: &SessionManager<F>,
        prompts: &mut NotificationSender,
        host_rate: u32,
    ) {
        let path = match self.direction {
            Direction::Receive => &self.config.notify.rx_prompt_file,
            Direction::Transmit => &self.config.notify.tx_prompt_file,
        };

        let samples = match wav::load_prompt(path, host_rate) {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!("Cannot play prompt: {}", e);
                return;
            }
        };

        if self.direction == Direction::Transmit {
            match manager.period() {
                Ok(period) => {
                    let lead_in = self.config.notify.tx_lead_in_periods as usize * period;
                    prompts.queue_silence(lead_in);
                }
                Err(e) => {
                    tracing::error!("Cannot queue prompt: {}", e);
                    return;
                }
            }
        }

        let queued = prompts.queue(&samples);
        tracing::info!("Queued prompt {:?} ({} samples)", path, queued);
    }
}

/// Control request delivered to a running daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    Reload,
    PlayPrompt,
    TogglePtt,
}

/// Read the PID of the running daemon for `direction`
pub fn read_pid(state_dir: &Path, direction: Direction) -> Result<i32> {
    let path = pid_file_path(state_dir, direction);
    let contents = std::fs::read_to_string(&path).map_err(|e| {
        VoxcryptError::Config(format!(
            "No running {} daemon ({}: {})",
            direction,
            path.display(),
            e
        ))
    })?;
    contents
        .trim()
        .parse()
        .map_err(|_| VoxcryptError::Config(format!("Corrupt PID file: {}", path.display())))
}

/// Signal the running daemon for `direction`
#[cfg(target_os = "linux")]
pub fn send_control(state_dir: &Path, direction: Direction, request: ControlRequest) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = read_pid(state_dir, direction)?;
    let sig = match request {
        ControlRequest::Reload => Signal::SIGHUP,
        ControlRequest::PlayPrompt => Signal::SIGUSR1,
        ControlRequest::TogglePtt => Signal::SIGUSR2,
    };

    kill(Pid::from_raw(pid), sig).map_err(|e| {
        VoxcryptError::Config(format!("Failed to signal {} daemon (pid {}): {}", direction, pid, e))
    })?;
    tracing::debug!("Sent {:?} to {} daemon (pid {})", sig, direction, pid);
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn send_control(state_dir: &Path, direction: Direction, request: ControlRequest) -> Result<()> {
    let pid = read_pid(state_dir, direction)?;
    Err(VoxcryptError::Config(format!(
        "Cannot send {:?} to pid {}: signal delivery requires Linux",
        request, pid
    )))
}
