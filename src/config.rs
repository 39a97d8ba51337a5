//! Configuration loading and types for voxcrypt
//!
//! Configuration is loaded in layers:
//! 1. Built-in defaults
//! 2. Config file (~/.config/voxcrypt/config.toml)
//! 3. Environment variables (VOXCRYPT_*)
//! 4. CLI arguments (highest priority)
//!
//! A loaded [`Config`] is an immutable snapshot. Reloading builds a new
//! snapshot and a new codec session from it; nothing is patched in place.

use crate::error::VoxcryptError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file content
pub const DEFAULT_CONFIG: &str = r#"# Voxcrypt Configuration
#
# Location: ~/.config/voxcrypt/config.toml
# Send SIGHUP (or run `voxcrypt reload rx|tx`) to apply changes

[codec]
# Codec engine. "loopback" passes frames through unchanged and is
# meant for bench testing the audio path.
mode = "loopback"

# Native sample rate and frame length of the codec
sample_rate = 8000
frame_samples = 320

[crypto]
# Encrypt voice frames
enabled = false

# Key slot: 1 reads /etc/key, N > 1 reads /etc/keyN
# key_index = 1
# Or give the key file explicitly
# key_file = "/etc/key"

# Frames between automatic rekeys (0 = never)
rekey_period = 0

[ptt]
# Drive push-to-talk from GPIO lines
enabled = false
chip = "/dev/gpiochip0"

# Input line offset. Leave unset to use the software toggle
# (`voxcrypt ptt` or SIGUSR2 to the transmitter)
# input_gpio = 17
active_low = false
bias = "as-is"            # as-is, pull-up, pull-down, disable

# Output (keying) line offset
# output_gpio = 27
output_active_low = false
output_bias = "as-is"
output_drive = "push-pull" # push-pull, open-drain, open-source

# Callback periods to hold the keying line after audio drains
hang_periods = 4

[audio]
# Host block size in frames (0 = derive from codec frame size)
rx_period = 0
tx_period = 0

# Device names ("default" uses the system default). Matching is
# exact, then case-insensitive, then substring.
voice_in_device = "default"
modem_out_device = "default"
modem_in_device = "default"
voice_out_device = "default"

# Output channel carrying notifications on the receiver. Leave unset
# to overlay notifications on every channel.
# notify_channel = 1

[notify]
# Startup prompts played when the receiver (re)starts. Built-in
# tones are used when unset.
# secure_file = "/usr/share/voxcrypt/secure.wav"
# insecure_file = "/usr/share/voxcrypt/insecure.wav"

# Files loaded on a play request (SIGUSR1 / `voxcrypt play`)
rx_prompt_file = "/tmp/notify.wav"
tx_prompt_file = "/tmp/tts.wav"

# Silent periods queued ahead of a transmitted prompt so the far end
# can sync before speech starts
tx_lead_in_periods = 6

# Capacity of the prompt queue
queue_seconds = 30

[daemon]
# Reload automatically when this file changes
watch_config = false

[diagnostics]
# trace, debug, info, warn, error
log_level = "info"
"#;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub codec: CodecConfig,

    #[serde(default)]
    pub crypto: CryptoConfig,

    #[serde(default)]
    pub ptt: PttConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

/// Codec engine selection
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CodecMode {
    /// Pass frames through unchanged
    #[default]
    Loopback,
}

/// Codec geometry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CodecConfig {
    #[serde(default)]
    pub mode: CodecMode,

    /// Native codec sample rate in Hz
    #[serde(default = "default_codec_rate")]
    pub sample_rate: u32,

    /// Samples per codec frame
    #[serde(default = "default_frame_samples")]
    pub frame_samples: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            mode: CodecMode::default(),
            sample_rate: default_codec_rate(),
            frame_samples: default_frame_samples(),
        }
    }
}

/// Encryption configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CryptoConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Key slot; 1 maps to /etc/key, N > 1 to /etc/keyN
    #[serde(default)]
    pub key_index: Option<u32>,

    /// Explicit key file, takes precedence over `key_index`
    #[serde(default)]
    pub key_file: Option<PathBuf>,

    /// Frames between automatic rekeys (0 = never)
    #[serde(default)]
    pub rekey_period: u32,
}

impl CryptoConfig {
    /// Resolve the key file path from `key_file` or `key_index`
    pub fn key_path(&self) -> PathBuf {
        const KEY_PREFIX: &str = "/etc/key";

        if let Some(ref path) = self.key_file {
            return path.clone();
        }
        match self.key_index {
            Some(index) if index > 1 => PathBuf::from(format!("{}{}", KEY_PREFIX, index)),
            _ => PathBuf::from(KEY_PREFIX),
        }
    }
}

/// GPIO line bias
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LineBias {
    #[default]
    AsIs,
    PullUp,
    PullDown,
    Disable,
}

/// GPIO output drive mode
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LineDrive {
    #[default]
    PushPull,
    OpenDrain,
    OpenSource,
}

/// Push-to-talk line configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PttConfig {
    #[serde(default)]
    pub enabled: bool,

    /// GPIO character device
    #[serde(default = "default_gpio_chip")]
    pub chip: String,

    /// Input line offset; None selects the software toggle
    #[serde(default)]
    pub input_gpio: Option<u32>,

    #[serde(default)]
    pub active_low: bool,

    #[serde(default)]
    pub bias: LineBias,

    /// Keying output line offset
    #[serde(default)]
    pub output_gpio: Option<u32>,

    #[serde(default)]
    pub output_active_low: bool,

    #[serde(default)]
    pub output_bias: LineBias,

    #[serde(default)]
    pub output_drive: LineDrive,

    /// Drained callback periods to wait before releasing the keying line
    #[serde(default = "default_hang_periods")]
    pub hang_periods: u32,
}

impl Default for PttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            chip: default_gpio_chip(),
            input_gpio: None,
            active_low: false,
            bias: LineBias::default(),
            output_gpio: None,
            output_active_low: false,
            output_bias: LineBias::default(),
            output_drive: LineDrive::default(),
            hang_periods: default_hang_periods(),
        }
    }
}

/// Host audio graph configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    /// Receiver block size in frames (0 = derive from codec geometry)
    #[serde(default)]
    pub rx_period: u32,

    /// Transmitter block size in frames (0 = derive from codec geometry)
    #[serde(default)]
    pub tx_period: u32,

    #[serde(default = "default_device")]
    pub voice_in_device: String,

    #[serde(default = "default_device")]
    pub modem_out_device: String,

    #[serde(default = "default_device")]
    pub modem_in_device: String,

    #[serde(default = "default_device")]
    pub voice_out_device: String,

    /// Receiver output channel dedicated to notifications
    #[serde(default)]
    pub notify_channel: Option<u16>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            rx_period: 0,
            tx_period: 0,
            voice_in_device: default_device(),
            modem_out_device: default_device(),
            modem_in_device: default_device(),
            voice_out_device: default_device(),
            notify_channel: None,
        }
    }
}

/// Notification and prompt audio configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifyConfig {
    /// Startup prompt when the session is encrypted
    #[serde(default)]
    pub secure_file: Option<PathBuf>,

    /// Startup prompt when the session is in plaintext
    #[serde(default)]
    pub insecure_file: Option<PathBuf>,

    #[serde(default = "default_rx_prompt")]
    pub rx_prompt_file: PathBuf,

    #[serde(default = "default_tx_prompt")]
    pub tx_prompt_file: PathBuf,

    #[serde(default = "default_lead_in")]
    pub tx_lead_in_periods: u32,

    #[serde(default = "default_queue_seconds")]
    pub queue_seconds: u32,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            secure_file: None,
            insecure_file: None,
            rx_prompt_file: default_rx_prompt(),
            tx_prompt_file: default_tx_prompt(),
            tx_lead_in_periods: default_lead_in(),
            queue_seconds: default_queue_seconds(),
        }
    }
}

/// Control loop configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DaemonConfig {
    /// Reload when the config file changes
    #[serde(default)]
    pub watch_config: bool,

    /// Directory for PID and marker files (defaults to the runtime dir)
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiagnosticsConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_codec_rate() -> u32 {
    8000
}

fn default_frame_samples() -> usize {
    320
}

fn default_gpio_chip() -> String {
    "/dev/gpiochip0".to_string()
}

fn default_hang_periods() -> u32 {
    4
}

fn default_device() -> String {
    "default".to_string()
}

fn default_rx_prompt() -> PathBuf {
    PathBuf::from("/tmp/notify.wav")
}

fn default_tx_prompt() -> PathBuf {
    PathBuf::from("/tmp/tts.wav")
}

fn default_lead_in() -> u32 {
    6
}

fn default_queue_seconds() -> u32 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "voxcrypt")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the runtime directory for ephemeral files (PID, markers)
    pub fn runtime_dir() -> PathBuf {
        // Use XDG_RUNTIME_DIR if available, otherwise fall back to /tmp
        std::env::var("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
            .join("voxcrypt")
    }

    /// Directory holding PID and marker files
    pub fn state_dir(&self) -> PathBuf {
        self.daemon
            .state_dir
            .clone()
            .unwrap_or_else(Self::runtime_dir)
    }
}

/// Resolve the config file path: explicit path first, then the default location
pub fn resolve_config_path(path: Option<&Path>) -> Option<PathBuf> {
    path.map(PathBuf::from).or_else(Config::default_path)
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(path: Option<&Path>) -> Result<Config, VoxcryptError> {
    // Start with defaults
    let mut config = Config::default();

    // Load from file if it exists
    if let Some(ref path) = resolve_config_path(path) {
        if path.exists() {
            tracing::debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(path)
                .map_err(|e| VoxcryptError::Config(format!("Failed to read config: {}", e)))?;

            config = toml::from_str(&contents)
                .map_err(|e| VoxcryptError::Config(format!("Invalid config: {}", e)))?;
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
        }
    }

    // Override from environment variables
    if let Ok(mode) = std::env::var("VOXCRYPT_CODEC_MODE") {
        config.codec.mode = match mode.to_lowercase().as_str() {
            "loopback" => CodecMode::Loopback,
            other => {
                return Err(VoxcryptError::Config(format!(
                    "Unknown codec mode in VOXCRYPT_CODEC_MODE: {}",
                    other
                )))
            }
        };
    }
    if let Ok(key_file) = std::env::var("VOXCRYPT_KEY_FILE") {
        config.crypto.key_file = Some(PathBuf::from(key_file));
    }
    if let Ok(enabled) = std::env::var("VOXCRYPT_PTT_ENABLED") {
        config.ptt.enabled = matches!(enabled.to_lowercase().as_str(), "1" | "true" | "yes");
    }

    validate(&config)?;
    Ok(config)
}

/// Settings given on the command line, applied on top of every load
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub period: Option<u32>,
    pub key_file: Option<PathBuf>,
}

impl CliOverrides {
    pub fn apply(&self, config: &mut Config) {
        if let Some(period) = self.period {
            config.audio.rx_period = period;
            config.audio.tx_period = period;
        }
        if let Some(ref key_file) = self.key_file {
            config.crypto.key_file = Some(key_file.clone());
        }
    }
}

/// Load the config file and apply command-line overrides
pub fn load_with_overrides(
    path: Option<&Path>,
    overrides: &CliOverrides,
) -> Result<Config, VoxcryptError> {
    let mut config = load_config(path)?;
    overrides.apply(&mut config);
    Ok(config)
}

/// Reject snapshots the flow controllers cannot run with
fn validate(config: &Config) -> Result<(), VoxcryptError> {
    if config.codec.sample_rate == 0 {
        return Err(VoxcryptError::Config(
            "codec.sample_rate must be greater than zero".to_string(),
        ));
    }
    if config.codec.frame_samples == 0 {
        return Err(VoxcryptError::Config(
            "codec.frame_samples must be greater than zero".to_string(),
        ));
    }
    if config.ptt.enabled && config.ptt.output_gpio.is_none() {
        tracing::warn!("PTT enabled without output_gpio; keying line will not be driven");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_win() {
        let mut config = Config::default();
        let overrides = CliOverrides {
            period: Some(512),
            key_file: Some(PathBuf::from("/etc/key3")),
        };
        overrides.apply(&mut config);
        assert_eq!(config.audio.rx_period, 512);
        assert_eq!(config.audio.tx_period, 512);
        assert_eq!(config.crypto.key_path(), PathBuf::from("/etc/key3"));

        let mut untouched = Config::default();
        CliOverrides::default().apply(&mut untouched);
        assert_eq!(untouched.audio.tx_period, 0);
        assert!(untouched.crypto.key_file.is_none());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.codec.mode, CodecMode::Loopback);
        assert_eq!(config.codec.sample_rate, 8000);
        assert_eq!(config.codec.frame_samples, 320);
        assert!(!config.crypto.enabled);
        assert!(!config.ptt.enabled);
        assert_eq!(config.ptt.hang_periods, 4);
        assert_eq!(config.audio.rx_period, 0);
        assert_eq!(config.notify.tx_lead_in_periods, 6);
    }

    #[test]
    fn test_default_config_text_parses() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.codec.frame_samples, 320);
        assert_eq!(config.ptt.bias, LineBias::AsIs);
        assert_eq!(config.ptt.output_drive, LineDrive::PushPull);
        assert_eq!(config.notify.rx_prompt_file, PathBuf::from("/tmp/notify.wav"));
        assert_eq!(config.diagnostics.log_level, "info");
    }

    #[test]
    fn test_parse_ptt_section() {
        let toml_str = r#"
            [ptt]
            enabled = true
            input_gpio = 17
            active_low = true
            bias = "pull-up"
            output_gpio = 27
            output_drive = "open-drain"
            hang_periods = 8
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.ptt.enabled);
        assert_eq!(config.ptt.input_gpio, Some(17));
        assert!(config.ptt.active_low);
        assert_eq!(config.ptt.bias, LineBias::PullUp);
        assert_eq!(config.ptt.output_gpio, Some(27));
        assert_eq!(config.ptt.output_drive, LineDrive::OpenDrain);
        assert_eq!(config.ptt.hang_periods, 8);
        assert_eq!(config.ptt.chip, "/dev/gpiochip0");
        // Untouched sections fall back to defaults
        assert_eq!(config.codec.sample_rate, 8000);
    }

    #[test]
    fn test_key_path_from_index() {
        let mut crypto = CryptoConfig::default();
        assert_eq!(crypto.key_path(), PathBuf::from("/etc/key"));

        crypto.key_index = Some(1);
        assert_eq!(crypto.key_path(), PathBuf::from("/etc/key"));

        crypto.key_index = Some(3);
        assert_eq!(crypto.key_path(), PathBuf::from("/etc/key3"));

        crypto.key_file = Some(PathBuf::from("/run/keys/radio"));
        assert_eq!(crypto.key_path(), PathBuf::from("/run/keys/radio"));
    }

    #[test]
    fn test_load_config_rejects_zero_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[codec]\nframe_samples = 0\n").unwrap();

        let result = load_config(Some(&path));
        assert!(matches!(result, Err(VoxcryptError::Config(_))));
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.codec.frame_samples, 320);
    }
}
