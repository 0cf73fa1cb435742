//! Controller configuration using Figment.
//!
//! Configuration is layered, later layers win:
//! 1. Built-in defaults
//! 2. `config/stimctl.toml` (or the file given with `--config`)
//! 3. Environment variables prefixed with `STIMCTL_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use stim_controller::config::ControllerConfig;
//!
//! let config = ControllerConfig::load()?;
//! println!("Baud rate: {}", config.serial.baud_rate);
//! # Ok::<(), figment::Error>(())
//! ```

use crate::command::attributes::MIN_PULSE_WIDTH_MS;
use crate::command::grammar::{Grammar, NoShortcuts};
use crate::command::SessionParams;
use crate::device::session::SessionTimeouts;
use crate::scheduler::SchedulerConfig;
use crate::shortcuts::ExpansionLimits;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/stimctl.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial link to the controller board
    pub serial: SerialConfig,
    /// Files and directories
    pub paths: PathsConfig,
    /// Session defaults and scheduling knobs
    pub session: SessionConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Serial port settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Explicit device path; auto-detected from `board` when unset
    pub port: Option<String>,
    /// Substring of the USB manufacturer/product used for auto-detection
    pub board: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Acknowledgment timeout for untimed commands
    pub ack_timeout_ms: u64,
    /// Grace added to the nominal duration of timed commands
    pub timed_grace_ms: u64,
    /// Idle window that ends a buffer drain
    pub drain_idle_ms: u64,
    /// Delay after opening while the board resets
    pub settle_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            board: "Arduino".to_string(),
            baud_rate: 9600,
            ack_timeout_ms: 5000,
            timed_grace_ms: 5000,
            drain_idle_ms: 10,
            settle_ms: 2000,
        }
    }
}

impl SerialConfig {
    /// Handshake timing derived from this section.
    pub fn timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            ack: Duration::from_millis(self.ack_timeout_ms),
            timed_grace: Duration::from_millis(self.timed_grace_ms),
            drain_idle: Duration::from_millis(self.drain_idle_ms),
        }
    }
}

/// File locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Persisted shortcut definitions
    pub shortcuts_file: PathBuf,
    /// Directory for autosaved protocol files
    pub protocol_dir: PathBuf,
    /// Directory for event logs
    pub log_dir: PathBuf,
    /// Directory holding the stimulus videos
    pub video_dir: PathBuf,
    /// Extension of stimulus files (without dot)
    pub video_extension: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            shortcuts_file: PathBuf::from("shortcuts.txt"),
            protocol_dir: PathBuf::from("protocols"),
            log_dir: PathBuf::from("logs"),
            video_dir: PathBuf::from("videos"),
            video_extension: "avi".to_string(),
        }
    }
}

/// Session defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Keyword that selects the active stimulus
    pub stim_name: String,
    /// Initial values of the mutable attributes
    pub attributes: SessionParams,
    /// Round-trip overhead assumed for untimed hardware commands
    pub hardware_overhead_ms: u64,
    /// Floor for drift-adjusted interval waits
    pub min_interval_ms: u64,
    /// Maximum nesting of shortcuts and repetition blocks
    pub max_expansion_depth: usize,
    /// Maximum number of commands after expansion
    pub max_expanded_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stim_name: "r/v".to_string(),
            attributes: SessionParams::default(),
            hardware_overhead_ms: 30,
            min_interval_ms: 100,
            max_expansion_depth: 32,
            max_expanded_len: 100_000,
        }
    }
}

impl SessionConfig {
    /// Scheduler timing derived from this section.
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            hardware_overhead: Duration::from_millis(self.hardware_overhead_ms),
            min_interval: Duration::from_millis(self.min_interval_ms),
        }
    }

    /// Expansion guards derived from this section.
    pub fn expansion_limits(&self) -> ExpansionLimits {
        ExpansionLimits {
            max_depth: self.max_expansion_depth,
            max_len: self.max_expanded_len,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from the default path and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    /// Example override: `STIMCTL_SERIAL__BAUD_RATE=115200`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    /// The layered provider, exposed for inspection.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(ControllerConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("STIMCTL_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        if self.serial.baud_rate == 0 {
            return Err("Invalid baud_rate 0".to_string());
        }

        // The alias must be free: not a keyword and not a parseable command.
        let alias = self.session.stim_name.trim();
        if alias.is_empty() || alias.contains(['>', '(', ')', ' ']) {
            return Err(format!("Invalid stim_name '{}'", self.session.stim_name));
        }
        let defaults = SessionParams::default();
        let probe = Grammar::new(&defaults, &[], "");
        if probe.validate(alias, &NoShortcuts).is_ok() {
            return Err(format!(
                "stim_name '{alias}' collides with a built-in command"
            ));
        }

        let attrs = &self.session.attributes;
        if attrs.pulse_width_ms < MIN_PULSE_WIDTH_MS {
            return Err(format!(
                "Invalid pulse_width {} ms. Must be at least {MIN_PULSE_WIDTH_MS} ms",
                attrs.pulse_width_ms
            ));
        }
        if !(attrs.pulse_span_s > 0.0 && attrs.pulse_frequency_hz > 0.0) {
            return Err("pulse_span and pulse_frequency must be positive".to_string());
        }
        if attrs.u_time_s < 0.0 {
            return Err(format!("Invalid u_time {}", attrs.u_time_s));
        }

        if self.session.max_expansion_depth == 0 || self.session.max_expanded_len == 0 {
            return Err("Expansion limits must be non-zero".to_string());
        }

        Ok(())
    }
}
