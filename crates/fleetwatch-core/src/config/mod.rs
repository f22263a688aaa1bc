//! Configuration parsing.
//!
//! `fleetwatch.toml` has three optional sections; every field has a default,
//! so an empty (or absent) file is a valid configuration.
//!
//! ```toml
//! [store]
//! home = "/var/lib/fleetwatch"
//! event_capacity = 2000
//!
//! [patrol]
//! interval = "30s"
//! stuck_threshold = "60s"
//! directory_command = ["tmux-driver", "list"]
//! reader_command = ["tmux-driver", "capture"]
//!
//! [supervisor]
//! max_attempts = 5
//! initial_delay = "1s"
//! max_delay = "60s"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coordination::DEFAULT_EVENT_CAPACITY;
use crate::patrol::command::DEFAULT_COMMAND_TIMEOUT;
use crate::patrol::{
    DEFAULT_FINGERPRINT_LINES, DEFAULT_INTERVAL, DEFAULT_STUCK_THRESHOLD, DEFAULT_TAIL_LINES,
    PatrolSettings,
};
use crate::supervisor::RestartPolicy;

/// Environment variable that overrides the state directory.
pub const HOME_ENV: &str = "FLEETWATCH_HOME";

/// Directory under the user's home used when nothing else is configured.
pub const DEFAULT_HOME_DIR_NAME: &str = ".fleetwatch";

/// Config file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "fleetwatch.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Coordination store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Patrol settings.
    #[serde(default)]
    pub patrol: PatrolConfig,

    /// Restart policy for supervised workers.
    #[serde(default)]
    pub supervisor: RestartPolicy,
}

impl FleetConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Like [`from_file`](Self::from_file), but a missing file yields the
    /// defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            },
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Rejects values that would make the store or patrol misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.event_capacity == 0 {
            return Err(ConfigError::Validation(
                "store.event_capacity must be at least 1".to_string(),
            ));
        }
        if self.patrol.fingerprint_lines == 0 {
            return Err(ConfigError::Validation(
                "patrol.fingerprint_lines must be at least 1".to_string(),
            ));
        }
        if self.patrol.max_consecutive_failures == Some(0) {
            return Err(ConfigError::Validation(
                "patrol.max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        if self.patrol.command_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "patrol.command_timeout must be non-zero".to_string(),
            ));
        }
        for (name, argv) in [
            ("directory_command", &self.patrol.directory_command),
            ("reader_command", &self.patrol.reader_command),
        ] {
            if argv.first().is_some_and(|program| program.trim().is_empty()) {
                return Err(ConfigError::Validation(format!(
                    "patrol.{name} must start with a program name"
                )));
            }
        }
        Ok(())
    }
}

/// `[store]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// State directory; see [`resolve_home`] for precedence.
    #[serde(default)]
    pub home: Option<PathBuf>,

    /// Events retained in the coordination log.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

const fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            home: None,
            event_capacity: default_event_capacity(),
        }
    }
}

/// `[patrol]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatrolConfig {
    /// Pause between cycles.
    #[serde(default = "default_interval")]
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Stagnation needed before an agent counts as stuck.
    #[serde(default = "default_stuck_threshold")]
    #[serde(with = "humantime_serde")]
    pub stuck_threshold: Duration,

    /// Trailing lines hashed into each fingerprint.
    #[serde(default = "default_fingerprint_lines")]
    pub fingerprint_lines: usize,

    /// Trailing lines kept in each agent row.
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,

    /// Stop after this many cycles.
    #[serde(default)]
    pub max_cycles: Option<u64>,

    /// Hand control back to the supervisor after this many failed cycles in
    /// a row. Unset keeps patrolling through any outage.
    #[serde(default)]
    pub max_consecutive_failures: Option<u64>,

    /// Session directory command (program then arguments).
    #[serde(default)]
    pub directory_command: Vec<String>,

    /// Bulk output reader command (program then arguments).
    #[serde(default)]
    pub reader_command: Vec<String>,

    /// Kill collaborator commands after this long.
    #[serde(default = "default_command_timeout")]
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,

    /// Publish each cycle into the coordination log.
    #[serde(default = "default_true")]
    pub publish_events: bool,

    /// Keep the per-agent status board up to date.
    #[serde(default = "default_true")]
    pub status_board: bool,
}

const fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

const fn default_stuck_threshold() -> Duration {
    DEFAULT_STUCK_THRESHOLD
}

const fn default_fingerprint_lines() -> usize {
    DEFAULT_FINGERPRINT_LINES
}

const fn default_tail_lines() -> usize {
    DEFAULT_TAIL_LINES
}

const fn default_command_timeout() -> Duration {
    DEFAULT_COMMAND_TIMEOUT
}

const fn default_true() -> bool {
    true
}

impl Default for PatrolConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            stuck_threshold: default_stuck_threshold(),
            fingerprint_lines: default_fingerprint_lines(),
            tail_lines: default_tail_lines(),
            max_cycles: None,
            max_consecutive_failures: None,
            directory_command: Vec::new(),
            reader_command: Vec::new(),
            command_timeout: default_command_timeout(),
            publish_events: true,
            status_board: true,
        }
    }
}

impl PatrolConfig {
    /// Engine settings derived from this section.
    #[must_use]
    pub const fn settings(&self) -> PatrolSettings {
        PatrolSettings {
            stuck_threshold: self.stuck_threshold,
            fingerprint_lines: self.fingerprint_lines,
            tail_lines: self.tail_lines,
        }
    }
}

/// Picks the state directory: explicit override, then `$FLEETWATCH_HOME`,
/// then `[store] home`, then `~/.fleetwatch`.
pub fn resolve_home(
    override_home: Option<&Path>,
    config: &FleetConfig,
) -> Result<PathBuf, ConfigError> {
    let from_env = std::env::var_os(HOME_ENV).map(PathBuf::from);
    let user_home = directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());
    pick_home(override_home, from_env, config.store.home.as_deref(), user_home)
}

fn pick_home(
    override_home: Option<&Path>,
    from_env: Option<PathBuf>,
    from_config: Option<&Path>,
    user_home: Option<PathBuf>,
) -> Result<PathBuf, ConfigError> {
    if let Some(home) = override_home {
        return Ok(home.to_path_buf());
    }
    if let Some(home) = from_env.filter(|home| !home.as_os_str().is_empty()) {
        return Ok(home);
    }
    if let Some(home) = from_config {
        return Ok(home.to_path_buf());
    }
    user_home
        .map(|home| home.join(DEFAULT_HOME_DIR_NAME))
        .ok_or_else(|| {
            ConfigError::Validation(format!(
                "cannot determine a state directory; set {HOME_ENV} or pass --home"
            ))
        })
}

/// Durations as human-readable strings (`"30s"`, `"1m 30s"`).
pub(crate) mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
