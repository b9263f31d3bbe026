//! Bootstrap configuration loading and root folder resolution
//!
//! Settings priority, highest first:
//! 1. Command-line argument
//! 2. Environment variable
//! 3. TOML config file
//! 4. Built-in defaults
//!
//! A missing or unreadable config file is never fatal: it is logged and the
//! built-in defaults are used.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "FESTQ_CONFIG";

/// Environment variable naming the root (data) folder
pub const ROOT_FOLDER_ENV_VAR: &str = "FESTQ_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "festq.db";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Root folder for the database (optional)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Explicit database path; overrides `<root_folder>/festq.db`
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Interface to bind
    #[serde(default = "default_bind")]
    pub bind: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub voting: VotingConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub broadcast: BroadcastConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Voting round configuration
#[derive(Debug, Clone, Deserialize)]
pub struct VotingConfig {
    /// Round length used when an open request does not name one
    #[serde(default = "default_round_seconds")]
    pub default_round_seconds: u32,

    /// Maximum candidates picked for automatically opened rounds
    #[serde(default = "default_candidates_per_round")]
    pub candidates_per_round: usize,

    /// Open the next round automatically when one times out
    #[serde(default = "default_true")]
    pub auto_rounds: bool,
}

/// Playback configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    /// Finish the playing track once its duration elapses
    #[serde(default = "default_true")]
    pub auto_advance: bool,

    /// Scheduler tick period in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

/// Broadcast configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// Per-subscriber channel capacity
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Envelopes retained for gap recovery
    #[serde(default = "default_replay_depth")]
    pub replay_depth: usize,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5780
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_round_seconds() -> u32 {
    150
}

fn default_candidates_per_round() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_tick_ms() -> u64 {
    250
}

fn default_capacity() -> usize {
    1000
}

fn default_replay_depth() -> usize {
    256
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            database_path: None,
            bind: default_bind(),
            port: default_port(),
            logging: LoggingConfig::default(),
            voting: VotingConfig::default(),
            playback: PlaybackConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            default_round_seconds: default_round_seconds(),
            candidates_per_round: default_candidates_per_round(),
            auto_rounds: true,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            auto_advance: true,
            tick_ms: default_tick_ms(),
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            replay_depth: default_replay_depth(),
        }
    }
}

impl TomlConfig {
    /// Parse TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: TomlConfig =
            toml::from_str(text).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file path
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Load from `explicit`, else `FESTQ_CONFIG`, else the platform default
    /// location, falling back to defaults when nothing can be read
    pub fn load_or_default(explicit: Option<&Path>) -> Self {
        let candidate = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
            .or_else(default_config_path);

        let Some(path) = candidate else {
            warn!("No config directory on this platform, using built-in defaults");
            return Self::default();
        };

        if !path.exists() {
            info!("Config file {} not found, using built-in defaults", path.display());
            return Self::default();
        }

        match Self::load(&path) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Failed to load {}: {} (using built-in defaults)", path.display(), e);
                Self::default()
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.voting.default_round_seconds == 0 {
            return Err(Error::Config(
                "voting.default_round_seconds must be at least 1".to_string(),
            ));
        }
        if self.voting.candidates_per_round == 0 {
            return Err(Error::Config(
                "voting.candidates_per_round must be at least 1".to_string(),
            ));
        }
        if self.playback.tick_ms == 0 {
            return Err(Error::Config("playback.tick_ms must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Platform config file location (`<config_dir>/festq/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("festq").join("config.toml"))
}

/// Resolve the root folder: CLI → environment → TOML → platform default
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// Resolve the database path: explicit TOML path, else `<root>/festq.db`
pub fn resolve_database_path(root_folder: &Path, toml: &TomlConfig) -> PathBuf {
    toml.database_path
        .clone()
        .unwrap_or_else(|| root_folder.join(DATABASE_FILE_NAME))
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("festq"))
        .unwrap_or_else(|| PathBuf::from("./festq_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = TomlConfig::from_toml_str("").unwrap();
        assert_eq!(config.port, 5780);
        assert_eq!(config.voting.default_round_seconds, 150);
        assert_eq!(config.voting.candidates_per_round, 4);
        assert!(config.voting.auto_rounds);
        assert!(config.playback.auto_advance);
        assert_eq!(config.broadcast.replay_depth, 256);
    }

    #[test]
    fn test_partial_sections_merge_with_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            port = 6000

            [voting]
            default_round_seconds = 30

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 6000);
        assert_eq!(config.voting.default_round_seconds, 30);
        assert_eq!(config.voting.candidates_per_round, 4);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_zero_round_length_rejected() {
        let result = TomlConfig::from_toml_str("[voting]\ndefault_round_seconds = 0\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(TomlConfig::from_toml_str("port = \"not a number\"").is_err());
    }

    #[test]
    fn test_database_path_defaults_into_root() {
        let config = TomlConfig::default();
        let path = resolve_database_path(Path::new("/srv/festq"), &config);
        assert_eq!(path, PathBuf::from("/srv/festq/festq.db"));
    }
}
