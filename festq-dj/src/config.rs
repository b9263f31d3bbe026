//! festq-dj specific configuration

use festq_common::config::{resolve_database_path, resolve_root_folder, TomlConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Queue service configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub root_folder: PathBuf,
    pub db_path: PathBuf,
    pub bind_addr: String,
    pub service: ServiceConfig,
}

impl Config {
    /// Resolve from the TOML config plus command-line overrides
    pub fn resolve(toml: &TomlConfig, cli_root: Option<&Path>, cli_port: Option<u16>) -> Self {
        let root_folder = resolve_root_folder(cli_root, toml);
        let db_path = resolve_database_path(&root_folder, toml);
        let port = cli_port.unwrap_or(toml.port);

        Self {
            root_folder,
            db_path,
            bind_addr: format!("{}:{}", toml.bind, port),
            service: ServiceConfig::from(toml),
        }
    }
}

/// Voting and playback behavior
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Round length when an open request does not name one
    pub default_round_seconds: u32,
    pub candidates_per_round: usize,
    /// Open a new round whenever none is open
    pub auto_rounds: bool,
    /// Finish the playing track when its duration runs out
    pub auto_advance: bool,
    pub tick_interval: Duration,
    pub broadcast_capacity: usize,
    pub replay_depth: usize,
}

impl From<&TomlConfig> for ServiceConfig {
    fn from(toml: &TomlConfig) -> Self {
        Self {
            default_round_seconds: toml.voting.default_round_seconds,
            candidates_per_round: toml.voting.candidates_per_round,
            auto_rounds: toml.voting.auto_rounds,
            auto_advance: toml.playback.auto_advance,
            tick_interval: Duration::from_millis(toml.playback.tick_ms),
            broadcast_capacity: toml.broadcast.capacity,
            replay_depth: toml.broadcast.replay_depth,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from(&TomlConfig::default())
    }
}

impl ServiceConfig {
    /// Operator-driven configuration: no automatic rounds or advances
    pub fn manual() -> Self {
        Self {
            auto_rounds: false,
            auto_advance: false,
            ..Self::default()
        }
    }
}
