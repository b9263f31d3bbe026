//! Tests for configuration loading and root folder resolution
//!
//! Tests that touch FESTQ_ROOT_FOLDER or FESTQ_CONFIG are marked #[serial]
//! so they never race on the process environment.

use festq_common::config::{
    resolve_database_path, resolve_root_folder, TomlConfig, CONFIG_ENV_VAR, ROOT_FOLDER_ENV_VAR,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
#[serial]
fn test_cli_argument_wins_over_everything() {
    env::set_var(ROOT_FOLDER_ENV_VAR, "/from/env");
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..TomlConfig::default()
    };

    let root = resolve_root_folder(Some(Path::new("/from/cli")), &toml);
    assert_eq!(root, PathBuf::from("/from/cli"));

    env::remove_var(ROOT_FOLDER_ENV_VAR);
}

#[test]
#[serial]
fn test_environment_wins_over_toml() {
    env::set_var(ROOT_FOLDER_ENV_VAR, "/from/env");
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..TomlConfig::default()
    };

    assert_eq!(resolve_root_folder(None, &toml), PathBuf::from("/from/env"));

    env::remove_var(ROOT_FOLDER_ENV_VAR);
}

#[test]
#[serial]
fn test_toml_used_without_cli_or_environment() {
    env::remove_var(ROOT_FOLDER_ENV_VAR);
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..TomlConfig::default()
    };

    assert_eq!(resolve_root_folder(None, &toml), PathBuf::from("/from/toml"));
}

#[test]
#[serial]
fn test_platform_default_as_last_resort() {
    env::remove_var(ROOT_FOLDER_ENV_VAR);
    let root = resolve_root_folder(None, &TomlConfig::default());
    assert!(!root.as_os_str().is_empty());
    assert!(root.ends_with("festq") || root.ends_with("festq_data"));
}

#[test]
#[serial]
fn test_missing_config_file_falls_back_to_defaults() {
    env::remove_var(CONFIG_ENV_VAR);
    let dir = TempDir::new().unwrap();

    let config = TomlConfig::load_or_default(Some(&dir.path().join("absent.toml")));
    assert_eq!(config.port, 5780);
}

#[test]
#[serial]
fn test_config_file_from_environment() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
        port = 7001
        database_path = "/tmp/festq-test.db"

        [playback]
        auto_advance = false
        "#,
    )
    .unwrap();

    env::set_var(CONFIG_ENV_VAR, &path);
    let config = TomlConfig::load_or_default(None);
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(config.port, 7001);
    assert!(!config.playback.auto_advance);
    assert_eq!(
        resolve_database_path(Path::new("/ignored"), &config),
        PathBuf::from("/tmp/festq-test.db")
    );
}

#[test]
#[serial]
fn test_invalid_config_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[voting]\ncandidates_per_round = 0\n").unwrap();

    let config = TomlConfig::load_or_default(Some(&path));
    assert_eq!(config.voting.candidates_per_round, 4);
}
