//! Integration tests for configuration parsing
//!
//! Tests bridge configuration loading, including:
//! - Minimal and full TOML files
//! - Section defaults
//! - Invalid configuration handling
//! - Save/load round trip through a real file

use server::config::{BridgeConfig, PromptAnswer};
use std::time::Duration;
use tempfile::tempdir;

const FULL_CONFIG: &str = r#"
[server]
log_level = "debug"

[usb]
filters = ["0x0403:*", "0x10c4:0xea60"]
event_poll_ms = 250

[permission]
approved_devices = ["0x0403:0x6001"]
prompt = "grant"

[sessions]
base_id = 500
"#;

fn write_config(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bridge.toml");
    std::fs::write(&path, content).unwrap();
    (dir, path)
}

#[test]
fn test_full_config() {
    let (_dir, path) = write_config(FULL_CONFIG);
    let config = BridgeConfig::load(Some(path)).unwrap();

    assert_eq!(config.server.log_level, "debug");
    assert_eq!(config.usb.filters.len(), 2);
    assert_eq!(config.usb.event_poll_interval(), Duration::from_millis(250));
    assert_eq!(config.permission.prompt, PromptAnswer::Grant);
    assert_eq!(config.sessions.base_id, 500);

    let policy = config.permission.policy();
    assert!(policy.grant_unapproved);
    assert_eq!(policy.approved, vec!["0x0403:0x6001".to_string()]);
}

#[test]
fn test_missing_sections_use_defaults() {
    let (_dir, path) = write_config("[server]\nlog_level = \"warn\"\n");
    let config = BridgeConfig::load(Some(path)).unwrap();

    assert_eq!(config.server.log_level, "warn");
    assert!(config.usb.filters.is_empty());
    assert_eq!(config.usb.event_poll_ms, 100);
    assert_eq!(config.permission.prompt, PromptAnswer::Deny);
    assert_eq!(config.sessions.base_id, 100);
}

#[test]
fn test_empty_file_is_default() {
    let (_dir, path) = write_config("");
    let config = BridgeConfig::load(Some(path)).unwrap();
    assert_eq!(config.server.log_level, "info");
}

#[test]
fn test_invalid_log_level_rejected() {
    let (_dir, path) = write_config("[server]\nlog_level = \"loud\"\n");
    let err = BridgeConfig::load(Some(path)).unwrap_err();
    assert!(format!("{:#}", err).contains("Invalid log level"));
}

#[test]
fn test_invalid_filter_rejected() {
    let (_dir, path) = write_config("[usb]\nfilters = [\"0403:6001\"]\n");
    assert!(BridgeConfig::load(Some(path)).is_err());
}

#[test]
fn test_invalid_prompt_answer_rejected() {
    let (_dir, path) = write_config("[permission]\nprompt = \"maybe\"\n");
    let err = BridgeConfig::load(Some(path)).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse"));
}

#[test]
fn test_zero_base_id_rejected() {
    let (_dir, path) = write_config("[sessions]\nbase_id = 0\n");
    assert!(BridgeConfig::load(Some(path)).is_err());
}

#[test]
fn test_missing_file() {
    let dir = tempdir().unwrap();
    let result = BridgeConfig::load(Some(dir.path().join("absent.toml")));
    assert!(result.is_err());
}

#[test]
fn test_save_and_reload() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("bridge.toml");

    let mut config = BridgeConfig::default();
    config.usb.filters = vec!["0x1a86:*".to_string()];
    config.sessions.base_id = 42;
    config.save(&path).unwrap();

    let loaded = BridgeConfig::load(Some(path)).unwrap();
    assert_eq!(loaded.usb.filters, vec!["0x1a86:*".to_string()]);
    assert_eq!(loaded.sessions.base_id, 42);
}
