//! Configuration loading tests
//!
//! Verifies the priority order of configuration sources:
//! Environment variables > Configuration file > Default values

use std::env;
use std::io::Write;

use protocol_sniffer::config::{defaults, SniffConfig};
use serial_test::serial;

const VARS: &[&str] = &[
    "PROTOCOL_SNIFFER_LISTEN",
    "PROTOCOL_SNIFFER_LOG_LEVEL",
    "PROTOCOL_SNIFFER_MATCH_TIMEOUT_MS",
    "PROTOCOL_SNIFFER_HTTP1_MAX_HEAD",
];

fn clear_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

fn config_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .prefix("sniffer")
        .suffix(".json")
        .tempfile()
        .expect("Failed to create config file");
    file.write_all(content.as_bytes()).expect("Failed to write config file");
    file
}

#[test]
#[serial]
fn test_file_overrides_defaults() {
    clear_env();
    let file = config_file(r#"{
        "listen": ["tcp://127.0.0.1:0", "unix:///tmp/sniffer.sock"],
        "http1_max_head": 4096
    }"#);

    let config = SniffConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.listen.len(), 2);
    assert_eq!(config.http1_max_head, 4096);
    assert_eq!(config.match_timeout_ms, defaults::MATCH_TIMEOUT_MS);
    assert_eq!(config.log_level, defaults::LOG_LEVEL);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_env_overrides_file() {
    clear_env();
    let file = config_file(r#"{"match_timeout_ms": 30, "log_level": "warn"}"#);

    env::set_var("PROTOCOL_SNIFFER_MATCH_TIMEOUT_MS", "75");
    env::set_var("PROTOCOL_SNIFFER_LISTEN", "tcp://127.0.0.1:1,tcp://127.0.0.1:2");
    let config = SniffConfig::load(Some(file.path()));
    clear_env();

    let config = config.unwrap();
    assert_eq!(config.match_timeout_ms, 75);
    assert_eq!(config.log_level, "warn");
    assert_eq!(
        config.listen,
        vec!["tcp://127.0.0.1:1".to_string(), "tcp://127.0.0.1:2".to_string()]
    );
}

#[test]
#[serial]
fn test_env_without_file() {
    clear_env();
    env::set_var("PROTOCOL_SNIFFER_HTTP1_MAX_HEAD", "1024");
    let config = SniffConfig::load(None);
    clear_env();

    assert_eq!(config.unwrap().http1_max_head, 1024);
}

#[test]
#[serial]
fn test_invalid_file_is_rejected() {
    clear_env();
    let file = config_file(r#"{"listen": ["tcp://127.0.0.1:0"], "target": "127.0.0.1:6000"}"#);
    assert!(SniffConfig::load(Some(file.path())).is_err(), "Unknown keys should be rejected");

    let file = config_file(r#"{"listen": ["udp://127.0.0.1:53"]}"#);
    let config = SniffConfig::load(Some(file.path())).unwrap();
    assert!(config.validate().is_err(), "Unsupported networks should fail validation");
}
