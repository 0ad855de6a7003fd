//! Integration tests for configuration loading
//!
//! Covers TOML parsing with partial tables, default fallback when no file
//! exists, and validation of loaded values.

use std::io::Write;
use std::time::Duration;

use serial_test::serial;
use wxyc_common::config::{BackoffConfig, LoggingConfig, TomlConfig};
use wxyc_common::{Error, OverflowPolicy, StreamingConfiguration};

#[test]
fn test_partial_toml_keeps_defaults() {
    let config = TomlConfig::from_toml_str(
        r#"
        [stream]
        url = "http://localhost:8000/live.mp3"
        max_reconnect_attempts = 3
        "#,
    )
    .unwrap();

    assert_eq!(config.stream.url, "http://localhost:8000/live.mp3");
    assert_eq!(config.stream.max_reconnect_attempts, 3);

    // Everything else falls back to built-in defaults
    let defaults = StreamingConfiguration::default();
    assert_eq!(config.stream.buffer_queue_capacity, defaults.buffer_queue_capacity);
    assert_eq!(config.stream.backoff, BackoffConfig::default());
    assert_eq!(config.logging, LoggingConfig::default());
}

#[test]
fn test_full_toml() {
    let config = TomlConfig::from_toml_str(
        r#"
        [logging]
        level = "debug"

        [stream]
        url = "https://example.org/radio.mp3"
        auto_reconnect = false
        max_reconnect_attempts = 1
        buffer_queue_capacity = 20
        minimum_buffers_before_playback = 5
        connection_timeout_ms = 2500
        overflow_policy = "block_producer"
        max_pending_chunks = 4
        stall_timeout_ms = 4000
        underrun_check_interval_ms = 50
        user_agent = "test-agent"
        event_capacity = 16

        [stream.backoff]
        initial_delay_ms = 100
        max_delay_ms = 800
        multiplier = 3.0
        jitter = 0.25
        "#,
    )
    .unwrap();

    assert_eq!(config.logging.level, "debug");
    let stream = &config.stream;
    assert!(!stream.auto_reconnect);
    assert_eq!(stream.buffer_queue_capacity, 20);
    assert_eq!(stream.minimum_buffers_before_playback, 5);
    assert_eq!(stream.connection_timeout(), Duration::from_millis(2500));
    assert_eq!(stream.overflow_policy, OverflowPolicy::BlockProducer);
    assert_eq!(stream.max_pending_chunks, 4);
    assert_eq!(stream.stall_timeout(), Duration::from_secs(4));
    assert_eq!(stream.user_agent, "test-agent");
    assert_eq!(stream.backoff.initial_delay(), Duration::from_millis(100));
    assert_eq!(stream.backoff.max_delay(), Duration::from_millis(800));
    assert_eq!(stream.backoff.multiplier, 3.0);
    stream.validate().unwrap();
}

#[test]
fn test_invalid_toml_is_config_error() {
    let result = TomlConfig::from_toml_str("[stream]\nbuffer_queue_capacity = \"many\"");
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[stream]\nurl = \"http://127.0.0.1:9/x.mp3\"").unwrap();

    let config = TomlConfig::load_or_default(Some(file.path())).unwrap();
    assert_eq!(config.stream.url, "http://127.0.0.1:9/x.mp3");
}

#[test]
fn test_explicit_missing_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    assert!(matches!(
        TomlConfig::load_or_default(Some(&missing)),
        Err(Error::Config(_))
    ));
}

#[test]
#[serial]
fn test_missing_default_file_uses_defaults() {
    // Point the platform config dir at an empty temp directory
    let dir = tempfile::tempdir().unwrap();
    let previous = std::env::var_os("XDG_CONFIG_HOME");
    std::env::set_var("XDG_CONFIG_HOME", dir.path());

    let config = TomlConfig::load_or_default(None).unwrap();

    match previous {
        Some(value) => std::env::set_var("XDG_CONFIG_HOME", value),
        None => std::env::remove_var("XDG_CONFIG_HOME"),
    }

    #[cfg(target_os = "linux")]
    assert_eq!(config, TomlConfig::default());
    #[cfg(not(target_os = "linux"))]
    let _ = config;
}
