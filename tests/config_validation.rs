//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use datagram_transport::config::{LoggingConfig, NetworkConfig, TransportConfig};
use serial_test::serial;
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = NetworkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_default_derived_sizes() {
    let config = TransportConfig::default();
    assert_eq!(config.mtu, 1400);
    assert_eq!(config.max_connections, 16);
    assert_eq!(config.max_events_per_connection, 100);
    assert_eq!(config.fragment_size(), 1390);
    assert_eq!(config.max_packet_size(), 1390 * 64);
    assert_eq!(config.max_unfragmented_payload(), 1396);
    assert_eq!(config.min_receive_buffer_size(), 1390 * 64 + 1400);
    assert!(config.receive_buffer_size >= config.min_receive_buffer_size());
}

#[test]
fn test_tiny_mtu() {
    let mut config = NetworkConfig::default();
    config.transport.mtu = 10;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("MTU too small")));
}

#[test]
fn test_huge_mtu() {
    let mut config = NetworkConfig::default();
    config.transport.mtu = 100_000;
    config.transport.receive_buffer_size = 200_000;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("MTU too large")));
}

#[test]
fn test_receive_buffer_smaller_than_mtu() {
    let mut config = NetworkConfig::default();
    config.transport.receive_buffer_size = 512;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("must hold the largest packet plus one MTU")));
}

#[test]
fn test_receive_buffer_must_hold_largest_packet() {
    let mut config = NetworkConfig::default();
    config.transport.receive_buffer_size = 64 * 1024;
    assert!(config.transport.max_packet_size() > 64 * 1024);

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("must hold the largest packet plus one MTU")));

    config.transport.receive_buffer_size = config.transport.min_receive_buffer_size();
    assert!(config.validate().is_empty());

    // A smaller MTU lowers the requirement
    config.transport.mtu = 512;
    config.transport.receive_buffer_size = 502 * 64 + 512;
    assert!(config.validate().is_empty());
}

#[test]
fn test_zero_max_connections() {
    let mut config = NetworkConfig::default();
    config.transport.max_connections = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Max connections must be greater than 0")));
}

#[test]
fn test_excessive_max_connections() {
    let mut config = NetworkConfig::default();
    config.transport.max_connections = 70_000;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Max connections too large")));
}

#[test]
fn test_zero_events_per_connection() {
    let mut config = NetworkConfig::default();
    config.transport.max_events_per_connection = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Max events per connection")));
}

#[test]
fn test_zero_connect_attempts() {
    let mut config = NetworkConfig::default();
    config.transport.max_connect_attempts = 0;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Max connect attempts")));
}

#[test]
fn test_disconnect_timeout_must_exceed_connect_timeout() {
    let mut config = NetworkConfig::default();
    config.transport.connect_timeout = Duration::from_secs(5);
    config.transport.disconnect_timeout = Duration::from_secs(1);

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Disconnect timeout should exceed")));
}

#[test]
fn test_zero_connect_timeout() {
    let mut config = NetworkConfig::default();
    config.transport.connect_timeout = Duration::ZERO;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Connect timeout must be greater than 0")));
}

#[test]
fn test_empty_app_name() {
    let mut config = NetworkConfig::default();
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Application name cannot be empty")));
}

#[test]
fn test_long_app_name() {
    let mut config = NetworkConfig::default();
    config.logging.app_name = "a".repeat(100);

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Application name too long")));
}

#[test]
fn test_validate_strict_with_invalid_config() {
    let mut config = NetworkConfig::default();
    config.transport.mailbox_capacity = 0;

    let result = config.validate_strict();
    assert!(result.is_err());

    if let Err(e) = result {
        let error_str = e.to_string();
        assert!(error_str.contains("Configuration validation failed"));
        assert!(error_str.contains("Mailbox capacity"));
    }
}

#[test]
fn test_multiple_validation_errors() {
    let config = NetworkConfig::default_with_overrides(|config| {
        config.transport.max_connections = 0;
        config.transport.max_events_per_connection = 0;
        config.transport.max_connect_attempts = 0;
        config.transport.max_in_flight_fragments = 0;
        config.logging.app_name = String::new();
    });

    let errors = config.validate();
    assert!(
        errors.len() >= 5,
        "Expected at least 5 errors, got {}: {:?}",
        errors.len(),
        errors
    );
}

#[test]
fn test_partial_toml_uses_defaults() {
    let config = NetworkConfig::from_toml(
        r#"
        [transport]
        mtu = 512
        connect_timeout = 250

        [logging]
        log_level = "debug"
        "#,
    )
    .expect("Partial config should parse");

    assert_eq!(config.transport.mtu, 512);
    assert_eq!(config.transport.connect_timeout, Duration::from_millis(250));
    assert_eq!(config.transport.max_connections, 16);
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert_eq!(config.logging.app_name, "datagram-transport");
}

#[test]
fn test_invalid_toml_rejected() {
    assert!(NetworkConfig::from_toml("[transport]\nmtu = \"big\"").is_err());
    assert!(NetworkConfig::from_toml("[logging]\nlog_level = \"loud\"").is_err());
}

#[test]
fn test_example_config_round_trips() {
    let example = NetworkConfig::example_config();
    assert!(example.contains("[transport]"));

    let parsed = NetworkConfig::from_toml(&example).expect("Example config should parse");
    assert!(parsed.validate().is_empty());
    assert_eq!(parsed.transport.mtu, TransportConfig::default().mtu);
}

#[test]
fn test_save_and_load_file() {
    let path = std::env::temp_dir().join(format!(
        "datagram-transport-config-{}.toml",
        std::process::id()
    ));
    let config = NetworkConfig {
        transport: TransportConfig {
            max_connections: 4,
            disconnect_timeout: Duration::from_secs(3),
            ..TransportConfig::default()
        },
        logging: LoggingConfig {
            app_name: "relay".to_string(),
            log_level: Level::WARN,
            json_format: true,
        },
    };

    config.save_to_file(&path).expect("Config should save");
    let loaded = NetworkConfig::from_file(&path).expect("Config should load");
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded.transport.max_connections, 4);
    assert_eq!(loaded.transport.disconnect_timeout, Duration::from_secs(3));
    assert_eq!(loaded.logging.app_name, "relay");
    assert_eq!(loaded.logging.log_level, Level::WARN);
    assert!(loaded.logging.json_format);
}

#[test]
fn test_missing_file_reports_error() {
    let result = NetworkConfig::from_file("/nonexistent/datagram-transport.toml");
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_env_overrides() {
    std::env::set_var("DATAGRAM_TRANSPORT_MAX_CONNECTIONS", "8");
    std::env::set_var("DATAGRAM_TRANSPORT_CONNECT_TIMEOUT_MS", "200");
    std::env::set_var("DATAGRAM_TRANSPORT_LOG_LEVEL", "trace");

    let config = NetworkConfig::from_env();

    std::env::remove_var("DATAGRAM_TRANSPORT_MAX_CONNECTIONS");
    std::env::remove_var("DATAGRAM_TRANSPORT_CONNECT_TIMEOUT_MS");
    std::env::remove_var("DATAGRAM_TRANSPORT_LOG_LEVEL");

    let config = config.expect("Env config should load");
    assert_eq!(config.transport.max_connections, 8);
    assert_eq!(config.transport.connect_timeout, Duration::from_millis(200));
    assert_eq!(config.logging.log_level, Level::TRACE);
}

#[test]
#[serial]
fn test_env_invalid_log_level() {
    std::env::set_var("DATAGRAM_TRANSPORT_LOG_LEVEL", "chatty");
    let result = NetworkConfig::from_env();
    std::env::remove_var("DATAGRAM_TRANSPORT_LOG_LEVEL");
    assert!(result.is_err());
}
