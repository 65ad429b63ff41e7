//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;
use tracing::Level;
use wirelink::config::{LoggingConfig, NetworkConfig, TlsConfig};
use wirelink::Transport;

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
fn test_invalid_bind_address() {
    let mut config = NetworkConfig::default();
    config.server.bind_address = "not-an-ip".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid bind address")));
}

#[test]
fn test_empty_bind_address() {
    let mut config = NetworkConfig::default();
    config.server.bind_address = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_no_transports() {
    let mut config = NetworkConfig::default();
    config.server.transports.clear();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("At least one transport")));
}

#[test]
fn test_transports_may_share_a_port() {
    let mut config = NetworkConfig::default();
    config.server.set_port(Transport::Tcp, 7000);
    config.server.set_port(Transport::Http, 7000);
    config.server.set_port(Transport::WebSocket, 7001);

    assert!(config.validate().is_empty());
    assert_eq!(config.server.ports(), vec![7000, 7001]);
    assert_eq!(config.server.transport_port(Transport::Http), Some(7000));
    assert_eq!(config.server.transport_port(Transport::Http2), None);
}

#[test]
fn test_set_port_replaces_binding() {
    let mut config = NetworkConfig::default();
    config.server.set_port(Transport::Tcp, 7100);
    config.server.set_port(Transport::Tcp, 7200);

    assert_eq!(config.server.transports.len(), 1);
    assert_eq!(config.server.transport_port(Transport::Tcp), Some(7200));
}

#[test]
fn test_transport_configured_twice() {
    let mut config = NetworkConfig::default();
    let binding = config.server.transports[0];
    config.server.transports.push(binding);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("configured twice")));
}

#[test]
fn test_tls_requires_material() {
    let mut config = NetworkConfig::default();
    config.server.tls = TlsConfig {
        enabled: true,
        cert_path: None,
        key_path: Some("key.pem".to_string()),
    };

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("tls.cert_path")));
    assert!(!errors.iter().any(|e| e.contains("tls.key_path")));
}

#[test]
fn test_negotiation_window_bounds() {
    let mut config = NetworkConfig::default();
    config.server.negotiation_window = 8;
    assert!(config.validate().iter().any(|e| e.contains("window too small")));

    config.server.negotiation_window = 1024 * 1024;
    assert!(config.validate().iter().any(|e| e.contains("window too large")));
}

#[test]
fn test_short_negotiation_timeout() {
    let mut config = NetworkConfig::default();
    config.server.negotiation_timeout = Duration::from_millis(5);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Negotiation timeout too short")));
}

#[test]
fn test_poll_timeout_bounds() {
    let mut config = NetworkConfig::default();
    config.server.poll_timeout = Duration::from_millis(1);
    assert!(config.validate().iter().any(|e| e.contains("Poll timeout too short")));

    config.server.poll_timeout = Duration::from_secs(600);
    assert!(config.validate().iter().any(|e| e.contains("Poll timeout too long")));
}

#[test]
fn test_zero_http_content_length() {
    let mut config = NetworkConfig::default();
    config.server.max_http_content_length = 0;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("content length")));
}

#[test]
fn test_shutdown_timeout_bounds() {
    let mut config = NetworkConfig::default();
    config.server.shutdown_timeout = Duration::from_millis(100);
    assert!(config.validate().iter().any(|e| e.contains("Shutdown timeout too short")));

    config.server.shutdown_timeout = Duration::from_secs(3600);
    assert!(config.validate().iter().any(|e| e.contains("Shutdown timeout too long")));
}

#[test]
fn test_invalid_client_address() {
    let mut config = NetworkConfig::default();
    config.client.address = "localhost".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid client address")));
}

#[test]
fn test_short_client_timeouts() {
    let mut config = NetworkConfig::default();
    config.client.connection_timeout = Duration::from_millis(10);
    config.client.handshake_timeout = Duration::from_millis(10);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Connection timeout too short")));
    assert!(errors.iter().any(|e| e.contains("Handshake timeout too short")));
}

#[test]
fn test_zero_max_frame_size() {
    let mut config = NetworkConfig::default();
    config.codec.max_frame_size = 0;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be 0")));
}

#[test]
fn test_tiny_max_frame_size() {
    let mut config = NetworkConfig::default();
    config.codec.max_frame_size = 100;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("too small")));
}

#[test]
fn test_excessive_max_frame_size() {
    let mut config = NetworkConfig::default();
    config.codec.max_frame_size = 200 * 1024 * 1024;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("too large")));
}

#[test]
fn test_empty_app_name() {
    let mut config = NetworkConfig::default();
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Application name cannot be empty")));
}

#[test]
fn test_long_app_name() {
    let mut config = NetworkConfig::default();
    config.logging.app_name = "a".repeat(100);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("too long")));
}

#[test]
fn test_validate_strict_with_valid_config() {
    assert!(NetworkConfig::default().validate_strict().is_ok());
}

#[test]
fn test_validate_strict_with_invalid_config() {
    let mut config = NetworkConfig::default();
    config.codec.max_frame_size = 0;

    let result = config.validate_strict();
    assert!(result.is_err());
    let message = result.unwrap_err().to_string();
    assert!(message.contains("Configuration validation failed"));
}

#[test]
fn test_multiple_validation_errors() {
    let mut config = NetworkConfig::default();
    config.server.bind_address = String::new();
    config.client.address = String::new();
    config.codec.max_frame_size = 0;
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(errors.len() >= 4, "Expected at least 4 errors, got {}: {:?}", errors.len(), errors);
}

#[test]
fn test_example_config_parses_back() {
    let text = NetworkConfig::example_config();
    assert!(text.contains("[server]"));

    let parsed = NetworkConfig::from_toml(&text).expect("example config should parse");
    assert!(parsed.validate().is_empty());
    assert_eq!(parsed.server.transport_port(Transport::Tcp), Some(Transport::Tcp.default_port()));
    assert_eq!(parsed.server.poll_timeout, Duration::from_secs(30));
}

#[test]
fn test_missing_tables_fall_back_to_defaults() {
    let toml = r#"
        [logging]
        app_name = "edge"
        log_level = "debug"
        json_format = true
    "#;

    let config = NetworkConfig::from_toml(toml).unwrap();
    assert_eq!(config.logging.app_name, "edge");
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert!(config.logging.json_format);
    assert_eq!(config.server.bind_address, "127.0.0.1");
}

#[test]
fn test_bad_log_level_rejected() {
    let toml = r#"
        [logging]
        app_name = "edge"
        log_level = "loud"
        json_format = false
    "#;

    let err = NetworkConfig::from_toml(toml).unwrap_err();
    assert!(err.to_string().contains("Failed to parse TOML"));
}

#[test]
fn test_save_and_load_file() {
    let path = std::env::temp_dir().join(format!("wirelink-config-{}.toml", std::process::id()));
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.set_port(Transport::Http, 9443);
        c.server.gzip_enabled = true;
        c.logging = LoggingConfig {
            log_level: Level::WARN,
            ..LoggingConfig::default()
        };
    });

    config.save_to_file(&path).unwrap();
    let loaded = NetworkConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded.server.transport_port(Transport::Http), Some(9443));
    assert!(loaded.server.gzip_enabled);
    assert_eq!(loaded.logging.log_level, Level::WARN);
}

#[test]
fn test_missing_file_is_config_error() {
    let err = NetworkConfig::from_file("/definitely/not/here.toml").unwrap_err();
    assert!(err.to_string().contains("Failed to open config file"));
}

#[test]
fn test_env_overrides() {
    // no other test reads these variables
    std::env::set_var("WIRELINK_HTTP_PORT", "9180");
    std::env::set_var("WIRELINK_SNAPPY", "true");
    std::env::set_var("WIRELINK_MAX_FRAME_SIZE", "not-a-number");

    let config = NetworkConfig::from_env().unwrap();
    assert_eq!(config.server.transport_port(Transport::Http), Some(9180));
    assert!(config.server.snappy_enabled);
    assert_eq!(config.codec.max_frame_size, wirelink::config::MAX_FRAME_SIZE);
}
