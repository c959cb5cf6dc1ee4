//! Integration tests for configuration types
//!
//! Covers the file shapes operators actually write: full TOML, partial JSON,
//! and values that must be rejected before any thread or table is built.

use hibench_domain::constants::DEFAULT_MAX_VARIABLE_LENGTH;
use hibench_domain::{Config, DuplicateLookup, HibenchError};

// ============================================================================
// File Shapes
// ============================================================================

/// A complete TOML file maps onto every section.
#[test]
fn test_full_toml_config() {
    let config: Config = toml::from_str(
        r#"
[threads]
stack_size_bytes = 8388608

[registry]
duplicate_lookup = "first_registered"
max_variable_length = 256

[logging]
filter = "hibench=debug"
json = true
lock_tracing = true
"#,
    )
    .unwrap();

    assert_eq!(config.threads.stack_size_bytes, Some(8 * 1024 * 1024));
    assert_eq!(config.registry.duplicate_lookup, DuplicateLookup::FirstRegistered);
    assert_eq!(config.registry.max_variable_length, 256);
    assert_eq!(config.logging.filter, "hibench=debug");
    assert!(config.logging.json);
    assert!(config.logging.lock_tracing);
    assert!(config.validate().is_ok());
}

/// An empty document is the default configuration.
#[test]
fn test_empty_documents_are_defaults() {
    let from_toml: Config = toml::from_str("").unwrap();
    let from_json: Config = serde_json::from_str("{}").unwrap();
    assert_eq!(from_toml, Config::default());
    assert_eq!(from_json, Config::default());
    assert_eq!(from_json.registry.max_variable_length, DEFAULT_MAX_VARIABLE_LENGTH);
}

/// Unknown lookup policies fail at parse time.
#[test]
fn test_unknown_duplicate_lookup_is_rejected() {
    let parsed: Result<Config, _> = serde_json::from_str(r#"{ "registry": { "duplicate_lookup": "random" } }"#);
    assert!(parsed.is_err());
}

// ============================================================================
// Validation
// ============================================================================

/// Validation errors name the offending field.
#[test]
fn test_validation_names_field() {
    let mut config = Config::default();
    config.logging.filter = "   ".to_string();

    match config.validate() {
        Err(HibenchError::Config(message)) => assert!(message.contains("logging.filter")),
        other => panic!("expected config error, got {other:?}"),
    }
}
