// Unit tests for config module

use super::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_defaults() {
    let config = EngineConfig::default();
    assert_eq!(config.ttl_days, 7);
    assert_eq!(config.validation_timeout(), Duration::from_secs(2));
    assert_eq!(config.vision_timeout(), Duration::from_secs(10));
    assert_eq!(config.discovery_attempts, 3);
    assert_eq!(config.hysteresis, 0.1);
    assert_eq!(config.not_interactable, NotInteractablePolicy::FullFailure);
    assert_eq!(config.ttl(), chrono::Duration::days(7));
    assert!(config.validate().is_ok());
}

#[test]
fn test_missing_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig::load(&dir.path().join("absent.json")).unwrap();
    assert_eq!(config, EngineConfig::default());
}

#[test]
fn test_partial_file_fills_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    fs::write(
        &path,
        r#"{"ttl_days": 14, "not_interactable": "half_weight"}"#,
    )
    .unwrap();

    let config = EngineConfig::load(&path).unwrap();
    assert_eq!(config.ttl_days, 14);
    assert_eq!(config.not_interactable, NotInteractablePolicy::HalfWeight);
    assert_eq!(config.discovery_attempts, 3);
}

#[test]
fn test_malformed_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, "{ttl_days: ").unwrap();

    let err = EngineConfig::load(&path).unwrap_err();
    assert!(matches!(err, SelectorError::Config(_)));
}

#[test]
fn test_validate_rejects_out_of_range_values() {
    let config = EngineConfig {
        discovery_attempts: 0,
        ..EngineConfig::default()
    };
    assert!(config.validate().is_err());

    let config = EngineConfig {
        hysteresis: 1.5,
        ..EngineConfig::default()
    };
    assert!(config.validate().is_err());

    let config = EngineConfig {
        validation_timeout_ms: 0,
        ..EngineConfig::default()
    };
    assert!(config.validate().is_err());

    let config = EngineConfig {
        max_candidates: 0,
        ..EngineConfig::default()
    };
    assert!(config.validate().is_err());
}
