//! Tests for configuration validation

use std::collections::HashMap;

use prometheus_task_engine::config::{EngineConfig, RetryConfig};
use prometheus_task_engine::core::Lane;

#[test]
fn test_default_config_is_valid() {
    let cfg = EngineConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.lanes.high.base_delay_ms, 0);
    assert_eq!(cfg.lanes.medium.base_delay_ms, 5_000);
    assert_eq!(cfg.lanes.low.base_delay_ms, 10_000);
    assert_eq!(cfg.lanes.low.worker_count, 1);
    assert_eq!(cfg.retry.max_retries, 3);
    assert_eq!(cfg.retry.base_delay_ms, 30_000);
    assert_eq!(cfg.retry.max_delay_ms, 300_000);
    assert_eq!(cfg.scan_interval_ms, 10_000);
}

#[test]
fn test_config_invalid_worker_count() {
    let cfg = EngineConfig::new().with_lane_workers(Lane::Medium, 0);
    let err = cfg.validate().unwrap_err();
    assert!(err.contains("medium"), "unexpected message: {err}");
}

#[test]
fn test_config_invalid_retry_curve() {
    let cfg = EngineConfig::new().with_retry(RetryConfig {
        max_retries: 3,
        base_delay_ms: 10_000,
        max_delay_ms: 1_000,
    });
    assert!(cfg.validate().is_err());
}

#[test]
fn test_config_invalid_scan_interval() {
    assert!(EngineConfig::new().with_scan_interval_ms(0).validate().is_err());
}

#[test]
fn test_config_invalid_queue_depth() {
    assert!(EngineConfig::new().with_max_queue_depth(0).validate().is_err());
}

#[test]
fn test_config_from_partial_json() {
    let cfg = EngineConfig::from_json_str(
        r#"{
            "scan_interval_ms": 2500,
            "retry": { "max_retries": 5 },
            "lanes": { "low": { "worker_count": 2, "base_delay_ms": 0 } }
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.scan_interval_ms, 2_500);
    assert_eq!(cfg.retry.max_retries, 5);
    assert_eq!(cfg.retry.base_delay_ms, 30_000);
    assert_eq!(cfg.lanes.low.worker_count, 2);
    assert_eq!(cfg.lanes.medium.base_delay_ms, 5_000);
}

#[test]
fn test_config_from_json_rejects_invalid_values() {
    let err = EngineConfig::from_json_str(r#"{ "scan_interval_ms": 0 }"#).unwrap_err();
    assert!(err.contains("scan_interval_ms"));
    let err = EngineConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_config_env_overrides() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("TASK_ENGINE_HIGH_WORKERS", "8"),
        ("TASK_ENGINE_LOW_DELAY_MS", "2500"),
        ("TASK_ENGINE_MAX_RETRIES", "1"),
        ("TASK_ENGINE_SCAN_INTERVAL_MS", " 500 "),
        ("TASK_ENGINE_LOG", "debug"),
    ]);
    let mut cfg = EngineConfig::default();
    cfg.apply_overrides(|key| vars.get(key).map(|v| (*v).to_string()))
        .unwrap();

    assert_eq!(cfg.lanes.high.worker_count, 8);
    assert_eq!(cfg.lanes.low.base_delay_ms, 2_500);
    assert_eq!(cfg.retry.max_retries, 1);
    assert_eq!(cfg.scan_interval_ms, 500);
    assert_eq!(cfg.log_filter, "debug");
}

#[test]
fn test_config_env_override_parse_error_names_variable() {
    let mut cfg = EngineConfig::default();
    let err = cfg
        .apply_overrides(|key| (key == "TASK_ENGINE_MEDIUM_WORKERS").then(|| "many".to_string()))
        .unwrap_err();
    assert!(err.contains("TASK_ENGINE_MEDIUM_WORKERS"));
}
