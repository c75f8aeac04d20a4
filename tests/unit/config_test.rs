//! Tests for configuration validation and loading

use std::collections::HashMap;
use std::time::Duration;

use prometheus_balancer::config::{Backpressure, BalancerConfig};

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn test_default_config_is_valid() {
    let config = BalancerConfig::default();
    assert!(config.validate().is_ok());
    assert!(config.worker_count >= 1);
    assert_eq!(config.queue_capacity, 100);
    assert_eq!(config.backpressure, Backpressure::Block);
    assert!(config.respawn_workers);
}

#[test]
fn test_config_invalid_values() {
    assert!(BalancerConfig::new().with_worker_count(0).validate().is_err());
    assert!(BalancerConfig::new().with_queue_capacity(0).validate().is_err());
    assert!(BalancerConfig::new().with_intake_capacity(0).validate().is_err());
    assert!(BalancerConfig::new()
        .with_backpressure(Backpressure::Wait { timeout_ms: 0 })
        .validate()
        .is_err());
    assert!(BalancerConfig::new()
        .with_thread_name_prefix("")
        .validate()
        .is_err());
}

#[test]
fn test_builder_sets_fields() {
    let config = BalancerConfig::new()
        .with_worker_count(6)
        .with_queue_capacity(3)
        .with_task_timeout(Duration::from_secs(2))
        .with_respawn_workers(false);
    assert_eq!(config.worker_count, 6);
    assert_eq!(config.queue_capacity, 3);
    assert_eq!(config.task_timeout(), Some(Duration::from_secs(2)));
    assert!(!config.respawn_workers);
}

#[test]
fn test_config_from_json() {
    let json = r#"{
        "worker_count": 3,
        "queue_capacity": 5,
        "backpressure": { "wait": { "timeout_ms": 100 } }
    }"#;
    let config = BalancerConfig::from_json_str(json).expect("valid json config");
    assert_eq!(config.worker_count, 3);
    assert_eq!(config.queue_capacity, 5);
    assert_eq!(config.backpressure, Backpressure::Wait { timeout_ms: 100 });
    assert_eq!(config.intake_capacity, BalancerConfig::default().intake_capacity);
}

#[test]
fn test_config_from_json_rejects_invalid() {
    assert!(BalancerConfig::from_json_str(r#"{ "worker_count": 0 }"#).is_err());
    assert!(BalancerConfig::from_json_str("not json").is_err());
}

#[test]
fn test_config_from_lookup() {
    let config = BalancerConfig::from_lookup(lookup(&[
        ("BALANCER_WORKER_COUNT", "2"),
        ("BALANCER_BACKPRESSURE", "wait:250"),
        ("BALANCER_TASK_TIMEOUT_MS", "1000"),
        ("BALANCER_THREAD_NAME_PREFIX", "gpu"),
    ]))
    .expect("valid variables");

    assert_eq!(config.worker_count, 2);
    assert_eq!(config.backpressure, Backpressure::Wait { timeout_ms: 250 });
    assert_eq!(config.task_timeout_ms, Some(1000));
    assert_eq!(config.thread_name_prefix, "gpu");
}

#[test]
fn test_config_from_lookup_reports_bad_variable() {
    let err = BalancerConfig::from_lookup(lookup(&[("BALANCER_QUEUE_CAPACITY", "lots")]))
        .unwrap_err();
    assert!(err.contains("QUEUE_CAPACITY"), "{err}");
}
