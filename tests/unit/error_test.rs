//! Tests for error types

use prometheus_balancer::core::BalancerError;

#[test]
fn test_task_failure_error() {
    let err = BalancerError::TaskFailure {
        task_id: 4,
        reason: "out of memory".to_string(),
    };
    assert_eq!(format!("{}", err), "task 4 failed: out of memory");
}

#[test]
fn test_task_timeout_error() {
    let err = BalancerError::TaskTimeout {
        task_id: 9,
        timeout_ms: 250,
    };
    assert_eq!(format!("{}", err), "task 9 timed out after 250 ms");
}

#[test]
fn test_queue_saturated_error() {
    let err = BalancerError::QueueSaturated("worker 2 queue is full".to_string());
    assert_eq!(format!("{}", err), "queue saturated: worker 2 queue is full");
}

#[test]
fn test_worker_unavailable_error() {
    let err = BalancerError::WorkerUnavailable { task_id: 1 };
    assert_eq!(format!("{}", err), "no worker available for task 1");
}

#[test]
fn test_shutdown_error() {
    assert_eq!(
        format!("{}", BalancerError::Shutdown),
        "balancer has been shut down"
    );
}

#[test]
fn test_error_converts_to_anyhow() {
    fn fails() -> prometheus_balancer::core::AppResult<()> {
        Err(BalancerError::Abandoned { task_id: 3 })?;
        Ok(())
    }
    let err = fails().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BalancerError>(),
        Some(BalancerError::Abandoned { task_id: 3 })
    ));
}
