//! Tests for utility functions

use prometheus_balancer::util::{init_tracing_with, now_ms};

#[test]
fn test_now_ms_is_monotonic_enough() {
    let a = now_ms();
    let b = now_ms();
    assert!(b >= a);
    // Later than 2020-01-01.
    assert!(a > 1_577_836_800_000);
}

#[test]
fn test_init_tracing_twice_is_harmless() {
    init_tracing_with("prometheus_balancer=debug");
    init_tracing_with("prometheus_balancer=trace");
    tracing::info!("tracing initialized");
}
