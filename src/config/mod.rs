//! Configuration models for the balancer and its workers.

pub mod balancer;

pub use balancer::{Backpressure, BalancerConfig, ENV_PREFIX};
