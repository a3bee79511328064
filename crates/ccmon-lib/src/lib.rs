//! Cluster cost monitor library
//!
//! This crate provides the core functionality for:
//! - Loading and validating scaling scenarios
//! - Tracking cluster nodes and pods through watch streams
//! - Integrating hourly node cost and pending-pod time
//! - Writing the cost time series to a telemetry record
//! - Firing timed scale updates against scenario workloads
//! - Health checks and observability

pub mod accumulator;
pub mod cluster;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod pricing;
pub mod runner;
pub mod scenario;
pub mod scheduler;
pub mod telemetry;
pub mod tracker;

pub use error::{ClusterError, ScenarioError, TelemetryError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
pub use runner::{RunSummary, RunnerConfig, ScenarioRunner};
pub use scenario::Scenario;
