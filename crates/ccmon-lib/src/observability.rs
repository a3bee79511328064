//! Observability infrastructure for the cost monitor
//!
//! Provides:
//! - Prometheus gauges mirroring the tracker and accumulator state
//! - Counters for watch restarts, price misses and scale outcomes
//! - Structured lifecycle logging with tracing

use crate::models::CostSample;
use prometheus::{
    register_gauge, register_int_counter, register_int_counter_vec, register_int_gauge, Gauge,
    IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    nodes_tracked: IntGauge,
    pods_tracked: IntGauge,
    pending_pods: IntGauge,
    hourly_cost: Gauge,
    cumulative_cost: Gauge,
    pending_pod_seconds: Gauge,
    watch_restarts: IntCounterVec,
    price_lookup_misses: IntCounter,
    scale_events: IntCounterVec,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            nodes_tracked: register_int_gauge!(
                "ccmon_nodes_tracked",
                "Number of nodes currently tracked"
            )
            .expect("Failed to register nodes_tracked"),

            pods_tracked: register_int_gauge!(
                "ccmon_pods_tracked",
                "Number of pods currently tracked in the watched namespace"
            )
            .expect("Failed to register pods_tracked"),

            pending_pods: register_int_gauge!(
                "ccmon_pending_pods",
                "Number of tracked pods in the Pending phase"
            )
            .expect("Failed to register pending_pods"),

            hourly_cost: register_gauge!(
                "ccmon_hourly_cost",
                "Sum of hourly prices over tracked nodes"
            )
            .expect("Failed to register hourly_cost"),

            cumulative_cost: register_gauge!(
                "ccmon_cumulative_cost",
                "Integrated node cost since scenario start"
            )
            .expect("Failed to register cumulative_cost"),

            pending_pod_seconds: register_gauge!(
                "ccmon_pending_pod_seconds",
                "Integrated pending pod count over time"
            )
            .expect("Failed to register pending_pod_seconds"),

            watch_restarts: register_int_counter_vec!(
                "ccmon_watch_restarts_total",
                "Number of times a change feed subscription was reopened",
                &["feed"]
            )
            .expect("Failed to register watch_restarts"),

            price_lookup_misses: register_int_counter!(
                "ccmon_price_lookup_misses_total",
                "Number of node price lookups that found no price"
            )
            .expect("Failed to register price_lookup_misses"),

            scale_events: register_int_counter_vec!(
                "ccmon_scale_events_total",
                "Scaling events by outcome",
                &["outcome"]
            )
            .expect("Failed to register scale_events"),
        }
    }
}

/// Cheap handle to the process-wide metrics; clones share the same series
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn set_tracked(&self, nodes: usize, pods: usize) {
        self.inner().nodes_tracked.set(nodes as i64);
        self.inner().pods_tracked.set(pods as i64);
    }

    pub fn set_pending_pods(&self, count: usize) {
        self.inner().pending_pods.set(count as i64);
    }

    pub fn set_pending_pod_seconds(&self, value: f64) {
        self.inner().pending_pod_seconds.set(value);
    }

    /// Mirror a slow-sampler row
    pub fn observe_sample(&self, sample: &CostSample) {
        let inner = self.inner();
        inner.nodes_tracked.set(sample.node_count as i64);
        inner.pods_tracked.set(sample.pod_count as i64);
        inner.hourly_cost.set(sample.hourly_cost);
        inner.cumulative_cost.set(sample.cumulative_cost);
    }

    pub fn inc_watch_restarts(&self, feed: &str) {
        self.inner().watch_restarts.with_label_values(&[feed]).inc();
    }

    pub fn inc_price_lookup_misses(&self) {
        self.inner().price_lookup_misses.inc();
    }

    pub fn inc_scale_events(&self, outcome: &str) {
        self.inner().scale_events.with_label_values(&[outcome]).inc();
    }
}

/// Structured logger for run lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    scenario: String,
}

impl StructuredLogger {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
        }
    }

    pub fn log_run_started(&self, namespace: &str, duration: Duration, workloads: usize, events: usize) {
        info!(
            event = "run_started",
            scenario = %self.scenario,
            namespace = %namespace,
            duration_secs = duration.as_secs_f64(),
            workloads = workloads,
            events = events,
            "Scenario started"
        );
    }

    /// Log the outcome of one scaling event
    pub fn log_scale_event(
        &self,
        workload: &str,
        replicas: i32,
        elapsed: Duration,
        attempts: u32,
        outcome: &str,
    ) {
        if outcome == "scaled" {
            info!(
                event = "scale_event",
                scenario = %self.scenario,
                workload = %workload,
                replicas = replicas,
                elapsed_secs = elapsed.as_secs_f64(),
                attempts = attempts,
                outcome = %outcome,
                "Scaled workload"
            );
        } else {
            warn!(
                event = "scale_event",
                scenario = %self.scenario,
                workload = %workload,
                replicas = replicas,
                elapsed_secs = elapsed.as_secs_f64(),
                attempts = attempts,
                outcome = %outcome,
                "Scaling event failed"
            );
        }
    }

    pub fn log_cost_report(&self, sample: &CostSample) {
        info!(
            event = "cost_report",
            scenario = %self.scenario,
            elapsed_secs = sample.elapsed_secs,
            nodes = sample.node_count,
            hourly_cost = sample.hourly_cost,
            cumulative_cost = sample.cumulative_cost,
            pending_pod_seconds = sample.pending_pod_seconds,
            "Cost report"
        );
    }

    pub fn log_run_finished(
        &self,
        cumulative_cost: f64,
        pending_pod_seconds: f64,
        samples: u64,
        interrupted: bool,
    ) {
        info!(
            event = "run_finished",
            scenario = %self.scenario,
            cumulative_cost = cumulative_cost,
            pending_pod_seconds = pending_pod_seconds,
            samples = samples,
            interrupted = interrupted,
            "Final cost ${:.4}",
            cumulative_cost
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handles_share_registry() {
        let a = MonitorMetrics::new();
        let b = MonitorMetrics::default();

        a.inc_watch_restarts("nodes");
        b.inc_watch_restarts("nodes");
        a.inc_scale_events("scaled");
        a.inc_price_lookup_misses();
        a.set_tracked(3, 7);
        a.set_pending_pods(2);

        let restarts = GLOBAL_METRICS
            .get()
            .unwrap()
            .watch_restarts
            .with_label_values(&["nodes"])
            .get();
        assert!(restarts >= 2);
    }

    #[test]
    fn test_observe_sample_sets_gauges() {
        let metrics = MonitorMetrics::new();
        metrics.observe_sample(&CostSample {
            elapsed_secs: 1.0,
            node_count: 2,
            hourly_cost: 0.192,
            cumulative_cost: 0.5,
            pod_count: 4,
            pending_pods: 1,
            pending_pod_seconds: 0.25,
        });

        let inner = GLOBAL_METRICS.get().unwrap();
        assert!(inner.hourly_cost.get() >= 0.0);
        assert!(inner.cumulative_cost.get() >= 0.0);
    }

    #[test]
    fn test_structured_logger_scenario() {
        let logger = StructuredLogger::new("burst");
        assert_eq!(logger.scenario, "burst");
    }
}
