//! Cost and pending-pod integration
//!
//! Two samplers run on independent fixed intervals:
//! - the pending sampler adds `pending × interval` to pending-pod-seconds
//! - the cost sampler adds `hourly × interval / 3600` to cumulative cost
//!   and forwards a row to the telemetry sink
//!
//! Both integrate with the nominal interval rather than measured elapsed
//! time, so drift is bounded by scheduler jitter.

use crate::health::{components, HealthRegistry};
use crate::models::CostSample;
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::telemetry::TelemetrySink;
use crate::tracker::ClusterStateTracker;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct AccumulatorConfig {
    /// Pending sampler period (default: 250ms)
    pub pending_interval: Duration,
    /// Cost sampler and telemetry period (default: 1s)
    pub cost_interval: Duration,
    /// Minimum spacing of `cost_report` log lines (default: 60s)
    pub report_interval: Duration,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            pending_interval: Duration::from_millis(250),
            cost_interval: Duration::from_secs(1),
            report_interval: Duration::from_secs(60),
        }
    }
}

/// Integrated totals; both integrals only ever grow
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AccumulatorState {
    pub cumulative_cost: f64,
    pub pending_pod_seconds: f64,
    pub pending_pods: usize,
    /// Burn rate seen by the last cost tick
    pub hourly_cost: f64,
    /// Cost ticks so far
    pub samples: u64,
}

pub struct CostAccumulator {
    tracker: Arc<ClusterStateTracker>,
    state: RwLock<AccumulatorState>,
    config: AccumulatorConfig,
    start: Instant,
    health: HealthRegistry,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl CostAccumulator {
    /// `start` is the scenario start instant that sample times are measured from
    pub fn new(tracker: Arc<ClusterStateTracker>, config: AccumulatorConfig, start: Instant) -> Self {
        Self {
            tracker,
            state: RwLock::new(AccumulatorState::default()),
            config,
            start,
            health: HealthRegistry::new(),
            metrics: MonitorMetrics::new(),
            logger: StructuredLogger::new("unnamed"),
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub async fn state(&self) -> AccumulatorState {
        *self.state.read().await
    }

    /// One pending tick; returns the new pending-pod-seconds total
    pub async fn sample_pending(&self) -> f64 {
        // tracker lock is released before the accumulator lock is taken
        let pending = self.tracker.totals().await.pending_pods;
        let dt = self.config.pending_interval.as_secs_f64();

        let mut state = self.state.write().await;
        state.pending_pods = pending;
        state.pending_pod_seconds += pending as f64 * dt;

        self.metrics.set_pending_pods(pending);
        self.metrics.set_pending_pod_seconds(state.pending_pod_seconds);
        state.pending_pod_seconds
    }

    /// One cost tick; returns the telemetry row for it
    pub async fn sample_cost(&self) -> CostSample {
        let totals = self.tracker.totals().await;
        let dt = self.config.cost_interval.as_secs_f64();

        let mut state = self.state.write().await;
        state.hourly_cost = totals.hourly_cost;
        state.cumulative_cost += totals.hourly_cost * dt / 3600.0;
        state.samples += 1;

        let sample = CostSample {
            elapsed_secs: self.start.elapsed().as_secs_f64(),
            node_count: totals.node_count,
            hourly_cost: totals.hourly_cost,
            cumulative_cost: state.cumulative_cost,
            pod_count: totals.pod_count,
            pending_pods: totals.pending_pods,
            pending_pod_seconds: state.pending_pod_seconds,
        };
        drop(state);

        self.metrics.observe_sample(&sample);
        sample
    }

    /// Run the pending sampler until shutdown
    pub async fn run_pending(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = self.config.pending_interval;
        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sample_pending().await;
                }
                _ = shutdown.recv() => {
                    debug!("Pending sampler stopped");
                    break;
                }
            }
        }
    }

    /// Run the cost sampler until shutdown, recording every tick into
    /// `sink`. The sink is handed back for closing.
    pub async fn run_cost<S: TelemetrySink>(
        self: Arc<Self>,
        mut sink: S,
        mut shutdown: broadcast::Receiver<()>,
    ) -> S {
        let period = self.config.cost_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        let mut last_report = Instant::now();
        let mut sink_failed = false;

        self.health.register(components::COST_SAMPLER).await;
        info!(
            interval_ms = period.as_millis() as u64,
            "Starting cost sampler"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let sample = self.sample_cost().await;

                    if let Err(e) = sink.record(&sample) {
                        if !sink_failed {
                            warn!(error = %e, "Failed to write telemetry row");
                            self.health
                                .set_unhealthy(components::COST_SAMPLER, e.to_string())
                                .await;
                            sink_failed = true;
                        }
                    }

                    if last_report.elapsed() >= self.config.report_interval {
                        self.logger.log_cost_report(&sample);
                        last_report = Instant::now();
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Cost sampler stopped");
                    break;
                }
            }
        }

        sink
    }
}
