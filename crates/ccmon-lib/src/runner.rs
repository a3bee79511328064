//! Scenario orchestration
//!
//! [`ScenarioRunner::execute`] sequences a full run:
//! 1. create every workload with zero replicas
//! 2. open the telemetry record
//! 3. start the watch loops and both samplers, recording the start instant
//! 4. spawn one waiter per scaling event
//! 5. wait for the scenario duration or an interrupt
//! 6. stop every background task and wait for it
//! 7. delete the workloads, best effort
//! 8. close the record and log the final cost

use crate::accumulator::{AccumulatorConfig, CostAccumulator};
use crate::cluster::{ChangeFeed, ClusterApi, ScaleClient};
use crate::health::HealthRegistry;
use crate::models::{ObservedNode, TrackedPod};
use crate::observability::StructuredLogger;
use crate::pricing::PricingOracle;
use crate::scenario::Scenario;
use crate::scheduler::{EventScheduler, SchedulerConfig};
use crate::telemetry::{CsvTelemetrySink, TelemetrySink};
use crate::tracker::ClusterStateTracker;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Namespace for created workloads
    pub namespace: String,
    /// Directory for the telemetry record
    pub output_dir: PathBuf,
    pub accumulator: AccumulatorConfig,
    pub scheduler: SchedulerConfig,
    pub spot_aware_pricing: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            output_dir: PathBuf::from("."),
            accumulator: AccumulatorConfig::default(),
            scheduler: SchedulerConfig::default(),
            spot_aware_pricing: false,
        }
    }
}

/// Result of one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub scenario: String,
    pub cumulative_cost: f64,
    pub pending_pod_seconds: f64,
    pub samples: u64,
    /// Events whose deadline was reached
    pub events_fired: usize,
    /// Fired events that did not end with the requested scale
    pub events_failed: usize,
    /// Events still waiting when the run stopped
    pub events_cancelled: usize,
    pub interrupted: bool,
    pub telemetry_path: Option<PathBuf>,
}

pub struct ScenarioRunner {
    config: RunnerConfig,
    cluster: Arc<dyn ClusterApi>,
    scale: Arc<dyn ScaleClient>,
    nodes: Arc<dyn ChangeFeed<ObservedNode>>,
    pods: Arc<dyn ChangeFeed<TrackedPod>>,
    pricing: Arc<dyn PricingOracle>,
    health: HealthRegistry,
}

impl ScenarioRunner {
    pub fn new(
        config: RunnerConfig,
        cluster: Arc<dyn ClusterApi>,
        scale: Arc<dyn ScaleClient>,
        nodes: Arc<dyn ChangeFeed<ObservedNode>>,
        pods: Arc<dyn ChangeFeed<TrackedPod>>,
        pricing: Arc<dyn PricingOracle>,
    ) -> Self {
        Self {
            config,
            cluster,
            scale,
            nodes,
            pods,
            pricing,
            health: HealthRegistry::new(),
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    /// Run `scenario` to completion or until `interrupt` fires. Background
    /// failures never end the run early; only workload creation and
    /// telemetry setup errors are returned, after cleanup.
    pub async fn execute(
        &self,
        scenario: &Scenario,
        mut interrupt: broadcast::Receiver<()>,
    ) -> Result<RunSummary> {
        let logger = StructuredLogger::new(&scenario.name);
        let mut created = Vec::with_capacity(scenario.workloads.len());

        for workload in &scenario.workloads {
            if let Err(e) = self.cluster.create_workload(workload).await {
                self.delete_workloads(&created).await;
                return Err(e)
                    .with_context(|| format!("Failed to create workload {}", workload.name));
            }
            debug!(workload = %workload.name, "Workload created");
            created.push(workload.resource_name());
        }

        let sink = match CsvTelemetrySink::create(&self.config.output_dir, &scenario.name) {
            Ok(sink) => sink,
            Err(e) => {
                self.delete_workloads(&created).await;
                return Err(e).context("Failed to open telemetry record");
            }
        };
        let telemetry_path = sink.path().map(|p| p.to_path_buf());

        let tracker = Arc::new(
            ClusterStateTracker::new(self.pricing.clone())
                .with_spot_pricing(self.config.spot_aware_pricing),
        );
        let (stop, _) = broadcast::channel(1);
        let start = Instant::now();

        let accumulator = Arc::new(
            CostAccumulator::new(tracker.clone(), self.config.accumulator.clone(), start)
                .with_health(self.health.clone())
                .with_logger(logger.clone()),
        );

        let watches = vec![
            tokio::spawn(tracker.clone().watch_nodes(
                self.nodes.clone(),
                self.health.clone(),
                stop.subscribe(),
            )),
            tokio::spawn(tracker.clone().watch_pods(
                self.pods.clone(),
                self.health.clone(),
                stop.subscribe(),
            )),
            tokio::spawn(accumulator.clone().run_pending(stop.subscribe())),
        ];
        let cost_task = tokio::spawn(accumulator.clone().run_cost(sink, stop.subscribe()));

        let scheduler = Arc::new(
            EventScheduler::new(self.scale.clone(), self.config.scheduler.clone())
                .with_health(self.health.clone())
                .with_logger(logger.clone()),
        );
        let waiters = scheduler.spawn(scenario.events.clone(), start, &stop);

        self.health.set_ready(true).await;
        logger.log_run_started(
            &self.config.namespace,
            scenario.duration,
            scenario.workloads.len(),
            scenario.events.len(),
        );

        let interrupted = tokio::select! {
            _ = sleep_until(start + scenario.duration) => false,
            _ = wait_for_interrupt(&mut interrupt) => true,
        };
        if interrupted {
            info!(elapsed_secs = start.elapsed().as_secs_f64(), "Run interrupted");
        }

        // every task subscribed before it was spawned, so none can miss this
        let _ = stop.send(());
        self.health.set_ready(false).await;

        let mut summary = RunSummary {
            scenario: scenario.name.clone(),
            interrupted,
            telemetry_path,
            ..RunSummary::default()
        };

        for waiter in waiters {
            match waiter.await {
                Ok(Some(outcome)) => {
                    summary.events_fired += 1;
                    if !outcome.is_success() {
                        summary.events_failed += 1;
                    }
                }
                Ok(None) => summary.events_cancelled += 1,
                Err(e) => warn!(error = %e, "Event task failed"),
            }
        }
        for watch in watches {
            if let Err(e) = watch.await {
                warn!(error = %e, "Background task failed");
            }
        }
        let sink = match cost_task.await {
            Ok(sink) => Some(sink),
            Err(e) => {
                warn!(error = %e, "Cost sampler failed");
                None
            }
        };

        self.delete_workloads(&created).await;

        if let Some(mut sink) = sink {
            if let Err(e) = sink.close() {
                warn!(error = %e, "Failed to close telemetry record");
            }
        }

        let state = accumulator.state().await;
        summary.cumulative_cost = state.cumulative_cost;
        summary.pending_pod_seconds = state.pending_pod_seconds;
        summary.samples = state.samples;
        logger.log_run_finished(
            state.cumulative_cost,
            state.pending_pod_seconds,
            state.samples,
            interrupted,
        );

        Ok(summary)
    }

    async fn delete_workloads(&self, names: &[String]) {
        for name in names {
            match self.cluster.delete_workload(name).await {
                Ok(()) => debug!(workload = %name, "Workload deleted"),
                Err(e) => warn!(workload = %name, error = %e, "Failed to delete workload"),
            }
        }
    }
}

/// Resolves on an interrupt; a dropped sender means none will ever come
async fn wait_for_interrupt(rx: &mut broadcast::Receiver<()>) {
    if let Err(RecvError::Closed) = rx.recv().await {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{FeedEvent, FeedStream, WorkloadScale};
    use crate::error::ClusterError;
    use crate::models::PodPhase;
    use crate::pricing::PriceTable;
    use crate::scenario::WorkloadSpec;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    /// Cluster API recording every call
    #[derive(Default)]
    struct RecordingCluster {
        created: Mutex<Vec<String>>,
        deleted: Mutex<Vec<String>>,
        reject: Option<String>,
        /// Scale conflicts forever when set
        conflict: bool,
    }

    #[async_trait]
    impl ClusterApi for RecordingCluster {
        async fn create_workload(&self, spec: &WorkloadSpec) -> Result<(), ClusterError> {
            if self.reject.as_deref() == Some(spec.name.as_str()) {
                return Err(ClusterError::Other("quota exceeded".to_string()));
            }
            self.created.lock().unwrap().push(spec.resource_name());
            Ok(())
        }

        async fn delete_workload(&self, resource_name: &str) -> Result<(), ClusterError> {
            self.deleted.lock().unwrap().push(resource_name.to_string());
            Ok(())
        }
    }

    #[async_trait]
    impl ScaleClient for RecordingCluster {
        async fn get_scale(&self, _workload: &str) -> Result<WorkloadScale, ClusterError> {
            Ok(WorkloadScale {
                replicas: 0,
                resource_version: None,
            })
        }

        async fn update_scale(&self, workload: &str, _scale: &WorkloadScale) -> Result<(), ClusterError> {
            if self.conflict {
                return Err(ClusterError::Conflict(workload.to_string()));
            }
            Ok(())
        }
    }

    /// Feed that replays fixed objects on every subscription, then idles
    struct StaticFeed<T>(Vec<T>);

    #[async_trait]
    impl<T: Clone + Send + Sync + 'static> ChangeFeed<T> for StaticFeed<T> {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn subscribe(&self) -> anyhow::Result<FeedStream<T>> {
            let added: Vec<anyhow::Result<FeedEvent<T>>> =
                self.0.iter().cloned().map(|o| Ok(FeedEvent::Added(o))).collect();
            Ok(Box::pin(
                tokio_stream::iter(added).chain(tokio_stream::pending()),
            ))
        }
    }

    const SCENARIO: &str = r#"
name: burst
duration: 10400ms
deployments:
  - name: web
    cpu: 500m
    memory: 256Mi
  - name: batch
    cpu: "1"
    memory: 1Gi
events:
  - time: 0s
    deployment: web
    replicas: 3
  - time: 5s
    deployment: batch
    replicas: 2
"#;

    fn runner(cluster: Arc<RecordingCluster>, dir: &std::path::Path) -> ScenarioRunner {
        let config = RunnerConfig {
            output_dir: dir.to_path_buf(),
            ..RunnerConfig::default()
        };
        ScenarioRunner::new(
            config,
            cluster.clone(),
            cluster,
            Arc::new(StaticFeed(vec![ObservedNode::new("node-a", "m5.large")])),
            Arc::new(StaticFeed(vec![TrackedPod::new("u1", "web-1", PodPhase::Pending)])),
            Arc::new(PriceTable::from_prices([("m5.large", 3.6)])),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(RecordingCluster::default());
        let scenario = Scenario::from_yaml_str(SCENARIO).unwrap();
        let (_interrupt, rx) = broadcast::channel(1);

        let summary = runner(cluster.clone(), dir.path())
            .execute(&scenario, rx)
            .await
            .unwrap();

        assert!(!summary.interrupted);
        assert_eq!(summary.samples, 10);
        assert!((summary.cumulative_cost - 0.01).abs() < 1e-9);
        assert_eq!(summary.pending_pod_seconds, 41.0 * 0.25);
        assert_eq!(summary.events_fired, 2);
        assert_eq!(summary.events_failed, 0);

        let created = cluster.created.lock().unwrap().clone();
        assert_eq!(created, vec!["ccmon-web", "ccmon-batch"]);
        assert_eq!(*cluster.deleted.lock().unwrap(), created);

        let path = summary.telemetry_path.unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_cancels_pending_events_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(RecordingCluster::default());
        let scenario = Scenario::from_yaml_str(SCENARIO).unwrap();
        let (interrupt, rx) = broadcast::channel(1);
        let runner = runner(cluster.clone(), dir.path());

        let (summary, _) = tokio::join!(runner.execute(&scenario, rx), async {
            tokio::time::sleep(Duration::from_millis(3_500)).await;
            interrupt.send(()).unwrap();
        });
        let summary = summary.unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.samples, 3);
        assert_eq!(summary.events_fired, 1);
        assert_eq!(summary.events_cancelled, 1);
        assert_eq!(cluster.deleted.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_events_do_not_stop_run() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(RecordingCluster {
            conflict: true,
            ..RecordingCluster::default()
        });
        let scenario = Scenario::from_yaml_str(SCENARIO).unwrap();
        let (_interrupt, rx) = broadcast::channel(1);

        let summary = runner(cluster.clone(), dir.path())
            .execute(&scenario, rx)
            .await
            .unwrap();

        assert_eq!(summary.events_fired, 2);
        assert_eq!(summary.events_failed, 2);
        assert_eq!(summary.samples, 10);
        assert_eq!(cluster.deleted.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_failure_cleans_up_created_workloads() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(RecordingCluster {
            reject: Some("batch".to_string()),
            ..RecordingCluster::default()
        });
        let scenario = Scenario::from_yaml_str(SCENARIO).unwrap();
        let (_interrupt, rx) = broadcast::channel(1);

        let err = runner(cluster.clone(), dir.path())
            .execute(&scenario, rx)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("batch"));
        assert_eq!(*cluster.deleted.lock().unwrap(), vec!["ccmon-web"]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_interrupt_sender_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(RecordingCluster::default());
        let scenario = Scenario::from_yaml_str(SCENARIO).unwrap();
        let (interrupt, rx) = broadcast::channel(1);
        drop(interrupt);

        let summary = runner(cluster, dir.path())
            .execute(&scenario, rx)
            .await
            .unwrap();
        assert!(!summary.interrupted);
        assert_eq!(summary.events_fired, 2);
    }
}
