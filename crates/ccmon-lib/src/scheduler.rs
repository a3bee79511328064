//! Timed scaling events
//!
//! One lightweight task per event sleeps until the event's offset from
//! scenario start, then performs a read-modify-write of the workload's
//! scale subresource, retrying immediately on write conflicts.

use crate::cluster::ScaleClient;
use crate::health::{components, HealthRegistry};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::scenario::ScalingEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

/// Default bound on read-modify-write attempts per event
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Attempts before a conflicting update is abandoned
    pub max_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// How a fired event ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Scaled { attempts: u32 },
    /// Every attempt hit a write conflict
    Exhausted { attempts: u32 },
    /// Reading the current scale failed; not retried
    ReadFailed { attempts: u32 },
    /// Write failed with something other than a conflict; not retried
    WriteFailed { attempts: u32 },
}

impl EventOutcome {
    pub fn attempts(&self) -> u32 {
        match *self {
            EventOutcome::Scaled { attempts }
            | EventOutcome::Exhausted { attempts }
            | EventOutcome::ReadFailed { attempts }
            | EventOutcome::WriteFailed { attempts } => attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, EventOutcome::Scaled { .. })
    }

    /// Metric and log label
    pub fn label(&self) -> &'static str {
        match self {
            EventOutcome::Scaled { .. } => "scaled",
            EventOutcome::Exhausted { .. } => "exhausted",
            EventOutcome::ReadFailed { .. } => "read_failed",
            EventOutcome::WriteFailed { .. } => "write_failed",
        }
    }
}

pub struct EventScheduler {
    client: Arc<dyn ScaleClient>,
    config: SchedulerConfig,
    health: HealthRegistry,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl EventScheduler {
    pub fn new(client: Arc<dyn ScaleClient>, config: SchedulerConfig) -> Self {
        Self {
            client,
            config,
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

    /// Set the event's replica count, retrying on conflicts up to the
    /// configured bound
    pub async fn scale(&self, event: &ScalingEvent) -> EventOutcome {
        let target = event.resource_name.as_str();
        let mut attempts = 0;

        while attempts < self.config.max_attempts {
            attempts += 1;

            let mut scale = match self.client.get_scale(target).await {
                Ok(scale) => scale,
                Err(e) => {
                    warn!(workload = %target, error = %e, "Failed to read scale");
                    return EventOutcome::ReadFailed { attempts };
                }
            };
            scale.replicas = event.replicas;

            match self.client.update_scale(target, &scale).await {
                Ok(()) => return EventOutcome::Scaled { attempts },
                Err(e) if e.is_conflict() => {
                    debug!(workload = %target, attempt = attempts, "Scale conflict, retrying");
                }
                Err(e) => {
                    warn!(workload = %target, error = %e, "Failed to update scale");
                    return EventOutcome::WriteFailed { attempts };
                }
            }
        }

        EventOutcome::Exhausted { attempts }
    }

    async fn fire(&self, event: &ScalingEvent, start: Instant) -> EventOutcome {
        let outcome = self.scale(event).await;

        self.metrics.inc_scale_events(outcome.label());
        self.logger.log_scale_event(
            &event.workload,
            event.replicas,
            start.elapsed(),
            outcome.attempts(),
            outcome.label(),
        );
        if !outcome.is_success() {
            self.health
                .set_degraded(
                    components::SCHEDULER,
                    format!("{} for {}", outcome.label(), event.workload),
                )
                .await;
        }
        outcome
    }

    /// Spawn one waiter per event. A waiter resolves to `None` when the
    /// shutdown signal arrives before its deadline. Events at equal
    /// offsets fire in no particular order.
    pub fn spawn(
        self: &Arc<Self>,
        events: Vec<ScalingEvent>,
        start: Instant,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<Option<EventOutcome>>> {
        events
            .into_iter()
            .map(|event| {
                let scheduler = Arc::clone(self);
                let mut shutdown = shutdown.subscribe();
                let deadline = start + event.offset;

                tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        _ = shutdown.recv() => {
                            debug!(workload = %event.workload, "Event cancelled");
                            None
                        }
                        _ = sleep_until(deadline) => Some(scheduler.fire(&event, start).await),
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::WorkloadScale;
    use crate::error::ClusterError;
    use crate::scenario::resource_name;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scale client with per-workload scripted conflicts and read failures
    #[derive(Default)]
    struct FakeScaleClient {
        replicas: Mutex<HashMap<String, i32>>,
        /// Remaining conflicts to return per workload
        conflicts: Mutex<HashMap<String, u32>>,
        unreadable: HashSet<String>,
        updates: AtomicU32,
        fired_at: Mutex<Vec<(String, Instant)>>,
    }

    impl FakeScaleClient {
        fn conflicting(self, workload: &str, times: u32) -> Self {
            self.conflicts
                .lock()
                .unwrap()
                .insert(resource_name(workload), times);
            self
        }

        fn unreadable(mut self, workload: &str) -> Self {
            self.unreadable.insert(resource_name(workload));
            self
        }

        fn replicas(&self, workload: &str) -> Option<i32> {
            self.replicas
                .lock()
                .unwrap()
                .get(&resource_name(workload))
                .copied()
        }
    }

    #[async_trait]
    impl ScaleClient for FakeScaleClient {
        async fn get_scale(&self, workload: &str) -> Result<WorkloadScale, ClusterError> {
            if self.unreadable.contains(workload) {
                return Err(ClusterError::NotFound(workload.to_string()));
            }
            Ok(WorkloadScale {
                replicas: self.replicas(workload).unwrap_or(0),
                resource_version: Some("1".to_string()),
            })
        }

        async fn update_scale(
            &self,
            workload: &str,
            scale: &WorkloadScale,
        ) -> Result<(), ClusterError> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            if let Some(left) = self.conflicts.lock().unwrap().get_mut(workload) {
                if *left > 0 {
                    *left -= 1;
                    return Err(ClusterError::Conflict(workload.to_string()));
                }
            }
            self.replicas
                .lock()
                .unwrap()
                .insert(workload.to_string(), scale.replicas);
            self.fired_at
                .lock()
                .unwrap()
                .push((workload.to_string(), Instant::now()));
            Ok(())
        }
    }

    fn event(offset_secs: u64, workload: &str, replicas: i32) -> ScalingEvent {
        ScalingEvent {
            offset: Duration::from_secs(offset_secs),
            workload: workload.to_string(),
            resource_name: resource_name(workload),
            replicas,
        }
    }

    fn scheduler(client: Arc<FakeScaleClient>) -> Arc<EventScheduler> {
        Arc::new(EventScheduler::new(client, SchedulerConfig::default()))
    }

    #[tokio::test]
    async fn test_scale_first_attempt() {
        let client = Arc::new(FakeScaleClient::default());
        let outcome = scheduler(client.clone()).scale(&event(0, "web", 5)).await;

        assert_eq!(outcome, EventOutcome::Scaled { attempts: 1 });
        assert_eq!(client.replicas("web"), Some(5));
    }

    #[tokio::test]
    async fn test_scale_retries_conflicts() {
        let client = Arc::new(FakeScaleClient::default().conflicting("web", 3));
        let outcome = scheduler(client.clone()).scale(&event(0, "web", 2)).await;

        assert_eq!(outcome, EventOutcome::Scaled { attempts: 4 });
        assert_eq!(client.replicas("web"), Some(2));
    }

    #[tokio::test]
    async fn test_always_conflicting_update_exhausts_budget() {
        let client = Arc::new(FakeScaleClient::default().conflicting("web", u32::MAX));
        let outcome = scheduler(client.clone()).scale(&event(0, "web", 2)).await;

        assert_eq!(outcome, EventOutcome::Exhausted { attempts: 100 });
        assert_eq!(client.updates.load(Ordering::SeqCst), 100);
        assert_eq!(client.replicas("web"), None);
    }

    #[tokio::test]
    async fn test_read_failure_is_not_retried() {
        let client = Arc::new(FakeScaleClient::default().unreadable("web"));
        let outcome = scheduler(client.clone()).scale(&event(0, "web", 2)).await;

        assert_eq!(outcome, EventOutcome::ReadFailed { attempts: 1 });
        assert_eq!(client.updates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_fire_at_their_offsets() {
        let client = Arc::new(FakeScaleClient::default());
        let (stop, _) = broadcast::channel(1);
        let start = Instant::now();

        let handles = scheduler(client.clone()).spawn(
            vec![event(0, "a", 1), event(5, "b", 2), event(10, "a", 3)],
            start,
            &stop,
        );
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().is_success());
        }

        let fired = client.fired_at.lock().unwrap().clone();
        assert_eq!(fired.len(), 3);
        for (workload, at) in &fired {
            assert!(*at >= start);
            assert!(workload.starts_with("ccmon-"));
        }
        assert_eq!(fired[2].1 - start, Duration::from_secs(10));
        assert_eq!(client.replicas("a"), Some(3));
        assert_eq!(client.replicas("b"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_event_does_not_block_others() {
        let client = Arc::new(
            FakeScaleClient::default()
                .conflicting("stuck", u32::MAX)
                .unreadable("gone"),
        );
        let (stop, _) = broadcast::channel(1);

        let handles = scheduler(client.clone()).spawn(
            vec![event(1, "stuck", 4), event(1, "gone", 1), event(1, "web", 7)],
            Instant::now(),
            &stop,
        );

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap().unwrap());
        }
        assert_eq!(outcomes[0], EventOutcome::Exhausted { attempts: 100 });
        assert_eq!(outcomes[1], EventOutcome::ReadFailed { attempts: 1 });
        assert_eq!(outcomes[2], EventOutcome::Scaled { attempts: 1 });
        assert_eq!(client.replicas("web"), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_before_deadline() {
        let client = Arc::new(FakeScaleClient::default());
        let (stop, _) = broadcast::channel(1);

        let handles = scheduler(client.clone()).spawn(
            vec![event(1, "a", 1), event(60, "b", 1)],
            Instant::now(),
            &stop,
        );

        tokio::time::sleep(Duration::from_secs(2)).await;
        stop.send(()).unwrap();

        let outcomes: Vec<_> = join_outcomes(handles).await;
        assert_eq!(outcomes[0], Some(EventOutcome::Scaled { attempts: 1 }));
        assert_eq!(outcomes[1], None);
        assert_eq!(client.replicas("b"), None);
    }

    async fn join_outcomes(
        handles: Vec<JoinHandle<Option<EventOutcome>>>,
    ) -> Vec<Option<EventOutcome>> {
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            out.push(handle.await.unwrap());
        }
        out
    }
}
