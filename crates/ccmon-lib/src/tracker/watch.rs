//! Supervised watch loops feeding the tracker

use super::ClusterStateTracker;
use crate::cluster::{ChangeFeed, FeedEvent};
use crate::health::{components, HealthRegistry};
use crate::models::{ObservedNode, TrackedPod};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Applies one change notification to the tracker
#[async_trait]
trait ApplyEvent<T>: Send + Sync {
    async fn apply(&self, event: FeedEvent<T>);
}

#[async_trait]
impl ApplyEvent<ObservedNode> for ClusterStateTracker {
    async fn apply(&self, event: FeedEvent<ObservedNode>) {
        match event {
            FeedEvent::Added(node) | FeedEvent::Modified(node) => {
                self.add_or_update_node(node).await
            }
            FeedEvent::Deleted(node) => self.remove_node(&node.name).await,
        }
    }
}

#[async_trait]
impl ApplyEvent<TrackedPod> for ClusterStateTracker {
    async fn apply(&self, event: FeedEvent<TrackedPod>) {
        match event {
            FeedEvent::Added(pod) | FeedEvent::Modified(pod) => self.add_or_update_pod(pod).await,
            FeedEvent::Deleted(pod) => self.remove_pod(&pod.uid).await,
        }
    }
}

impl ClusterStateTracker {
    /// Mirror the node feed until shutdown
    pub async fn watch_nodes(
        self: Arc<Self>,
        feed: Arc<dyn ChangeFeed<ObservedNode>>,
        health: HealthRegistry,
        shutdown: broadcast::Receiver<()>,
    ) {
        self.watch(feed, health, components::NODE_WATCH, shutdown)
            .await
    }

    /// Mirror the pod feed until shutdown
    pub async fn watch_pods(
        self: Arc<Self>,
        feed: Arc<dyn ChangeFeed<TrackedPod>>,
        health: HealthRegistry,
        shutdown: broadcast::Receiver<()>,
    ) {
        self.watch(feed, health, components::POD_WATCH, shutdown)
            .await
    }

    /// Subscribe, drain, and resubscribe forever. The loop never gives up
    /// on its own; only the shutdown signal (or its sender being dropped)
    /// ends it.
    async fn watch<T>(
        &self,
        feed: Arc<dyn ChangeFeed<T>>,
        health: HealthRegistry,
        component: &'static str,
        mut shutdown: broadcast::Receiver<()>,
    ) where
        T: Send + 'static,
        Self: ApplyEvent<T>,
    {
        let name = feed.name();
        health.register(component).await;
        info!(feed = name, "Watch started");

        loop {
            let subscribed = tokio::select! {
                _ = shutdown.recv() => break,
                result = feed.subscribe() => result,
            };

            let mut stream = match subscribed {
                Ok(stream) => {
                    health.set_healthy(component).await;
                    stream
                }
                Err(e) => {
                    warn!(feed = name, error = %e, "Subscription failed, resubscribing");
                    health
                        .set_degraded(component, format!("resubscribing: {e}"))
                        .await;
                    self.metrics.inc_watch_restarts(name);
                    tokio::task::yield_now().await;
                    continue;
                }
            };

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!(feed = name, "Watch stopped");
                        return;
                    }
                    item = stream.next() => match item {
                        Some(Ok(event)) => self.apply(event).await,
                        Some(Err(e)) => warn!(feed = name, error = %e, "Watch error"),
                        None => break,
                    }
                }
            }

            debug!(feed = name, "Watch closed, resubscribing");
            self.metrics.inc_watch_restarts(name);
        }

        info!(feed = name, "Watch stopped");
    }
}
