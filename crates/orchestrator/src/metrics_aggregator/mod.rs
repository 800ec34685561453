//! Metrics Aggregator (C7, spec §4.7): periodic fleet snapshot, regional
//! roll-up, scaling advisories, and a derived alert status. Reads only from
//! the Node Registry and Job Store; writes are limited to best-effort
//! Repository persistence and Event Bus publication.

use crate::events::{Event, EventBus, ScalingAdvisory, ScalingDirection, ScalingPriority};
use crate::jobs::JobStore;
use crate::models::{MetricsSnapshot, RegionalMetrics};
use crate::observability::metrics as obs;
use crate::registry::NodeRegistry;
use crate::repository::Repository;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// The subset of `Config` the Metrics Aggregator reads (§4.7).
#[derive(Debug, Clone, Copy)]
pub struct MetricsAggregatorConfig {
    pub tick_interval_ms: u64,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub auto_scale_min_nodes: u32,
    pub auto_scale_max_nodes: u32,
    pub auto_scale_cooldown_ms: u64,
}

/// Overall fleet classification derived from the latest snapshot (§4.7
/// `alertStatus()`). Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertStatus {
    Healthy,
    Caution,
    Warning,
    Critical,
}

/// Periodic read-only aggregation over `NodeRegistry` and `JobStore`,
/// publishing snapshots and advisories to the Event Bus.
pub struct MetricsAggregator {
    registry: Arc<NodeRegistry>,
    jobs: Arc<JobStore>,
    events: EventBus,
    repository: Arc<dyn Repository>,
    config: MetricsAggregatorConfig,
    last_advisory: RwLock<HashMap<(Option<String>, ScalingDirection), DateTime<Utc>>>,
}

impl MetricsAggregator {
    #[must_use]
    pub fn new(
        registry: Arc<NodeRegistry>,
        jobs: Arc<JobStore>,
        events: EventBus,
        repository: Arc<dyn Repository>,
        config: MetricsAggregatorConfig,
    ) -> Self {
        Self {
            registry,
            jobs,
            events,
            repository,
            config,
            last_advisory: RwLock::new(HashMap::new()),
        }
    }

    /// Run until `cancel_token` is cancelled.
    #[instrument(skip_all, name = "orchestrator.metrics_aggregator.run")]
    pub async fn run(&self, cancel_token: CancellationToken) {
        info!(
            target: "orchestrator.metrics_aggregator",
            interval_ms = self.config.tick_interval_ms,
            "starting metrics aggregator"
        );

        let mut interval = tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let started = Instant::now();
                    self.run_tick().await;
                    obs::record_metrics_aggregator_tick(started.elapsed());
                }
                _ = cancel_token.cancelled() => {
                    info!(target: "orchestrator.metrics_aggregator", "metrics aggregator received shutdown signal, exiting");
                    break;
                }
            }
        }

        info!(target: "orchestrator.metrics_aggregator", "metrics aggregator stopped");
    }

    async fn run_tick(&self) {
        let snapshot = self.build_snapshot().await;

        self.events
            .publish(Event::MetricsPublished(Box::new(snapshot.clone())))
            .await;
        obs::record_metrics_snapshot_published();

        for advisory in self.recommendations(&snapshot, Utc::now()).await {
            obs::record_scaling_advisory(direction_label(advisory.direction), priority_label(advisory.priority));
            self.events.publish(Event::ScalingAdvisory(Box::new(advisory))).await;
        }

        if let Err(e) = self.repository.append_metrics_snapshot(&snapshot).await {
            warn!(target: "orchestrator.metrics_aggregator", error = %e, "failed to persist metrics snapshot");
        }
    }

    /// Build a `MetricsSnapshot` from the live Registry and Job Store (§3,
    /// §4.7). Capacity/load figures roll up over recorder nodes only: room
    /// servers are external conferencing infrastructure this crate never
    /// scales, so they contribute to `RegionalMetrics::room_servers` alone.
    pub async fn build_snapshot(&self) -> MetricsSnapshot {
        let (room_servers, recorder_nodes) = self.registry.snapshot_all().await;
        let queue_length = self.jobs.queue_length().await as u32;

        let mut regional: HashMap<String, RegionalMetrics> = HashMap::new();
        for rs in &room_servers {
            regional.entry(rs.region.clone()).or_default().room_servers += 1;
        }
        for rn in &recorder_nodes {
            let entry = regional.entry(rn.region.clone()).or_default();
            entry.recorder_nodes += 1;
            entry.active_recordings += rn.active_jobs.len() as u32;
            entry.capacity += i64::from(rn.capacity);
            entry.load += i64::from(rn.current_load);
        }
        for metrics in regional.values_mut() {
            metrics.avg_load = if metrics.capacity > 0 {
                metrics.load as f64 / metrics.capacity as f64
            } else {
                0.0
            };
        }

        let total_capacity: i64 = recorder_nodes.iter().map(|rn| i64::from(rn.capacity)).sum();
        let total_load: i64 = recorder_nodes.iter().map(|rn| i64::from(rn.current_load)).sum();
        let unhealthy_node_count = room_servers.iter().filter(|rs| !rs.healthy).count() as u32
            + recorder_nodes.iter().filter(|rn| !rn.healthy).count() as u32;

        MetricsSnapshot {
            taken_at: Utc::now(),
            total_room_servers: room_servers.len() as u32,
            total_recorder_nodes: recorder_nodes.len() as u32,
            total_active_recordings: recorder_nodes.iter().map(|rn| rn.active_jobs.len() as u32).sum(),
            total_capacity,
            total_load,
            queue_length,
            unhealthy_node_count,
            regional,
        }
    }

    /// `recommendations()` (§4.7): scale-up/scale-down advisories derived
    /// from the snapshot's regional and global figures, rate-limited per
    /// region-and-direction by `autoScaleCooldown`.
    pub async fn recommendations(&self, snapshot: &MetricsSnapshot, now: DateTime<Utc>) -> Vec<ScalingAdvisory> {
        let mut advisories = Vec::new();

        for (region, metrics) in &snapshot.regional {
            if metrics.avg_load > self.config.scale_up_threshold {
                if metrics.recorder_nodes >= self.config.auto_scale_max_nodes {
                    continue;
                }
                let (priority, raw_delta) = if metrics.avg_load > 0.90 {
                    (ScalingPriority::Critical, 2)
                } else if metrics.avg_load > 0.85 {
                    (ScalingPriority::High, 1)
                } else {
                    (ScalingPriority::Medium, 1)
                };
                let headroom = (self.config.auto_scale_max_nodes - metrics.recorder_nodes) as i32;
                let delta = raw_delta.min(headroom);
                if delta > 0
                    && self
                        .cooldown_elapsed(Some(region.clone()), ScalingDirection::ScaleUp, now)
                        .await
                {
                    advisories.push(ScalingAdvisory {
                        region: Some(region.clone()),
                        direction: ScalingDirection::ScaleUp,
                        priority,
                        delta,
                        reason: format!(
                            "region {region} average load {:.0}% exceeds scale-up threshold",
                            metrics.avg_load * 100.0
                        ),
                    });
                }
            } else if metrics.avg_load < self.config.scale_down_threshold
                && metrics.recorder_nodes > self.config.auto_scale_min_nodes
                && self
                    .cooldown_elapsed(Some(region.clone()), ScalingDirection::ScaleDown, now)
                    .await
            {
                advisories.push(ScalingAdvisory {
                    region: Some(region.clone()),
                    direction: ScalingDirection::ScaleDown,
                    priority: ScalingPriority::Low,
                    delta: -1,
                    reason: format!(
                        "region {region} average load {:.0}% below scale-down threshold",
                        metrics.avg_load * 100.0
                    ),
                });
            }
        }

        if snapshot.queue_length > 10 && self.cooldown_elapsed(None, ScalingDirection::ScaleUp, now).await {
            advisories.push(ScalingAdvisory {
                region: None,
                direction: ScalingDirection::ScaleUp,
                priority: ScalingPriority::High,
                delta: 1,
                reason: format!("pending queue length {} exceeds threshold", snapshot.queue_length),
            });
        }

        advisories
    }

    async fn cooldown_elapsed(&self, region: Option<String>, direction: ScalingDirection, now: DateTime<Utc>) -> bool {
        let mut last = self.last_advisory.write().await;
        let key = (region, direction);
        let cooldown = chrono::Duration::milliseconds(self.config.auto_scale_cooldown_ms as i64);
        match last.get(&key) {
            Some(prev) if now - *prev < cooldown => false,
            _ => {
                last.insert(key, now);
                true
            }
        }
    }

    /// `alertStatus()` (§4.7): a derived, deterministic classification of
    /// overall fleet health from capacity utilization, queue length,
    /// unhealthy node count, and regional overload.
    #[must_use]
    pub fn alert_status(&self, snapshot: &MetricsSnapshot) -> AlertStatus {
        let avg_load = snapshot.avg_load();
        let any_region_critical = snapshot.regional.values().any(|r| r.avg_load > 0.95);

        if any_region_critical || avg_load > 0.95 || snapshot.queue_length > 25 {
            return AlertStatus::Critical;
        }
        if avg_load > self.config.scale_up_threshold
            || snapshot.queue_length > 10
            || snapshot.unhealthy_node_count > 0
        {
            return AlertStatus::Warning;
        }
        if avg_load > self.config.scale_down_threshold {
            return AlertStatus::Caution;
        }
        AlertStatus::Healthy
    }
}

fn direction_label(direction: ScalingDirection) -> &'static str {
    match direction {
        ScalingDirection::ScaleUp => "scale_up",
        ScalingDirection::ScaleDown => "scale_down",
    }
}

fn priority_label(priority: ScalingPriority) -> &'static str {
    match priority {
        ScalingPriority::Low => "low",
        ScalingPriority::Medium => "medium",
        ScalingPriority::High => "high",
        ScalingPriority::Critical => "critical",
    }
}
