//! Health Loop (C6, spec §4.6): periodic heartbeat staleness sweep, affected-job
//! reconciliation, a queue-drain attempt, and (SPEC_FULL §F.5) a much less
//! frequent stale-node garbage collection pass.

use crate::dispatcher::Dispatcher;
use crate::events::{Event, EventBus};
use crate::jobs::{JobStore, TransitionPatch};
use crate::models::JobStatus;
use crate::observability::metrics as obs;
use crate::placement::{self, PlacementRequirement};
use crate::registry::NodeRegistry;
use chrono::Utc;
use common::types::{JobId, RecorderNodeId, RoomServerId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// The subset of `Config` the Health Loop reads (§4.6, SPEC_FULL §F.5).
#[derive(Debug, Clone, Copy)]
pub struct HealthLoopConfig {
    pub tick_interval_ms: u64,
    pub node_timeout_ms: u64,
    pub sweep_stale_every_n_ticks: u32,
    pub stale_removal_horizon_ms: u64,
}

/// Periodic reconciliation of node health, affected jobs, and the pending
/// queue. Each tick runs serially: reap, then reconcile, then drain, then
/// (every Nth tick) sweep.
pub struct HealthLoop {
    registry: Arc<NodeRegistry>,
    jobs: Arc<JobStore>,
    dispatcher: Arc<Dispatcher>,
    events: EventBus,
    config: HealthLoopConfig,
}

impl HealthLoop {
    #[must_use]
    pub fn new(
        registry: Arc<NodeRegistry>,
        jobs: Arc<JobStore>,
        dispatcher: Arc<Dispatcher>,
        events: EventBus,
        config: HealthLoopConfig,
    ) -> Self {
        Self {
            registry,
            jobs,
            dispatcher,
            events,
            config,
        }
    }

    /// Run until `cancel_token` is cancelled.
    #[instrument(skip_all, name = "orchestrator.health.run")]
    pub async fn run(&self, cancel_token: CancellationToken) {
        info!(
            target: "orchestrator.health",
            interval_ms = self.config.tick_interval_ms,
            node_timeout_ms = self.config.node_timeout_ms,
            "starting health loop"
        );

        let mut interval = tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        let mut tick_count: u64 = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let started = Instant::now();
                    tick_count += 1;
                    self.run_tick(tick_count).await;
                    obs::record_health_loop_tick(started.elapsed());
                }
                _ = cancel_token.cancelled() => {
                    info!(target: "orchestrator.health", "health loop received shutdown signal, exiting");
                    break;
                }
            }
        }

        info!(target: "orchestrator.health", "health loop stopped");
    }

    async fn run_tick(&self, tick_count: u64) {
        let stale_room_servers = self.reap_stale_room_servers().await;
        let stale_recorders = self.reap_stale_recorders().await;

        for id in &stale_room_servers {
            self.reconcile_room_server_failure(id).await;
        }
        for id in &stale_recorders {
            self.reconcile_recorder_failure(id).await;
        }

        self.drain_queue().await;

        if self.config.sweep_stale_every_n_ticks > 0
            && tick_count % u64::from(self.config.sweep_stale_every_n_ticks) == 0
        {
            self.sweep_stale().await;
        }
    }

    async fn reap_stale_room_servers(&self) -> Vec<RoomServerId> {
        let (room_servers, _) = self.registry.snapshot_all().await;
        let now = Utc::now();
        let timeout = chrono::Duration::milliseconds(self.config.node_timeout_ms as i64);

        let mut newly_unhealthy = Vec::new();
        for rs in room_servers {
            if rs.healthy && now - rs.last_heartbeat > timeout {
                if self.registry.mark_room_server_unhealthy(&rs.id).await {
                    newly_unhealthy.push(rs.id);
                }
            }
        }
        if !newly_unhealthy.is_empty() {
            obs::record_health_loop_reap("room_server", newly_unhealthy.len() as u64);
        }
        newly_unhealthy
    }

    async fn reap_stale_recorders(&self) -> Vec<RecorderNodeId> {
        let (_, recorder_nodes) = self.registry.snapshot_all().await;
        let now = Utc::now();
        let timeout = chrono::Duration::milliseconds(self.config.node_timeout_ms as i64);

        let mut newly_unhealthy = Vec::new();
        for rn in recorder_nodes {
            if rn.healthy && now - rn.last_heartbeat > timeout {
                if self.registry.mark_recorder_unhealthy(&rn.id).await {
                    newly_unhealthy.push(rn.id);
                }
            }
        }
        if !newly_unhealthy.is_empty() {
            obs::record_health_loop_reap("recorder_node", newly_unhealthy.len() as u64);
        }
        newly_unhealthy
    }

    /// Jobs still queued for this room server can no longer be served; jobs
    /// already in flight are stopped best-effort (§4.6 step 2).
    async fn reconcile_room_server_failure(&self, id: &RoomServerId) {
        warn!(target: "orchestrator.health", room_server_id = %id, "reconciling room server failure");

        for job_id in self.jobs.pending_snapshot().await {
            let Some(job) = self.jobs.get(&job_id).await else {
                continue;
            };
            if job.room_server_id == *id {
                self.jobs.remove_from_queue(&job_id).await;
                self.fail_job(&job_id, "room server became unhealthy while queued".to_string())
                    .await;
            }
        }

        for job in self.jobs.list_active(None).await {
            if job.room_server_id != *id || job.status.is_terminal() {
                continue;
            }
            match self
                .dispatcher
                .fail_active_job(&job.id, "room server became unhealthy".to_string())
                .await
            {
                Ok(updated) => info!(
                    target: "orchestrator.health",
                    job_id = %updated.id,
                    status = ?updated.status,
                    "failed job after room server failure"
                ),
                Err(e) => warn!(
                    target: "orchestrator.health",
                    job_id = %job.id,
                    error = %e,
                    "failed to mark job failed after room server failure"
                ),
            }
        }
    }

    /// Jobs assigned to the failed recorder are handed to a replacement via
    /// the Placement Engine (`assign` again, §4.5); local accounting for the
    /// old assignment is released first so `assign` doesn't double-count it.
    /// Failed terminally if no replacement is available.
    async fn reconcile_recorder_failure(&self, id: &RecorderNodeId) {
        warn!(target: "orchestrator.health", recorder_id = %id, "reconciling recorder node failure");

        for job in self.jobs.list_active(None).await {
            if job.status.is_terminal() || job.recorder_id.as_ref() != Some(id) {
                continue;
            }

            self.registry.release_recorder_job(id, &job.id).await;
            // Room-server load is only incremented once a job reaches
            // `recording`; a job still `initializing` when its recorder
            // failed never added to that load.
            if job.status == JobStatus::Recording {
                self.registry.release_room_server_load(&job.room_server_id, 1).await;
            }

            let Some(room_server) = self.registry.get_room_server(&job.room_server_id).await else {
                self.fail_job(
                    &job.id,
                    "room server no longer registered during recorder failover".to_string(),
                )
                .await;
                continue;
            };

            let requirement = PlacementRequirement {
                region: room_server.region.clone(),
                codec_requirements: job.rtp_streams.iter().map(|s| s.codec_name.clone()).collect(),
                estimated_load: 1,
                prefer_gpu: false,
                min_cores: None,
                min_ram_bytes: None,
            };
            let candidates = self.registry.list_healthy_recorder_nodes().await;

            match placement::select_recorder(&candidates, &requirement).map(|n| n.id.clone()) {
                Some(new_recorder_id) => {
                    info!(
                        target: "orchestrator.health",
                        job_id = %job.id,
                        old_recorder = %id,
                        new_recorder = %new_recorder_id,
                        "reassigning job after recorder failure"
                    );
                    if let Err(e) = self.dispatcher.assign(&job.id, &new_recorder_id, &job.room_server_id).await {
                        warn!(target: "orchestrator.health", job_id = %job.id, error = %e, "reassignment failed");
                    }
                }
                None => {
                    self.fail_job(
                        &job.id,
                        format!("recorder node {id} became unhealthy and no replacement was available"),
                    )
                    .await;
                }
            }
        }
    }

    async fn fail_job(&self, job_id: &JobId, reason: String) {
        match self
            .jobs
            .transition(
                job_id,
                JobStatus::Failed,
                TransitionPatch {
                    error_message: Some(reason),
                    ..Default::default()
                },
            )
            .await
        {
            Ok(updated) => self.events.publish(Event::JobUpdated(Box::new(updated))).await,
            Err(e) => warn!(target: "orchestrator.health", job_id = %job_id, error = %e, "failed to mark job failed"),
        }
    }

    /// Attempt to place every queued job that a now-healthy recorder can
    /// serve, stopping as soon as fleet capacity is exhausted (§4.6 step 3).
    async fn drain_queue(&self) {
        loop {
            if self.jobs.queue_length().await == 0 {
                break;
            }

            let Some(job) = self.jobs.dequeue_first_matching(|_| true).await else {
                break;
            };

            let Some(room_server) = self
                .registry
                .get_room_server(&job.room_server_id)
                .await
                .filter(|rs| rs.healthy)
            else {
                self.fail_job(&job.id, "room server no longer healthy while queued".to_string())
                    .await;
                continue;
            };

            let requirement = PlacementRequirement {
                region: room_server.region.clone(),
                codec_requirements: job.rtp_streams.iter().map(|s| s.codec_name.clone()).collect(),
                estimated_load: 1,
                prefer_gpu: false,
                min_cores: None,
                min_ram_bytes: None,
            };
            let candidates = self.registry.list_healthy_recorder_nodes().await;

            match placement::select_recorder(&candidates, &requirement).map(|n| n.id.clone()) {
                Some(recorder_id) => {
                    if let Err(e) = self.dispatcher.assign(&job.id, &recorder_id, &room_server.id).await {
                        warn!(
                            target: "orchestrator.health",
                            job_id = %job.id,
                            error = %e,
                            "queued job assign attempt failed"
                        );
                    }
                }
                None => {
                    self.jobs.enqueue(job.id.clone()).await;
                    break;
                }
            }
        }
    }

    async fn sweep_stale(&self) {
        let horizon = chrono::Duration::milliseconds(self.config.stale_removal_horizon_ms as i64);
        let removed = self.registry.sweep_stale(horizon).await;
        if removed > 0 {
            obs::record_health_loop_reap("stale_sweep", removed);
        }
    }
}
