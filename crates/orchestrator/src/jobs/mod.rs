//! Job Store (C3, spec §4.3): in-memory active-jobs map plus a pending queue.

use crate::errors::OrchestratorError;
use crate::ids::generate_job_id;
use crate::models::{JobStatus, PeerDescriptor, RecordingJob, RecordingOptions, RequesterDescriptor, RtpForwardingConfig, RtpStreamDescriptor};
use chrono::Utc;
use common::types::{JobId, RecorderNodeId, RoomServerId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Caller-supplied request to start a recording.
#[derive(Debug, Clone)]
pub struct RecordingRequest {
    pub room_server_id: RoomServerId,
    pub room_id: String,
    pub peer_id: String,
    pub peer: PeerDescriptor,
    pub rtp_streams: Vec<RtpStreamDescriptor>,
    pub options: RecordingOptions,
    pub requester: RequesterDescriptor,
}

/// Patch applied during a `transition` call: fields a caller may update
/// alongside a status change (recorder assignment, forwarding config,
/// output path, error description, post-run metrics).
#[derive(Debug, Clone, Default)]
pub struct TransitionPatch {
    pub recorder_id: Option<RecorderNodeId>,
    pub rtp_forwarding: Option<RtpForwardingConfig>,
    pub output_path: Option<String>,
    pub error_message: Option<String>,
    pub metrics: Option<crate::models::PostRunMetrics>,
}

/// In-memory active-jobs map plus an ordered pending queue (§4.3).
pub struct JobStore {
    active: RwLock<HashMap<JobId, RecordingJob>>,
    pending: RwLock<Vec<JobId>>,
    enqueue_seq: AtomicU64,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            pending: RwLock::new(Vec::new()),
            enqueue_seq: AtomicU64::new(0),
        }
    }

    /// Seed the store at startup from Repository-loaded active jobs.
    #[must_use]
    pub fn from_snapshot(jobs: Vec<RecordingJob>) -> Self {
        let seq = jobs.iter().map(|j| j.enqueued_seq).max().unwrap_or(0);
        let active = jobs.into_iter().map(|j| (j.id.clone(), j)).collect();
        Self {
            active: RwLock::new(active),
            pending: RwLock::new(Vec::new()),
            enqueue_seq: AtomicU64::new(seq + 1),
        }
    }

    /// Construct a new job in `pending` status (§3, §4.5 step 2). Does not
    /// add it to the active map or queue — callers decide that based on
    /// placement outcome (§4.5 steps 3-4).
    pub fn create(&self, request: RecordingRequest) -> RecordingJob {
        let now = Utc::now();
        RecordingJob {
            id: JobId::from(generate_job_id()),
            room_server_id: request.room_server_id,
            room_id: request.room_id,
            peer_id: request.peer_id,
            peer: request.peer,
            recorder_id: None,
            rtp_streams: request.rtp_streams,
            rtp_forwarding: RtpForwardingConfig::default(),
            options: request.options,
            status: JobStatus::Pending,
            start_time: now,
            end_time: None,
            output_path: None,
            error_message: None,
            requester: request.requester,
            metrics: None,
            enqueued_seq: self.enqueue_seq.fetch_add(1, Ordering::SeqCst),
        }
    }

    pub async fn get(&self, id: &JobId) -> Option<RecordingJob> {
        self.active.read().await.get(id).cloned()
    }

    /// Insert a job into the active map (e.g. a newly-placed job, or one
    /// reactivated out of the pending queue).
    pub async fn insert(&self, job: RecordingJob) {
        self.active.write().await.insert(job.id.clone(), job);
    }

    /// List active jobs, optionally filtered by status.
    pub async fn list_active(&self, status: Option<JobStatus>) -> Vec<RecordingJob> {
        self.active
            .read()
            .await
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect()
    }

    /// Enqueue a pending job. The job must already be present in the active
    /// map (it stays queryable by id while awaiting placement).
    pub async fn enqueue(&self, job_id: JobId) {
        self.pending.write().await.push(job_id);
    }

    /// Dequeue the first pending job matching `pred`, in priority order
    /// (SPEC_FULL §F.2: descending priority, ties by enqueue order), removing
    /// it from the queue. Returns `None` if no entry matches.
    pub async fn dequeue_first_matching<F>(&self, pred: F) -> Option<RecordingJob>
    where
        F: Fn(&RecordingJob) -> bool,
    {
        let active = self.active.read().await;
        let now = Utc::now();

        let mut pending = self.pending.write().await;
        let mut best: Option<(usize, i64, u64)> = None;
        for (idx, job_id) in pending.iter().enumerate() {
            let Some(job) = active.get(job_id) else {
                continue;
            };
            if !pred(job) {
                continue;
            }
            let priority = job.priority(now);
            let candidate = (idx, priority, job.enqueued_seq);
            best = Some(match best {
                None => candidate,
                Some((_, best_priority, best_seq))
                    if priority > best_priority
                        || (priority == best_priority && job.enqueued_seq < best_seq) =>
                {
                    candidate
                }
                Some(prior) => prior,
            });
        }

        let (idx, _, _) = best?;
        let job_id = pending.remove(idx);
        drop(pending);
        drop(active);
        self.active.read().await.get(&job_id).cloned()
    }

    /// Remove a pending job from the queue without transitioning it
    /// (e.g. when its room server has gone unhealthy, §4.6 step 3).
    pub async fn remove_from_queue(&self, id: &JobId) {
        self.pending.write().await.retain(|j| j != id);
    }

    /// Snapshot the pending queue's job ids, for iteration without holding
    /// the lock across mutation (§4.6 step 3).
    pub async fn pending_snapshot(&self) -> Vec<JobId> {
        self.pending.read().await.clone()
    }

    pub async fn queue_length(&self) -> usize {
        self.pending.read().await.len()
    }

    /// Remove a job from the active map entirely (it remains queryable only
    /// via the Repository, per §3's lifecycle summary).
    pub async fn remove(&self, id: &JobId) -> Option<RecordingJob> {
        self.active.write().await.remove(id)
    }

    /// Enforce the state machine (§3) and auto-stamp `endTime` on terminal
    /// transitions. Transitions are audit-logged. Unlawful transitions fail
    /// with `invalid-transition` and leave the job untouched.
    pub async fn transition(
        &self,
        id: &JobId,
        next: JobStatus,
        patch: TransitionPatch,
    ) -> Result<RecordingJob, OrchestratorError> {
        let mut map = self.active.write().await;
        let job = map
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("job {id}")))?;

        let prior = job.status;
        job.transition(next, Utc::now()).map_err(|(from, to)| {
            OrchestratorError::InvalidTransition(format!("{from:?} -> {to:?}"))
        })?;

        if let Some(recorder_id) = patch.recorder_id {
            job.recorder_id = Some(recorder_id);
        }
        if let Some(forwarding) = patch.rtp_forwarding {
            job.rtp_forwarding = forwarding;
        }
        if let Some(output_path) = patch.output_path {
            job.output_path = Some(output_path);
        }
        if let Some(error_message) = patch.error_message {
            job.error_message = Some(error_message);
        }
        if let Some(metrics) = patch.metrics {
            job.metrics = Some(metrics);
        }

        tracing::info!(
            target: "orchestrator.jobs",
            job_id = %id,
            from = ?prior,
            to = ?next,
            "job transitioned"
        );

        Ok(job.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{ContainerFormat, Quality, StreamKind};

    fn request() -> RecordingRequest {
        RecordingRequest {
            room_server_id: RoomServerId::from("rs-1"),
            room_id: "room-1".to_string(),
            peer_id: "peer-1".to_string(),
            peer: PeerDescriptor {
                display_name: "alice".to_string(),
                authenticated: true,
                roles: vec![],
                joined_at: Utc::now(),
            },
            rtp_streams: vec![RtpStreamDescriptor {
                kind: StreamKind::Audio,
                port: 5000,
                payload_type: 111,
                ssrc: 1,
                codec_name: "opus".to_string(),
            }],
            options: RecordingOptions {
                quality: Quality::Medium,
                container_format: ContainerFormat::Mp4,
                include_audio: true,
                include_video: false,
                max_duration_secs: None,
            },
            requester: RequesterDescriptor {
                requester_id: "req-1".to_string(),
                reason: None,
            },
        }
    }

    #[tokio::test]
    async fn create_produces_pending_job_with_generated_id() {
        let store = JobStore::new();
        let job = store.create(request());
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.id.as_str().starts_with("rec-"));
    }

    #[tokio::test]
    async fn transition_enforces_state_machine() {
        let store = JobStore::new();
        let job = store.create(request());
        store.insert(job.clone()).await;

        let err = store
            .transition(&job.id, JobStatus::Recording, TransitionPatch::default())
            .await
            .expect_err("illegal jump");
        assert_eq!(err.code(), "invalid-transition");

        store
            .transition(&job.id, JobStatus::Initializing, TransitionPatch::default())
            .await
            .expect("legal");
        let updated = store.get(&job.id).await.unwrap();
        assert_eq!(updated.status, JobStatus::Initializing);
    }

    #[tokio::test]
    async fn transition_applies_patch_and_stamps_end_time_on_terminal() {
        let store = JobStore::new();
        let job = store.create(request());
        store.insert(job.clone()).await;

        store
            .transition(
                &job.id,
                JobStatus::Failed,
                TransitionPatch {
                    error_message: Some("room server became unhealthy".to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect("legal");

        let updated = store.get(&job.id).await.unwrap();
        assert_eq!(updated.status, JobStatus::Failed);
        assert!(updated.end_time.is_some());
        assert_eq!(
            updated.error_message.as_deref(),
            Some("room server became unhealthy")
        );
    }

    #[tokio::test]
    async fn dequeue_first_matching_prefers_higher_priority() {
        let store = JobStore::new();

        let mut low = store.create(request());
        low.peer.authenticated = false;
        store.insert(low.clone()).await;
        store.enqueue(low.id.clone()).await;

        let mut high = store.create(request());
        high.peer.authenticated = true;
        high.peer.roles = vec!["moderator".to_string()];
        store.insert(high.clone()).await;
        store.enqueue(high.id.clone()).await;

        let dequeued = store
            .dequeue_first_matching(|_| true)
            .await
            .expect("one present");
        assert_eq!(dequeued.id, high.id);
        assert_eq!(store.queue_length().await, 1);
    }

    #[tokio::test]
    async fn remove_from_queue_does_not_touch_active_map() {
        let store = JobStore::new();
        let job = store.create(request());
        store.insert(job.clone()).await;
        store.enqueue(job.id.clone()).await;

        store.remove_from_queue(&job.id).await;
        assert_eq!(store.queue_length().await, 0);
        assert!(store.get(&job.id).await.is_some());
    }
}
