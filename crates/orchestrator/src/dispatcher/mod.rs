//! Dispatcher (C5, spec §4.5): carries out placement, RTP forwarding setup,
//! recorder start, load accounting, and best-effort rollback on failure.

pub mod rpc;

use crate::errors::OrchestratorError;
use crate::events::{Event, EventBus};
use crate::jobs::{JobStore, RecordingRequest, TransitionPatch};
use crate::models::{JobStatus, RecordingJob, RtpForwardingConfig};
use crate::placement::{self, PlacementRequirement};
use crate::registry::NodeRegistry;
use common::types::{RecorderNodeId, RoomServerId};
use rpc::{
    ConfigureRtpForwardingRequest, PeerInfoWire, RecorderClient, RecordingOptionsWire,
    RoomInfoWire, RoomServerClient, RtpStreamWire, StartRecordingRequest, TargetNodeWire,
};

/// Orchestrates placement and rollback for recording jobs.
pub struct Dispatcher {
    registry: std::sync::Arc<NodeRegistry>,
    jobs: std::sync::Arc<JobStore>,
    events: EventBus,
    recorder_client: RecorderClient,
    room_server_client: RoomServerClient,
    callback_base_url: String,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        registry: std::sync::Arc<NodeRegistry>,
        jobs: std::sync::Arc<JobStore>,
        events: EventBus,
        callback_base_url: String,
    ) -> Self {
        Self {
            registry,
            jobs,
            events,
            recorder_client: RecorderClient::new(),
            room_server_client: RoomServerClient::new(),
            callback_base_url,
        }
    }

    /// `startRecording(request)` (§4.5).
    pub async fn start_recording(
        &self,
        request: RecordingRequest,
    ) -> Result<RecordingJob, OrchestratorError> {
        let room_server = self
            .registry
            .get_room_server(&request.room_server_id)
            .await
            .filter(|rs| rs.healthy)
            .ok_or_else(|| OrchestratorError::NoRoomServer(request.room_server_id.to_string()))?;

        let job = self.jobs.create(request);
        self.jobs.insert(job.clone()).await;

        let requirement = PlacementRequirement {
            region: room_server.region.clone(),
            codec_requirements: job.rtp_streams.iter().map(|s| s.codec_name.clone()).collect(),
            estimated_load: 1,
            prefer_gpu: false,
            min_cores: None,
            min_ram_bytes: None,
        };

        let candidates = self.registry.list_healthy_recorder_nodes().await;
        let chosen = placement::select_recorder(&candidates, &requirement).map(|n| n.id.clone());

        let outcome = match chosen {
            Some(recorder_id) => self.assign(&job.id, &recorder_id, &room_server.id).await,
            None => {
                self.jobs.enqueue(job.id.clone()).await;
                tracing::info!(target: "orchestrator.dispatcher", job_id = %job.id, "no recorder available, enqueued");
                Err(OrchestratorError::NoRecorderAvailable)
            }
        };

        let final_job = self.jobs.get(&job.id).await.unwrap_or(job);
        self.events.publish(Event::JobUpdated(Box::new(final_job.clone()))).await;

        // `no-recorder-available` still surfaces as an error to the caller
        // even though the job itself is enqueued, not terminal (§7) — the
        // caller's immediate placement attempt did not succeed. Callers that
        // want to distinguish "queued" from a hard failure can inspect
        // `OrchestratorError::is_enqueue_outcome()` on the returned error.
        outcome.map(|()| final_job)
    }

    /// `assign(job, recorder, roomServer)` (§4.5). On success the job ends
    /// in `recording`; on failure it ends in `failed` and local state is
    /// rolled back best-effort.
    pub async fn assign(
        &self,
        job_id: &common::types::JobId,
        recorder_id: &RecorderNodeId,
        room_server_id: &RoomServerId,
    ) -> Result<(), OrchestratorError> {
        let recorder = self
            .registry
            .get_recorder_node(recorder_id)
            .await
            .ok_or_else(|| OrchestratorError::NotFound(format!("recorder {recorder_id}")))?;
        let room_server = self
            .registry
            .get_room_server(room_server_id)
            .await
            .ok_or_else(|| OrchestratorError::NotFound(format!("room server {room_server_id}")))?;

        let job = self
            .jobs
            .transition(
                job_id,
                JobStatus::Initializing,
                TransitionPatch {
                    recorder_id: Some(recorder_id.clone()),
                    ..Default::default()
                },
            )
            .await?;

        let stream_count = job.rtp_streams.len() as u32;
        let ports = match self
            .recorder_client
            .allocate_ports(&recorder.endpoint, stream_count)
            .await
        {
            Ok(ports) => ports,
            Err(e) => {
                return self.fail_assign(job_id, None, e.to_string()).await;
            }
        };

        let forwarding = RtpForwardingConfig {
            target_ip: rpc::extract_host(&recorder.endpoint),
            ports: ports.clone(),
        };

        let mut rtp_streams = job.rtp_streams.clone();
        for (stream, port) in rtp_streams.iter_mut().zip(ports.iter()) {
            stream.port = *port;
        }

        let forwarding_request = ConfigureRtpForwardingRequest {
            job_id: job_id.to_string(),
            peer_id: job.peer_id.clone(),
            target_node: TargetNodeWire {
                ip: forwarding.target_ip.clone(),
                ports: forwarding.ports.clone(),
            },
            rtp_streams: rtp_streams.iter().map(wire_stream).collect(),
        };

        if let Err(e) = self
            .room_server_client
            .configure_rtp_forwarding(&room_server.endpoint, &forwarding_request)
            .await
        {
            self.release_ports_best_effort(&recorder.endpoint, &ports);
            return self.fail_assign(job_id, None, e.to_string()).await;
        }

        let start_request = StartRecordingRequest {
            job_id: job_id.to_string(),
            peer_info: PeerInfoWire {
                display_name: job.peer.display_name.clone(),
                authenticated: job.peer.authenticated,
                roles: job.peer.roles.clone(),
            },
            rtp_streams: rtp_streams.iter().map(wire_stream).collect(),
            options: wire_options(&job.options),
            room_info: RoomInfoWire {
                room_server_id: room_server_id.to_string(),
                room_id: job.room_id.clone(),
            },
            orchestrator_callback_url: format!("{}/events/{}", self.callback_base_url, job_id),
        };

        if let Err(e) = self
            .recorder_client
            .start_recording(&recorder.endpoint, &start_request)
            .await
        {
            self.rollback_forwarding(&room_server.endpoint, job_id).await;
            self.release_ports_best_effort(&recorder.endpoint, &ports);
            return self.fail_assign(job_id, None, e.to_string()).await;
        }

        self.registry
            .assign_recorder_job(recorder_id, job_id.clone())
            .await?;
        self.registry.increment_room_server_load(room_server_id).await?;

        self.jobs
            .transition(
                job_id,
                JobStatus::Recording,
                TransitionPatch {
                    rtp_forwarding: Some(forwarding),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(target: "orchestrator.dispatcher", job_id = %job_id, recorder_id = %recorder_id, "job assigned and recording");
        Ok(())
    }

    async fn fail_assign(
        &self,
        job_id: &common::types::JobId,
        _recorder_id: Option<&RecorderNodeId>,
        reason: String,
    ) -> Result<(), OrchestratorError> {
        tracing::warn!(target: "orchestrator.dispatcher", job_id = %job_id, reason = %reason, "assign failed, rolling back");
        self.jobs
            .transition(
                job_id,
                JobStatus::Failed,
                TransitionPatch {
                    error_message: Some(reason.clone()),
                    ..Default::default()
                },
            )
            .await?;
        Err(OrchestratorError::UpstreamRpc(reason))
    }

    /// §6 exposes no dedicated release-ports endpoint, and §9's Open
    /// Question treats orchestrator-side port tracking as cache only, not
    /// authoritative. "Release" here is therefore local bookkeeping: the
    /// recorder reclaims unused allocations on its own, so rollback just
    /// drops the cached ports and logs the abandonment.
    fn release_ports_best_effort(&self, recorder_endpoint: &str, ports: &[u16]) {
        if !ports.is_empty() {
            tracing::warn!(
                target: "orchestrator.dispatcher",
                recorder_endpoint = %recorder_endpoint,
                ports = ?ports,
                "abandoning allocated ports after assign failure"
            );
        }
    }

    async fn rollback_forwarding(&self, room_server_endpoint: &str, job_id: &common::types::JobId) {
        if let Err(e) = self
            .room_server_client
            .stop_rtp_forwarding(room_server_endpoint, &job_id.to_string())
            .await
        {
            tracing::warn!(target: "orchestrator.dispatcher", job_id = %job_id, error = %e, "best-effort forwarding rollback failed");
        }
    }

    /// `stopRecording(jobId)` (§4.5). Idempotent on a terminal job: returns
    /// the stored outcome without emitting any RPC or touching accounting.
    pub async fn stop_recording(
        &self,
        job_id: &common::types::JobId,
    ) -> Result<RecordingJob, OrchestratorError> {
        let job = self
            .jobs
            .get(job_id)
            .await
            .ok_or_else(|| OrchestratorError::NotFound(format!("job {job_id}")))?;

        if job.status.is_terminal() {
            return Ok(job);
        }

        let mut rpc_err = None;

        if let Some(recorder_id) = &job.recorder_id {
            if let Some(recorder) = self.registry.get_recorder_node(recorder_id).await {
                if let Err(e) = self
                    .recorder_client
                    .stop_recording(&recorder.endpoint, &job_id.to_string())
                    .await
                {
                    rpc_err = Some(e.to_string());
                }
                self.registry.release_recorder_job(recorder_id, job_id).await;
            }
        }

        if let Some(room_server) = self.registry.get_room_server(&job.room_server_id).await {
            if let Err(e) = self
                .room_server_client
                .stop_rtp_forwarding(&room_server.endpoint, &job_id.to_string())
                .await
            {
                rpc_err.get_or_insert_with(|| e.to_string());
            }
            // Room-server load is only incremented once a job reaches
            // `recording` (assign's final step); releasing it for a job
            // still in `initializing` would under-count the server.
            if job.status == JobStatus::Recording {
                self.registry
                    .release_room_server_load(&job.room_server_id, 1)
                    .await;
            }
        }

        let next_status = if rpc_err.is_some() {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };

        let updated = self
            .jobs
            .transition(
                job_id,
                next_status,
                TransitionPatch {
                    error_message: rpc_err,
                    ..Default::default()
                },
            )
            .await?;

        self.events.publish(Event::JobUpdated(Box::new(updated.clone()))).await;
        Ok(updated)
    }

    /// Force a non-terminal job to `failed` with a fixed `reason`, releasing
    /// local accounting and issuing a best-effort recorder stop (§4.6 step 2:
    /// jobs rooted on a room server that became unhealthy are never
    /// considered to have completed normally, regardless of how the
    /// recorder's stop RPC resolves). Idempotent on an already-terminal job.
    pub async fn fail_active_job(
        &self,
        job_id: &common::types::JobId,
        reason: String,
    ) -> Result<RecordingJob, OrchestratorError> {
        let job = self
            .jobs
            .get(job_id)
            .await
            .ok_or_else(|| OrchestratorError::NotFound(format!("job {job_id}")))?;

        if job.status.is_terminal() {
            return Ok(job);
        }

        if let Some(recorder_id) = &job.recorder_id {
            if let Some(recorder) = self.registry.get_recorder_node(recorder_id).await {
                if let Err(e) = self
                    .recorder_client
                    .stop_recording(&recorder.endpoint, &job_id.to_string())
                    .await
                {
                    tracing::warn!(target: "orchestrator.dispatcher", job_id = %job_id, error = %e, "best-effort recorder stop failed during forced failure");
                }
            }
            self.registry.release_recorder_job(recorder_id, job_id).await;
        }

        if job.status == JobStatus::Recording {
            self.registry
                .release_room_server_load(&job.room_server_id, 1)
                .await;
        }

        let updated = self
            .jobs
            .transition(
                job_id,
                JobStatus::Failed,
                TransitionPatch {
                    error_message: Some(reason),
                    ..Default::default()
                },
            )
            .await?;

        self.events.publish(Event::JobUpdated(Box::new(updated.clone()))).await;
        Ok(updated)
    }
}

fn wire_stream(stream: &crate::models::RtpStreamDescriptor) -> RtpStreamWire {
    RtpStreamWire {
        kind: match stream.kind {
            crate::models::StreamKind::Audio => "audio".to_string(),
            crate::models::StreamKind::Video => "video".to_string(),
        },
        port: stream.port,
        payload_type: stream.payload_type,
        ssrc: stream.ssrc,
        codec_name: stream.codec_name.clone(),
    }
}

fn wire_options(options: &crate::models::RecordingOptions) -> RecordingOptionsWire {
    RecordingOptionsWire {
        quality: match options.quality {
            crate::models::Quality::Low => "low".to_string(),
            crate::models::Quality::Medium => "medium".to_string(),
            crate::models::Quality::High => "high".to_string(),
        },
        container_format: match options.container_format {
            crate::models::ContainerFormat::Mp4 => "mp4".to_string(),
            crate::models::ContainerFormat::Webm => "webm".to_string(),
            crate::models::ContainerFormat::Mkv => "mkv".to_string(),
        },
        include_audio: options.include_audio,
        include_video: options.include_video,
        max_duration_secs: options.max_duration_secs,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{ContainerFormat, HardwareDescriptor, PeerDescriptor, Quality, RequesterDescriptor, RtpStreamDescriptor, StreamKind};
    use crate::registry::{RecorderNodeDecl, RoomServerDecl};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn hw() -> HardwareDescriptor {
        HardwareDescriptor {
            cores: 4,
            ram_bytes: 8 * 1024 * 1024 * 1024,
            has_gpu: false,
            disk_bytes: 0,
        }
    }

    async fn setup() -> (Arc<NodeRegistry>, Arc<JobStore>, Dispatcher, RoomServerId) {
        let registry = Arc::new(NodeRegistry::new(6));
        let jobs = Arc::new(JobStore::new());
        let events = EventBus::new();
        let dispatcher = Dispatcher::new(
            registry.clone(),
            jobs.clone(),
            events,
            "http://orchestrator:8080".to_string(),
        );

        let room_server_id = registry
            .register_room_server(RoomServerDecl {
                id: RoomServerId::from("rs-1"),
                endpoint: "http://rs1:9000".to_string(),
                region: "us-east-1".to_string(),
                rooms: vec!["room-1".to_string()],
                capacity: 10,
                hardware: hw(),
                metadata: HashMap::new(),
            })
            .await;

        (registry, jobs, dispatcher, room_server_id)
    }

    fn request(room_server_id: RoomServerId) -> RecordingRequest {
        RecordingRequest {
            room_server_id,
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
            options: crate::models::RecordingOptions {
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
    async fn start_recording_fails_fast_on_unknown_room_server() {
        let (_registry, _jobs, dispatcher, _id) = setup().await;
        let err = dispatcher
            .start_recording(request(RoomServerId::from("does-not-exist")))
            .await
            .expect_err("should fail");
        assert_eq!(err.code(), "no-room-server");
    }

    #[tokio::test]
    async fn start_recording_enqueues_when_no_recorder_available() {
        let (_registry, jobs, dispatcher, room_server_id) = setup().await;
        let err = dispatcher
            .start_recording(request(room_server_id))
            .await
            .expect_err("no recorders registered");
        assert_eq!(err.code(), "no-recorder-available");
        assert_eq!(jobs.queue_length().await, 1);
    }

    #[tokio::test]
    async fn stop_recording_on_unknown_job_is_not_found() {
        let (_registry, _jobs, dispatcher, _id) = setup().await;
        let err = dispatcher
            .stop_recording(&common::types::JobId::from("does-not-exist"))
            .await
            .expect_err("unknown job");
        assert_eq!(err.code(), "not-found");
    }

    #[tokio::test]
    async fn stop_recording_on_terminal_job_is_idempotent() {
        let (_registry, jobs, dispatcher, room_server_id) = setup().await;
        let job = jobs.create(request(room_server_id));
        let mut job = job;
        job.status = JobStatus::Completed;
        job.end_time = Some(Utc::now());
        jobs.insert(job.clone()).await;

        let outcome = dispatcher.stop_recording(&job.id).await.expect("idempotent");
        assert_eq!(outcome.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn fail_active_job_on_terminal_job_is_idempotent() {
        let (_registry, jobs, dispatcher, room_server_id) = setup().await;
        let mut job = jobs.create(request(room_server_id));
        job.status = JobStatus::Completed;
        job.end_time = Some(Utc::now());
        jobs.insert(job.clone()).await;

        let outcome = dispatcher
            .fail_active_job(&job.id, "room server became unhealthy".to_string())
            .await
            .expect("idempotent");
        assert_eq!(outcome.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn fail_active_job_on_pending_job_sets_fixed_reason_and_releases_no_load() {
        let (registry, jobs, dispatcher, room_server_id) = setup().await;
        let job = jobs.create(request(room_server_id.clone()));
        jobs.insert(job.clone()).await;

        let before = registry.get_room_server(&room_server_id).await.unwrap().current_load;

        let updated = dispatcher
            .fail_active_job(&job.id, "room server became unhealthy".to_string())
            .await
            .expect("forced failure");

        assert_eq!(updated.status, JobStatus::Failed);
        assert_eq!(updated.error_message.as_deref(), Some("room server became unhealthy"));
        assert_eq!(
            registry.get_room_server(&room_server_id).await.unwrap().current_load,
            before
        );
    }
}
