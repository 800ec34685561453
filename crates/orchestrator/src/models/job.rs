//! Recording job record and state machine (spec §3).

use chrono::{DateTime, Utc};
use common::types::{JobId, RecorderNodeId, RoomServerId};
use serde::{Deserialize, Serialize};

/// RTP stream kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Audio,
    Video,
}

/// Recording quality, used both as an option and as a placement score input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Low,
    Medium,
    High,
}

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerFormat {
    Mp4,
    Webm,
    Mkv,
}

/// One RTP stream the room server is producing for this job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtpStreamDescriptor {
    pub kind: StreamKind,
    /// Source port on the room server; rewritten to the allocated recorder
    /// port during `assign` (§4.5 step 3).
    pub port: u16,
    pub payload_type: u8,
    pub ssrc: u32,
    pub codec_name: String,
}

/// RTP forwarding configuration, a conceptual child of the job (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RtpForwardingConfig {
    /// Target IP, extracted from the recorder's endpoint URL.
    pub target_ip: String,
    /// Ports allocated on the recorder, one per RTP stream.
    pub ports: Vec<u16>,
}

/// Recording options requested by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingOptions {
    pub quality: Quality,
    pub container_format: ContainerFormat,
    pub include_audio: bool,
    pub include_video: bool,
    pub max_duration_secs: Option<u64>,
}

/// Describes the participant being recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerDescriptor {
    pub display_name: String,
    pub authenticated: bool,
    pub roles: Vec<String>,
    pub joined_at: DateTime<Utc>,
}

impl PeerDescriptor {
    #[must_use]
    pub fn is_moderator(&self) -> bool {
        self.roles.iter().any(|r| r == "moderator")
    }

    #[must_use]
    pub fn is_presenter(&self) -> bool {
        self.roles.iter().any(|r| r == "presenter")
    }
}

/// Describes who requested the recording (audit trail, not placement input).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequesterDescriptor {
    pub requester_id: String,
    pub reason: Option<String>,
}

/// Metrics reported by the recorder after a job finishes, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRunMetrics {
    pub duration_secs: u64,
    pub bytes_written: u64,
    pub dropped_packets: u64,
}

/// Job lifecycle state (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Initializing,
    Recording,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// True for `completed`, `failed`, `cancelled`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal edge in the state machine (§3).
    #[must_use]
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::{Cancelled, Completed, Failed, Initializing, Pending, Recording};
        matches!(
            (self, next),
            (Pending, Initializing | Failed | Cancelled)
                | (Initializing, Recording | Failed | Cancelled)
                | (Recording, Initializing | Completed | Failed | Cancelled)
        )
    }
}

/// The control-plane record of one recording (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingJob {
    pub id: JobId,
    pub room_server_id: RoomServerId,
    pub room_id: String,
    pub peer_id: String,
    pub peer: PeerDescriptor,
    /// Empty until placement.
    pub recorder_id: Option<RecorderNodeId>,
    pub rtp_streams: Vec<RtpStreamDescriptor>,
    pub rtp_forwarding: RtpForwardingConfig,
    pub options: RecordingOptions,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub output_path: Option<String>,
    pub error_message: Option<String>,
    pub requester: RequesterDescriptor,
    pub metrics: Option<PostRunMetrics>,
    /// Enqueue sequence, used to break priority ties in FIFO order (§9, SPEC_FULL §F.2).
    pub enqueued_seq: u64,
}

impl RecordingJob {
    /// Priority score for queue ordering (SPEC_FULL §F.2): additive bonuses
    /// for authentication and role, an age boost capped at 30, and a quality
    /// penalty. Higher sorts first; ties break by `enqueued_seq` ascending.
    #[must_use]
    pub fn priority(&self, now: DateTime<Utc>) -> i64 {
        let mut score: i64 = 0;
        if self.peer.authenticated {
            score += 20;
        }
        if self.peer.is_moderator() {
            score += 30;
        }
        if self.peer.is_presenter() {
            score += 15;
        }

        let age_secs = (now - self.start_time).num_seconds().max(0);
        let age_boost = (age_secs / 10).min(30);
        score += age_boost;

        score -= match self.options.quality {
            Quality::High => 10,
            Quality::Medium => 5,
            Quality::Low => 0,
        };

        score
    }

    /// Attempt a transition, enforcing the state machine and the
    /// `endTime` invariant (§3). Does not touch recorder/registry state.
    pub fn transition(&mut self, next: JobStatus, now: DateTime<Utc>) -> Result<(), (JobStatus, JobStatus)> {
        if !self.status.can_transition_to(next) {
            return Err((self.status, next));
        }
        self.status = next;
        if next.is_terminal() {
            self.end_time = Some(now);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn peer(authenticated: bool, roles: &[&str]) -> PeerDescriptor {
        PeerDescriptor {
            display_name: "alice".to_string(),
            authenticated,
            roles: roles.iter().map(|s| (*s).to_string()).collect(),
            joined_at: Utc::now(),
        }
    }

    fn sample_job() -> RecordingJob {
        RecordingJob {
            id: JobId::from("rec-1"),
            room_server_id: RoomServerId::from("rs-1"),
            room_id: "room-1".to_string(),
            peer_id: "peer-1".to_string(),
            peer: peer(false, &[]),
            recorder_id: None,
            rtp_streams: vec![],
            rtp_forwarding: RtpForwardingConfig::default(),
            options: RecordingOptions {
                quality: Quality::Medium,
                container_format: ContainerFormat::Mp4,
                include_audio: true,
                include_video: true,
                max_duration_secs: None,
            },
            status: JobStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            output_path: None,
            error_message: None,
            requester: RequesterDescriptor {
                requester_id: "req-1".to_string(),
                reason: None,
            },
            metrics: None,
            enqueued_seq: 0,
        }
    }

    #[test]
    fn legal_transitions_follow_state_machine() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Initializing));
        assert!(JobStatus::Initializing.can_transition_to(JobStatus::Recording));
        assert!(JobStatus::Recording.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Cancelled));
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Recording));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Recording));
        assert!(!JobStatus::Recording.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            for next in [
                JobStatus::Pending,
                JobStatus::Initializing,
                JobStatus::Recording,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn transition_stamps_end_time_only_when_terminal() {
        let mut job = sample_job();
        let now = Utc::now();

        job.transition(JobStatus::Initializing, now).expect("legal");
        assert!(job.end_time.is_none());

        job.transition(JobStatus::Recording, now).expect("legal");
        assert!(job.end_time.is_none());

        job.transition(JobStatus::Completed, now).expect("legal");
        assert_eq!(job.end_time, Some(now));
    }

    #[test]
    fn illegal_transition_returns_error_and_leaves_state_untouched() {
        let mut job = sample_job();
        let err = job
            .transition(JobStatus::Recording, Utc::now())
            .expect_err("illegal");
        assert_eq!(err, (JobStatus::Pending, JobStatus::Recording));
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn priority_rewards_authenticated_moderator_presenter() {
        let mut job = sample_job();
        job.start_time = Utc::now();
        let baseline = job.priority(job.start_time);

        job.peer = peer(true, &["moderator", "presenter"]);
        let boosted = job.priority(job.start_time);

        assert_eq!(boosted - baseline, 20 + 30 + 15);
    }

    #[test]
    fn priority_age_boost_caps_at_thirty() {
        let mut job = sample_job();
        job.start_time = Utc::now() - Duration::seconds(1000);
        let now = Utc::now();
        let score = job.priority(now);
        let expected_quality_penalty = 5;
        assert_eq!(score, 30 - expected_quality_penalty);
    }

    #[test]
    fn priority_quality_penalty_ranks_low_above_high() {
        let mut low = sample_job();
        low.options.quality = Quality::Low;
        let mut high = sample_job();
        high.options.quality = Quality::High;
        high.start_time = low.start_time;

        let now = low.start_time;
        assert!(low.priority(now) > high.priority(now));
    }
}
