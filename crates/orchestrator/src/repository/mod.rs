//! Repository (C1, spec §4.1): durable snapshots of registries, jobs, and
//! metrics. Writes are best-effort and never sit on the recording-start
//! critical path — the in-memory state (Registry, Job Store) is
//! authoritative; the Repository exists for warm-restart and history.

mod postgres;

pub use postgres::PostgresRepository;

use crate::models::{JobStatus, MetricsSnapshot, RecorderNode, RecordingJob, RoomServer};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::StoreResult;

/// Filters accepted by `query_job_history` (§4.1).
#[derive(Debug, Clone, Default)]
pub struct JobHistoryFilters {
    pub room_server_id: Option<String>,
    pub status: Option<JobStatus>,
    pub since: Option<DateTime<Utc>>,
}

/// Offset-based paging for history queries.
#[derive(Debug, Clone, Copy)]
pub struct Paging {
    pub limit: i64,
    pub offset: i64,
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

/// The narrow contract named in §4.1. All operations are blocking I/O and
/// may fail with a transient or permanent `StoreError`; callers log and
/// proceed rather than block a state transition on failure (§7).
#[async_trait]
pub trait Repository: Send + Sync {
    async fn upsert_room_server(&self, server: &RoomServer) -> StoreResult<()>;
    async fn upsert_recorder_node(&self, node: &RecorderNode) -> StoreResult<()>;
    async fn upsert_job(&self, job: &RecordingJob) -> StoreResult<()>;

    async fn load_healthy_room_servers(&self) -> StoreResult<Vec<RoomServer>>;
    async fn load_healthy_recorder_nodes(&self) -> StoreResult<Vec<RecorderNode>>;
    async fn load_active_jobs(&self) -> StoreResult<Vec<RecordingJob>>;

    async fn query_job_history(
        &self,
        filters: JobHistoryFilters,
        paging: Paging,
    ) -> StoreResult<Vec<RecordingJob>>;

    async fn append_metrics_snapshot(&self, snapshot: &MetricsSnapshot) -> StoreResult<()>;
    async fn query_metrics_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<MetricsSnapshot>>;
}
