//! Postgres implementation of the Repository contract (§4.1, §6 schema).
//!
//! Mirrors the teacher's `repositories/meeting_controllers.rs` and
//! `repositories/auth_events.rs`: runtime `sqlx::query`/`sqlx::query_as`
//! (not the compile-time `query!` macros, so this crate builds without a
//! live `DATABASE_URL`), JSON columns bound as plain `serde_json::Value`,
//! and a DB-query duration histogram wrapping every call (ADR-0011 in the
//! teacher).

use super::{JobHistoryFilters, Paging, Repository};
use crate::models::{
    HardwareDescriptor, JobStatus, MetricsSnapshot, PeerDescriptor, PostRunMetrics, RecorderNode,
    RecordingJob, RecordingOptions, RegionalMetrics, RequesterDescriptor, RoomServer,
    RtpForwardingConfig, RtpStreamDescriptor,
};
use crate::observability::metrics as obs;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{StoreError, StoreResult};
use common::types::{JobId, RecorderNodeId, RoomServerId};
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Instant;
use tracing::instrument;

fn to_store_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StoreError::Transient(err.to_string()),
        _ => StoreError::Permanent(err.to_string()),
    }
}

fn decode_json<T: serde::de::DeserializeOwned>(value: serde_json::Value, column: &str) -> StoreResult<T> {
    serde_json::from_value(value)
        .map_err(|e| StoreError::Permanent(format!("decoding column {column}: {e}")))
}

fn encode_json<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// Postgres-backed Repository. Holds a bounded connection pool (§5: 2-10).
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with the pool bounds from config (§5, §6).
    pub async fn connect(database_url: &str, min_conns: u32, max_conns: u32) -> StoreResult<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .min_connections(min_conns)
            .max_connections(max_conns)
            .connect(database_url)
            .await
            .map_err(to_store_error)?;
        Ok(Self { pool })
    }

    /// Readiness check: can the pool reach the database.
    pub async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(to_store_error)?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct RoomServerRow {
    id: String,
    url: String,
    region: String,
    rooms: serde_json::Value,
    capacity: i32,
    current_load: i32,
    is_healthy: bool,
    last_heartbeat: DateTime<Utc>,
    specs: serde_json::Value,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl RoomServerRow {
    fn into_model(self) -> StoreResult<RoomServer> {
        Ok(RoomServer {
            id: RoomServerId::from(self.id),
            endpoint: self.url,
            region: self.region,
            rooms: decode_json(self.rooms, "rooms")?,
            capacity: self.capacity,
            current_load: self.current_load,
            healthy: self.is_healthy,
            last_heartbeat: self.last_heartbeat,
            hardware: decode_json::<HardwareDescriptor>(self.specs, "specs")?,
            metadata: decode_json::<HashMap<String, String>>(self.metadata, "metadata")?,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RecorderNodeRow {
    id: String,
    url: String,
    region: String,
    supported_codecs: serde_json::Value,
    active_jobs: serde_json::Value,
    capacity: i32,
    current_load: i32,
    is_healthy: bool,
    last_heartbeat: DateTime<Utc>,
    specs: serde_json::Value,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl RecorderNodeRow {
    fn into_model(self) -> StoreResult<RecorderNode> {
        let active_jobs: Vec<String> = decode_json(self.active_jobs, "active_jobs")?;
        Ok(RecorderNode {
            id: RecorderNodeId::from(self.id),
            endpoint: self.url,
            region: self.region,
            capacity: self.capacity,
            current_load: self.current_load,
            healthy: self.is_healthy,
            last_heartbeat: self.last_heartbeat,
            hardware: decode_json::<HardwareDescriptor>(self.specs, "specs")?,
            metadata: decode_json::<HashMap<String, String>>(self.metadata, "metadata")?,
            supported_codecs: decode_json(self.supported_codecs, "supported_codecs")?,
            active_jobs: active_jobs.into_iter().map(JobId::from).collect(),
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RecordingJobRow {
    job_id: String,
    room_server_id: String,
    room_id: String,
    peer_id: String,
    peer_info: serde_json::Value,
    recorder_id: Option<String>,
    rtp_streams: serde_json::Value,
    rtp_forwarding: serde_json::Value,
    options: serde_json::Value,
    status: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    output_path: Option<String>,
    error_message: Option<String>,
    requester_info: serde_json::Value,
    metrics: Option<serde_json::Value>,
    enqueued_seq: i64,
}

fn status_to_db(status: JobStatus) -> &'static str {
    use JobStatus::{Cancelled, Completed, Failed, Initializing, Pending, Recording};
    match status {
        Pending => "pending",
        Initializing => "initializing",
        Recording => "recording",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

fn status_from_db(status: &str) -> StoreResult<JobStatus> {
    use JobStatus::{Cancelled, Completed, Failed, Initializing, Pending, Recording};
    match status {
        "pending" => Ok(Pending),
        "initializing" => Ok(Initializing),
        "recording" => Ok(Recording),
        "completed" => Ok(Completed),
        "failed" => Ok(Failed),
        "cancelled" => Ok(Cancelled),
        other => Err(StoreError::Permanent(format!("unknown job status {other}"))),
    }
}

impl RecordingJobRow {
    fn into_model(self) -> StoreResult<RecordingJob> {
        Ok(RecordingJob {
            id: JobId::from(self.job_id),
            room_server_id: RoomServerId::from(self.room_server_id),
            room_id: self.room_id,
            peer_id: self.peer_id,
            peer: decode_json::<PeerDescriptor>(self.peer_info, "peer_info")?,
            recorder_id: self.recorder_id.map(RecorderNodeId::from),
            rtp_streams: decode_json::<Vec<RtpStreamDescriptor>>(self.rtp_streams, "rtp_streams")?,
            rtp_forwarding: decode_json::<RtpForwardingConfig>(self.rtp_forwarding, "rtp_forwarding")?,
            options: decode_json::<RecordingOptions>(self.options, "options")?,
            status: status_from_db(&self.status)?,
            start_time: self.start_time,
            end_time: self.end_time,
            output_path: self.output_path,
            error_message: self.error_message,
            requester: decode_json::<RequesterDescriptor>(self.requester_info, "requester_info")?,
            metrics: self
                .metrics
                .map(|m| decode_json::<PostRunMetrics>(m, "metrics"))
                .transpose()?,
            enqueued_seq: self.enqueued_seq as u64,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SystemMetricsRow {
    taken_at: DateTime<Utc>,
    total_room_servers: i32,
    total_recorder_nodes: i32,
    total_active_recordings: i32,
    total_capacity: i64,
    total_load: i64,
    queue_length: i32,
    unhealthy_node_count: i32,
    regional: serde_json::Value,
}

impl SystemMetricsRow {
    fn into_model(self) -> StoreResult<MetricsSnapshot> {
        Ok(MetricsSnapshot {
            taken_at: self.taken_at,
            total_room_servers: self.total_room_servers as u32,
            total_recorder_nodes: self.total_recorder_nodes as u32,
            total_active_recordings: self.total_active_recordings as u32,
            total_capacity: self.total_capacity,
            total_load: self.total_load,
            queue_length: self.queue_length as u32,
            unhealthy_node_count: self.unhealthy_node_count as u32,
            regional: decode_json::<HashMap<String, RegionalMetrics>>(self.regional, "regional")?,
        })
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    #[instrument(skip_all, fields(room_server_id = %server.id))]
    async fn upsert_room_server(&self, server: &RoomServer) -> StoreResult<()> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            INSERT INTO room_servers (
                id, url, region, rooms, capacity, current_load, is_healthy,
                last_heartbeat, specs, metadata, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            ON CONFLICT (id) DO UPDATE SET
                url = EXCLUDED.url,
                region = EXCLUDED.region,
                rooms = EXCLUDED.rooms,
                capacity = EXCLUDED.capacity,
                current_load = EXCLUDED.current_load,
                is_healthy = EXCLUDED.is_healthy,
                last_heartbeat = EXCLUDED.last_heartbeat,
                specs = EXCLUDED.specs,
                metadata = EXCLUDED.metadata,
                updated_at = NOW()
            "#,
        )
        .bind(server.id.as_str())
        .bind(&server.endpoint)
        .bind(&server.region)
        .bind(encode_json(&server.rooms))
        .bind(server.capacity)
        .bind(server.current_load)
        .bind(server.healthy)
        .bind(server.last_heartbeat)
        .bind(encode_json(&server.hardware))
        .bind(encode_json(&server.metadata))
        .bind(server.created_at)
        .execute(&self.pool)
        .await;

        obs::record_db_query(
            "upsert_room_server",
            if result.is_ok() { "success" } else { "error" },
            start.elapsed(),
        );
        result.map_err(to_store_error)?;
        Ok(())
    }

    #[instrument(skip_all, fields(recorder_id = %node.id))]
    async fn upsert_recorder_node(&self, node: &RecorderNode) -> StoreResult<()> {
        let start = Instant::now();
        let active_jobs: Vec<&str> = node.active_jobs.iter().map(JobId::as_str).collect();
        let result = sqlx::query(
            r#"
            INSERT INTO recorder_nodes (
                id, url, region, supported_codecs, active_jobs, capacity,
                current_load, is_healthy, last_heartbeat, specs, metadata,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW())
            ON CONFLICT (id) DO UPDATE SET
                url = EXCLUDED.url,
                region = EXCLUDED.region,
                supported_codecs = EXCLUDED.supported_codecs,
                active_jobs = EXCLUDED.active_jobs,
                capacity = EXCLUDED.capacity,
                current_load = EXCLUDED.current_load,
                is_healthy = EXCLUDED.is_healthy,
                last_heartbeat = EXCLUDED.last_heartbeat,
                specs = EXCLUDED.specs,
                metadata = EXCLUDED.metadata,
                updated_at = NOW()
            "#,
        )
        .bind(node.id.as_str())
        .bind(&node.endpoint)
        .bind(&node.region)
        .bind(encode_json(&node.supported_codecs))
        .bind(encode_json(&active_jobs))
        .bind(node.capacity)
        .bind(node.current_load)
        .bind(node.healthy)
        .bind(node.last_heartbeat)
        .bind(encode_json(&node.hardware))
        .bind(encode_json(&node.metadata))
        .bind(node.created_at)
        .execute(&self.pool)
        .await;

        obs::record_db_query(
            "upsert_recorder_node",
            if result.is_ok() { "success" } else { "error" },
            start.elapsed(),
        );
        result.map_err(to_store_error)?;
        Ok(())
    }

    #[instrument(skip_all, fields(job_id = %job.id))]
    async fn upsert_job(&self, job: &RecordingJob) -> StoreResult<()> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            INSERT INTO recording_jobs (
                job_id, room_server_id, room_id, peer_id, peer_info, recorder_id,
                rtp_streams, rtp_forwarding, options, status, start_time, end_time,
                output_path, error_message, requester_info, metrics, enqueued_seq
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (job_id) DO UPDATE SET
                recorder_id = EXCLUDED.recorder_id,
                rtp_streams = EXCLUDED.rtp_streams,
                rtp_forwarding = EXCLUDED.rtp_forwarding,
                status = EXCLUDED.status,
                end_time = EXCLUDED.end_time,
                output_path = EXCLUDED.output_path,
                error_message = EXCLUDED.error_message,
                metrics = EXCLUDED.metrics
            "#,
        )
        .bind(job.id.as_str())
        .bind(job.room_server_id.as_str())
        .bind(&job.room_id)
        .bind(&job.peer_id)
        .bind(encode_json(&job.peer))
        .bind(job.recorder_id.as_ref().map(RecorderNodeId::as_str))
        .bind(encode_json(&job.rtp_streams))
        .bind(encode_json(&job.rtp_forwarding))
        .bind(encode_json(&job.options))
        .bind(status_to_db(job.status))
        .bind(job.start_time)
        .bind(job.end_time)
        .bind(&job.output_path)
        .bind(&job.error_message)
        .bind(encode_json(&job.requester))
        .bind(job.metrics.as_ref().map(encode_json))
        .bind(job.enqueued_seq as i64)
        .execute(&self.pool)
        .await;

        obs::record_db_query(
            "upsert_job",
            if result.is_ok() { "success" } else { "error" },
            start.elapsed(),
        );
        result.map_err(to_store_error)?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn load_healthy_room_servers(&self) -> StoreResult<Vec<RoomServer>> {
        let start = Instant::now();
        let result: Result<Vec<RoomServerRow>, sqlx::Error> = sqlx::query_as(
            r#"
            SELECT id, url, region, rooms, capacity, current_load, is_healthy,
                   last_heartbeat, specs, metadata, created_at
            FROM room_servers
            WHERE is_healthy = TRUE
            "#,
        )
        .fetch_all(&self.pool)
        .await;

        obs::record_db_query(
            "load_healthy_room_servers",
            if result.is_ok() { "success" } else { "error" },
            start.elapsed(),
        );
        result
            .map_err(to_store_error)?
            .into_iter()
            .map(RoomServerRow::into_model)
            .collect()
    }

    #[instrument(skip_all)]
    async fn load_healthy_recorder_nodes(&self) -> StoreResult<Vec<RecorderNode>> {
        let start = Instant::now();
        let result: Result<Vec<RecorderNodeRow>, sqlx::Error> = sqlx::query_as(
            r#"
            SELECT id, url, region, supported_codecs, active_jobs, capacity,
                   current_load, is_healthy, last_heartbeat, specs, metadata, created_at
            FROM recorder_nodes
            WHERE is_healthy = TRUE
            "#,
        )
        .fetch_all(&self.pool)
        .await;

        obs::record_db_query(
            "load_healthy_recorder_nodes",
            if result.is_ok() { "success" } else { "error" },
            start.elapsed(),
        );
        result
            .map_err(to_store_error)?
            .into_iter()
            .map(RecorderNodeRow::into_model)
            .collect()
    }

    #[instrument(skip_all)]
    async fn load_active_jobs(&self) -> StoreResult<Vec<RecordingJob>> {
        let start = Instant::now();
        let result: Result<Vec<RecordingJobRow>, sqlx::Error> = sqlx::query_as(
            r#"
            SELECT job_id, room_server_id, room_id, peer_id, peer_info, recorder_id,
                   rtp_streams, rtp_forwarding, options, status, start_time, end_time,
                   output_path, error_message, requester_info, metrics, enqueued_seq
            FROM recording_jobs
            WHERE status NOT IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .fetch_all(&self.pool)
        .await;

        obs::record_db_query(
            "load_active_jobs",
            if result.is_ok() { "success" } else { "error" },
            start.elapsed(),
        );
        result
            .map_err(to_store_error)?
            .into_iter()
            .map(RecordingJobRow::into_model)
            .collect()
    }

    #[instrument(skip_all, fields(limit = paging.limit, offset = paging.offset))]
    async fn query_job_history(
        &self,
        filters: JobHistoryFilters,
        paging: Paging,
    ) -> StoreResult<Vec<RecordingJob>> {
        let start = Instant::now();
        let status = filters.status.map(status_to_db);
        let result: Result<Vec<RecordingJobRow>, sqlx::Error> = sqlx::query_as(
            r#"
            SELECT job_id, room_server_id, room_id, peer_id, peer_info, recorder_id,
                   rtp_streams, rtp_forwarding, options, status, start_time, end_time,
                   output_path, error_message, requester_info, metrics, enqueued_seq
            FROM recording_jobs
            WHERE ($1::TEXT IS NULL OR room_server_id = $1)
              AND ($2::TEXT IS NULL OR status = $2)
              AND ($3::TIMESTAMPTZ IS NULL OR start_time >= $3)
            ORDER BY start_time DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(filters.room_server_id)
        .bind(status)
        .bind(filters.since)
        .bind(paging.limit)
        .bind(paging.offset)
        .fetch_all(&self.pool)
        .await;

        obs::record_db_query(
            "query_job_history",
            if result.is_ok() { "success" } else { "error" },
            start.elapsed(),
        );
        result
            .map_err(to_store_error)?
            .into_iter()
            .map(RecordingJobRow::into_model)
            .collect()
    }

    #[instrument(skip_all)]
    async fn append_metrics_snapshot(&self, snapshot: &MetricsSnapshot) -> StoreResult<()> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            INSERT INTO system_metrics (
                timestamp, total_room_servers, total_recorder_nodes,
                total_active_recordings, total_capacity, total_load,
                queue_length, unhealthy_node_count, regional
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(snapshot.taken_at)
        .bind(snapshot.total_room_servers as i32)
        .bind(snapshot.total_recorder_nodes as i32)
        .bind(snapshot.total_active_recordings as i32)
        .bind(snapshot.total_capacity)
        .bind(snapshot.total_load)
        .bind(snapshot.queue_length as i32)
        .bind(snapshot.unhealthy_node_count as i32)
        .bind(encode_json(&snapshot.regional))
        .execute(&self.pool)
        .await;

        obs::record_db_query(
            "append_metrics_snapshot",
            if result.is_ok() { "success" } else { "error" },
            start.elapsed(),
        );
        result.map_err(to_store_error)?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn query_metrics_range(
        &self,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> StoreResult<Vec<MetricsSnapshot>> {
        let start = Instant::now();
        let result: Result<Vec<SystemMetricsRow>, sqlx::Error> = sqlx::query_as(
            r#"
            SELECT timestamp AS taken_at, total_room_servers, total_recorder_nodes,
                   total_active_recordings, total_capacity, total_load,
                   queue_length, unhealthy_node_count, regional
            FROM system_metrics
            WHERE timestamp BETWEEN $1 AND $2
            ORDER BY timestamp ASC
            "#,
        )
        .bind(start_time)
        .bind(end_time)
        .fetch_all(&self.pool)
        .await;

        obs::record_db_query(
            "query_metrics_range",
            if result.is_ok() { "success" } else { "error" },
            start.elapsed(),
        );
        result
            .map_err(to_store_error)?
            .into_iter()
            .map(SystemMetricsRow::into_model)
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_db_strings() {
        for status in [
            JobStatus::Pending,
            JobStatus::Initializing,
            JobStatus::Recording,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            let db = status_to_db(status);
            assert_eq!(status_from_db(db).expect("known status"), status);
        }
    }

    #[test]
    fn unknown_status_string_is_rejected() {
        assert!(status_from_db("bogus").is_err());
    }

    #[test]
    fn json_round_trips_through_value() {
        let hw = HardwareDescriptor {
            cores: 4,
            ram_bytes: 8 * 1024 * 1024 * 1024,
            has_gpu: false,
            disk_bytes: 0,
        };
        let value = encode_json(&hw);
        let decoded: HardwareDescriptor = decode_json(value, "specs").expect("valid json");
        assert_eq!(decoded.cores, 4);
    }
}
