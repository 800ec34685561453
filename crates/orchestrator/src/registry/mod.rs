//! Node Registry (C2, spec §4.2): the in-memory authoritative map of room
//! servers and recorder nodes, heartbeat and health state.

use crate::errors::OrchestratorError;
use crate::ids::generate_recorder_id;
use crate::models::{HardwareDescriptor, RecorderNode, RoomServer};
use chrono::Utc;
use common::types::{JobId, RecorderNodeId, RoomServerId};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Caller-supplied declaration for a new room server.
#[derive(Debug, Clone)]
pub struct RoomServerDecl {
    pub id: RoomServerId,
    pub endpoint: String,
    pub region: String,
    pub rooms: Vec<String>,
    pub capacity: i32,
    pub hardware: HardwareDescriptor,
    pub metadata: HashMap<String, String>,
}

/// Caller-supplied declaration for a new recorder node. Capacity is derived,
/// not declared (§3).
#[derive(Debug, Clone)]
pub struct RecorderNodeDecl {
    pub endpoint: String,
    pub region: String,
    pub hardware: HardwareDescriptor,
    pub supported_codecs: Vec<String>,
    pub metadata: HashMap<String, String>,
}

/// In-memory authoritative store of room servers and recorder nodes.
pub struct NodeRegistry {
    room_servers: RwLock<HashMap<RoomServerId, RoomServer>>,
    recorder_nodes: RwLock<HashMap<RecorderNodeId, RecorderNode>>,
    max_concurrent_per_node: u32,
}

impl NodeRegistry {
    #[must_use]
    pub fn new(max_concurrent_per_node: u32) -> Self {
        Self {
            room_servers: RwLock::new(HashMap::new()),
            recorder_nodes: RwLock::new(HashMap::new()),
            max_concurrent_per_node,
        }
    }

    /// Seed the registry at startup from Repository-loaded snapshots (§4.1:
    /// the Repository is read once at startup).
    #[must_use]
    pub fn from_snapshots(
        room_servers: Vec<RoomServer>,
        recorder_nodes: Vec<RecorderNode>,
        max_concurrent_per_node: u32,
    ) -> Self {
        let room_servers = room_servers.into_iter().map(|rs| (rs.id.clone(), rs)).collect();
        let recorder_nodes = recorder_nodes
            .into_iter()
            .map(|rn| (rn.id.clone(), rn))
            .collect();
        Self {
            room_servers: RwLock::new(room_servers),
            recorder_nodes: RwLock::new(recorder_nodes),
            max_concurrent_per_node,
        }
    }

    /// Register or re-register a room server. Room-server ids are
    /// caller-supplied and stable across restarts (§4.2).
    pub async fn register_room_server(&self, decl: RoomServerDecl) -> RoomServerId {
        let now = Utc::now();
        let entry = RoomServer {
            id: decl.id.clone(),
            endpoint: decl.endpoint,
            region: decl.region,
            rooms: decl.rooms,
            capacity: decl.capacity,
            current_load: 0,
            healthy: true,
            last_heartbeat: now,
            hardware: decl.hardware,
            metadata: decl.metadata,
            created_at: now,
        };
        let id = entry.id.clone();
        self.room_servers.write().await.insert(id.clone(), entry);
        tracing::info!(target: "orchestrator.registry", room_server_id = %id, "room server registered");
        id
    }

    /// Register a recorder node. The identifier is generated; capacity is
    /// derived from the hardware descriptor (§3, §4.2).
    pub async fn register_recorder_node(&self, decl: RecorderNodeDecl) -> RecorderNodeId {
        let now = Utc::now();
        let id = RecorderNodeId::from(generate_recorder_id(&decl.region));
        let capacity = RecorderNode::derive_capacity(&decl.hardware, self.max_concurrent_per_node);
        let entry = RecorderNode {
            id: id.clone(),
            endpoint: decl.endpoint,
            region: decl.region,
            capacity,
            current_load: 0,
            healthy: true,
            last_heartbeat: now,
            hardware: decl.hardware,
            metadata: decl.metadata,
            supported_codecs: decl.supported_codecs,
            active_jobs: vec![],
            created_at: now,
        };
        self.recorder_nodes.write().await.insert(id.clone(), entry);
        tracing::info!(
            target: "orchestrator.registry",
            recorder_id = %id,
            capacity,
            "recorder node registered"
        );
        id
    }

    /// Heartbeat contract (§4.2): refreshes the timestamp, load, and rooms;
    /// always restores the health flag, winning over a prior timeout (§5).
    pub async fn record_room_server_heartbeat(
        &self,
        id: &RoomServerId,
        load: i32,
        rooms: Vec<String>,
    ) -> Result<(), OrchestratorError> {
        let mut map = self.room_servers.write().await;
        let entry = map
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("room server {id}")))?;
        let was_unhealthy = !entry.healthy;
        entry.last_heartbeat = Utc::now();
        entry.current_load = load;
        entry.rooms = rooms;
        entry.healthy = true;
        if was_unhealthy {
            tracing::info!(target: "orchestrator.registry", room_server_id = %id, "room server heartbeat restored health");
        }
        Ok(())
    }

    /// Heartbeat contract for recorder nodes (§4.2).
    pub async fn record_recorder_heartbeat(
        &self,
        id: &RecorderNodeId,
        load: i32,
        active_jobs: Vec<JobId>,
    ) -> Result<(), OrchestratorError> {
        let mut map = self.recorder_nodes.write().await;
        let entry = map
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("recorder node {id}")))?;
        let was_unhealthy = !entry.healthy;
        entry.last_heartbeat = Utc::now();
        entry.current_load = load;
        entry.active_jobs = active_jobs;
        entry.healthy = true;
        if was_unhealthy {
            tracing::info!(target: "orchestrator.registry", recorder_id = %id, "recorder heartbeat restored health");
        }
        Ok(())
    }

    /// Mark a room server unhealthy. Idempotent; never removes the entry.
    pub async fn mark_room_server_unhealthy(&self, id: &RoomServerId) -> bool {
        let mut map = self.room_servers.write().await;
        match map.get_mut(id) {
            Some(entry) if entry.healthy => {
                entry.healthy = false;
                tracing::warn!(target: "orchestrator.registry", room_server_id = %id, "room server marked unhealthy");
                true
            }
            _ => false,
        }
    }

    /// Mark a recorder node unhealthy. Idempotent; never removes the entry.
    pub async fn mark_recorder_unhealthy(&self, id: &RecorderNodeId) -> bool {
        let mut map = self.recorder_nodes.write().await;
        match map.get_mut(id) {
            Some(entry) if entry.healthy => {
                entry.healthy = false;
                tracing::warn!(target: "orchestrator.registry", recorder_id = %id, "recorder node marked unhealthy");
                true
            }
            _ => false,
        }
    }

    pub async fn remove_room_server(&self, id: &RoomServerId) -> Option<RoomServer> {
        self.room_servers.write().await.remove(id)
    }

    pub async fn remove_recorder_node(&self, id: &RecorderNodeId) -> Option<RecorderNode> {
        self.recorder_nodes.write().await.remove(id)
    }

    pub async fn get_room_server(&self, id: &RoomServerId) -> Option<RoomServer> {
        self.room_servers.read().await.get(id).cloned()
    }

    pub async fn get_recorder_node(&self, id: &RecorderNodeId) -> Option<RecorderNode> {
        self.recorder_nodes.read().await.get(id).cloned()
    }

    pub async fn list_room_servers_by_region(
        &self,
        region: &str,
        healthy_only: bool,
    ) -> Vec<RoomServer> {
        self.room_servers
            .read()
            .await
            .values()
            .filter(|rs| rs.region == region && (!healthy_only || rs.healthy))
            .cloned()
            .collect()
    }

    pub async fn list_recorder_nodes_by_region(
        &self,
        region: &str,
        healthy_only: bool,
    ) -> Vec<RecorderNode> {
        self.recorder_nodes
            .read()
            .await
            .values()
            .filter(|rn| rn.region == region && (!healthy_only || rn.healthy))
            .cloned()
            .collect()
    }

    pub async fn list_healthy_recorder_nodes(&self) -> Vec<RecorderNode> {
        self.recorder_nodes
            .read()
            .await
            .values()
            .filter(|rn| rn.healthy)
            .cloned()
            .collect()
    }

    /// Full snapshot of both maps, used by the Metrics Aggregator and
    /// Repository warm-restart persistence.
    pub async fn snapshot_all(&self) -> (Vec<RoomServer>, Vec<RecorderNode>) {
        let room_servers = self.room_servers.read().await.values().cloned().collect();
        let recorder_nodes = self
            .recorder_nodes
            .read()
            .await
            .values()
            .cloned()
            .collect();
        (room_servers, recorder_nodes)
    }

    /// Increment a room server's load accounting (§4.5 step 6).
    pub async fn increment_room_server_load(
        &self,
        id: &RoomServerId,
    ) -> Result<(), OrchestratorError> {
        let mut map = self.room_servers.write().await;
        let entry = map
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("room server {id}")))?;
        entry.current_load += 1;
        Ok(())
    }

    /// Release a room server's load accounting, clamped at zero (§3 invariant).
    pub async fn release_room_server_load(&self, id: &RoomServerId, amount: i32) {
        if let Some(entry) = self.room_servers.write().await.get_mut(id) {
            entry.release_load(amount);
        }
    }

    /// Assign a job to a recorder: increments load and appends to
    /// `activeJobs` together, preserving the registry's core invariant
    /// (§8 invariant 1).
    pub async fn assign_recorder_job(
        &self,
        id: &RecorderNodeId,
        job_id: JobId,
    ) -> Result<(), OrchestratorError> {
        let mut map = self.recorder_nodes.write().await;
        let entry = map
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("recorder node {id}")))?;
        entry.assign_job(job_id);
        Ok(())
    }

    /// Release a job from a recorder's active set, clamped at zero.
    pub async fn release_recorder_job(&self, id: &RecorderNodeId, job_id: &JobId) {
        if let Some(entry) = self.recorder_nodes.write().await.get_mut(id) {
            entry.release_job(job_id);
        }
    }

    /// Garbage-collect nodes whose last heartbeat exceeds `older_than`
    /// (SPEC_FULL §F.5), distinct from `markUnhealthy`, which never removes.
    /// Returns the number of entries removed, combined across both maps.
    pub async fn sweep_stale(&self, older_than: chrono::Duration) -> u64 {
        let cutoff = Utc::now() - older_than;
        let mut removed = 0u64;

        {
            let mut map = self.room_servers.write().await;
            let before = map.len();
            map.retain(|_, rs| rs.last_heartbeat > cutoff);
            removed += (before - map.len()) as u64;
        }
        {
            let mut map = self.recorder_nodes.write().await;
            let before = map.len();
            map.retain(|_, rn| rn.last_heartbeat > cutoff);
            removed += (before - map.len()) as u64;
        }

        if removed > 0 {
            tracing::info!(target: "orchestrator.registry", removed, "swept stale node entries");
        }
        removed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn hw() -> HardwareDescriptor {
        HardwareDescriptor {
            cores: 4,
            ram_bytes: 8 * 1024 * 1024 * 1024,
            has_gpu: false,
            disk_bytes: 100 * 1024 * 1024 * 1024,
        }
    }

    #[tokio::test]
    async fn registers_room_server_with_caller_supplied_id() {
        let registry = NodeRegistry::new(6);
        let id = registry
            .register_room_server(RoomServerDecl {
                id: RoomServerId::from("rs-1"),
                endpoint: "http://rs1:9000".to_string(),
                region: "us-east-1".to_string(),
                rooms: vec![],
                capacity: 10,
                hardware: hw(),
                metadata: HashMap::new(),
            })
            .await;
        assert_eq!(id, RoomServerId::from("rs-1"));
        assert!(registry.get_room_server(&id).await.is_some());
    }

    #[tokio::test]
    async fn registers_recorder_with_generated_id_and_derived_capacity() {
        let registry = NodeRegistry::new(12);
        let id = registry
            .register_recorder_node(RecorderNodeDecl {
                endpoint: "http://rn1:9000".to_string(),
                region: "us-east-1".to_string(),
                hardware: hw(),
                supported_codecs: vec!["opus".to_string()],
                metadata: HashMap::new(),
            })
            .await;
        let node = registry.get_recorder_node(&id).await.expect("present");
        assert_eq!(node.capacity, 6);
        assert!(id.as_str().starts_with("recorder-us-east-1-"));
    }

    #[tokio::test]
    async fn heartbeat_restores_health_after_unhealthy_marking() {
        let registry = NodeRegistry::new(6);
        let id = registry
            .register_recorder_node(RecorderNodeDecl {
                endpoint: "http://rn1:9000".to_string(),
                region: "us-east-1".to_string(),
                hardware: hw(),
                supported_codecs: vec![],
                metadata: HashMap::new(),
            })
            .await;

        assert!(registry.mark_recorder_unhealthy(&id).await);
        assert!(!registry.get_recorder_node(&id).await.unwrap().healthy);

        registry
            .record_recorder_heartbeat(&id, 0, vec![])
            .await
            .expect("heartbeat succeeds");
        assert!(registry.get_recorder_node(&id).await.unwrap().healthy);
    }

    #[tokio::test]
    async fn mark_unhealthy_is_idempotent_and_never_removes() {
        let registry = NodeRegistry::new(6);
        let id = registry
            .register_recorder_node(RecorderNodeDecl {
                endpoint: "http://rn1:9000".to_string(),
                region: "us-east-1".to_string(),
                hardware: hw(),
                supported_codecs: vec![],
                metadata: HashMap::new(),
            })
            .await;

        assert!(registry.mark_recorder_unhealthy(&id).await);
        assert!(!registry.mark_recorder_unhealthy(&id).await);
        assert!(registry.get_recorder_node(&id).await.is_some());
    }

    #[tokio::test]
    async fn assign_and_release_recorder_job_keeps_invariant() {
        let registry = NodeRegistry::new(6);
        let id = registry
            .register_recorder_node(RecorderNodeDecl {
                endpoint: "http://rn1:9000".to_string(),
                region: "us-east-1".to_string(),
                hardware: hw(),
                supported_codecs: vec![],
                metadata: HashMap::new(),
            })
            .await;
        let job = JobId::from("rec-1");

        registry
            .assign_recorder_job(&id, job.clone())
            .await
            .expect("assign");
        let node = registry.get_recorder_node(&id).await.unwrap();
        assert_eq!(node.current_load, 1);
        assert_eq!(node.active_jobs.len(), 1);

        registry.release_recorder_job(&id, &job).await;
        let node = registry.get_recorder_node(&id).await.unwrap();
        assert_eq!(node.current_load, 0);
        assert!(node.active_jobs.is_empty());
    }

    #[tokio::test]
    async fn sweep_stale_removes_only_entries_past_the_horizon() {
        let registry = NodeRegistry::new(6);
        let fresh_id = registry
            .register_recorder_node(RecorderNodeDecl {
                endpoint: "http://rn1:9000".to_string(),
                region: "us-east-1".to_string(),
                hardware: hw(),
                supported_codecs: vec![],
                metadata: HashMap::new(),
            })
            .await;

        {
            let mut map = registry.recorder_nodes.write().await;
            let entry = map.get_mut(&fresh_id).unwrap();
            entry.last_heartbeat = Utc::now() - chrono::Duration::hours(2);
        }

        let removed = registry.sweep_stale(chrono::Duration::hours(1)).await;
        assert_eq!(removed, 1);
        assert!(registry.get_recorder_node(&fresh_id).await.is_none());
    }

    #[tokio::test]
    async fn list_by_region_filters_correctly() {
        let registry = NodeRegistry::new(6);
        registry
            .register_room_server(RoomServerDecl {
                id: RoomServerId::from("rs-east"),
                endpoint: "http://e:9000".to_string(),
                region: "us-east-1".to_string(),
                rooms: vec![],
                capacity: 10,
                hardware: hw(),
                metadata: HashMap::new(),
            })
            .await;
        registry
            .register_room_server(RoomServerDecl {
                id: RoomServerId::from("rs-west"),
                endpoint: "http://w:9000".to_string(),
                region: "us-west-2".to_string(),
                rooms: vec![],
                capacity: 10,
                hardware: hw(),
                metadata: HashMap::new(),
            })
            .await;

        let east = registry.list_room_servers_by_region("us-east-1", false).await;
        assert_eq!(east.len(), 1);
        assert_eq!(east[0].id, RoomServerId::from("rs-east"));
    }
}
