//! Room server and recorder node records (spec §3).
//!
//! Both are exclusively owned by the Node Registry; cross-references to
//! jobs are by identifier, never by embedding a job in a node or vice
//! versa, per the arena-plus-lookup discipline in spec §9.

use chrono::{DateTime, Utc};
use common::types::{JobId, RecorderNodeId, RoomServerId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hardware descriptor reported at registration, used to derive recorder capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareDescriptor {
    pub cores: u32,
    pub ram_bytes: u64,
    pub has_gpu: bool,
    pub disk_bytes: u64,
}

/// A conferencing room server: produces RTP audio/video for its participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomServer {
    pub id: RoomServerId,
    pub endpoint: String,
    pub region: String,
    pub rooms: Vec<String>,
    /// Caller-supplied capacity (not derived, unlike recorder nodes).
    pub capacity: i32,
    pub current_load: i32,
    pub healthy: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub hardware: HardwareDescriptor,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl RoomServer {
    /// Free capacity ratio in `[0, 1]`, `0.0` for a zero-capacity server.
    #[must_use]
    pub fn load_ratio(&self) -> f64 {
        if self.capacity <= 0 {
            return 1.0;
        }
        f64::from(self.current_load) / f64::from(self.capacity)
    }

    /// Invariant (§3): `0 <= current_load <= capacity`. Release clamps at zero;
    /// a heartbeat reporting load above capacity is accepted verbatim (§8 invariant 5),
    /// so this only guards the floor.
    pub fn release_load(&mut self, amount: i32) {
        self.current_load = (self.current_load - amount).max(0);
    }
}

/// A recorder node: accepts forwarded RTP and transcodes/persists to file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderNode {
    pub id: RecorderNodeId,
    pub endpoint: String,
    pub region: String,
    /// Derived at registration (spec §3); never caller-supplied.
    pub capacity: i32,
    pub current_load: i32,
    pub healthy: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub hardware: HardwareDescriptor,
    pub metadata: HashMap<String, String>,
    pub supported_codecs: Vec<String>,
    pub active_jobs: Vec<JobId>,
    pub created_at: DateTime<Utc>,
}

impl RecorderNode {
    /// Derive recorder capacity from hardware descriptor per spec §3:
    /// `min(cores * 1.5 * (hasGPU ? 2 : 1), floor(ram_bytes / (500 * 2^20)), 12)`,
    /// then further capped by the operator-configured `max_concurrent_per_node` (§6).
    #[must_use]
    pub fn derive_capacity(hw: &HardwareDescriptor, max_concurrent_per_node: u32) -> i32 {
        const MIB: f64 = 1024.0 * 1024.0;
        const RAM_UNIT_MIB: f64 = 500.0;
        const HARD_CAP: f64 = 12.0;

        let gpu_multiplier = if hw.has_gpu { 2.0 } else { 1.0 };
        let core_based = f64::from(hw.cores) * 1.5 * gpu_multiplier;
        let ram_based = ((hw.ram_bytes as f64) / MIB / RAM_UNIT_MIB).floor();

        let derived = core_based.min(ram_based).min(HARD_CAP);
        let capped = derived.min(f64::from(max_concurrent_per_node));
        capped.max(0.0) as i32
    }

    /// Free capacity ratio in `[0, 1]`, `0.0` for a zero-capacity node.
    #[must_use]
    pub fn load_ratio(&self) -> f64 {
        if self.capacity <= 0 {
            return 1.0;
        }
        f64::from(self.current_load) / f64::from(self.capacity)
    }

    /// Availability filter used by the Placement Engine (§4.4 step 1).
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.healthy && self.current_load < self.capacity
    }

    /// Add a job to the active set and increment load together, preserving
    /// the `|activeJobs| == currentLoad` invariant (§3, §8 invariant 1).
    pub fn assign_job(&mut self, job_id: JobId) {
        if !self.active_jobs.contains(&job_id) {
            self.active_jobs.push(job_id);
            self.current_load += 1;
        }
    }

    /// Remove a job from the active set and decrement load together, clamped at zero.
    pub fn release_job(&mut self, job_id: &JobId) {
        let before = self.active_jobs.len();
        self.active_jobs.retain(|j| j != job_id);
        if self.active_jobs.len() < before {
            self.current_load = (self.current_load - 1).max(0);
        }
    }
}
