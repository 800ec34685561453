//! Fleet metrics snapshot (spec §3, §4.7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-region roll-up, one entry per region observed in the registries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionalMetrics {
    pub room_servers: u32,
    pub recorder_nodes: u32,
    pub active_recordings: u32,
    pub capacity: i64,
    pub load: i64,
    pub avg_load: f64,
}

/// Immutable value produced by the Metrics Aggregator (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub total_room_servers: u32,
    pub total_recorder_nodes: u32,
    pub total_active_recordings: u32,
    pub total_capacity: i64,
    pub total_load: i64,
    pub queue_length: u32,
    pub unhealthy_node_count: u32,
    pub regional: HashMap<String, RegionalMetrics>,
}

impl MetricsSnapshot {
    /// Overall load ratio across the fleet, `0.0` when total capacity is zero.
    #[must_use]
    pub fn avg_load(&self) -> f64 {
        if self.total_capacity <= 0 {
            return 0.0;
        }
        self.total_load as f64 / self.total_capacity as f64
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn avg_load_is_zero_with_no_capacity() {
        let snapshot = MetricsSnapshot {
            taken_at: Utc::now(),
            total_room_servers: 0,
            total_recorder_nodes: 0,
            total_active_recordings: 0,
            total_capacity: 0,
            total_load: 0,
            queue_length: 0,
            unhealthy_node_count: 0,
            regional: HashMap::new(),
        };
        assert_eq!(snapshot.avg_load(), 0.0);
    }

    #[test]
    fn avg_load_divides_load_by_capacity() {
        let snapshot = MetricsSnapshot {
            taken_at: Utc::now(),
            total_room_servers: 1,
            total_recorder_nodes: 2,
            total_active_recordings: 3,
            total_capacity: 10,
            total_load: 5,
            queue_length: 0,
            unhealthy_node_count: 0,
            regional: HashMap::new(),
        };
        assert!((snapshot.avg_load() - 0.5).abs() < f64::EPSILON);
    }
}
