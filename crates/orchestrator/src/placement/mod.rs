//! Placement Engine (C4, spec §4.4): a pure function choosing a recorder
//! for a recording request, and a room-server selection helper for
//! reassignment scenarios that carry a specific room id.

use crate::models::{RecorderNode, RoomServer};

/// Placement requirement for a recording request.
#[derive(Debug, Clone)]
pub struct PlacementRequirement {
    pub region: String,
    pub codec_requirements: Vec<String>,
    pub estimated_load: i32,
    pub prefer_gpu: bool,
    pub min_cores: Option<u32>,
    pub min_ram_bytes: Option<u64>,
}

/// Selects a recorder from `candidates` for `requirement`, or `None` if no
/// recorder qualifies. Deterministic: identical inputs produce identical
/// output, ties broken by lexicographic recorder id (§8 law).
#[must_use]
pub fn select_recorder<'a>(
    candidates: &'a [RecorderNode],
    requirement: &PlacementRequirement,
) -> Option<&'a RecorderNode> {
    // Step 1: availability. Each filter step falls back to the prior set if
    // it would otherwise empty (§4.4).
    let available: Vec<&RecorderNode> = candidates.iter().filter(|n| n.is_available()).collect();
    if available.is_empty() {
        return None;
    }

    // Step 2: region preference.
    let region_preferred: Vec<&RecorderNode> = available
        .iter()
        .filter(|n| n.region == requirement.region)
        .copied()
        .collect();
    let after_region = if region_preferred.is_empty() {
        available
    } else {
        region_preferred
    };

    // Step 3: codec compatibility.
    let codec_compatible: Vec<&RecorderNode> = after_region
        .iter()
        .filter(|n| {
            requirement
                .codec_requirements
                .iter()
                .all(|c| n.supported_codecs.contains(c))
        })
        .copied()
        .collect();
    let after_codec = if codec_compatible.is_empty() {
        after_region
    } else {
        codec_compatible
    };

    // Step 4: hard hardware floors. min_cores/min_ram are hard filters; if
    // they empty the set, there is no qualifying recorder (unlike the soft
    // filters above).
    let mut hard_filtered: Vec<&RecorderNode> = after_codec
        .into_iter()
        .filter(|n| {
            requirement
                .min_cores
                .map_or(true, |min| n.hardware.cores >= min)
                && requirement
                    .min_ram_bytes
                    .map_or(true, |min| n.hardware.ram_bytes >= min)
        })
        .collect();
    if hard_filtered.is_empty() {
        return None;
    }

    if requirement.prefer_gpu {
        let gpu_only: Vec<&RecorderNode> = hard_filtered
            .iter()
            .filter(|n| n.hardware.has_gpu)
            .copied()
            .collect();
        if !gpu_only.is_empty() {
            hard_filtered = gpu_only;
        }
    }

    score_and_select(&hard_filtered, requirement)
}

fn score(node: &RecorderNode, requirement: &PlacementRequirement) -> f64 {
    let mut score = 0.0;

    let free_ratio = if node.capacity > 0 {
        f64::from(node.capacity - node.current_load) / f64::from(node.capacity)
    } else {
        0.0
    };
    score += free_ratio * 40.0;

    if node.region == requirement.region {
        score += 25.0;
    } else {
        score -= 10.0;
    }

    let gpu_appropriate = (node.hardware.has_gpu && requirement.estimated_load > 2)
        || (!node.hardware.has_gpu && requirement.estimated_load <= 1);
    score += if gpu_appropriate { 20.0 } else { 10.0 };

    score += f64::from(node.hardware.cores * 2).min(10.0);

    if node.capacity > 0 {
        score -= (f64::from(node.current_load) / f64::from(node.capacity)) * 5.0;
    }

    let codec_match = requirement
        .codec_requirements
        .iter()
        .all(|c| node.supported_codecs.contains(c));
    if codec_match {
        score += 5.0;
    }

    score.max(0.0)
}

fn score_and_select<'a>(
    candidates: &[&'a RecorderNode],
    requirement: &PlacementRequirement,
) -> Option<&'a RecorderNode> {
    candidates
        .iter()
        .map(|n| (*n, score(n, requirement)))
        .fold(None, |best: Option<(&RecorderNode, f64)>, (node, s)| {
            match best {
                None => Some((node, s)),
                Some((best_node, best_score)) => {
                    if s > best_score || (s == best_score && node.id < best_node.id) {
                        Some((node, s))
                    } else {
                        Some((best_node, best_score))
                    }
                }
            }
        })
        .map(|(node, _)| node)
}

/// Room-server selection for a request carrying a specific room (§4.4):
/// prefer a server already hosting the room, otherwise the least-loaded
/// healthy server.
#[must_use]
pub fn select_room_server<'a>(
    candidates: &'a [RoomServer],
    room_id: &str,
) -> Option<&'a RoomServer> {
    let healthy: Vec<&RoomServer> = candidates.iter().filter(|rs| rs.healthy).collect();
    if healthy.is_empty() {
        return None;
    }

    if let Some(hosting) = healthy.iter().find(|rs| rs.rooms.iter().any(|r| r == room_id)) {
        return Some(hosting);
    }

    healthy
        .into_iter()
        .min_by(|a, b| {
            a.load_ratio()
                .partial_cmp(&b.load_ratio())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}
