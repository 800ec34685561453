//! Identifier generation for recorder nodes and recording jobs.
//!
//! Follows the generated-id formats fixed by spec §4.2/§4.3:
//! `recorder-<region>-<unixMillis>-<randSuffix>` and
//! `rec-<unixMillis>-<randSuffix>`. Uses a CSPRNG for the suffix, matching
//! the teacher's `SystemRandom` usage for weighted selection.

use chrono::Utc;
use ring::rand::{SecureRandom, SystemRandom};

fn rand_suffix(rng: &SystemRandom) -> String {
    let mut bytes = [0u8; 4];
    if rng.fill(&mut bytes).is_err() {
        return "00000000".to_string();
    }
    hex::encode(bytes)
}

/// Generate a recorder node identifier: `recorder-<region>-<unixMillis>-<randSuffix>`.
pub fn generate_recorder_id(region: &str) -> String {
    let rng = SystemRandom::new();
    format!(
        "recorder-{region}-{}-{}",
        Utc::now().timestamp_millis(),
        rand_suffix(&rng)
    )
}

/// Generate a recording job identifier: `rec-<unixMillis>-<randSuffix>`.
pub fn generate_job_id() -> String {
    let rng = SystemRandom::new();
    format!("rec-{}-{}", Utc::now().timestamp_millis(), rand_suffix(&rng))
}
