//! Identifier newtypes shared across the orchestrator workspace.
//!
//! Unlike the teacher's `MeetingId`/`ParticipantId` (random UUIDs), these
//! wrap plain strings: room-server ids are caller-supplied and must stay
//! stable across restarts, while recorder and job ids follow the
//! human-readable generated formats fixed by spec §4.2/§4.3
//! (`recorder-<region>-<unixMillis>-<randSuffix>`, `rec-<unixMillis>-<randSuffix>`).

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Borrow the inner string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(RoomServerId, "Caller-supplied identifier for a room server.");
string_id!(RecorderNodeId, "Orchestrator-generated identifier for a recorder node.");
string_id!(JobId, "Orchestrator-generated identifier for a recording job.");

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn displays_inner_string() {
        let id = RoomServerId::from("rs-1");
        assert_eq!(id.to_string(), "rs-1");
        assert_eq!(id.as_str(), "rs-1");
    }

    #[test]
    fn equal_ids_hash_equal() {
        let a = JobId::from("rec-1-abc");
        let b = JobId::from("rec-1-abc".to_string());
        assert_eq!(a, b);
    }
}
