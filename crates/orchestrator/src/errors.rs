//! Orchestrator error types.
//!
//! Every boundary error the core can produce carries a stable `code()` for
//! the `{success:false, error:<reason>}` envelope described in spec §7. The
//! envelope type itself (`ErrorEnvelope`) is `Serialize`-able so whatever
//! ingress layer eventually fronts this library (out of scope here) can
//! adopt it directly rather than inventing its own.

use serde::Serialize;
use thiserror::Error;

/// Orchestrator error taxonomy, following spec §7.
#[derive(Debug, Error, Clone)]
pub enum OrchestratorError {
    /// The request's room-server id does not resolve to a healthy, registered entry.
    #[error("no healthy room server: {0}")]
    NoRoomServer(String),

    /// No recorder could be placed; the job was enqueued instead. Not terminal.
    #[error("no recorder available")]
    NoRecorderAvailable,

    /// An outbound RPC to a room server or recorder node failed (timeout,
    /// transport, 4xx or 5xx). §7 treats transient and permanent RPC
    /// failures identically from the core's point of view.
    #[error("upstream rpc failed: {0}")]
    UpstreamRpc(String),

    /// A job transition was attempted that violates the state machine (§3).
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// The referenced job, node, or resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The store rejected or failed a write; never blocks a transition (§7).
    #[error("store error: {0}")]
    Store(String),

    /// Caller-supplied input failed validation (normally caught at the
    /// ingress boundary, but surfaced here for operations driven directly
    /// against the library API).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Programmer error / invariant violation, not meant to be retried.
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Stable machine-readable reason code for the `{success:false, error}` envelope.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::NoRoomServer(_) => "no-room-server",
            OrchestratorError::NoRecorderAvailable => "no-recorder-available",
            OrchestratorError::UpstreamRpc(_) => "upstream-rpc-failed",
            OrchestratorError::InvalidTransition(_) => "invalid-transition",
            OrchestratorError::NotFound(_) => "not-found",
            OrchestratorError::Store(_) => "store-error",
            OrchestratorError::InvalidRequest(_) => "invalid-request",
            OrchestratorError::Internal(_) => "internal-error",
        }
    }

    /// True for `no-recorder-available`: the caller's job was enqueued, not failed.
    #[must_use]
    pub fn is_enqueue_outcome(&self) -> bool {
        matches!(self, OrchestratorError::NoRecorderAvailable)
    }
}

impl From<common::error::StoreError> for OrchestratorError {
    fn from(err: common::error::StoreError) -> Self {
        OrchestratorError::Store(err.to_string())
    }
}

impl From<common::error::RpcError> for OrchestratorError {
    fn from(err: common::error::RpcError) -> Self {
        OrchestratorError::UpstreamRpc(err.to_string())
    }
}

/// Envelope shape fixed by spec §7: `{success, data}` or `{success, error}`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Envelope<T: Serialize> {
    /// Successful outcome.
    Ok {
        /// Always `true`.
        success: bool,
        /// Payload.
        data: T,
    },
    /// Boundary failure.
    Err {
        /// Always `false`.
        success: bool,
        /// Stable reason code, e.g. `"no-room-server"`.
        error: &'static str,
        /// Optional human-readable detail.
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

impl<T: Serialize> Envelope<T> {
    /// Wrap a successful payload.
    pub fn ok(data: T) -> Self {
        Envelope::Ok {
            success: true,
            data,
        }
    }

    /// Wrap an error, carrying its code and display message as details.
    pub fn err(e: &OrchestratorError) -> Self {
        Envelope::Err {
            success: false,
            error: e.code(),
            details: Some(e.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            OrchestratorError::NoRoomServer("rs-1".into()).code(),
            "no-room-server"
        );
        assert_eq!(
            OrchestratorError::NoRecorderAvailable.code(),
            "no-recorder-available"
        );
        assert_eq!(
            OrchestratorError::InvalidTransition("x".into()).code(),
            "invalid-transition"
        );
    }

    #[test]
    fn no_recorder_available_is_an_enqueue_outcome() {
        assert!(OrchestratorError::NoRecorderAvailable.is_enqueue_outcome());
        assert!(!OrchestratorError::NoRoomServer("x".into()).is_enqueue_outcome());
    }

    #[test]
    fn envelope_serializes_success() {
        let env = Envelope::ok(42);
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(json.contains("\"data\":42"));
    }

    #[test]
    fn envelope_serializes_error() {
        let err = OrchestratorError::NoRecorderAvailable;
        let env: Envelope<()> = Envelope::err(&err);
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"success\":false"));
        assert!(json.contains("\"error\":\"no-recorder-available\""));
    }
}
