//! Store and transport error types shared across the orchestrator workspace.
//!
//! These sit below the orchestrator's own `OrchestratorError`: they describe
//! *why* a Repository write or outbound RPC failed, so callers can decide
//! whether to retry, log-and-continue, or surface the failure. The core
//! itself never blocks a state transition on one of these per §7.

use thiserror::Error;

/// Error raised by the Repository (persistence) layer.
///
/// Distinguishes transient failures (worth retrying / safe to ignore on the
/// hot path) from permanent ones (schema mismatch, constraint violation).
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection refused, pool exhausted, timeout — may succeed on retry.
    #[error("transient store error: {0}")]
    Transient(String),

    /// Constraint violation, serialization failure, schema mismatch.
    #[error("permanent store error: {0}")]
    Permanent(String),
}

impl StoreError {
    /// True if a caller might reasonably retry this operation later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Error raised by an outbound RPC to a room server or recorder node.
///
/// Mirrors §7's Transient/Permanent RPC taxonomy: from the core's
/// viewpoint both end an `assign` attempt the same way (the job fails), but
/// the distinction is preserved for logging and for the caller to decide
/// whether the *next* attempt (on a different node) is worth making.
#[derive(Error, Debug, Clone)]
pub enum RpcError {
    /// The call did not complete within its deadline (§4.5 timeouts).
    #[error("rpc timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Connection refused or DNS/transport failure.
    #[error("rpc transport error: {0}")]
    Transport(String),

    /// Peer responded with a 5xx-equivalent status.
    #[error("rpc server error: {status}: {body}")]
    ServerError { status: u16, body: String },

    /// Peer responded with a 4xx-equivalent status.
    #[error("rpc client error: {status}: {body}")]
    ClientError { status: u16, body: String },

    /// Response body did not parse as the expected shape.
    #[error("rpc decode error: {0}")]
    Decode(String),
}

impl RpcError {
    /// §7 treats transient and permanent RPC failures identically from the
    /// core's point of view (the job becomes terminal, no automatic retry
    /// at assign time) — this is kept only for logging fidelity.
    #[must_use]
    pub fn is_upstream_permanent(&self) -> bool {
        matches!(self, RpcError::ClientError { .. })
    }
}

/// Result type alias for Repository operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
