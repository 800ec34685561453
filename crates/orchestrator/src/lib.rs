//! Recording Orchestrator — control plane for a distributed recording fleet.
//!
//! Mediates between conferencing room servers (produce RTP) and recorder
//! nodes (persist RTP to file): accepts recording requests, places them on
//! a suitable recorder, orchestrates RTP forwarding setup, tracks lifecycle
//! to completion, reacts to node failure, and publishes fleet capacity.
//!
//! # Architecture
//!
//! The core is a library, not an HTTP service: request ingress
//! (authentication, validation, framing) is an external collaborator per
//! the design. Callers drive the orchestrator through the component APIs
//! directly:
//!
//! ```text
//! dispatcher -> placement -> registry
//!            -> jobs
//!            -> events
//! health      -> registry, jobs, placement, dispatcher
//! metrics_aggregator -> registry, jobs -> events
//! repository  <- (best-effort persistence on every transition)
//! ```
//!
//! # Modules
//!
//! - `config` - environment-driven configuration
//! - `errors` - `OrchestratorError` with the `{success, error}` envelope shape
//! - `models` - the data model (§3): room servers, recorder nodes, jobs
//! - `registry` - Node Registry (C2)
//! - `jobs` - Job Store (C3)
//! - `placement` - Placement Engine (C4)
//! - `dispatcher` - Dispatcher + outbound RPC clients (C5)
//! - `health` - Health Loop (C6)
//! - `metrics_aggregator` - Metrics Aggregator (C7)
//! - `events` - Event Bus (C8)
//! - `repository` - Repository contract + Postgres implementation (C1)
//! - `observability` - Prometheus metrics definitions
//! - `routes` - ambient `/health`, `/ready`, `/metrics` HTTP surface
//! - `tasks` - background task wiring (health loop, metrics aggregator)

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod events;
pub mod health;
mod ids;
pub mod jobs;
pub mod metrics_aggregator;
pub mod models;
pub mod observability;
pub mod placement;
pub mod registry;
pub mod repository;
pub mod routes;
pub mod tasks;
