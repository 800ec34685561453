//! Observability: Prometheus metrics definitions and the recorder installer.

pub mod metrics;
