//! Ambient HTTP surface: `/health`, `/ready`, `/metrics`.
//!
//! Business ingress (submitting, querying, and cancelling recordings) is an
//! external collaborator's concern per the architecture in `lib.rs` — this
//! module only exposes the operational endpoints a deployment needs to run
//! the orchestrator as a service: liveness, readiness, and Prometheus scrape.

use crate::config::Config;
use crate::repository::PostgresRepository;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{middleware, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across the ambient handlers.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<PostgresRepository>,
    pub config: Config,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    status: &'static str,
    database: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Liveness probe. Does not check dependencies — failure means the process
/// is hung, not that a dependency is unavailable.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe: can the process reach the database.
#[tracing::instrument(skip_all, name = "orchestrator.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.repository.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                database: Some("healthy"),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::warn!(target: "orchestrator.routes", "readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    status: "not_ready",
                    database: Some("unhealthy"),
                    error: Some("service dependencies unavailable".to_string()),
                }),
            )
        }
    }
}

/// Prometheus scrape endpoint.
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}

async fn http_metrics_middleware(
    request: axum::extract::Request,
    next: middleware::Next,
) -> axum::response::Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status_code = response.status().as_u16();
    crate::observability::metrics::record_http_request(&method, &path, status_code, duration);

    response
}

/// Build the ambient router: `/health`, `/ready`, `/metrics`, traced and
/// timed out at 30s, with an outermost HTTP-metrics layer that records
/// every response including framework-level errors (404, 405, ...).
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics_handle);

    health_routes
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        assert_eq!(health_check().await, "OK");
    }
}
