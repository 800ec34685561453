mod config;
mod dispatcher;
mod errors;
mod events;
mod health;
mod ids;
mod jobs;
mod metrics_aggregator;
mod models;
mod observability;
mod placement;
mod registry;
mod repository;
mod routes;
mod tasks;

use config::Config;
use dispatcher::Dispatcher;
use events::EventBus;
use health::{HealthLoop, HealthLoopConfig};
use jobs::JobStore;
use metrics_aggregator::{MetricsAggregator, MetricsAggregatorConfig};
use registry::NodeRegistry;
use repository::{PostgresRepository, Repository};
use routes::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Recording Orchestrator");

    let metrics_handle = observability::metrics::init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    info!("Configuration loaded successfully");

    info!("Connecting to database...");
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.db_pool_max)
        .min_connections(config.db_pool_min)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;
    info!("Database connection established");

    let repository = Arc::new(PostgresRepository::new(db_pool));

    // Warm-restart seeding: rebuild in-memory state from the last durable
    // snapshot rather than starting cold (§4.1).
    info!("Loading fleet state from repository...");
    let room_servers = repository.load_healthy_room_servers().await.unwrap_or_else(|e| {
        tracing::warn!("failed to load room servers, starting empty: {}", e);
        Vec::new()
    });
    let recorder_nodes = repository.load_healthy_recorder_nodes().await.unwrap_or_else(|e| {
        tracing::warn!("failed to load recorder nodes, starting empty: {}", e);
        Vec::new()
    });
    let active_jobs = repository.load_active_jobs().await.unwrap_or_else(|e| {
        tracing::warn!("failed to load active jobs, starting empty: {}", e);
        Vec::new()
    });
    info!(
        room_servers = room_servers.len(),
        recorder_nodes = recorder_nodes.len(),
        active_jobs = active_jobs.len(),
        "fleet state loaded"
    );

    let registry = Arc::new(NodeRegistry::from_snapshots(
        room_servers,
        recorder_nodes,
        config.max_concurrent_per_node,
    ));
    let jobs = Arc::new(JobStore::from_snapshot(active_jobs));
    let events = EventBus::new();

    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        jobs.clone(),
        events.clone(),
        config.callback_base_url.clone(),
    ));

    let health_loop = Arc::new(HealthLoop::new(
        registry.clone(),
        jobs.clone(),
        dispatcher.clone(),
        events.clone(),
        HealthLoopConfig {
            tick_interval_ms: config.health_check_interval_ms,
            node_timeout_ms: config.node_timeout_ms,
            sweep_stale_every_n_ticks: config.sweep_stale_every_n_ticks,
            stale_removal_horizon_ms: config.stale_removal_horizon_ms,
        },
    ));

    let metrics_aggregator = Arc::new(MetricsAggregator::new(
        registry.clone(),
        jobs.clone(),
        events.clone(),
        repository.clone() as Arc<dyn Repository>,
        MetricsAggregatorConfig {
            tick_interval_ms: config.metrics_interval_ms,
            scale_up_threshold: config.scale_up_threshold,
            scale_down_threshold: config.scale_down_threshold,
            auto_scale_min_nodes: config.auto_scale_min_nodes,
            auto_scale_max_nodes: config.auto_scale_max_nodes,
            auto_scale_cooldown_ms: config.auto_scale_cooldown_ms,
        },
    ));

    let cancel_token = CancellationToken::new();
    let health_task = tasks::spawn_health_loop(health_loop, cancel_token.clone());
    let metrics_task = tasks::spawn_metrics_aggregator(metrics_aggregator, cancel_token.clone());

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState { repository, config });
    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Recording Orchestrator listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(cancel_token.clone()))
        .await?;

    info!("HTTP server stopped, waiting for background tasks to exit...");
    cancel_token.cancel();
    let _ = tokio::join!(health_task, metrics_task);

    info!("Recording Orchestrator shutdown complete");

    Ok(())
}

/// Listens for SIGINT/SIGTERM and cancels the shared token, which both the
/// axum graceful-shutdown drain and the background loops key off of.
async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    cancel_token.cancel();
}
