//! Background task wiring: spawns the Health Loop (C6) and Metrics
//! Aggregator (C7) as cancellable `tokio` tasks.

use crate::health::HealthLoop;
use crate::metrics_aggregator::MetricsAggregator;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Spawn the Health Loop (§4.6) as a background task.
pub fn spawn_health_loop(health_loop: Arc<HealthLoop>, cancel_token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move { health_loop.run(cancel_token).await })
}

/// Spawn the Metrics Aggregator (§4.7) as a background task.
pub fn spawn_metrics_aggregator(
    aggregator: Arc<MetricsAggregator>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move { aggregator.run(cancel_token).await })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_token_is_cloneable_for_shared_shutdown() {
        let token = CancellationToken::new();
        let child = token.clone();
        token.cancel();
        assert!(child.is_cancelled());
    }
}
