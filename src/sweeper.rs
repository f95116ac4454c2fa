use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::engine::Engine;
use crate::store::InMemoryStore;

/// Expire stale holds every `period` until `shutdown` fires. A pass that is
/// already running finishes before the loop exits.
pub async fn run_sweeper(engine: Arc<Engine>, period: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        match engine.sweep_expired().await {
            Ok(report) => {
                for (id, e) in &report.failed {
                    warn!(reservation = %id, "expiry will be retried next pass: {e}");
                }
            }
            Err(e) => error!("expiry sweep aborted: {e}"),
        }
    }
    info!("expiry sweeper stopped");
}

/// Compact the journal whenever `threshold` appends have piled up.
pub async fn run_compactor(
    store: Arc<InMemoryStore>,
    threshold: u64,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        if store.appends_since_compact().await < threshold {
            continue;
        }
        match store.compact().await {
            Ok(()) => metrics::counter!(crate::observability::COMPACTIONS_TOTAL).increment(1),
            Err(e) => error!("journal compaction failed: {e}"),
        }
    }
    info!("journal compactor stopped");
}
