use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tourhold::clock::SystemClock;
use tourhold::config::Config;
use tourhold::engine::Engine;
use tourhold::gateway::LoggingGateway;
use tourhold::notify::TracingNotifier;
use tourhold::store::InMemoryStore;
use tourhold::sweeper::{run_compactor, run_sweeper};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    tourhold::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let wal_path = config.wal_path();
    let store = Arc::new(InMemoryStore::open(&wal_path)?);
    info!("tourhold starting");
    info!("  journal: {}", wal_path.display());
    info!("  tours loaded: {}", store.tour_count());
    info!("  hold window: {}s", config.hold_window.as_secs());
    info!("  sweep interval: {}s", config.sweep_interval.as_secs());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let engine = Arc::new(Engine::new(
        store.clone(),
        Arc::new(TracingNotifier),
        Arc::new(LoggingGateway),
        Arc::new(SystemClock),
        config.engine_settings(),
    ));

    let shutdown_token = CancellationToken::new();
    let sweeper = tokio::spawn(run_sweeper(
        engine.clone(),
        config.sweep_interval,
        shutdown_token.clone(),
    ));
    let compactor = tokio::spawn(run_compactor(
        store.clone(),
        config.compact_threshold,
        config.sweep_interval,
        shutdown_token.clone(),
    ));

    // Graceful shutdown on SIGTERM/ctrl-c: loops finish their current pass
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received, stopping background tasks");
    shutdown_token.cancel();
    let (swept, compacted) = tokio::join!(sweeper, compactor);
    swept?;
    compacted?;

    if store.appends_since_compact().await > 0 {
        if let Err(e) = store.compact().await {
            tracing::warn!("final compaction failed: {e}");
        }
    }
    info!("tourhold stopped");
    Ok(())
}
