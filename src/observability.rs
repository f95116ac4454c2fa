use std::net::SocketAddr;

// ── Request-driven ──────────────────────────────────────────────

/// Counter: admission attempts. Labels: outcome.
pub const ADMISSIONS_TOTAL: &str = "tourhold_admissions_total";

/// Histogram: admission latency in seconds, lock wait included.
pub const ADMIT_DURATION_SECONDS: &str = "tourhold_admit_duration_seconds";

/// Counter: state-machine transitions applied. Labels: transition.
pub const TRANSITIONS_TOTAL: &str = "tourhold_transitions_total";

/// Counter: payment outcomes reduced. Labels: outcome, disposition.
pub const PAYMENT_OUTCOMES_TOTAL: &str = "tourhold_payment_outcomes_total";

/// Counter: reconciliation anomalies recorded. Labels: kind.
pub const ANOMALIES_TOTAL: &str = "tourhold_anomalies_total";

/// Counter: slot queries served from / missing the read cache.
pub const SLOT_CACHE_HITS_TOTAL: &str = "tourhold_slot_cache_hits_total";
pub const SLOT_CACHE_MISSES_TOTAL: &str = "tourhold_slot_cache_misses_total";

/// Counter: store calls or lock waits that hit the timeout.
pub const STORE_TIMEOUTS_TOTAL: &str = "tourhold_store_timeouts_total";

// ── Background ──────────────────────────────────────────────────

/// Counter: reservations moved to Expired by the sweeper.
pub const EXPIRATIONS_TOTAL: &str = "tourhold_expirations_total";

/// Histogram: one sweeper pass in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "tourhold_sweep_duration_seconds";

/// Counter: journal compactions performed.
pub const COMPACTIONS_TOTAL: &str = "tourhold_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
