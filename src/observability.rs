use std::net::SocketAddr;

// ── Reservations ────────────────────────────────────────────────

/// Counter: reservations created. Labels: category.
pub const RESERVATIONS_CREATED_TOTAL: &str = "taloyhtio_reservations_created_total";

/// Counter: reservations updated.
pub const RESERVATIONS_UPDATED_TOTAL: &str = "taloyhtio_reservations_updated_total";

/// Counter: reservations cancelled.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "taloyhtio_reservations_cancelled_total";

/// Counter: writes rejected by the conflict checker. Labels: category.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "taloyhtio_reservation_conflicts_total";

/// Counter: generic record writes (create, replace, delete). Labels: kind.
pub const RECORD_WRITES_TOTAL: &str = "taloyhtio_record_writes_total";

// ── HTTP ────────────────────────────────────────────────────────

/// Counter: API requests answered. Labels: method, status.
pub const HTTP_REQUESTS_TOTAL: &str = "taloyhtio_http_requests_total";

// ── Persistence ─────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "taloyhtio_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "taloyhtio_wal_flush_batch_size";

// ── Client cache ────────────────────────────────────────────────

pub const CACHE_HITS_TOTAL: &str = "taloyhtio_cache_hits_total";
pub const CACHE_MISSES_TOTAL: &str = "taloyhtio_cache_misses_total";

/// Counter: fetches actually sent to the transport.
pub const CACHE_FETCHES_TOTAL: &str = "taloyhtio_cache_fetches_total";

/// Counter: queries that joined a fetch already in flight.
pub const CACHE_DEDUPED_TOTAL: &str = "taloyhtio_cache_deduped_total";

/// Counter: entries marked stale by a mutation or manual invalidation.
pub const CACHE_INVALIDATIONS_TOTAL: &str = "taloyhtio_cache_invalidations_total";

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
