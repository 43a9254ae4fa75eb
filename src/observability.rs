use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total HTTP requests. Labels: method, path, status.
pub const REQUESTS_TOTAL: &str = "parklot_requests_total";

/// Histogram: request latency in seconds. Labels: method, path.
pub const REQUEST_DURATION_SECONDS: &str = "parklot_request_duration_seconds";

/// Counter: allocation requests rejected by an overlap. Labels: kind.
pub const ALLOCATION_CONFLICTS_TOTAL: &str = "parklot_allocation_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: allocations currently stored.
pub const ALLOCATIONS_ACTIVE: &str = "parklot_allocations_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "parklot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "parklot_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for the conflict counter.
pub fn conflict_label(err: &EngineError) -> &'static str {
    match err {
        EngineError::SlotAlreadyBooked { on_update: false, .. } => "slot",
        EngineError::SlotAlreadyBooked { on_update: true, .. } => "slot_update",
        EngineError::VehicleAlreadyAllocated(_) => "vehicle",
        EngineError::AlreadyExists(_) => "duplicate",
        _ => "other",
    }
}
