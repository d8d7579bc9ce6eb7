//! Metric instrument factories for transfer-store.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"transfer-store"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for transfer-store instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("transfer-store")
}

/// Counter: transfers saved.
/// Labels: `result` ("ok" | "invalid" | "error").
pub fn transfers_saved() -> Counter<u64> {
    meter()
        .u64_counter("transfer_store.saved")
        .with_description("Number of transfers saved")
        .build()
}

/// Counter: claim attempts.
/// Labels: `result` ("claimed" | "empty" | "error").
pub fn claim_attempts() -> Counter<u64> {
    meter()
        .u64_counter("transfer_store.claim_attempts")
        .with_description("Number of claim attempts")
        .build()
}

/// Counter: claim state transitions.
/// Labels: `from`, `to`.
pub fn state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("transfer_store.state_transitions")
        .with_description("Number of transfer claim state transitions")
        .build()
}

/// Counter: claims released because their lease ran out.
pub fn stale_claims_reclaimed() -> Counter<u64> {
    meter()
        .u64_counter("transfer_store.stale_claims_reclaimed")
        .with_description("Number of expired claims returned to the pool")
        .build()
}

/// Counter: full cache rescans.
pub fn cache_refreshes() -> Counter<u64> {
    meter()
        .u64_counter("transfer_store.cache_refreshes")
        .with_description("Number of full repository rescans")
        .build()
}

/// Counter: confirmed transfers deleted by retention.
pub fn retention_deleted() -> Counter<u64> {
    meter()
        .u64_counter("transfer_store.retention_deleted")
        .with_description("Number of confirmed transfers deleted by retention")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("transfer_store.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
