//! Store operation span helpers.
//!
//! Provides span creation and state-transition recording for transfer
//! entries moving through the claim protocol.

use opentelemetry::KeyValue;
use tracing::Span;

use crate::model::ClaimState;
use crate::telemetry::metrics;

/// Start a span for one store operation.
///
/// The `transfer.id` field is declared empty and filled via
/// [`record_transfer`] once the operation knows which entry it touched.
pub fn start_store_span(operation: &'static str, worker: &str) -> Span {
    tracing::info_span!(
        "transfer_store",
        "store.operation" = operation,
        "store.worker" = worker,
        "transfer.id" = tracing::field::Empty,
    )
}

/// Record the transfer an operation acted on.
pub fn record_transfer(span: &Span, id: &str) {
    span.record("transfer.id", id);
}

/// Record a claim state transition on the given span and count it.
pub fn record_state_transition(span: &Span, from: ClaimState, to: ClaimState) {
    span.in_scope(|| {
        tracing::debug!(from = %from, to = %to, "state_transition");
    });
    metrics::state_transitions().add(
        1,
        &[
            KeyValue::new("from", from.to_string()),
            KeyValue::new("to", to.to_string()),
        ],
    );
}
