//! Claim protocol: claim, release and confirm.
//!
//! Selection and mutation happen under the same lock, so two callers in one
//! process can never be handed the same transfer.

use chrono::Utc;
use opentelemetry::KeyValue;
use tracing::{debug, info, warn};

use super::{TransferStore, non_empty};
use crate::model::{ClaimState, TransferEntry};
use crate::telemetry::metrics;
use crate::telemetry::store::{record_state_transition, record_transfer, start_store_span};

impl TransferStore {
    /// Claim the oldest unclaimed pending transfer for this worker.
    ///
    /// Candidates come from the sender+receiver index when both filters are
    /// given, the sender index when only the sender is, and all pending
    /// entries otherwise. Returns `None` when nothing is available.
    pub fn claim_pending_transfer(
        &self,
        sender_id: Option<&str>,
        receiver_id: Option<&str>,
    ) -> Option<TransferEntry> {
        let span = start_store_span("claim", self.worker_id.as_str());
        let _enter = span.enter();
        let (sender_id, receiver_id) = (non_empty(sender_id), non_empty(receiver_id));

        let mut cache = self.lock();
        self.refresh_if_stale(&mut cache);

        let candidates: Vec<String> = cache
            .claimable(sender_id, receiver_id)
            .into_iter()
            .map(|e| e.id.clone())
            .collect();

        for id in candidates {
            // Another process may have claimed, confirmed or deleted it since
            // our last refresh.
            let Some(mut entry) = self.current(&mut cache, &id) else {
                debug!(transfer_id = %id, "candidate no longer stored, trying next");
                continue;
            };

            let now = Utc::now();
            entry.reclaim_if_stale(now, self.config.claim_timeout);
            if !entry.is_claimable() {
                debug!(
                    transfer_id = %id,
                    state = %entry.state(),
                    owner = ?entry.claimed_by.as_ref().map(|w| w.as_str()),
                    "candidate taken since last refresh, trying next"
                );
                continue;
            }

            if let Err(e) = entry.claim(&self.worker_id, now) {
                warn!(transfer_id = %id, "cannot claim candidate: {e}");
                continue;
            }
            if !self.persist(&entry) {
                metrics::claim_attempts().add(1, &[KeyValue::new("result", "error")]);
                return None;
            }

            record_transfer(&span, &entry.id);
            record_state_transition(&span, ClaimState::Unclaimed, ClaimState::Claimed);
            cache.insert(entry.clone());

            info!(
                transfer_id = %entry.id,
                worker = %self.worker_id,
                sender = %entry.sender_id,
                receiver = %entry.receiver_id,
                "claimed transfer"
            );
            metrics::claim_attempts().add(1, &[KeyValue::new("result", "claimed")]);
            return Some(entry);
        }

        debug!(
            sender = ?sender_id,
            receiver = ?receiver_id,
            "no claimable transfer"
        );
        metrics::claim_attempts().add(1, &[KeyValue::new("result", "empty")]);
        None
    }

    /// Claim for the (sender, receiver) pair if a receiver is given, falling
    /// back to any transfer from the sender.
    pub fn claim_with_fallback(
        &self,
        sender_id: &str,
        receiver_id: Option<&str>,
    ) -> Option<TransferEntry> {
        if let Some(receiver_id) = non_empty(receiver_id) {
            if let Some(entry) = self.claim_pending_transfer(Some(sender_id), Some(receiver_id)) {
                return Some(entry);
            }
        }
        self.claim_pending_transfer(Some(sender_id), None)
    }

    /// The transfer the next claim with these filters would take, without
    /// claiming it.
    pub fn peek_pending_transfer(
        &self,
        sender_id: Option<&str>,
        receiver_id: Option<&str>,
    ) -> Option<TransferEntry> {
        let mut cache = self.lock();
        self.refresh_if_stale(&mut cache);
        cache
            .claimable(non_empty(sender_id), non_empty(receiver_id))
            .first()
            .map(|e| (*e).clone())
    }

    /// Return a transfer this worker claimed to the pool.
    ///
    /// Only the owning worker can release; any other request is ignored.
    /// Returns true if the claim was released.
    pub fn release_claim(&self, id: &str) -> bool {
        if id.is_empty() {
            return false;
        }
        let span = start_store_span("release", self.worker_id.as_str());
        let _enter = span.enter();
        record_transfer(&span, id);

        let mut cache = self.lock();
        let Some(mut entry) = self.current(&mut cache, id) else {
            debug!(transfer_id = id, "release of unknown transfer ignored");
            return false;
        };

        if !entry.release(&self.worker_id) {
            debug!(
                transfer_id = id,
                state = %entry.state(),
                owner = ?entry.claimed_by.as_ref().map(|w| w.as_str()),
                "not the claim owner, release ignored"
            );
            return false;
        }
        if !self.persist(&entry) {
            return false;
        }

        cache.insert(entry);
        record_state_transition(&span, ClaimState::Claimed, ClaimState::Unclaimed);
        info!(transfer_id = id, worker = %self.worker_id, "released claim");
        true
    }

    /// Mark a transfer confirmed, clearing any claim on it.
    ///
    /// Confirming does not require holding the claim. Returns true if this
    /// call confirmed the transfer; an already confirmed or unknown transfer
    /// is left alone.
    pub fn mark_as_confirmed(&self, id: &str) -> bool {
        if id.is_empty() {
            return false;
        }
        let span = start_store_span("confirm", self.worker_id.as_str());
        let _enter = span.enter();
        record_transfer(&span, id);

        let mut cache = self.lock();
        let Some(mut entry) = self.current(&mut cache, id) else {
            info!(transfer_id = id, "transfer not found for confirmation");
            return false;
        };

        let from = entry.state();
        if !entry.confirm(Utc::now()) {
            debug!(transfer_id = id, "transfer already confirmed");
            return false;
        }
        if !self.persist(&entry) {
            return false;
        }

        cache.insert(entry);
        record_state_transition(&span, from, ClaimState::Confirmed);
        info!(transfer_id = id, "marked transfer as confirmed");
        true
    }
}
