//! Read-only queries, statistics and retention.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use opentelemetry::KeyValue;
use tracing::{debug, info, warn};

use super::TransferStore;
use crate::config::hours_to_duration;
use crate::model::{TransferEntry, TransferStatistics};
use crate::telemetry::metrics;
use crate::telemetry::store::start_store_span;

impl TransferStore {
    /// All unconfirmed transfers for a (sender, receiver) pair, oldest first,
    /// whether claimed or not.
    pub fn pending_transfers_by_sender_receiver(
        &self,
        sender_id: &str,
        receiver_id: &str,
    ) -> Vec<TransferEntry> {
        if sender_id.is_empty() || receiver_id.is_empty() {
            return Vec::new();
        }

        let mut cache = self.lock();
        self.refresh_if_stale(&mut cache);
        cache.pending_for_pair(sender_id, receiver_id)
    }

    /// Unclaimed pending transfers grouped by `"sender:receiver"`, each group
    /// oldest first. Distinct pairs that render to the same key share a group.
    pub fn pending_transfers_grouped(&self) -> BTreeMap<String, Vec<TransferEntry>> {
        let mut cache = self.lock();
        self.refresh_if_stale(&mut cache);

        let mut groups: BTreeMap<String, Vec<TransferEntry>> = BTreeMap::new();
        for (key, entries) in cache.claimable_by_pair() {
            groups.entry(key).or_default().extend(entries);
        }
        for group in groups.values_mut() {
            group.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        }
        groups
    }

    pub fn statistics(&self) -> TransferStatistics {
        let mut cache = self.lock();
        self.refresh_if_stale(&mut cache);
        cache.statistics()
    }

    /// Delete confirmed transfers confirmed at least `older_than` ago.
    /// Returns how many were deleted.
    pub fn clear_confirmed_older_than(&self, older_than: Duration) -> usize {
        let span = start_store_span("retention", self.worker_id.as_str());
        let _enter = span.enter();
        let started = Instant::now();

        let now = Utc::now();
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
        else {
            debug!(
                older_than_secs = older_than.as_secs(),
                "retention window out of range, nothing to clear"
            );
            return 0;
        };

        let mut cache = self.lock();
        self.refresh_if_stale(&mut cache);

        let mut cleared = 0usize;
        for id in cache.confirmed_before(cutoff) {
            match self.repository.delete(&id) {
                Ok(()) => {
                    cache.remove(&id);
                    cleared += 1;
                }
                Err(e) => warn!(transfer_id = %id, "failed to delete confirmed transfer: {e}"),
            }
        }

        if cleared > 0 {
            info!(
                cleared,
                older_than_secs = older_than.as_secs(),
                "cleared confirmed transfers"
            );
            metrics::retention_deleted().add(cleared as u64, &[]);
        }
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "retention")],
        );
        cleared
    }

    /// Hour-granularity form of [`clear_confirmed_older_than`](Self::clear_confirmed_older_than).
    pub fn clear_confirmed_transfers(&self, older_than_hours: u64) -> usize {
        match hours_to_duration(older_than_hours) {
            Ok(older_than) => self.clear_confirmed_older_than(older_than),
            Err(e) => {
                warn!("retention skipped: {e}");
                0
            }
        }
    }

    /// Apply the configured retention window.
    pub fn clear_expired_confirmed(&self) -> usize {
        self.clear_confirmed_older_than(self.config.retention)
    }
}
