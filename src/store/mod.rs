//! The transfer store. The public API workers use to hand transfers around.
//!
//! One store instance per process owns the cache, its indexes, and the lock
//! that serializes every operation. Durable state lives in the
//! [`EntryRepository`] and is shared with other processes through the
//! filesystem.
//!
//! Store operations never fail into the caller: I/O problems are logged and
//! the operation reports "no effect" (`None`, `false`, an empty list).

mod cache;
mod claim;
mod query;

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::{Span, debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::model::{ClaimState, TransferEntry, WorkerId};
use crate::repository::EntryRepository;
use crate::telemetry::metrics;
use crate::telemetry::store::{record_state_transition, record_transfer, start_store_span};

use cache::StoreCache;

/// File-backed claim store with a process-local cache.
pub struct TransferStore {
    repository: EntryRepository,
    config: StoreConfig,
    worker_id: WorkerId,
    cache: Mutex<StoreCache>,
}

impl TransferStore {
    /// Create a store over `config.directory`. The directory is created on
    /// first write.
    pub fn new(config: StoreConfig) -> Self {
        let worker_id = config.resolve_worker_id();
        Self {
            repository: EntryRepository::new(config.directory.clone()),
            config,
            worker_id,
            cache: Mutex::new(StoreCache::default()),
        }
    }

    /// Identity this store claims under.
    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The durable layer, for callers that need direct file access.
    pub fn repository(&self) -> &EntryRepository {
        &self.repository
    }

    // -----------------------------------------------------------------------
    // Save / load
    // -----------------------------------------------------------------------

    /// Register a newly created transfer as pending.
    ///
    /// Returns the stored entry, or `None` if the input was rejected or the
    /// write failed. Saving an existing id overwrites it.
    pub fn save_transfer(
        &self,
        id: &str,
        sender_id: &str,
        receiver_id: &str,
    ) -> Option<TransferEntry> {
        let span = start_store_span("save", self.worker_id.as_str());
        let _enter = span.enter();

        if let Err(e) = validate_new(id, sender_id, receiver_id) {
            warn!(
                transfer_id = id,
                sender = sender_id,
                receiver = receiver_id,
                "rejected transfer: {e}"
            );
            metrics::transfers_saved().add(1, &[KeyValue::new("result", "invalid")]);
            return None;
        }
        record_transfer(&span, id);

        let entry = TransferEntry::new(id, sender_id, receiver_id, Utc::now());

        let mut cache = self.lock();
        if !self.persist(&entry) {
            metrics::transfers_saved().add(1, &[KeyValue::new("result", "error")]);
            return None;
        }
        cache.insert(entry.clone());

        info!(
            transfer_id = id,
            sender = sender_id,
            receiver = receiver_id,
            "saved transfer"
        );
        metrics::transfers_saved().add(1, &[KeyValue::new("result", "ok")]);
        Some(entry)
    }

    /// Point lookup. Served from the cache when present, else from disk.
    pub fn load_transfer(&self, id: &str) -> Option<TransferEntry> {
        if id.is_empty() {
            return None;
        }

        let mut cache = self.lock();
        if let Some(entry) = cache.get(id) {
            return Some(entry.clone());
        }

        match self.repository.load(id) {
            Ok(Some(entry)) => {
                cache.insert(entry.clone());
                Some(entry)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(transfer_id = id, "failed to load transfer: {e}");
                None
            }
        }
    }

    /// Drop the cache so the next query rescans the repository.
    pub fn clear_cache(&self) {
        self.lock().clear();
        info!(worker = %self.worker_id, "transfer cache cleared");
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, StoreCache> {
        // Every mutation leaves the cache consistent between statements, so
        // a panic elsewhere doesn't invalidate it.
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rescan the repository if the cache is empty or older than the refresh
    /// interval, releasing expired claims on the way.
    fn refresh_if_stale(&self, cache: &mut StoreCache) {
        let now = Utc::now();
        if !cache.is_stale(now, self.config.refresh_interval) {
            return;
        }

        let started = Instant::now();
        let mut entries = match self.repository.scan() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    dir = %self.repository.dir().display(),
                    "transfer store scan failed, keeping cached view: {e}"
                );
                return;
            }
        };

        let reclaimed = reclaim_stale(&mut entries, now, self.config.claim_timeout, |entry| {
            self.persist(entry)
        });
        cache.rebuild(entries, now);

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        debug!(
            entries = cache.len(),
            reclaimed,
            elapsed_ms,
            "refreshed transfer cache"
        );
        metrics::cache_refreshes().add(1, &[]);
        if reclaimed > 0 {
            metrics::stale_claims_reclaimed().add(reclaimed as u64, &[]);
        }
        metrics::operation_duration_ms()
            .record(elapsed_ms, &[KeyValue::new("operation", "refresh")]);
    }

    /// Latest durable version of `id`, mirrored into the cache.
    ///
    /// Mutations start from this rather than the cached copy so that a
    /// change written by another process since the last refresh is not
    /// overwritten. Falls back to the cached copy if the file can't be read.
    fn current(&self, cache: &mut StoreCache, id: &str) -> Option<TransferEntry> {
        match self.repository.load(id) {
            Ok(Some(entry)) => {
                cache.insert(entry.clone());
                Some(entry)
            }
            Ok(None) => {
                cache.remove(id);
                None
            }
            Err(e) => {
                warn!(transfer_id = id, "failed to re-read transfer, using cached copy: {e}");
                cache.get(id).cloned()
            }
        }
    }

    /// Write an entry, logging (and reporting) failure instead of returning it.
    fn persist(&self, entry: &TransferEntry) -> bool {
        match self.repository.save(entry) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    transfer_id = %entry.id,
                    path = %self.repository.path_for(&entry.id).display(),
                    "failed to persist transfer: {e}"
                );
                false
            }
        }
    }
}

/// Release expired claims in `entries`, persisting each one before it is
/// kept. An entry whose write fails is restored to its on-disk state.
/// Returns how many claims were released.
fn reclaim_stale<F>(
    entries: &mut [TransferEntry],
    now: DateTime<Utc>,
    timeout: Duration,
    mut persist: F,
) -> usize
where
    F: FnMut(&TransferEntry) -> bool,
{
    let mut reclaimed = 0usize;
    for entry in entries.iter_mut() {
        let original = entry.clone();
        if !entry.reclaim_if_stale(now, timeout) {
            continue;
        }
        if !persist(entry) {
            *entry = original;
            continue;
        }

        reclaimed += 1;
        if original.state() == ClaimState::Claimed {
            record_state_transition(&Span::current(), ClaimState::Claimed, ClaimState::Unclaimed);
        }
        info!(
            transfer_id = %entry.id,
            previous_owner = ?original.claimed_by.as_ref().map(WorkerId::as_str),
            "released stale claim"
        );
    }
    reclaimed
}

fn validate_new(id: &str, sender_id: &str, receiver_id: &str) -> Result<()> {
    for (name, value) in [("id", id), ("sender", sender_id), ("receiver", receiver_id)] {
        if value.trim().is_empty() {
            return Err(Error::InvalidInput(format!("{name} must not be empty")));
        }
    }
    Ok(())
}

/// Treat `Some("")` as no filter.
fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    const TIMEOUT: Duration = Duration::from_secs(300);

    fn claimed(id: &str, age_mins: i64) -> TransferEntry {
        let mut entry = TransferEntry::new(id, "S1", "R1", Utc::now() - ChronoDuration::hours(1));
        entry
            .claim(&WorkerId::new("crashed"), Utc::now() - ChronoDuration::minutes(age_mins))
            .unwrap();
        entry
    }

    #[test]
    fn reclaim_releases_only_expired_claims() {
        let mut entries = vec![claimed("old", 6), claimed("fresh", 1)];
        let mut written = Vec::new();

        let reclaimed = reclaim_stale(&mut entries, Utc::now(), TIMEOUT, |e| {
            written.push(e.id.clone());
            true
        });

        assert_eq!(reclaimed, 1);
        assert_eq!(written, ["old"]);
        assert_eq!(entries[0].state(), ClaimState::Unclaimed);
        assert_eq!(entries[1].state(), ClaimState::Claimed);
    }

    #[test]
    fn failed_write_keeps_on_disk_claim() {
        let mut entries = vec![claimed("old", 6)];
        let before = entries[0].clone();

        let reclaimed = reclaim_stale(&mut entries, Utc::now(), TIMEOUT, |_| false);

        assert_eq!(reclaimed, 0);
        assert_eq!(entries[0], before);
        assert!(!entries[0].is_claimable());
    }
}
