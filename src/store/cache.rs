//! Process-local mirror of the repository with secondary indexes.
//!
//! Pure in-memory bookkeeping: the store does the file I/O and hands the
//! results here. Indexes only track pending (unconfirmed) entries.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::model::{TransferEntry, TransferStatistics, pair_key};

#[derive(Debug, Default)]
pub(crate) struct StoreCache {
    entries: HashMap<String, TransferEntry>,
    /// sender id → pending transfer ids
    by_sender: HashMap<String, Vec<String>>,
    /// (sender, receiver) → pending transfer ids
    by_pair: HashMap<(String, String), Vec<String>>,
    last_refresh: Option<DateTime<Utc>>,
}

impl StoreCache {
    /// True when the next query must rescan the repository.
    pub fn is_stale(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        let Some(last) = self.last_refresh else {
            return true;
        };
        if self.entries.is_empty() {
            return true;
        }
        match (now - last).to_std() {
            Ok(age) => age >= interval,
            // Clock went backwards; don't trust the cache.
            Err(_) => true,
        }
    }

    /// Replace everything with a freshly scanned set of entries.
    pub fn rebuild(&mut self, entries: Vec<TransferEntry>, now: DateTime<Utc>) {
        self.clear();
        for entry in entries {
            self.insert(entry);
        }
        self.last_refresh = Some(now);
    }

    /// Drop all entries and forget the refresh time.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_sender.clear();
        self.by_pair.clear();
        self.last_refresh = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, id: &str) -> Option<&TransferEntry> {
        self.entries.get(id)
    }

    /// Insert or replace an entry, keeping the indexes in step with its
    /// pending state.
    pub fn insert(&mut self, entry: TransferEntry) {
        if let Some(previous) = self.entries.get(&entry.id) {
            if previous.sender_id != entry.sender_id || previous.receiver_id != entry.receiver_id
            {
                let previous = previous.clone();
                self.unindex(&previous);
            }
        }

        if entry.is_pending() {
            self.index(&entry);
        } else {
            self.unindex(&entry);
        }
        self.entries.insert(entry.id.clone(), entry);
    }

    pub fn remove(&mut self, id: &str) -> Option<TransferEntry> {
        let entry = self.entries.remove(id)?;
        self.unindex(&entry);
        Some(entry)
    }

    /// Candidate entries for a claim or peek, from the most specific index
    /// that applies. Only claimable entries, oldest first.
    pub fn claimable(&self, sender: Option<&str>, receiver: Option<&str>) -> Vec<&TransferEntry> {
        let mut candidates: Vec<&TransferEntry> = match (sender, receiver) {
            (Some(sender), Some(receiver)) => self.indexed(&self.by_pair, &pair(sender, receiver)),
            (Some(sender), None) => self.indexed(&self.by_sender, sender),
            (None, Some(receiver)) => self
                .entries
                .values()
                .filter(|e| e.is_pending() && e.receiver_id == receiver)
                .collect(),
            (None, None) => self.entries.values().filter(|e| e.is_pending()).collect(),
        };

        candidates.retain(|e| e.is_claimable());
        sort_oldest_first(&mut candidates);
        candidates
    }

    /// All pending entries for a pair, claimed or not, oldest first.
    pub fn pending_for_pair(&self, sender: &str, receiver: &str) -> Vec<TransferEntry> {
        let mut pending = self.indexed(&self.by_pair, &pair(sender, receiver));
        pending.retain(|e| e.is_pending());
        sort_oldest_first(&mut pending);
        pending.into_iter().cloned().collect()
    }

    /// Unclaimed pending entries grouped by `"sender:receiver"`. Empty groups
    /// are left out.
    pub fn claimable_by_pair(&self) -> Vec<(String, Vec<TransferEntry>)> {
        self.by_pair
            .iter()
            .filter_map(|((sender, receiver), ids)| {
                let mut group: Vec<&TransferEntry> = ids
                    .iter()
                    .filter_map(|id| self.entries.get(id))
                    .filter(|e| e.is_claimable())
                    .collect();
                if group.is_empty() {
                    return None;
                }
                sort_oldest_first(&mut group);
                Some((
                    pair_key(sender, receiver),
                    group.into_iter().cloned().collect(),
                ))
            })
            .collect()
    }

    /// Ids of confirmed entries whose confirmation is at or before `cutoff`.
    pub fn confirmed_before(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.entries
            .values()
            .filter(|e| e.confirmed && e.confirmed_at.is_some_and(|at| at <= cutoff))
            .map(|e| e.id.clone())
            .collect()
    }

    pub fn statistics(&self) -> TransferStatistics {
        let mut stats = TransferStatistics {
            total: self.entries.len(),
            sender_receiver_pairs: self.by_pair.len(),
            last_cache_refresh: self.last_refresh,
            ..TransferStatistics::default()
        };
        for entry in self.entries.values() {
            if entry.confirmed {
                stats.confirmed += 1;
                continue;
            }
            stats.pending += 1;
            if entry.claimed {
                stats.claimed += 1;
            } else {
                stats.unclaimed += 1;
            }
        }
        stats
    }

    fn indexed<'a, K, Q>(&'a self, index: &'a HashMap<K, Vec<String>>, key: &Q) -> Vec<&'a TransferEntry>
    where
        K: Borrow<Q> + Eq + Hash,
        Q: Eq + Hash + ?Sized,
    {
        index
            .get(key)
            .map(|ids| ids.iter().filter_map(|id| self.entries.get(id)).collect())
            .unwrap_or_default()
    }

    fn index(&mut self, entry: &TransferEntry) {
        push_unique(&mut self.by_sender, entry.sender_id.clone(), &entry.id);
        push_unique(&mut self.by_pair, entry_pair(entry), &entry.id);
    }

    fn unindex(&mut self, entry: &TransferEntry) {
        remove_id(&mut self.by_sender, &entry.sender_id, &entry.id);
        remove_id(&mut self.by_pair, &entry_pair(entry), &entry.id);
    }
}

fn pair(sender: &str, receiver: &str) -> (String, String) {
    (sender.to_string(), receiver.to_string())
}

fn entry_pair(entry: &TransferEntry) -> (String, String) {
    pair(&entry.sender_id, &entry.receiver_id)
}

fn push_unique<K: Eq + Hash>(index: &mut HashMap<K, Vec<String>>, key: K, id: &str) {
    let ids = index.entry(key).or_default();
    if !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
    }
}

fn remove_id<K, Q>(index: &mut HashMap<K, Vec<String>>, key: &Q, id: &str)
where
    K: Borrow<Q> + Eq + Hash,
    Q: Eq + Hash + ?Sized,
{
    if let Some(ids) = index.get_mut(key) {
        ids.retain(|existing| existing != id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

/// FIFO order; ids break ties so the order is stable across rescans.
fn sort_oldest_first(entries: &mut [&TransferEntry]) {
    entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
