//! Core data model.
//!
//! A transfer entry is a created transfer waiting to be confirmed. Its claim
//! fields record which worker currently holds the lease on confirming it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Transfer Entry
// ---------------------------------------------------------------------------

/// A persisted work item: one transfer between a sender and a receiver.
///
/// Serialized field names are camelCase so that records written by other
/// workers in the fleet stay readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEntry {
    /// Producer-assigned identifier. Primary key.
    pub id: String,

    pub sender_id: String,
    pub receiver_id: String,

    /// Set once at creation.
    pub created_at: DateTime<Utc>,

    /// Terminal flag. Never reverts once set.
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub confirmed_at: Option<DateTime<Utc>>,

    /// Lease fields. Always set or cleared together.
    #[serde(default)]
    pub claimed: bool,
    #[serde(default)]
    pub claimed_by: Option<WorkerId>,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl TransferEntry {
    /// A fresh, unclaimed, unconfirmed entry.
    pub fn new(
        id: impl Into<String>,
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            created_at,
            confirmed: false,
            confirmed_at: None,
            claimed: false,
            claimed_by: None,
            claimed_at: None,
        }
    }

    /// Current lifecycle state, derived from the flags.
    pub fn state(&self) -> ClaimState {
        if self.confirmed {
            ClaimState::Confirmed
        } else if self.claimed {
            ClaimState::Claimed
        } else {
            ClaimState::Unclaimed
        }
    }

    /// Not yet confirmed (claimed or not).
    pub fn is_pending(&self) -> bool {
        !self.confirmed
    }

    /// Eligible to be handed to a worker.
    pub fn is_claimable(&self) -> bool {
        self.state() == ClaimState::Unclaimed
    }

    /// Whether `worker` holds the claim.
    pub fn is_claimed_by(&self, worker: &WorkerId) -> bool {
        self.claimed && self.claimed_by.as_ref() == Some(worker)
    }

    /// Key of the (sender, receiver) pair this entry belongs to.
    pub fn pair_key(&self) -> String {
        pair_key(&self.sender_id, &self.receiver_id)
    }

    /// Take the lease for `worker`. Only an unclaimed entry can be claimed.
    pub fn claim(&mut self, worker: &WorkerId, now: DateTime<Utc>) -> Result<()> {
        self.transition(ClaimState::Claimed)?;
        self.claimed = true;
        self.claimed_by = Some(worker.clone());
        self.claimed_at = Some(now);
        Ok(())
    }

    /// Give the lease back. Returns false (and changes nothing) unless
    /// `worker` is the current owner.
    pub fn release(&mut self, worker: &WorkerId) -> bool {
        if !self.is_claimed_by(worker) {
            return false;
        }
        self.clear_claim();
        true
    }

    /// Mark the transfer confirmed, dropping any claim whoever holds it.
    /// Returns false if the entry was already confirmed.
    pub fn confirm(&mut self, now: DateTime<Utc>) -> bool {
        if self.confirmed {
            return false;
        }
        self.confirmed = true;
        self.confirmed_at = Some(now.max(self.created_at));
        self.clear_claim();
        true
    }

    /// Clear a claim whose lease ran out, or one missing its owner or
    /// timestamp. Returns true if the entry changed.
    pub fn reclaim_if_stale(&mut self, now: DateTime<Utc>, timeout: std::time::Duration) -> bool {
        if self.confirmed || !self.has_claim_fields() {
            return false;
        }

        let expired = match (self.claimed, &self.claimed_by, self.claimed_at) {
            (true, Some(_), Some(at)) => (now - at).to_std().is_ok_and(|age| age > timeout),
            _ => true,
        };

        if expired {
            self.clear_claim();
        }
        expired
    }

    fn has_claim_fields(&self) -> bool {
        self.claimed || self.claimed_by.is_some() || self.claimed_at.is_some()
    }

    fn clear_claim(&mut self) {
        self.claimed = false;
        self.claimed_by = None;
        self.claimed_at = None;
    }

    fn transition(&self, to: ClaimState) -> Result<()> {
        let from = self.state();
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(Error::InvalidTransition { from, to })
        }
    }
}

/// Display key for a (sender, receiver) pair.
///
/// Not unique when either id contains `:`; lookups use the pair itself.
pub fn pair_key(sender_id: &str, receiver_id: &str) -> String {
    format!("{sender_id}:{receiver_id}")
}

// ---------------------------------------------------------------------------
// Worker identity
// ---------------------------------------------------------------------------

/// Identifies the worker process that holds a claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// `<hostname>-<pid>` for the current process.
    pub fn local() -> Self {
        Self(format!("{}-{}", hostname(), std::process::id()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn hostname() -> String {
    #[cfg(unix)]
    {
        nix::unistd::gethostname()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".into())
    }

    #[cfg(windows)]
    {
        std::env::var("COMPUTERNAME").unwrap_or_else(|_| "unknown".into())
    }

    #[cfg(not(any(unix, windows)))]
    {
        "unknown".to_string()
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a transfer entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimState {
    /// Waiting for a worker.
    Unclaimed,
    /// Leased to one worker.
    Claimed,
    /// Confirmed. Terminal.
    Confirmed,
}

impl ClaimState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: ClaimState) -> bool {
        use ClaimState::*;
        matches!(
            (self, to),
            (Unclaimed, Claimed)
                | (Claimed, Unclaimed)  // release or lease expiry
                | (Claimed, Confirmed)
                | (Unclaimed, Confirmed) // confirmed without claiming
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ClaimState::Confirmed)
    }
}

impl std::fmt::Display for ClaimState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClaimState::Unclaimed => "unclaimed",
            ClaimState::Claimed => "claimed",
            ClaimState::Confirmed => "confirmed",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Aggregate counts over the cached view of the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStatistics {
    pub total: usize,
    pub pending: usize,
    pub confirmed: usize,
    pub claimed: usize,
    pub unclaimed: usize,
    /// Distinct (sender, receiver) pairs with at least one pending entry.
    pub sender_receiver_pairs: usize,
    pub last_cache_refresh: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    fn entry() -> TransferEntry {
        TransferEntry::new("t-1", "S1", "R1", Utc::now())
    }

    #[test]
    fn claim_sets_all_three_fields() {
        let mut e = entry();
        let worker = WorkerId::new("w1");
        let now = Utc::now();
        e.claim(&worker, now).unwrap();

        assert_eq!(e.state(), ClaimState::Claimed);
        assert_eq!(e.claimed_by, Some(worker));
        assert_eq!(e.claimed_at, Some(now));
    }

    #[test]
    fn claiming_twice_is_rejected() {
        let mut e = entry();
        e.claim(&WorkerId::new("w1"), Utc::now()).unwrap();
        let err = e.claim(&WorkerId::new("w2"), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: ClaimState::Claimed,
                to: ClaimState::Claimed
            }
        ));
    }

    #[test]
    fn confirmed_entry_cannot_be_claimed() {
        let mut e = entry();
        assert!(e.confirm(Utc::now()));
        assert!(e.claim(&WorkerId::new("w1"), Utc::now()).is_err());
        assert!(!e.claimed);
    }

    #[test]
    fn release_by_non_owner_is_ignored() {
        let mut e = entry();
        let owner = WorkerId::new("w1");
        e.claim(&owner, Utc::now()).unwrap();

        assert!(!e.release(&WorkerId::new("w2")));
        assert!(e.is_claimed_by(&owner));

        assert!(e.release(&owner));
        assert_eq!(e.state(), ClaimState::Unclaimed);
        assert!(e.claimed_by.is_none());
        assert!(e.claimed_at.is_none());
    }

    #[test]
    fn confirm_clears_claim_and_is_idempotent() {
        let mut e = entry();
        e.claim(&WorkerId::new("w1"), Utc::now()).unwrap();
        assert!(e.confirm(Utc::now()));
        assert!(!e.claimed);
        assert!(e.claimed_by.is_none());

        let snapshot = e.clone();
        assert!(!e.confirm(Utc::now() + Duration::hours(1)));
        assert_eq!(e, snapshot);
    }

    #[test]
    fn confirmed_at_never_precedes_created_at() {
        let created = Utc::now();
        let mut e = TransferEntry::new("t-1", "S1", "R1", created);
        e.confirm(created - Duration::minutes(5));
        assert_eq!(e.confirmed_at, Some(created));
    }

    #[test]
    fn stale_claim_is_reclaimed() {
        let now = Utc::now();
        let mut e = entry();
        e.claim(&WorkerId::new("w1"), now - Duration::minutes(6)).unwrap();

        assert!(e.reclaim_if_stale(now, StdDuration::from_secs(300)));
        assert_eq!(e.state(), ClaimState::Unclaimed);
    }

    #[test]
    fn fresh_claim_is_kept() {
        let now = Utc::now();
        let mut e = entry();
        e.claim(&WorkerId::new("w1"), now - Duration::minutes(1)).unwrap();

        assert!(!e.reclaim_if_stale(now, StdDuration::from_secs(300)));
        assert_eq!(e.state(), ClaimState::Claimed);
    }

    #[test]
    fn partial_claim_fields_are_cleared() {
        let mut e = entry();
        e.claimed = true;
        assert!(e.reclaim_if_stale(Utc::now(), StdDuration::from_secs(300)));
        assert!(!e.claimed);

        let mut e = entry();
        e.claimed_by = Some(WorkerId::new("ghost"));
        assert!(e.reclaim_if_stale(Utc::now(), StdDuration::from_secs(300)));
        assert!(e.claimed_by.is_none());
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let json = serde_json::to_string(&entry()).unwrap();
        for field in [
            "\"id\"",
            "\"senderId\"",
            "\"receiverId\"",
            "\"createdAt\"",
            "\"confirmedAt\"",
            "\"claimedBy\"",
            "\"claimedAt\"",
        ] {
            assert!(json.contains(field), "missing {field} in {json}");
        }
        assert!(!json.contains('\n'));
    }

    #[test]
    fn valid_transitions() {
        use ClaimState::*;
        assert!(Unclaimed.can_transition_to(Claimed));
        assert!(Claimed.can_transition_to(Unclaimed));
        assert!(Claimed.can_transition_to(Confirmed));
        assert!(Unclaimed.can_transition_to(Confirmed));
        assert!(!Confirmed.can_transition_to(Unclaimed));
        assert!(!Confirmed.can_transition_to(Claimed));
        assert!(Confirmed.is_terminal());
    }
}
