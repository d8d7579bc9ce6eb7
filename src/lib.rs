//! # transfer-store
//!
//! Durable handoff of created transfers to confirming workers.
//!
//! Producers save transfers; any worker process can claim the oldest pending
//! one, then confirm it or release it back. Claims are leases: a claim left
//! behind by a crashed worker is released on the next cache refresh after
//! its timeout. State is one JSON file per transfer, shared through the
//! filesystem, with a per-process cache and sender / sender+receiver indexes.

pub mod config;
pub mod error;
pub mod model;
pub mod repository;
pub mod store;
pub mod telemetry;

pub use config::{Config, StoreConfig};
pub use error::{Error, Result};
pub use model::{ClaimState, TransferEntry, TransferStatistics, WorkerId};
pub use repository::EntryRepository;
pub use store::TransferStore;
