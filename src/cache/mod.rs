//! Cache module for persisting upstream snapshots to disk
//!
//! Records are stored redundantly in several tiers (a primary store and a
//! mirror). Each tier is a [`CacheStore`] directory with atomic
//! temp-then-rename writes; [`CacheWriter`] fans a record out to every tier in
//! the background, and the fallback resolver reads the tiers back in order.

mod store;
mod writer;

pub use store::{CacheError, CacheRecord, CacheStore, StagedWrite, RECORD_VERSION};
pub use writer::{CacheWriter, PersistOutcome, PersistTicket};

use crate::data::Provenance;

/// A named cache location
#[derive(Debug, Clone)]
pub struct CacheTier {
    /// Tag reported to callers when this tier serves a response
    pub provenance: Provenance,
    pub store: CacheStore,
}

impl CacheTier {
    pub fn new(provenance: Provenance, store: CacheStore) -> Self {
        Self { provenance, store }
    }
}
