//! Background persistence to every cache tier
//!
//! `CacheWriter::submit` starts one blocking write per tier, all running
//! concurrently, and returns immediately. The returned [`PersistTicket`]
//! resolves once every tier has finished; callers on the request path drop it,
//! tests await it. A failed tier is logged and never affects the other tiers.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{CacheRecord, CacheTier};
use crate::data::Provenance;

/// Result of writing one record to one tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The record was committed
    Written { tier: Provenance, key: String },
    /// The write failed; the tier keeps its previous record
    Failed {
        tier: Provenance,
        key: String,
        error: String,
    },
}

impl PersistOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, PersistOutcome::Written { .. })
    }

    pub fn tier(&self) -> Provenance {
        match self {
            PersistOutcome::Written { tier, .. } | PersistOutcome::Failed { tier, .. } => *tier,
        }
    }
}

/// Completion handle for a submitted write
///
/// Dropping the ticket does not cancel the writes.
#[derive(Debug)]
pub struct PersistTicket {
    handle: JoinHandle<Vec<PersistOutcome>>,
}

impl PersistTicket {
    /// Waits for all tiers and returns one outcome per tier, in tier order
    pub async fn wait(self) -> Vec<PersistOutcome> {
        match self.handle.await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(error = %e, "cache persistence task did not complete");
                Vec::new()
            }
        }
    }
}

/// Writes records to all configured tiers in the background
#[derive(Debug, Clone)]
pub struct CacheWriter {
    tiers: Arc<[CacheTier]>,
}

impl CacheWriter {
    pub fn new(tiers: Vec<CacheTier>) -> Self {
        Self {
            tiers: tiers.into(),
        }
    }

    pub fn tiers(&self) -> &[CacheTier] {
        &self.tiers
    }

    /// Starts writing `record` under `key` to every tier
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit<T>(&self, key: &str, record: CacheRecord<T>) -> PersistTicket
    where
        T: Serialize + Send + Sync + 'static,
    {
        let record = Arc::new(record);
        let writes: Vec<(Provenance, JoinHandle<_>)> = self
            .tiers
            .iter()
            .cloned()
            .map(|tier| {
                let record = Arc::clone(&record);
                let key = key.to_string();
                let provenance = tier.provenance;
                let handle =
                    tokio::task::spawn_blocking(move || tier.store.write(&key, record.as_ref()));
                (provenance, handle)
            })
            .collect();

        let key = key.to_string();
        let handle = tokio::spawn(async move {
            let (tiers, handles): (Vec<_>, Vec<_>) = writes.into_iter().unzip();
            let results = join_all(handles).await;

            tiers
                .into_iter()
                .zip(results)
                .map(|(tier, joined)| {
                    let error = match joined {
                        Ok(Ok(())) => {
                            debug!(%tier, key = %key, "cache record written");
                            return PersistOutcome::Written {
                                tier,
                                key: key.clone(),
                            };
                        }
                        Ok(Err(e)) => e.to_string(),
                        Err(e) => e.to_string(),
                    };
                    warn!(%tier, key = %key, error = %error, "cache write failed");
                    PersistOutcome::Failed {
                        tier,
                        key: key.clone(),
                        error,
                    }
                })
                .collect()
        });

        PersistTicket { handle }
    }
}
