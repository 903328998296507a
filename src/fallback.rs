//! Stale-data fallback across cache tiers
//!
//! When an upstream is unavailable, [`FallbackResolver::resolve`] walks the
//! cache tiers in priority order and returns the first valid record, tagged
//! with the tier it came from and the time it was captured.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, CacheTier};
use crate::data::Provenance;

/// A payload served from cache
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub payload: T,
    /// Tier that held the record
    pub provenance: Provenance,
    /// When the record was captured from the upstream
    pub as_of: DateTime<Utc>,
}

/// Reads cache tiers in a fixed priority order
#[derive(Debug, Clone)]
pub struct FallbackResolver {
    tiers: Arc<[CacheTier]>,
}

impl FallbackResolver {
    /// Creates a resolver; `tiers` are consulted in the given order
    pub fn new(tiers: Vec<CacheTier>) -> Self {
        Self {
            tiers: tiers.into(),
        }
    }

    /// Returns the first valid record for `key`
    ///
    /// Missing, corrupt or unreadable records are skipped. `None` means no
    /// tier could serve the key.
    pub fn resolve<T: DeserializeOwned>(&self, key: &str) -> Option<Resolved<T>> {
        for (position, tier) in self.tiers.iter().enumerate() {
            debug!(tier = %tier.provenance, position, key, "consulting cache tier");
            match tier.store.read::<T>(key) {
                Ok(record) => {
                    info!(
                        tier = %tier.provenance,
                        key,
                        as_of = %record.timestamp,
                        "serving cached data"
                    );
                    return Some(Resolved {
                        payload: record.data,
                        provenance: tier.provenance,
                        as_of: record.timestamp,
                    });
                }
                Err(CacheError::NotFound(_)) => {
                    debug!(tier = %tier.provenance, key, "cache tier empty");
                }
                Err(e) => {
                    warn!(tier = %tier.provenance, key, error = %e, "skipping unusable cache record");
                }
            }
        }

        warn!(key, "no cache tier holds data");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheRecord, CacheStore};
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    fn resolver(root: &TempDir) -> (FallbackResolver, CacheStore, CacheStore) {
        let primary = CacheStore::with_dir(root.path().join("api-cache"));
        let mirror = CacheStore::with_dir(root.path().join("public-cache"));
        let resolver = FallbackResolver::new(vec![
            CacheTier::new(Provenance::ApiCache, primary.clone()),
            CacheTier::new(Provenance::PublicCache, mirror.clone()),
        ]);
        (resolver, primary, mirror)
    }

    #[test]
    fn test_primary_tier_wins() {
        let root = TempDir::new().unwrap();
        let (resolver, primary, mirror) = resolver(&root);
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        primary.write("news", &CacheRecord::at(vec![1, 2, 3], t)).unwrap();
        mirror.write("news", &CacheRecord::new(vec![9])).unwrap();

        let resolved: Resolved<Vec<i32>> = resolver.resolve("news").expect("primary data");

        assert_eq!(resolved.payload, vec![1, 2, 3]);
        assert_eq!(resolved.provenance, Provenance::ApiCache);
        assert_eq!(resolved.as_of, t);
    }

    #[test]
    fn test_mirror_used_when_primary_empty() {
        let root = TempDir::new().unwrap();
        let (resolver, _primary, mirror) = resolver(&root);
        let t = Utc.with_ymd_and_hms(2024, 5, 2, 9, 30, 0).unwrap();
        mirror.write("news", &CacheRecord::at(vec![7], t)).unwrap();

        let resolved: Resolved<Vec<i32>> = resolver.resolve("news").expect("mirror data");

        assert_eq!(resolved.payload, vec![7]);
        assert_eq!(resolved.provenance, Provenance::PublicCache);
        assert_eq!(resolved.as_of, t);
    }

    #[test]
    fn test_corrupt_primary_falls_through_to_mirror() {
        let root = TempDir::new().unwrap();
        let (resolver, primary, mirror) = resolver(&root);
        fs::create_dir_all(primary.dir()).unwrap();
        fs::write(primary.record_path("news"), "{\"version\":1,").unwrap();
        mirror.write("news", &CacheRecord::new(vec![5])).unwrap();

        let resolved: Resolved<Vec<i32>> = resolver.resolve("news").unwrap();

        assert_eq!(resolved.provenance, Provenance::PublicCache);
    }

    #[test]
    fn test_all_tiers_empty_is_unavailable() {
        let root = TempDir::new().unwrap();
        let (resolver, _primary, _mirror) = resolver(&root);

        assert!(resolver.resolve::<Vec<i32>>("news").is_none());
    }

    #[test]
    fn test_payload_type_mismatch_is_skipped() {
        let root = TempDir::new().unwrap();
        let (resolver, primary, _mirror) = resolver(&root);
        primary.write("news", &CacheRecord::new("a string")).unwrap();

        assert!(resolver.resolve::<Vec<i32>>("news").is_none());
    }
}
