//! Garbage collection for the local cache
//!
//! Removes entries older than a TTL, trims the store to a size bound in LRU
//! order, drops entry directories whose metadata no longer parses, and
//! finally deletes CAS blobs that no entry references.

use crate::local::LocalStore;
use crate::{Fingerprint, Result};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use taskmemo_events::emit_cache_evicted;
use tracing::{debug, info, warn};

/// GC policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcPolicy {
    /// Maximum age since last access, in days
    pub max_age_days: Option<u64>,
    /// Maximum total cache size in bytes
    pub max_size_bytes: Option<u64>,
}

impl Default for GcPolicy {
    fn default() -> Self {
        Self {
            max_age_days: Some(30), // 30 days default
            max_size_bytes: None,
        }
    }
}

/// Result of a GC operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcResult {
    /// Number of cache entries removed
    pub entries_removed: usize,
    /// Number of CAS blobs removed
    pub blobs_removed: usize,
    /// Bytes freed (entry sizes plus orphaned blob sizes)
    pub bytes_freed: u64,
}

impl LocalStore {
    /// Run garbage collection.
    ///
    /// Entries in `protected` (typically the fingerprints recorded in run
    /// history) survive the age limit but not the size bound.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if an entry or blob cannot be removed.
    pub fn gc(&self, policy: &GcPolicy, protected: &HashSet<Fingerprint>) -> Result<GcResult> {
        let mut result = GcResult::default();

        for (fingerprint, loaded) in self.scan_entries()? {
            if let Err(e) = loaded {
                warn!(%fingerprint, error = %e, "Removing unreadable cache entry");
                self.remove_entry_dir(&fingerprint)?;
                result.entries_removed += 1;
            }
        }

        let snapshot = self.index_snapshot();
        let cutoff = policy
            .max_age_days
            .and_then(|days| i64::try_from(days).ok())
            .and_then(Duration::try_days)
            .and_then(|age| Utc::now().checked_sub_signed(age));
        if let Some(cutoff) = cutoff {
            for (fingerprint, last_accessed, size) in &snapshot {
                if *last_accessed >= cutoff || protected.contains(fingerprint) {
                    continue;
                }
                if self.evict(fingerprint)? {
                    debug!(%fingerprint, %last_accessed, "Removed expired cache entry");
                    emit_cache_evicted!(fingerprint, "expired");
                    result.entries_removed += 1;
                    result.bytes_freed += size;
                }
            }
        }

        if let Some(max) = policy.max_size_bytes {
            let before = self.total_bytes();
            let evicted = self.evict_until(max, None)?;
            for fingerprint in &evicted {
                emit_cache_evicted!(fingerprint, "size limit");
            }
            result.entries_removed += evicted.len();
            result.bytes_freed += before.saturating_sub(self.total_bytes());
        }

        // Blobs left behind by interrupted writes or removed metadata.
        for blob in self.cas.list()? {
            let index = self.index.lock();
            if index.is_referenced(&blob) {
                continue;
            }
            let size = self.cas.size(&blob).unwrap_or(0);
            self.cas.delete(&blob)?;
            drop(index);
            result.blobs_removed += 1;
            result.bytes_freed += size;
        }

        info!(
            entries_removed = result.entries_removed,
            blobs_removed = result.blobs_removed,
            bytes_freed = result.bytes_freed,
            "Cache garbage collection complete"
        );
        Ok(result)
    }
}
