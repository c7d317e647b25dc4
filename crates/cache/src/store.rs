//! The tiered cache store: local first, remote second.
//!
//! Lookups check the local tier, then the remote tier; a remote hit is
//! verified and written into the local tier before it is returned. Stores
//! always go to the local tier and are pushed to the remote tier when one is
//! configured with push enabled. Remote failures are logged and counted,
//! never returned.

use crate::entry::CacheEntry;
use crate::gc::{GcPolicy, GcResult};
use crate::local::LocalStore;
use crate::remote::RemoteStore;
use crate::{Error, Fingerprint, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use taskmemo_events::{emit_cache_evicted, emit_remote_unavailable};
use tracing::{debug, warn};

/// Snapshot of cache counters for one store instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Calls to `get`
    pub lookups: u64,
    /// Lookups answered by the local tier
    pub local_hits: u64,
    /// Lookups answered by the remote tier (and promoted)
    pub remote_hits: u64,
    /// Lookups answered by neither tier
    pub misses: u64,
    /// Entries stored locally
    pub stores: u64,
    /// Remote operations that failed and were skipped
    pub remote_failures: u64,
    /// Entries evicted (size bound or corruption)
    pub evictions: u64,
}

impl CacheStats {
    /// Hit ratio over all lookups, if any happened.
    #[must_use]
    pub fn hit_rate(&self) -> Option<f64> {
        if self.lookups == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        Some((self.local_hits + self.remote_hits) as f64 / self.lookups as f64)
    }
}

#[derive(Debug, Default)]
struct Counters {
    lookups: AtomicU64,
    local_hits: AtomicU64,
    remote_hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    remote_failures: AtomicU64,
    evictions: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            local_hits: self.local_hits.load(Ordering::Relaxed),
            remote_hits: self.remote_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            remote_failures: self.remote_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Local tier plus an optional remote tier.
pub struct CacheStore {
    local: Arc<LocalStore>,
    remote: Option<Arc<dyn RemoteStore>>,
    push: bool,
    counters: Counters,
}

impl CacheStore {
    /// A store with only the local tier.
    #[must_use]
    pub fn new(local: LocalStore) -> Self {
        Self {
            local: Arc::new(local),
            remote: None,
            push: false,
            counters: Counters::default(),
        }
    }

    /// Attach a remote tier. With `push` false the remote is read-only.
    #[must_use]
    pub fn with_remote(mut self, remote: Arc<dyn RemoteStore>, push: bool) -> Self {
        self.remote = Some(remote);
        self.push = push;
        self
    }

    /// The local tier
    #[must_use]
    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    /// Name of the remote tier, if configured
    #[must_use]
    pub fn remote_name(&self) -> Option<&str> {
        self.remote.as_deref().map(RemoteStore::name)
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&LocalStore) -> Result<T> + Send + 'static,
    {
        let local = Arc::clone(&self.local);
        tokio::task::spawn_blocking(move || f(&local))
            .await
            .map_err(|e| Error::io_no_path(std::io::Error::other(e.to_string()), "blocking cache task"))?
    }

    fn record_evictions(&self, evicted: &[Fingerprint], reason: &str) {
        for fingerprint in evicted {
            emit_cache_evicted!(fingerprint, reason);
        }
        Counters::bump(&self.counters.evictions, evicted.len() as u64);
    }

    /// Look up `fingerprint` in the local tier, then the remote tier.
    ///
    /// A corrupt local entry is evicted and treated as absent. Remote
    /// failures are logged and treated as a miss.
    ///
    /// # Errors
    ///
    /// Returns an I/O error only for local failures other than corruption.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>> {
        Counters::bump(&self.counters.lookups, 1);
        let fp = *fingerprint;

        match self.blocking(move |local| local.get(&fp)).await {
            Ok(Some(entry)) => {
                Counters::bump(&self.counters.local_hits, 1);
                debug!(fingerprint = %fp, "Local cache hit");
                return Ok(Some(entry));
            }
            Ok(None) => {}
            Err(e) if e.is_corrupt() => {
                warn!(fingerprint = %fp, error = %e, "Evicting corrupt cache entry");
                self.evict(&fp)?;
            }
            Err(e) => return Err(e),
        }

        if let Some(remote) = &self.remote {
            match remote.get(&fp).await {
                Ok(Some(archive)) => {
                    match self.blocking(move |local| local.import_archive(&fp, &archive)).await {
                        Ok(entry) => {
                            Counters::bump(&self.counters.remote_hits, 1);
                            debug!(fingerprint = %fp, remote = remote.name(), "Promoted remote cache entry");
                            let evicted = self
                                .blocking(move |local| local.enforce_size_limit(Some(&fp)))
                                .await?;
                            self.record_evictions(&evicted, "size limit");
                            return Ok(Some(entry));
                        }
                        Err(e) => {
                            warn!(fingerprint = %fp, remote = remote.name(), error = %e, "Ignoring invalid remote cache entry");
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    Counters::bump(&self.counters.remote_failures, 1);
                    emit_remote_unavailable!("get", e);
                }
            }
        }

        Counters::bump(&self.counters.misses, 1);
        Ok(None)
    }

    /// Store `files` (relative to `source_root`) under `fingerprint`.
    ///
    /// The local tier enforces its size bound afterwards. The remote push,
    /// when enabled, is best effort.
    ///
    /// # Errors
    ///
    /// Returns an error if the local tier cannot store the entry.
    pub async fn put(
        &self,
        fingerprint: &Fingerprint,
        task_name: &str,
        source_root: &Path,
        files: &[String],
    ) -> Result<CacheEntry> {
        let fp = *fingerprint;
        let (task, root, files) = (task_name.to_string(), source_root.to_path_buf(), files.to_vec());
        let outcome = self
            .blocking(move |local| local.put(fp, &task, &root, &files))
            .await?;
        Counters::bump(&self.counters.stores, 1);
        self.record_evictions(&outcome.evicted, "size limit");

        if self.push
            && let Some(remote) = &self.remote
        {
            let entry = outcome.entry.clone();
            let pushed = match self.blocking(move |local| local.export_archive(&entry)).await {
                Ok(archive) => remote.put(&fp, archive).await,
                Err(e) => Err(e),
            };
            if let Err(e) = pushed {
                Counters::bump(&self.counters.remote_failures, 1);
                emit_remote_unavailable!("put", e);
            }
        }
        Ok(outcome.entry)
    }

    /// Write an entry's files onto the `declared` outputs under
    /// `project_root`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptEntry`] after evicting the entry if a file
    /// lies outside `declared` or any blob fails verification, or an I/O
    /// error if a file cannot be written.
    pub async fn restore(&self, entry: &CacheEntry, project_root: &Path, declared: &[String]) -> Result<usize> {
        let (owned, root, declared) = (entry.clone(), project_root.to_path_buf(), declared.to_vec());
        match self.blocking(move |local| local.restore(&owned, &root, &declared)).await {
            Err(e) if e.is_corrupt() => {
                warn!(fingerprint = %entry.fingerprint, error = %e, "Evicting corrupt cache entry");
                self.evict(&entry.fingerprint)?;
                Err(e)
            }
            other => other,
        }
    }

    /// Remove one entry from the local tier.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the entry cannot be removed.
    pub fn evict(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let removed = self.local.evict(fingerprint)?;
        if removed {
            self.record_evictions(&[*fingerprint], "corrupt");
        }
        Ok(removed)
    }

    /// Garbage-collect the local tier.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if entries or blobs cannot be removed.
    pub fn gc(&self, policy: &GcPolicy, protected: &HashSet<Fingerprint>) -> Result<GcResult> {
        let result = self.local.gc(policy, protected)?;
        Counters::bump(&self.counters.evictions, result.entries_removed as u64);
        Ok(result)
    }

    /// Remove everything from the local tier.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directories cannot be removed.
    pub fn clean(&self) -> Result<()> {
        self.local.clear()
    }
}
