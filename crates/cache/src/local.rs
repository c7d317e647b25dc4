//! Local cache tier.
//!
//! Layout under the cache root:
//!
//! ```text
//! {root}/cas/ab/cd/abcd...            output blobs (shared between entries)
//! {root}/entries/{fingerprint}/metadata.json
//! ```
//!
//! An in-memory index tracks entry sizes, access times and blob reference
//! counts. It drives the size bound (least recently used entries go first)
//! and decides when a blob is no longer referenced and can be deleted.
//!
//! Locking: operations on one fingerprint serialize on one of sixteen shard
//! locks; the index has its own lock. A shard lock may be held while taking
//! the index lock, never the other way round, and no thread holds two shard
//! locks.

use crate::cas::{BlobId, CasStore, write_atomic};
use crate::entry::{CacheEntry, OutputFile, safe_relative_path};
use crate::{Error, Fingerprint, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const SHARD_COUNT: usize = 16;
const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone)]
pub(crate) struct IndexEntry {
    pub(crate) last_accessed: DateTime<Utc>,
    pub(crate) size_bytes: u64,
    pub(crate) blobs: Vec<BlobId>,
}

#[derive(Debug, Default)]
pub(crate) struct LruIndex {
    pub(crate) entries: HashMap<Fingerprint, IndexEntry>,
    blob_refs: HashMap<BlobId, usize>,
    total_bytes: u64,
}

impl LruIndex {
    fn reserve(&mut self, blobs: &[BlobId]) {
        for blob in blobs {
            *self.blob_refs.entry(blob.clone()).or_insert(0) += 1;
        }
    }

    /// Drop one reference per blob; returns blobs that are now unreferenced.
    fn release(&mut self, blobs: &[BlobId]) -> Vec<BlobId> {
        let mut orphaned = Vec::new();
        for blob in blobs {
            if let Some(count) = self.blob_refs.get_mut(blob) {
                *count -= 1;
                if *count == 0 {
                    self.blob_refs.remove(blob);
                    orphaned.push(blob.clone());
                }
            }
        }
        orphaned
    }

    /// Insert an entry whose blobs were already reserved.
    fn insert_reserved(&mut self, entry: &CacheEntry, blobs: Vec<BlobId>) -> Vec<BlobId> {
        let orphaned = self.remove(&entry.fingerprint);
        self.total_bytes += entry.size_bytes;
        self.entries.insert(
            entry.fingerprint,
            IndexEntry {
                last_accessed: entry.last_accessed,
                size_bytes: entry.size_bytes,
                blobs,
            },
        );
        orphaned
    }

    fn remove(&mut self, fingerprint: &Fingerprint) -> Vec<BlobId> {
        match self.entries.remove(fingerprint) {
            Some(old) => {
                self.total_bytes -= old.size_bytes;
                self.release(&old.blobs)
            }
            None => Vec::new(),
        }
    }

    fn touch(&mut self, fingerprint: &Fingerprint, at: DateTime<Utc>) {
        if let Some(entry) = self.entries.get_mut(fingerprint) {
            entry.last_accessed = at;
        }
    }

    pub(crate) fn is_referenced(&self, blob: &BlobId) -> bool {
        self.blob_refs.contains_key(blob)
    }

    /// Least recently used entry other than `keep`.
    fn oldest_except(&self, keep: Option<&Fingerprint>) -> Option<Fingerprint> {
        self.entries
            .iter()
            .filter(|(fp, _)| Some(*fp) != keep)
            .min_by(|(fp_a, a), (fp_b, b)| {
                a.last_accessed
                    .cmp(&b.last_accessed)
                    .then_with(|| fp_a.cmp(fp_b))
            })
            .map(|(fp, _)| *fp)
    }
}

/// Outcome of [`LocalStore::put`].
#[derive(Debug, Clone)]
pub struct PutOutcome {
    /// The stored entry
    pub entry: CacheEntry,
    /// Entries evicted to respect the size bound
    pub evicted: Vec<Fingerprint>,
}

/// The on-disk cache tier on this machine.
pub struct LocalStore {
    root: PathBuf,
    entries_dir: PathBuf,
    pub(crate) cas: CasStore,
    pub(crate) index: Mutex<LruIndex>,
    shards: Vec<Mutex<()>>,
    max_size_bytes: Option<u64>,
}

impl LocalStore {
    /// Open (creating if needed) the store under `root` and load its index.
    ///
    /// Entries whose metadata cannot be read are skipped; `gc` removes them.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directories cannot be created or listed.
    pub fn open(root: impl Into<PathBuf>, max_size_bytes: Option<u64>) -> Result<Self> {
        let root = root.into();
        let entries_dir = root.join("entries");
        let cas_dir = root.join("cas");
        for dir in [&entries_dir, &cas_dir] {
            fs::create_dir_all(dir).map_err(|e| Error::io(e, dir, "create_dir_all"))?;
        }

        let store = Self {
            cas: CasStore::new(cas_dir),
            entries_dir,
            root,
            index: Mutex::new(LruIndex::default()),
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(())).collect(),
            max_size_bytes,
        };
        store.load_index()?;
        Ok(store)
    }

    fn load_index(&self) -> Result<()> {
        let mut index = self.index.lock();
        for (fingerprint, loaded) in self.scan_entries()? {
            match loaded {
                Ok(entry) => {
                    let blobs: Vec<BlobId> =
                        entry.outputs.iter().map(|o| o.sha256.clone()).collect();
                    index.reserve(&blobs);
                    index.insert_reserved(&entry, blobs);
                }
                Err(e) => warn!(%fingerprint, error = %e, "Skipping unreadable cache entry"),
            }
        }
        debug!(
            entries = index.entries.len(),
            bytes = index.total_bytes,
            root = %self.root.display(),
            "Loaded local cache index"
        );
        Ok(())
    }

    /// Read every entry directory. Directories whose name is not a
    /// fingerprint are ignored.
    pub(crate) fn scan_entries(&self) -> Result<Vec<(Fingerprint, Result<CacheEntry>)>> {
        let read_dir = fs::read_dir(&self.entries_dir)
            .map_err(|e| Error::io(e, &self.entries_dir, "read_dir"))?;
        let mut found = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry.map_err(|e| Error::io(e, &self.entries_dir, "read_dir_entry"))?;
            let Some(name) = dir_entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Ok(fingerprint) = Fingerprint::from_hex(&name) else {
                continue;
            };
            found.push((fingerprint, self.read_metadata(&fingerprint)));
        }
        found.sort_by_key(|(fp, _)| *fp);
        Ok(found)
    }

    /// Root directory of this store
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Configured size bound
    #[must_use]
    pub fn max_size_bytes(&self) -> Option<u64> {
        self.max_size_bytes
    }

    /// Number of indexed entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.lock().entries.len()
    }

    /// Whether the store holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of indexed entry sizes
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.index.lock().total_bytes
    }

    /// Whether an entry for `fingerprint` is indexed (no disk access, no touch)
    #[must_use]
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.index.lock().entries.contains_key(fingerprint)
    }

    fn shard(&self, fingerprint: &Fingerprint) -> &Mutex<()> {
        &self.shards[usize::from(fingerprint.as_bytes()[0]) % SHARD_COUNT]
    }

    fn entry_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.entries_dir.join(fingerprint.to_hex())
    }

    fn metadata_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.entry_dir(fingerprint).join(METADATA_FILE)
    }

    fn read_metadata(&self, fingerprint: &Fingerprint) -> Result<CacheEntry> {
        let path = self.metadata_path(fingerprint);
        let bytes = fs::read(&path).map_err(|e| Error::io(e, &path, "read"))?;
        let entry: CacheEntry = serde_json::from_slice(&bytes)
            .map_err(|e| Error::corrupt(fingerprint, format!("unreadable metadata: {e}")))?;
        entry.verify(fingerprint)?;
        Ok(entry)
    }

    fn write_metadata(&self, entry: &CacheEntry) -> Result<()> {
        let json = serde_json::to_vec_pretty(entry)
            .map_err(|e| Error::serialization(format!("Failed to serialize entry metadata: {e}")))?;
        write_atomic(&self.metadata_path(&entry.fingerprint), &json)
    }

    /// Look up an entry and mark it as used.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptEntry`] if the metadata exists but does not
    /// parse or verify, and an I/O error for other read failures.
    pub fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>> {
        let _guard = self.shard(fingerprint).lock();

        if !self.metadata_path(fingerprint).exists() {
            let mut index = self.index.lock();
            let orphaned = index.remove(fingerprint);
            self.delete_blobs(&orphaned);
            return Ok(None);
        }

        let mut entry = self.read_metadata(fingerprint)?;
        entry.last_accessed = Utc::now();
        if let Err(e) = self.write_metadata(&entry) {
            warn!(%fingerprint, error = %e, "Failed to record cache entry access time");
        }
        self.index.lock().touch(fingerprint, entry.last_accessed);
        Ok(Some(entry))
    }

    /// Store the given files under `fingerprint`.
    ///
    /// `files` are `/`-separated paths relative to `source_root`. Runs the
    /// size bound afterwards; the new entry itself is never evicted by it.
    ///
    /// # Errors
    ///
    /// Returns an I/O or validation error if a file cannot be read or the
    /// entry cannot be written. Nothing is indexed on failure.
    pub fn put(
        &self,
        fingerprint: Fingerprint,
        task_name: &str,
        source_root: &Path,
        files: &[String],
    ) -> Result<PutOutcome> {
        let mut staged = Vec::with_capacity(files.len());
        for rel in files {
            let source = source_root.join(safe_relative_path(rel)?);
            let data = fs::read(&source).map_err(|e| Error::io(e, &source, "read"))?;
            staged.push((rel.clone(), data));
        }
        let entry = self.put_staged(fingerprint, task_name, staged)?;
        let evicted = self.enforce_size_limit(Some(&fingerprint))?;
        Ok(PutOutcome { entry, evicted })
    }

    /// Store in-memory file contents as an entry. Shared by `put` and
    /// archive import.
    pub(crate) fn put_staged(
        &self,
        fingerprint: Fingerprint,
        task_name: &str,
        staged: Vec<(String, Vec<u8>)>,
    ) -> Result<CacheEntry> {
        let outputs: Vec<OutputFile> = staged
            .iter()
            .map(|(rel, data)| OutputFile {
                rel_path: rel.clone(),
                size: data.len() as u64,
                sha256: BlobId::from_data(data),
            })
            .collect();
        let blobs: Vec<BlobId> = outputs.iter().map(|o| o.sha256.clone()).collect();
        let entry = CacheEntry::new(fingerprint, task_name, outputs);

        let _guard = self.shard(&fingerprint).lock();
        // Reserved blobs cannot be deleted by a concurrent eviction.
        self.index.lock().reserve(&blobs);

        let written = (|| {
            for (_, data) in &staged {
                self.cas.store(data)?;
            }
            self.write_metadata(&entry)
        })();

        let mut index = self.index.lock();
        if let Err(e) = written {
            let orphaned = index.release(&blobs);
            self.delete_blobs(&orphaned);
            return Err(e);
        }
        let orphaned = index.insert_reserved(&entry, blobs);
        self.delete_blobs(&orphaned);
        drop(index);

        debug!(
            %fingerprint,
            task = task_name,
            files = entry.outputs.len(),
            bytes = entry.size_bytes,
            "Stored local cache entry"
        );
        Ok(entry)
    }

    /// Copy an entry's files onto the `declared` outputs under
    /// `project_root`, verifying each blob.
    ///
    /// Declared outputs with no stored file of their own are directories
    /// and are recreated even when empty. Returns the number of files
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptEntry`] if a file lies outside the declared
    /// outputs or a blob is missing, fails its checksum or has the wrong
    /// size; an I/O error if a destination cannot be written.
    pub fn restore(&self, entry: &CacheEntry, project_root: &Path, declared: &[String]) -> Result<usize> {
        entry.verify(&entry.fingerprint)?;
        entry.verify_within(declared)?;
        let fingerprint = entry.fingerprint;

        // Load and check everything before touching the project.
        let mut verified = Vec::with_capacity(entry.outputs.len());
        for output in &entry.outputs {
            let data = self.cas.load(&output.sha256).map_err(|e| match e {
                Error::Io { .. } => {
                    Error::corrupt(fingerprint, format!("blob for '{}' is missing", output.rel_path))
                }
                other => Error::corrupt(fingerprint, other.to_string()),
            })?;
            if data.len() as u64 != output.size {
                return Err(Error::corrupt(
                    fingerprint,
                    format!(
                        "'{}' has {} bytes, expected {}",
                        output.rel_path,
                        data.len(),
                        output.size
                    ),
                ));
            }
            verified.push((project_root.join(safe_relative_path(&output.rel_path)?), data));
        }

        for (dest, data) in &verified {
            write_atomic(dest, data)?;
        }
        for output in declared {
            let rel = safe_relative_path(output)?;
            if entry.outputs.iter().any(|o| Path::new(&o.rel_path) == rel) {
                continue;
            }
            let dir = project_root.join(rel);
            fs::create_dir_all(&dir).map_err(|e| Error::io(e, &dir, "create output dir"))?;
        }
        debug!(%fingerprint, files = verified.len(), "Restored cache entry");
        Ok(verified.len())
    }

    /// Read the stored bytes of each output of an entry, verified.
    pub(crate) fn load_files(&self, entry: &CacheEntry) -> Result<Vec<(OutputFile, Vec<u8>)>> {
        entry
            .outputs
            .iter()
            .map(|output| {
                let data = self
                    .cas
                    .load(&output.sha256)
                    .map_err(|e| Error::corrupt(entry.fingerprint, e.to_string()))?;
                Ok((output.clone(), data))
            })
            .collect()
    }

    /// Remove an entry. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the entry directory cannot be removed.
    pub fn evict(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let _guard = self.shard(fingerprint).lock();
        self.evict_locked(fingerprint)
    }

    fn evict_locked(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let dir = self.entry_dir(fingerprint);
        let existed = dir.exists();
        if existed {
            fs::remove_dir_all(&dir).map_err(|e| Error::io(e, &dir, "remove_dir_all"))?;
        }

        let mut index = self.index.lock();
        let was_indexed = index.entries.contains_key(fingerprint);
        let orphaned = index.remove(fingerprint);
        // Deleting under the index lock keeps a concurrent put from
        // reserving a blob that is about to disappear.
        self.delete_blobs(&orphaned);
        drop(index);

        if existed || was_indexed {
            debug!(%fingerprint, "Evicted local cache entry");
        }
        Ok(existed || was_indexed)
    }

    fn delete_blobs(&self, blobs: &[BlobId]) {
        for blob in blobs {
            if let Err(e) = self.cas.delete(blob) {
                warn!(blob = %blob, error = %e, "Failed to delete unreferenced blob");
            }
        }
    }

    /// Evict least recently used entries until the size bound holds.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if an eviction fails.
    pub fn enforce_size_limit(&self, keep: Option<&Fingerprint>) -> Result<Vec<Fingerprint>> {
        let Some(max) = self.max_size_bytes else {
            return Ok(Vec::new());
        };
        self.evict_until(max, keep)
    }

    pub(crate) fn evict_until(&self, max_bytes: u64, keep: Option<&Fingerprint>) -> Result<Vec<Fingerprint>> {
        let mut evicted = Vec::new();
        loop {
            let victim = {
                let index = self.index.lock();
                if index.total_bytes <= max_bytes {
                    break;
                }
                index.oldest_except(keep)
            };
            let Some(victim) = victim else {
                break;
            };
            self.evict(&victim)?;
            evicted.push(victim);
        }
        Ok(evicted)
    }

    /// Snapshot of indexed entries as (fingerprint, last access, size).
    pub(crate) fn index_snapshot(&self) -> Vec<(Fingerprint, DateTime<Utc>, u64)> {
        let index = self.index.lock();
        let mut items: Vec<_> = index
            .entries
            .iter()
            .map(|(fp, e)| (*fp, e.last_accessed, e.size_bytes))
            .collect();
        items.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        items
    }

    /// Remove every entry and blob.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directories cannot be removed or recreated.
    pub fn clear(&self) -> Result<()> {
        let mut index = self.index.lock();
        let cas_root = self.cas.root().to_path_buf();
        for dir in [&self.entries_dir, &cas_root] {
            if dir.exists() {
                fs::remove_dir_all(dir).map_err(|e| Error::io(e, dir, "remove_dir_all"))?;
            }
            fs::create_dir_all(dir).map_err(|e| Error::io(e, dir, "create_dir_all"))?;
        }
        *index = LruIndex::default();
        debug!(root = %self.root.display(), "Cleared local cache");
        Ok(())
    }

    /// Remove an entry directory without consulting the index (for
    /// unreadable entries found by a scan).
    pub(crate) fn remove_entry_dir(&self, fingerprint: &Fingerprint) -> Result<()> {
        let _guard = self.shard(fingerprint).lock();
        self.evict_locked(fingerprint).map(|_| ())
    }
}
