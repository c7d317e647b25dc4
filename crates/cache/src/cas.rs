//! Content-addressable storage (CAS) for output blobs
//!
//! Files are stored by their SHA-256 hash in a two-level directory structure:
//!
//! ```text
//! {cache_root}/cas/
//!   ab/
//!     cd/
//!       abcdef123456... (blob)
//! ```
//!
//! Identical outputs of different entries are stored once. Every read
//! re-hashes the blob, so a damaged file is reported rather than restored.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A blob identifier (SHA-256 hash as hex string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(String);

impl BlobId {
    /// Compute blob ID from data
    #[must_use]
    pub fn from_data(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// Create from hex string (validation)
    ///
    /// # Errors
    ///
    /// Returns error if the hex string is invalid or wrong length
    pub fn from_hex(hex: impl Into<String>) -> Result<Self> {
        let s = hex.into();
        if s.len() != 64 {
            return Err(Error::validation(format!(
                "BlobId must be 64 hex characters, got {}",
                s.len()
            )));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::validation("BlobId must contain only hex digits"));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Get the hex representation
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stream a file through SHA-256 in 64 KiB chunks.
///
/// Returns the hex digest and the number of bytes read.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read.
pub fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let mut file = fs::File::open(path).map_err(|e| Error::io(e, path, "open"))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; 64 * 1024];
    let mut total = 0_u64;
    loop {
        let n = file.read(&mut buf).map_err(|e| Error::io(e, path, "read"))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

/// Write `data` to `path` through a uniquely named temporary file and a rename.
///
/// # Errors
///
/// Returns an I/O error if any step fails; the temporary file is removed.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
    }
    let tmp_path = path.with_file_name(format!(
        ".{}.{}.tmp",
        path.file_name().map_or_else(String::new, |n| n.to_string_lossy().into_owned()),
        uuid::Uuid::new_v4().simple()
    ));

    let result = (|| {
        let mut file = fs::File::create(&tmp_path).map_err(|e| Error::io(e, &tmp_path, "create"))?;
        file.write_all(data)
            .map_err(|e| Error::io(e, &tmp_path, "write"))?;
        file.sync_all().map_err(|e| Error::io(e, &tmp_path, "sync"))?;
        drop(file);
        fs::rename(&tmp_path, path).map_err(|e| Error::io(e, path, "rename"))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// Content-addressable storage backend
#[derive(Debug, Clone)]
pub struct CasStore {
    root: PathBuf,
}

impl CasStore {
    /// Create a new CAS store at the given root directory
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the path for a blob based on its ID
    ///
    /// Uses a two-level directory structure: `{root}/{id[0:2]}/{id[2:4]}/{id}`
    fn blob_path(&self, id: &BlobId) -> PathBuf {
        let hex = id.as_hex();
        self.root.join(&hex[0..2]).join(&hex[2..4]).join(hex)
    }

    /// Store a blob and return its ID
    ///
    /// # Errors
    ///
    /// Returns error if IO operations fail
    pub fn store(&self, data: &[u8]) -> Result<BlobId> {
        let id = BlobId::from_data(data);
        let path = self.blob_path(&id);

        if path.exists() {
            return Ok(id);
        }
        write_atomic(&path, data)?;
        Ok(id)
    }

    /// Store the contents of a file and return its ID and size
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or the blob cannot be written
    pub fn store_file(&self, source: &Path) -> Result<(BlobId, u64)> {
        let data = fs::read(source).map_err(|e| Error::io(e, source, "read"))?;
        let id = self.store(&data)?;
        Ok((id, data.len() as u64))
    }

    /// Load a blob by its ID
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the blob is missing and a validation error if
    /// its content no longer matches its ID
    pub fn load(&self, id: &BlobId) -> Result<Vec<u8>> {
        let path = self.blob_path(id);
        let data = fs::read(&path).map_err(|e| Error::io(e, &path, "read"))?;

        let computed_id = BlobId::from_data(&data);
        if computed_id != *id {
            return Err(Error::validation(format!(
                "Blob integrity check failed: expected {id}, computed {computed_id}"
            )));
        }

        Ok(data)
    }

    /// Check if a blob exists
    #[must_use]
    pub fn exists(&self, id: &BlobId) -> bool {
        self.blob_path(id).exists()
    }

    /// Get the size of a blob without loading it
    ///
    /// # Errors
    ///
    /// Returns error if the blob doesn't exist or metadata cannot be read
    pub fn size(&self, id: &BlobId) -> Result<u64> {
        let path = self.blob_path(id);
        let metadata = fs::metadata(&path).map_err(|e| Error::io(e, &path, "metadata"))?;
        Ok(metadata.len())
    }

    /// Delete a blob. Missing blobs are not an error.
    ///
    /// # Errors
    ///
    /// Returns error if IO operations fail
    pub fn delete(&self, id: &BlobId) -> Result<()> {
        let path = self.blob_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(e, &path, "remove_file")),
        }
    }

    /// List all blob IDs in the store
    ///
    /// Leftover temporary files are skipped.
    ///
    /// # Errors
    ///
    /// Returns error if directory traversal fails
    pub fn list(&self) -> Result<Vec<BlobId>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut blobs = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(3).max_depth(3) {
            let entry = entry.map_err(|e| {
                Error::io(
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("walk failed")),
                    &self.root,
                    "walk",
                )
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && let Ok(id) = BlobId::from_hex(name)
            {
                blobs.push(id);
            }
        }
        blobs.sort();
        Ok(blobs)
    }

    /// Get total size of all blobs in the store
    ///
    /// # Errors
    ///
    /// Returns error if directory traversal or metadata reading fails
    pub fn total_size(&self) -> Result<u64> {
        let mut total = 0_u64;
        for blob in self.list()? {
            total += self.size(&blob)?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_blob_id_from_data() {
        let id = BlobId::from_data(b"hello world");
        assert_eq!(
            id.as_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_blob_id_validation() {
        assert!(
            BlobId::from_hex("0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef")
                .is_ok()
        );
        assert!(BlobId::from_hex("abc").is_err());
        assert!(
            BlobId::from_hex("xyz3456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef")
                .is_err()
        );
    }

    #[test]
    fn test_store_and_load() {
        let temp = TempDir::new().unwrap();
        let cas = CasStore::new(temp.path());

        let id = cas.store(b"payload").unwrap();
        assert!(cas.exists(&id));
        assert_eq!(cas.load(&id).unwrap(), b"payload");
        assert_eq!(cas.size(&id).unwrap(), 7);

        let hex = id.as_hex();
        assert!(temp.path().join(&hex[0..2]).join(&hex[2..4]).join(hex).is_file());
    }

    #[test]
    fn test_store_deduplicates() {
        let temp = TempDir::new().unwrap();
        let cas = CasStore::new(temp.path());

        let a = cas.store(b"same").unwrap();
        let b = cas.store(b"same").unwrap();
        assert_eq!(a, b);
        assert_eq!(cas.list().unwrap().len(), 1);
    }

    #[test]
    fn test_load_detects_tampering() {
        let temp = TempDir::new().unwrap();
        let cas = CasStore::new(temp.path());

        let id = cas.store(b"original").unwrap();
        fs::write(cas.blob_path(&id), b"tampered").unwrap();
        assert!(matches!(cas.load(&id), Err(Error::Validation { .. })));
    }

    #[test]
    fn test_delete_and_total_size() {
        let temp = TempDir::new().unwrap();
        let cas = CasStore::new(temp.path());

        let a = cas.store(b"aaaa").unwrap();
        cas.store(b"bb").unwrap();
        assert_eq!(cas.total_size().unwrap(), 6);

        cas.delete(&a).unwrap();
        cas.delete(&a).unwrap();
        assert!(!cas.exists(&a));
        assert_eq!(cas.total_size().unwrap(), 2);
    }

    #[test]
    fn test_list_ignores_temp_files() {
        let temp = TempDir::new().unwrap();
        let cas = CasStore::new(temp.path());
        let id = cas.store(b"x").unwrap();
        let hex = id.as_hex();
        fs::write(
            temp.path().join(&hex[0..2]).join(&hex[2..4]).join(".stray.tmp"),
            b"junk",
        )
        .unwrap();
        assert_eq!(cas.list().unwrap(), vec![id]);
    }

    #[test]
    fn test_sha256_file_streams() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("big.bin");
        let data = vec![7_u8; 200 * 1024];
        fs::write(&path, &data).unwrap();

        let (digest, size) = sha256_file(&path).unwrap();
        assert_eq!(size, data.len() as u64);
        assert_eq!(digest, BlobId::from_data(&data).as_hex());
    }

    #[test]
    fn test_write_atomic_replaces() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/file.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }
}
