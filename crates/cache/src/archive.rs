//! Entry archives: the transfer format between cache tiers.
//!
//! An archive is a zstd-compressed tar holding `metadata.json` followed by
//! one `files/<relative path>` member per output. Importing re-hashes every
//! member against the metadata before anything reaches the local store.

use crate::entry::{CacheEntry, safe_relative_path};
use crate::local::LocalStore;
use crate::{Error, Fingerprint, Result};
use std::collections::HashMap;
use std::io::Read;

const METADATA_MEMBER: &str = "metadata.json";
const FILES_PREFIX: &str = "files/";
const ZSTD_LEVEL: i32 = 3;

/// Largest decoded archive accepted from another tier.
pub const MAX_UNPACKED_BYTES: u64 = 4 << 30;

fn append(builder: &mut tar::Builder<Vec<u8>>, path: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    builder
        .append_data(&mut header, path, data)
        .map_err(|e| Error::serialization(format!("tar append of '{path}' failed: {e}")))
}

/// Pack an entry and its file contents.
///
/// # Errors
///
/// Returns a serialization error if the tar or zstd stream cannot be built.
pub fn pack(entry: &CacheEntry, files: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let metadata = serde_json::to_vec_pretty(entry)
        .map_err(|e| Error::serialization(format!("Failed to serialize entry metadata: {e}")))?;

    let mut builder = tar::Builder::new(Vec::new());
    append(&mut builder, METADATA_MEMBER, &metadata)?;
    for (rel, data) in files {
        append(&mut builder, &format!("{FILES_PREFIX}{rel}"), data)?;
    }
    let tar_bytes = builder
        .into_inner()
        .map_err(|e| Error::serialization(format!("tar finalize failed: {e}")))?;

    zstd::encode_all(tar_bytes.as_slice(), ZSTD_LEVEL)
        .map_err(|e| Error::serialization(format!("zstd encode failed: {e}")))
}

/// An archive decoded and checked against the fingerprint it was fetched for.
#[derive(Debug)]
pub struct UnpackedEntry {
    /// Entry metadata as written by the producer
    pub entry: CacheEntry,
    /// File contents in metadata order
    pub files: Vec<(String, Vec<u8>)>,
}

/// Decode an archive and verify it describes `expected`.
///
/// # Errors
///
/// Returns [`Error::CorruptEntry`] if the archive cannot be decoded, names
/// another fingerprint, decodes to more than [`MAX_UNPACKED_BYTES`], or any
/// file is missing or fails its checksum.
pub fn unpack(expected: &Fingerprint, bytes: &[u8]) -> Result<UnpackedEntry> {
    unpack_limited(expected, bytes, MAX_UNPACKED_BYTES)
}

fn unpack_limited(expected: &Fingerprint, bytes: &[u8], limit: u64) -> Result<UnpackedEntry> {
    let corrupt = |msg: String| Error::corrupt(expected, msg);

    let decoder = zstd::stream::read::Decoder::new(bytes)
        .map_err(|e| corrupt(format!("zstd decode failed: {e}")))?;
    let mut tar_bytes = Vec::new();
    decoder
        .take(limit.saturating_add(1))
        .read_to_end(&mut tar_bytes)
        .map_err(|e| corrupt(format!("zstd decode failed: {e}")))?;
    if tar_bytes.len() as u64 > limit {
        return Err(corrupt(format!("archive decodes to more than {limit} bytes")));
    }
    let mut archive = tar::Archive::new(tar_bytes.as_slice());

    let mut metadata: Option<CacheEntry> = None;
    let mut members: HashMap<String, Vec<u8>> = HashMap::new();
    let entries = archive
        .entries()
        .map_err(|e| corrupt(format!("tar read failed: {e}")))?;
    for member in entries {
        let mut member = member.map_err(|e| corrupt(format!("tar read failed: {e}")))?;
        let path = member
            .path()
            .map_err(|e| corrupt(format!("bad member path: {e}")))?
            .to_string_lossy()
            .replace('\\', "/");
        let mut data = Vec::new();
        member
            .read_to_end(&mut data)
            .map_err(|e| corrupt(format!("tar read of '{path}' failed: {e}")))?;

        if path == METADATA_MEMBER {
            metadata = Some(
                serde_json::from_slice(&data)
                    .map_err(|e| corrupt(format!("unreadable metadata: {e}")))?,
            );
        } else if let Some(rel) = path.strip_prefix(FILES_PREFIX) {
            members.insert(rel.to_string(), data);
        }
    }

    let entry = metadata.ok_or_else(|| corrupt("archive has no metadata.json".to_string()))?;
    entry.verify(expected)?;

    let mut files = Vec::with_capacity(entry.outputs.len());
    for output in &entry.outputs {
        safe_relative_path(&output.rel_path)?;
        let data = members
            .remove(&output.rel_path)
            .ok_or_else(|| corrupt(format!("archive is missing '{}'", output.rel_path)))?;
        let actual = crate::cas::BlobId::from_data(&data);
        if actual != output.sha256 || data.len() as u64 != output.size {
            return Err(corrupt(format!("'{}' fails its checksum", output.rel_path)));
        }
        files.push((output.rel_path.clone(), data));
    }

    Ok(UnpackedEntry { entry, files })
}

impl LocalStore {
    /// Pack a stored entry for transfer to another tier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptEntry`] if a blob fails verification.
    pub fn export_archive(&self, entry: &CacheEntry) -> Result<Vec<u8>> {
        let files: Vec<(String, Vec<u8>)> = self
            .load_files(entry)?
            .into_iter()
            .map(|(output, data)| (output.rel_path, data))
            .collect();
        pack(entry, &files)
    }

    /// Verify an archive fetched for `expected` and store it locally.
    ///
    /// The stored entry keeps the producer's task name and gets fresh
    /// timestamps.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptEntry`] for a damaged archive, I/O errors if
    /// the entry cannot be written.
    pub fn import_archive(&self, expected: &Fingerprint, bytes: &[u8]) -> Result<CacheEntry> {
        let unpacked = unpack(expected, bytes)?;
        self.put_staged(*expected, &unpacked.entry.task_name, unpacked.files)
    }
}
