//! Cache entry metadata as persisted in `entries/{fingerprint}/metadata.json`.

use crate::cas::BlobId;
use crate::{Error, Fingerprint, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Metadata format version written into every entry.
pub const ENTRY_FORMAT_VERSION: u32 = 1;

/// One stored output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    /// Project-relative path, `/`-separated
    pub rel_path: String,
    /// File size in bytes
    pub size: u64,
    /// SHA-256 of the content; also the CAS blob id
    pub sha256: BlobId,
}

/// A stored task result: the outputs one fingerprint produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Metadata format version
    pub format_version: u32,
    /// Key of the entry
    pub fingerprint: Fingerprint,
    /// Task that produced the entry (informational)
    pub task_name: String,
    /// When the entry was stored
    pub created_at: DateTime<Utc>,
    /// Last time the entry was read; drives LRU and TTL
    pub last_accessed: DateTime<Utc>,
    /// Sum of output file sizes
    pub size_bytes: u64,
    /// Output files, sorted by path
    pub outputs: Vec<OutputFile>,
}

impl CacheEntry {
    /// Build a new entry stamped with the current time.
    #[must_use]
    pub fn new(fingerprint: Fingerprint, task_name: impl Into<String>, mut outputs: Vec<OutputFile>) -> Self {
        outputs.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        let now = Utc::now();
        Self {
            format_version: ENTRY_FORMAT_VERSION,
            fingerprint,
            task_name: task_name.into(),
            created_at: now,
            last_accessed: now,
            size_bytes: outputs.iter().map(|o| o.size).sum(),
            outputs,
        }
    }

    /// Check the entry's internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptEntry`] if the key does not match, the size
    /// total is wrong, or an output path is not a safe relative path.
    pub fn verify(&self, expected: &Fingerprint) -> Result<()> {
        if self.fingerprint != *expected {
            return Err(Error::corrupt(
                expected,
                format!("metadata names fingerprint {}", self.fingerprint),
            ));
        }
        if self.format_version != ENTRY_FORMAT_VERSION {
            return Err(Error::corrupt(
                expected,
                format!("unsupported metadata format {}", self.format_version),
            ));
        }
        let total: u64 = self.outputs.iter().map(|o| o.size).sum();
        if total != self.size_bytes {
            return Err(Error::corrupt(
                expected,
                format!("size total {} does not match recorded {}", total, self.size_bytes),
            ));
        }
        for output in &self.outputs {
            safe_relative_path(&output.rel_path)
                .map_err(|e| Error::corrupt(expected, e.to_string()))?;
        }
        Ok(())
    }

    /// Check that every stored file lies at or below one of `declared`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptEntry`] naming the first file outside the
    /// declared outputs, or a validation error for an unsafe declared path.
    pub fn verify_within(&self, declared: &[String]) -> Result<()> {
        let roots = declared
            .iter()
            .map(|d| safe_relative_path(d))
            .collect::<Result<Vec<_>>>()?;
        for output in &self.outputs {
            let path = safe_relative_path(&output.rel_path)
                .map_err(|e| Error::corrupt(&self.fingerprint, e.to_string()))?;
            if !roots.iter().any(|root| path.starts_with(root)) {
                return Err(Error::corrupt(
                    &self.fingerprint,
                    format!("'{}' is not under a declared output", output.rel_path),
                ));
            }
        }
        Ok(())
    }
}

/// Convert a stored `/`-separated path into a relative [`PathBuf`],
/// rejecting absolute paths and `..` components.
///
/// # Errors
///
/// Returns a validation error for unsafe paths.
pub fn safe_relative_path(rel: &str) -> Result<PathBuf> {
    let path = Path::new(rel);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => {
                return Err(Error::validation(format!(
                    "'{rel}' is not a project-relative path"
                )));
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(Error::validation("empty output path"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FingerprintBuilder;

    fn output(path: &str, data: &[u8]) -> OutputFile {
        OutputFile {
            rel_path: path.into(),
            size: data.len() as u64,
            sha256: BlobId::from_data(data),
        }
    }

    #[test]
    fn test_new_sorts_and_sums() {
        let fp = FingerprintBuilder::new().finish();
        let entry = CacheEntry::new(fp, "gen", vec![output("b", b"22"), output("a", b"1")]);
        assert_eq!(entry.size_bytes, 3);
        assert_eq!(entry.outputs[0].rel_path, "a");
        assert!(entry.verify(&fp).is_ok());
    }

    #[test]
    fn test_verify_rejects_other_fingerprint() {
        let fp = FingerprintBuilder::new().finish();
        let mut other = FingerprintBuilder::new();
        other.text("x", "y");
        let entry = CacheEntry::new(fp, "gen", vec![]);
        assert!(entry.verify(&other.finish()).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_verify_rejects_escaping_path() {
        let fp = FingerprintBuilder::new().finish();
        let entry = CacheEntry::new(fp, "gen", vec![output("../etc/passwd", b"x")]);
        assert!(entry.verify(&fp).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_verify_within_declared_outputs() {
        let fp = FingerprintBuilder::new().finish();
        let entry = CacheEntry::new(fp, "gen", vec![output("gen/a/A.gen", b"a"), output("report.txt", b"r")]);
        let declared = |paths: &[&str]| paths.iter().map(ToString::to_string).collect::<Vec<_>>();

        assert!(entry.verify_within(&declared(&["gen", "report.txt"])).is_ok());
        assert!(entry.verify_within(&declared(&["./gen/a", "report.txt"])).is_ok());
        assert!(entry.verify_within(&declared(&["gen"])).unwrap_err().is_corrupt());
        // Component-wise: "generated" is not below "gen".
        let sibling = CacheEntry::new(fp, "gen", vec![output("generated/A.gen", b"a")]);
        assert!(sibling.verify_within(&declared(&["gen"])).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_safe_relative_path() {
        assert_eq!(
            safe_relative_path("./gen/a.txt").unwrap(),
            PathBuf::from("gen/a.txt")
        );
        assert!(safe_relative_path("/abs").is_err());
        assert!(safe_relative_path("a/../../b").is_err());
        assert!(safe_relative_path("").is_err());
    }
}
