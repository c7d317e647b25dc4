//! Declared output inspection: listing, snapshotting and clearing.

use crate::{Error, Result};
use std::collections::BTreeSet;
use std::path::Path;
use taskmemo_cache::{BlobId, OutputFile, sha256_file};
use walkdir::WalkDir;

/// Project-relative files under the declared `outputs` that exist below
/// `root`, sorted and deduplicated. Missing outputs are skipped.
///
/// # Errors
///
/// Returns an I/O error if an output directory cannot be walked.
pub fn list_output_files(root: &Path, outputs: &[String]) -> Result<Vec<String>> {
    let mut files = BTreeSet::new();
    for output in outputs {
        let path = root.join(output);
        if path.is_file() {
            files.insert(output.clone());
            continue;
        }
        if !path.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&path).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::io(std::io::Error::from(e), &path, "walk output"))?;
            if entry.file_type().is_dir() {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(root) {
                files.insert(to_slash(rel));
            }
        }
    }
    Ok(files.into_iter().collect())
}

/// Declared outputs that do not exist below `root`, in declaration order.
#[must_use]
pub fn missing_outputs<'a>(root: &Path, outputs: &'a [String]) -> Vec<&'a str> {
    outputs
        .iter()
        .filter(|output| !root.join(output).exists())
        .map(String::as_str)
        .collect()
}

/// Size and SHA-256 of every file under the declared outputs.
///
/// # Errors
///
/// Returns an I/O error if a file cannot be read.
pub fn snapshot_outputs(root: &Path, outputs: &[String]) -> Result<Vec<OutputFile>> {
    list_output_files(root, outputs)?
        .into_iter()
        .map(|rel_path| {
            let (sha, size) = sha256_file(&root.join(&rel_path))?;
            Ok(OutputFile {
                rel_path,
                size,
                sha256: BlobId::from_hex(sha)?,
            })
        })
        .collect()
}

/// Delete the declared outputs below `root`.
///
/// # Errors
///
/// Returns an I/O error if an existing output cannot be removed.
pub fn clear_outputs(root: &Path, outputs: &[String]) -> Result<()> {
    for output in outputs {
        let path = root.join(output);
        let Ok(metadata) = std::fs::symlink_metadata(&path) else {
            continue;
        };
        let removed = if metadata.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        removed.map_err(|e| Error::io(e, &path, "remove stale output"))?;
    }
    Ok(())
}

pub(crate) fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
