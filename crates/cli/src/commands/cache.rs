//! `taskmemo cache stats|gc|clean`

use super::{CommandOutput, Project};
use crate::cli::{CliError, OkEnvelope};
use taskmemo_cache::{GcPolicy, RunHistory};

/// Show the location and size of the local cache.
///
/// # Errors
///
/// Returns a configuration error if the cache cannot be opened.
pub fn execute_stats(project: &Project, json: bool) -> Result<CommandOutput, CliError> {
    let store = project.open_cache(false)?;
    let local = store.local();

    if json {
        let rendered = serde_json::to_string_pretty(&OkEnvelope::new(serde_json::json!({
            "root": local.root(),
            "entries": local.len(),
            "total_bytes": local.total_bytes(),
            "max_size_bytes": local.max_size_bytes(),
            "remote": project.config.cache.remote.is_some(),
        })))
        .map_err(|e| CliError::run(format!("Failed to serialize cache stats: {e}")))?;
        return Ok(CommandOutput::ok(rendered));
    }

    let limit = local
        .max_size_bytes()
        .map_or_else(|| "none".to_string(), |max| format!("{max} bytes"));
    Ok(CommandOutput::ok(format!(
        "root: {}\nentries: {}\nsize: {} bytes\nlimit: {limit}\n",
        local.root().display(),
        local.len(),
        local.total_bytes(),
    )))
}

/// Garbage-collect the local cache.
///
/// Entries referenced by the run history of any project survive the age
/// limit.
///
/// # Errors
///
/// Returns an error if the cache cannot be opened or entries cannot be
/// removed.
pub fn execute_gc(
    project: &Project,
    max_age_days: u64,
    max_size_bytes: Option<u64>,
) -> Result<CommandOutput, CliError> {
    let store = project.open_cache(false)?;
    let protected = RunHistory::recorded_fingerprints(store.local().root())?;
    let policy = GcPolicy {
        max_age_days: Some(max_age_days),
        max_size_bytes,
    };
    let result = store.gc(&policy, &protected)?;
    Ok(CommandOutput::ok(format!(
        "removed {} entr{} and {} blob(s), freed {} bytes\n",
        result.entries_removed,
        if result.entries_removed == 1 { "y" } else { "ies" },
        result.blobs_removed,
        result.bytes_freed,
    )))
}

/// Remove every entry from the local cache.
///
/// # Errors
///
/// Returns an error if the cache directories cannot be removed.
pub fn execute_clean(project: &Project) -> Result<CommandOutput, CliError> {
    let store = project.open_cache(false)?;
    store.clean()?;
    Ok(CommandOutput::ok(format!(
        "cleaned {}\n",
        store.local().root().display()
    )))
}
