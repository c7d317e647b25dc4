//! Cache root resolution

use crate::{Error, Result};
use dirs::{cache_dir, home_dir};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable overriding the cache root.
pub const CACHE_DIR_ENV: &str = "TASKMEMO_CACHE_DIR";

/// Inputs for determining cache root directory
#[derive(Debug, Clone, Default)]
pub struct CacheRootInputs {
    /// Value from the configuration file
    pub configured: Option<PathBuf>,
    /// `TASKMEMO_CACHE_DIR`
    pub env_override: Option<PathBuf>,
    /// `XDG_CACHE_HOME`
    pub xdg_cache_home: Option<PathBuf>,
    /// Platform cache directory
    pub os_cache_dir: Option<PathBuf>,
    /// Home directory
    pub home_dir: Option<PathBuf>,
    /// Temporary directory
    pub temp_dir: PathBuf,
}

impl CacheRootInputs {
    /// Read the environment and platform directories.
    #[must_use]
    pub fn from_env(configured: Option<PathBuf>) -> Self {
        let non_empty = |key: &str| {
            std::env::var(key)
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
        };
        Self {
            configured,
            env_override: non_empty(CACHE_DIR_ENV),
            xdg_cache_home: non_empty("XDG_CACHE_HOME"),
            os_cache_dir: cache_dir(),
            home_dir: home_dir(),
            temp_dir: std::env::temp_dir(),
        }
    }

    fn candidates(self) -> Vec<PathBuf> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        candidates.extend(self.configured.filter(|p| !p.as_os_str().is_empty()));
        candidates.extend(self.env_override.filter(|p| !p.as_os_str().is_empty()));
        candidates.extend(self.xdg_cache_home.map(|xdg| xdg.join("taskmemo")));
        candidates.extend(self.os_cache_dir.map(|os| os.join("taskmemo")));
        candidates.extend(self.home_dir.map(|home| home.join(".taskmemo/cache")));
        candidates.push(self.temp_dir.join("taskmemo/cache"));
        candidates
    }
}

/// Pick the first writable cache root.
///
/// # Errors
///
/// Returns a configuration error if no candidate is writable.
pub fn resolve_cache_root(inputs: CacheRootInputs) -> Result<PathBuf> {
    for path in inputs.candidates() {
        // Nix build sandboxes point HOME here; it is never writable.
        if path.starts_with("/homeless-shelter") {
            continue;
        }
        if is_writable(&path) {
            debug!(root = %path.display(), "Resolved cache root");
            return Ok(path);
        }
    }
    Err(Error::configuration(
        "Failed to determine a writable cache directory",
    ))
}

fn is_writable(path: &Path) -> bool {
    // Existing directories may be read-only (some CI images mount $HOME so).
    if path.exists() {
        let marker = path.join(".write_check");
        return match std::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&marker)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&marker);
                true
            }
            Err(_) => false,
        };
    }
    std::fs::create_dir_all(path).is_ok()
}
