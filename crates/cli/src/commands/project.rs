//! Locating and loading a project.

use crate::cli::CliError;
use std::path::{Path, PathBuf};
use taskmemo_cache::CacheStore;
use taskmemo_core::config::{CONFIG_FILE_NAME, ProjectConfig};

/// A project root with its parsed configuration
#[derive(Debug)]
pub struct Project {
    /// Canonical project root
    pub root: PathBuf,
    /// Parsed `taskmemo.toml`
    pub config: ProjectConfig,
}

impl Project {
    /// Load the configuration of the project at `dir`.
    ///
    /// `config_path` defaults to `<dir>/taskmemo.toml`; a relative path is
    /// taken relative to the working directory.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the directory or configuration file
    /// does not exist or does not parse.
    pub fn load(dir: &Path, config_path: Option<&Path>) -> Result<Self, CliError> {
        let root = dir.canonicalize().map_err(|e| {
            CliError::config(format!("Project directory '{}': {e}", dir.display()))
        })?;
        let config_path = config_path.map_or_else(|| root.join(CONFIG_FILE_NAME), Path::to_path_buf);
        if !config_path.is_file() {
            return Err(CliError::config_with_help(
                format!("No configuration file at '{}'", config_path.display()),
                format!("Create {CONFIG_FILE_NAME} in the project root or pass --config"),
            ));
        }
        let config = ProjectConfig::load(&config_path)?;
        tracing::debug!(root = %root.display(), config = %config_path.display(), "Loaded project");
        Ok(Self { root, config })
    }

    /// Open the project's cache store.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid `[cache]` section.
    pub fn open_cache(&self, use_remote: bool) -> Result<CacheStore, CliError> {
        Ok(self.config.open_cache(&self.root, use_remote)?)
    }
}
