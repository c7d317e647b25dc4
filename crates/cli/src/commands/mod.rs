//! Command implementations.
//!
//! Each command returns its rendered output and exit code instead of
//! printing, so `main` owns stdout.

pub mod cache;
pub mod plan;
pub mod project;
pub mod run;

use crate::cli::CliError;
pub use project::Project;
use std::path::Path;

/// An executable CLI command
#[derive(Debug, Clone)]
pub enum Command {
    /// Run tasks
    Run {
        /// Selected task names (empty means all)
        tasks: Vec<String>,
        /// Parallelism override
        jobs: Option<usize>,
        /// Keep going after failures
        continue_on_failure: bool,
        /// Consult the configured remote cache
        use_remote: bool,
        /// JSON output
        json: bool,
    },
    /// Show the execution plan
    Plan {
        /// Selected task names (empty means all)
        tasks: Vec<String>,
        /// JSON output
        json: bool,
    },
    /// Show cache statistics
    CacheStats {
        /// JSON output
        json: bool,
    },
    /// Garbage-collect the local cache
    CacheGc {
        /// Age limit in days
        max_age_days: u64,
        /// Size limit in bytes
        max_size_bytes: Option<u64>,
    },
    /// Empty the local cache
    CacheClean,
}

/// Rendered result of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Text for stdout
    pub stdout: String,
    /// Process exit code
    pub exit_code: i32,
}

impl CommandOutput {
    /// Successful output
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            exit_code: crate::cli::EXIT_OK,
        }
    }
}

/// Execute `command` for the project at `project_dir`.
///
/// # Errors
///
/// Returns configuration errors (bad config, unknown tasks, cycles,
/// unavailable inputs) and cache failures. Task failures are reported in
/// the output with a non-zero exit code instead.
pub async fn execute(
    command: Command,
    project_dir: &Path,
    config_path: Option<&Path>,
) -> Result<CommandOutput, CliError> {
    let project = Project::load(project_dir, config_path)?;
    match command {
        Command::Run {
            tasks,
            jobs,
            continue_on_failure,
            use_remote,
            json,
        } => {
            let options = run::RunOptions {
                jobs,
                continue_on_failure,
                use_remote,
                json,
            };
            run::execute_run(&project, &tasks, &options).await
        }
        Command::Plan { tasks, json } => plan::execute_plan(&project, &tasks, json),
        Command::CacheStats { json } => cache::execute_stats(&project, json),
        Command::CacheGc {
            max_age_days,
            max_size_bytes,
        } => cache::execute_gc(&project, max_age_days, max_size_bytes),
        Command::CacheClean => cache::execute_clean(&project),
    }
}
