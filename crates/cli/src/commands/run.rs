//! `taskmemo run`

use super::{CommandOutput, Project};
use crate::cli::{CliError, EXIT_OK, EXIT_TASK_FAILED, ErrorEnvelope, OkEnvelope};
use std::sync::Arc;
use taskmemo_core::RunContext;
use taskmemo_core::tasks::{Executor, RunSummary};
use tracing::{Instrument, info_span};

/// Flags of `taskmemo run`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Parallelism override
    pub jobs: Option<usize>,
    /// Keep going after failures
    pub continue_on_failure: bool,
    /// Consult the configured remote cache
    pub use_remote: bool,
    /// JSON output
    pub json: bool,
}

/// Run the selected tasks and render the summary.
///
/// # Errors
///
/// Returns configuration errors found before anything executes.
pub async fn execute_run(
    project: &Project,
    selected: &[String],
    options: &RunOptions,
) -> Result<CommandOutput, CliError> {
    let summary = run_tasks(project, selected, options).await?;
    let exit_code = if summary.success() {
        EXIT_OK
    } else {
        EXIT_TASK_FAILED
    };
    Ok(CommandOutput {
        stdout: render(&summary, options.json),
        exit_code,
    })
}

/// Run the selected tasks.
///
/// # Errors
///
/// Same as [`execute_run`].
pub async fn run_tasks(
    project: &Project,
    selected: &[String],
    options: &RunOptions,
) -> Result<RunSummary, CliError> {
    let mut config = project.config.executor.to_config();
    if let Some(jobs) = options.jobs {
        config.max_parallel = jobs.max(1);
    }
    if options.continue_on_failure {
        config.abort_on_failure = false;
    }

    let cache = project.open_cache(options.use_remote)?;
    let ctx = Arc::new(RunContext::new(&project.root, cache)?);
    let span = info_span!("command", command = "run", run_id = %ctx.run_id());
    let mut executor = Executor::new(ctx, config, project.config.tasks()?)?;
    let summary = executor.run(selected).instrument(span).await?;
    Ok(summary)
}

fn render(summary: &RunSummary, json: bool) -> String {
    if !json {
        return summary.render_text();
    }
    let value = summary.to_json();
    let rendered = if summary.success() {
        serde_json::to_string_pretty(&OkEnvelope::new(value))
    } else {
        serde_json::to_string_pretty(&ErrorEnvelope::new(serde_json::json!({
            "code": "task_failed",
            "message": "One or more tasks failed",
            "summary": value,
        })))
    };
    rendered.unwrap_or_else(|e| format!("{{\"status\":\"error\",\"error\":\"{e}\"}}"))
}
