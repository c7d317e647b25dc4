//! `taskmemo plan`

use super::{CommandOutput, Project};
use crate::cli::{CliError, OkEnvelope};
use std::fmt::Write as _;
use std::sync::Arc;
use taskmemo_core::RunContext;
use taskmemo_core::tasks::{Executor, ExecutorConfig};

/// Render the dependency levels of the selected tasks without running them.
///
/// Tasks on the same level may run in parallel.
///
/// # Errors
///
/// Returns configuration errors for unknown tasks, cycles and overlapping
/// outputs.
pub fn execute_plan(
    project: &Project,
    selected: &[String],
    json: bool,
) -> Result<CommandOutput, CliError> {
    let cache = project.open_cache(false)?;
    let ctx = Arc::new(RunContext::new(&project.root, cache)?);
    let mut executor = Executor::new(ctx, ExecutorConfig::default(), project.config.tasks()?)?;
    let levels = executor.plan_levels(selected)?;

    if json {
        let rendered = serde_json::to_string_pretty(&OkEnvelope::new(serde_json::json!({
            "levels": levels,
        })))
        .map_err(|e| CliError::run(format!("Failed to serialize plan: {e}")))?;
        return Ok(CommandOutput::ok(rendered));
    }
    Ok(CommandOutput::ok(render_levels(&levels)))
}

fn render_levels(levels: &[Vec<String>]) -> String {
    let mut out = String::new();
    for (level, names) in levels.iter().enumerate() {
        let _ = writeln!(out, "level {level}: {}", names.join(", "));
    }
    if levels.is_empty() {
        out.push_str("no tasks\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_levels() {
        let levels = vec![
            vec!["stub".to_string(), "docs".to_string()],
            vec!["process".to_string()],
        ];
        assert_eq!(render_levels(&levels), "level 0: stub, docs\nlevel 1: process\n");
        assert_eq!(render_levels(&[]), "no tasks\n");
    }
}
