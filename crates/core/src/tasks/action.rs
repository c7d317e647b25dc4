//! Task actions: the opaque work a task performs.
//!
//! Every action kind implements [`Action`]. Its identity is hashed into the
//! task fingerprint, so changing the program, its arguments or a version
//! token invalidates previous results.

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use walkdir::WalkDir;

/// Number of lines from stdout/stderr to include when summarizing failures
pub const TASK_FAILURE_SNIPPET_LINES: usize = 20;

/// What an action sees while it runs
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    /// Task being executed
    pub task_name: &'a str,
    /// Sandbox directory holding the task's declared inputs
    pub work_dir: &'a Path,
}

/// Capability shared by all action kinds
#[async_trait]
pub trait Action: Send + Sync {
    /// Stable description of the action, folded into the fingerprint
    fn identity(&self) -> Value;

    /// Run the action inside `ctx.work_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExecutionFailure`] when the work fails.
    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<()>;
}

/// The closed set of action kinds
#[derive(Debug, Clone)]
pub enum TaskAction {
    /// An external program
    Command(CommandAction),
    /// File staging inside the sandbox
    Copy(CopyAction),
    /// An in-process closure
    Function(FunctionAction),
}

#[async_trait]
impl Action for TaskAction {
    fn identity(&self) -> Value {
        match self {
            Self::Command(action) => action.identity(),
            Self::Copy(action) => action.identity(),
            Self::Function(action) => action.identity(),
        }
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<()> {
        match self {
            Self::Command(action) => action.execute(ctx).await,
            Self::Copy(action) => action.execute(ctx).await,
            Self::Function(action) => action.execute(ctx).await,
        }
    }
}

impl From<CommandAction> for TaskAction {
    fn from(action: CommandAction) -> Self {
        Self::Command(action)
    }
}

impl From<CopyAction> for TaskAction {
    fn from(action: CopyAction) -> Self {
        Self::Copy(action)
    }
}

impl From<FunctionAction> for TaskAction {
    fn from(action: FunctionAction) -> Self {
        Self::Function(action)
    }
}

/// Run a program with arguments in the sandbox
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandAction {
    /// Program to execute
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
    /// Optional version token of the tool
    pub version: Option<String>,
}

impl CommandAction {
    /// A command without arguments
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Append arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the version token
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

#[async_trait]
impl Action for CommandAction {
    fn identity(&self) -> Value {
        json!({
            "kind": "command",
            "program": self.program,
            "args": self.args,
            "env": self.env,
            "version": self.version,
        })
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<()> {
        tracing::debug!(
            task = ctx.task_name,
            program = %self.program,
            args = ?self.args,
            work_dir = %ctx.work_dir.display(),
            "Spawning task command"
        );

        // Dropping the future (timeout) kills the child.
        let output = Command::new(&self.program)
            .args(&self.args)
            .envs(&self.env)
            .current_dir(ctx.work_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                Error::execution(
                    ctx.task_name,
                    format!("failed to spawn '{}': {e}", self.program),
                )
            })?;

        if output.status.success() {
            return Ok(());
        }
        Err(Error::execution(
            ctx.task_name,
            summarize_failure(
                output.status.code(),
                &String::from_utf8_lossy(&output.stdout),
                &String::from_utf8_lossy(&output.stderr),
                TASK_FAILURE_SNIPPET_LINES,
            ),
        ))
    }
}

/// Build a compact failure summary: the exit code and the tail of
/// stdout/stderr.
#[must_use]
pub fn summarize_failure(
    exit_code: Option<i32>,
    stdout: &str,
    stderr: &str,
    max_output_lines: usize,
) -> String {
    let exit_code = exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string());
    let mut sections = vec![format!("exited with code {exit_code}")];

    let streams: Vec<String> = [("stdout", stdout), ("stderr", stderr)]
        .into_iter()
        .filter_map(|(label, content)| summarize_stream(label, content, max_output_lines))
        .collect();
    if !streams.is_empty() {
        sections.push(streams.join("\n\n"));
    }

    sections.join("\n\n")
}

fn summarize_stream(label: &str, content: &str, max_output_lines: usize) -> Option<String> {
    let normalized = content.trim_end();
    if normalized.is_empty() {
        return None;
    }

    let lines: Vec<&str> = normalized.lines().collect();
    let total = lines.len();
    let start = total.saturating_sub(max_output_lines);
    let snippet = lines[start..].join("\n");

    let header = if total > max_output_lines {
        format!("{label} (last {max_output_lines} of {total} lines):")
    } else {
        format!("{label}:")
    };

    Some(format!("{header}\n{snippet}"))
}

/// One staged copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopySpec {
    /// Source, relative to the sandbox
    pub from: String,
    /// Destination, relative to the sandbox
    pub to: String,
}

/// Copy files or directories inside the sandbox
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyAction {
    /// Copies in order
    pub copies: Vec<CopySpec>,
}

impl CopyAction {
    /// An action with a single copy
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            copies: vec![CopySpec {
                from: from.into(),
                to: to.into(),
            }],
        }
    }
}

#[async_trait]
impl Action for CopyAction {
    fn identity(&self) -> Value {
        json!({ "kind": "copy", "copies": self.copies })
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<()> {
        let copies = self.copies.clone();
        let work_dir = ctx.work_dir.to_path_buf();
        let task = ctx.task_name.to_string();
        tokio::task::spawn_blocking(move || {
            for entry in &copies {
                copy_tree(&work_dir.join(&entry.from), &work_dir.join(&entry.to))
                    .map_err(|e| Error::execution(&task, format!("copy '{}' -> '{}': {e}", entry.from, entry.to)))?;
            }
            Ok(())
        })
        .await
        .map_err(|e| Error::execution(ctx.task_name, format!("copy task panicked: {e}")))?
    }
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    if from.is_file() {
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(from, to)?;
        return Ok(());
    }
    if !from.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "source does not exist",
        ));
    }
    for entry in WalkDir::new(from).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(std::io::Error::other)?;
        let dest: PathBuf = to.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// Signature of an in-process action body
pub type ActionFn = dyn Fn(&Path) -> std::result::Result<(), String> + Send + Sync;

/// Run a closure on the blocking pool with the sandbox as argument
#[derive(Clone)]
pub struct FunctionAction {
    /// Version token; bump it when the closure's behaviour changes
    pub version: String,
    func: Arc<ActionFn>,
}

impl FunctionAction {
    /// Wrap a closure
    pub fn new<F>(version: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Path) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        Self {
            version: version.into(),
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for FunctionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionAction")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Action for FunctionAction {
    fn identity(&self) -> Value {
        json!({ "kind": "function", "version": self.version })
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<()> {
        let func = Arc::clone(&self.func);
        let work_dir = ctx.work_dir.to_path_buf();
        tokio::task::spawn_blocking(move || func(work_dir.as_path()))
            .await
            .map_err(|e| Error::execution(ctx.task_name, format!("action panicked: {e}")))?
            .map_err(|message| Error::execution(ctx.task_name, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx(dir: &Path) -> ActionContext<'_> {
        ActionContext {
            task_name: "t",
            work_dir: dir,
        }
    }

    #[test]
    fn test_identity_tracks_version_and_args() {
        let base = CommandAction::new("kapt").args(["src", "stubs"]);
        assert_eq!(base.identity(), base.clone().identity());
        assert_ne!(base.identity(), base.clone().version("2").identity());
        assert_ne!(base.identity(), base.clone().args(["-v"]).identity());
        assert_ne!(base.identity(), base.clone().env("K", "V").identity());

        let f1 = FunctionAction::new("1", |_| Ok(()));
        let f2 = FunctionAction::new("2", |_| Ok(()));
        assert_ne!(f1.identity(), f2.identity());
    }

    #[test]
    fn test_summarize_failure_includes_tail() {
        let stdout = (1..=30).map(|n| format!("line {n}")).collect::<Vec<_>>().join("\n");
        let summary = summarize_failure(Some(2), &stdout, "boom\n", 5);
        assert!(summary.starts_with("exited with code 2"));
        assert!(summary.contains("stdout (last 5 of 30 lines):"));
        assert!(summary.contains("line 30"));
        assert!(!summary.contains("line 25\n"));
        assert!(summary.contains("stderr:\nboom"));
    }

    #[test]
    fn test_summarize_failure_without_output() {
        assert_eq!(summarize_failure(None, "", "  \n", 5), "exited with code unknown");
    }

    #[tokio::test]
    async fn test_function_action_runs_in_work_dir() {
        let dir = TempDir::new().unwrap();
        let action = FunctionAction::new("1", |dir| {
            std::fs::write(dir.join("out.txt"), "hi").map_err(|e| e.to_string())
        });
        action.execute(&ctx(dir.path())).await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("out.txt")).unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_function_action_error_is_execution_failure() {
        let dir = TempDir::new().unwrap();
        let action = FunctionAction::new("1", |_| Err("compilation failed".to_string()));
        let err = action.execute(&ctx(dir.path())).await.unwrap_err();
        assert!(matches!(err, Error::ExecutionFailure { ref message, .. } if message == "compilation failed"));
    }

    #[tokio::test]
    async fn test_copy_action_copies_trees_and_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::write(dir.path().join("src/a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("src/nested/b.txt"), "b").unwrap();

        let action = CopyAction {
            copies: vec![
                CopySpec { from: "src".into(), to: "staged".into() },
                CopySpec { from: "src/a.txt".into(), to: "single/a.txt".into() },
            ],
        };
        action.execute(&ctx(dir.path())).await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("staged/nested/b.txt")).unwrap(), "b");
        assert_eq!(std::fs::read_to_string(dir.path().join("single/a.txt")).unwrap(), "a");
    }

    #[tokio::test]
    async fn test_copy_action_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let err = CopyAction::new("nope", "x").execute(&ctx(dir.path())).await.unwrap_err();
        assert!(err.to_string().contains("copy 'nope' -> 'x'"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_action_success_and_failure() {
        let dir = TempDir::new().unwrap();
        CommandAction::new("sh")
            .args(["-c", "echo \"$GREETING\" > out.txt"])
            .env("GREETING", "hello")
            .execute(&ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("out.txt")).unwrap(), "hello\n");

        let err = CommandAction::new("sh")
            .args(["-c", "echo oops >&2; exit 3"])
            .execute(&ctx(dir.path()))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("exited with code 3"), "{message}");
        assert!(message.contains("oops"), "{message}");
    }

    #[tokio::test]
    async fn test_command_action_missing_program() {
        let dir = TempDir::new().unwrap();
        let err = CommandAction::new("taskmemo-definitely-not-a-program")
            .execute(&ctx(dir.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
