//! Task executor.
//!
//! - Dependency-ordered scheduling with bounded parallelism
//! - Per-task skip / restore / execute dispatch through the invalidation engine
//! - Failure cascade to dependents, abort-on-failure and timeouts

use super::action::{Action, ActionContext};
use super::hasher::{ContentHasher, TaskFingerprint};
use super::invalidation::{
    CORRUPT_ENTRY_EVICTED, Decision, InvalidationEngine, LOADED_FROM_CACHE, UP_TO_DATE,
};
use super::outputs::{clear_outputs, snapshot_outputs};
use super::report::{RunSummary, TaskOutcome, TaskReport};
use super::sandbox::Sandbox;
use super::Task;
use crate::context::RunContext;
use crate::{Error, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskmemo_cache::{CacheEntry, OutputFile, TaskRecord};
use taskmemo_events::{
    emit_task_cache_hit, emit_task_cache_miss, emit_task_cache_stored, emit_task_completed,
    emit_task_skipped, emit_task_started, emit_task_up_to_date,
};
use taskmemo_task_graph::{TaskGraph, paths_overlap};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};

/// Cause recorded for tasks that never started because the run aborted
pub const CANCELLED_CAUSE: &str = "Run aborted before the task started";

/// Task executor configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum tasks running at once (values below 1 mean 1)
    pub max_parallel: usize,
    /// Stop launching tasks after the first failure
    pub abort_on_failure: bool,
    /// Timeout for tasks that do not set their own
    pub default_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel: std::thread::available_parallelism().map_or(4, std::num::NonZero::get),
            abort_on_failure: true,
            default_timeout: None,
        }
    }
}

/// Runs tasks of one project
pub struct Executor {
    ctx: Arc<RunContext>,
    config: ExecutorConfig,
    graph: TaskGraph<Task>,
}

impl Executor {
    /// Validate `tasks` and build their dependency graph.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid task paths and a graph
    /// error for duplicate names or missing dependencies.
    pub fn new(ctx: Arc<RunContext>, config: ExecutorConfig, tasks: Vec<Task>) -> Result<Self> {
        let mut graph = TaskGraph::new();
        for task in tasks {
            let task = task.validate()?;
            let name = task.name.clone();
            graph.add_task(&name, task)?;
        }
        graph.add_dependency_edges()?;
        Ok(Self { ctx, config, graph })
    }

    /// The run context
    #[must_use]
    pub fn context(&self) -> &Arc<RunContext> {
        &self.ctx
    }

    /// Tasks `run(selected)` would process, in execution order.
    ///
    /// # Errors
    ///
    /// Returns a graph error for unknown selections, cycles or overlapping
    /// outputs.
    pub fn plan(&mut self, selected: &[impl AsRef<str>]) -> Result<Vec<Task>> {
        Ok(self
            .graph
            .order_for(selected)?
            .into_iter()
            .map(|node| node.task)
            .collect())
    }

    /// Names of the selected tasks grouped by dependency level.
    ///
    /// # Errors
    ///
    /// Same as [`Executor::plan`].
    pub fn plan_levels(&mut self, selected: &[impl AsRef<str>]) -> Result<Vec<Vec<String>>> {
        let wanted = if selected.is_empty() {
            None
        } else {
            Some(self.graph.closure(selected)?)
        };
        Ok(self
            .graph
            .parallel_groups()?
            .into_iter()
            .map(|group| {
                group
                    .into_iter()
                    .filter(|node| wanted.as_ref().is_none_or(|w| w.contains(&node.name)))
                    .map(|node| node.name)
                    .collect::<Vec<_>>()
            })
            .filter(|group| !group.is_empty())
            .collect())
    }

    /// Run the selected tasks and their dependencies (all tasks when the
    /// selection is empty).
    ///
    /// Task failures are reported in the summary, not returned.
    ///
    /// # Errors
    ///
    /// Returns configuration errors found before anything executes: unknown
    /// tasks, cycles, overlapping outputs and unavailable inputs.
    pub async fn run(&mut self, selected: &[impl AsRef<str>]) -> Result<RunSummary> {
        let started = Instant::now();
        let tasks = self.plan(selected)?;
        self.preflight(&tasks)?;

        let span = info_span!("executor.run", run_id = %self.ctx.run_id(), tasks = tasks.len());
        let (reports, aborted) = self.schedule(tasks).instrument(span).await?;

        Ok(RunSummary {
            run_id: self.ctx.run_id(),
            tasks: reports,
            aborted,
            cache: self.ctx.cache().stats(),
            duration_ms: elapsed_ms(started),
        })
    }

    /// Every declared input must exist or be produced upstream.
    fn preflight(&self, tasks: &[Task]) -> Result<()> {
        let root = self.ctx.project_root();
        for task in tasks {
            let upstream = self.graph.closure(&[task.name.as_str()])?;
            for path in task.inputs.iter().filter_map(|input| input.declared_path()) {
                if root.join(path).exists() {
                    continue;
                }
                let covered = upstream
                    .iter()
                    .filter(|name| **name != task.name)
                    .filter_map(|name| self.graph.get_node_by_name(name))
                    .any(|node| node.task.outputs.iter().any(|out| paths_overlap(out, path)));
                if !covered {
                    return Err(Error::input_unavailable(&task.name, path));
                }
            }
        }
        Ok(())
    }

    async fn schedule(&self, tasks: Vec<Task>) -> Result<(Vec<TaskReport>, bool)> {
        let order: Vec<String> = tasks.iter().map(|t| t.name.clone()).collect();
        let max_parallel = self.config.max_parallel.max(1);
        let mut pending = tasks;
        let mut reports: HashMap<String, TaskReport> = HashMap::new();
        let mut running: HashMap<tokio::task::Id, String> = HashMap::new();
        let mut join_set: JoinSet<TaskReport> = JoinSet::new();
        let mut aborted = false;

        loop {
            if !aborted {
                let mut i = 0;
                while i < pending.len() && join_set.len() < max_parallel {
                    let ready = pending[i].depends_on.iter().all(|dep| {
                        reports.get(dep).is_some_and(|r| r.outcome.is_success())
                    });
                    if !ready {
                        i += 1;
                        continue;
                    }
                    let task = pending.remove(i);
                    let timeout = task.timeout.or(self.config.default_timeout);
                    let name = task.name.clone();
                    let span = info_span!("task", name = %name);
                    let handle = join_set.spawn(
                        run_task(Arc::clone(&self.ctx), task, timeout).instrument(span),
                    );
                    running.insert(handle.id(), name);
                }
            }

            let Some(joined) = join_set.join_next_with_id().await else {
                break;
            };
            let mut report = match joined {
                Ok((id, report)) => {
                    running.remove(&id);
                    report
                }
                Err(e) => {
                    let name = running.remove(&e.id()).unwrap_or_default();
                    panicked(&self.ctx, name, &e)
                }
            };
            report.completed_after_abort = aborted;
            let name = report.name.clone();
            let failed = !report.outcome.is_success();
            reports.insert(name.clone(), report);

            if failed {
                for dependent in self.graph.dependents_of(&name)? {
                    let Some(pos) = pending.iter().position(|t| t.name == dependent) else {
                        continue;
                    };
                    pending.remove(pos);
                    let reason = format!("Dependency '{name}' failed");
                    emit_task_skipped!(dependent, reason);
                    reports.insert(
                        dependent.clone(),
                        TaskReport::new(dependent, TaskOutcome::SkippedDependencyFailed, reason),
                    );
                }
                if self.config.abort_on_failure && !aborted {
                    warn!(task = %name, "Task failed; not starting further tasks");
                    aborted = true;
                }
            }
        }

        for task in pending {
            emit_task_skipped!(task.name, CANCELLED_CAUSE);
            reports.insert(
                task.name.clone(),
                TaskReport::new(task.name, TaskOutcome::Cancelled, CANCELLED_CAUSE),
            );
        }

        let ordered = order
            .into_iter()
            .filter_map(|name| reports.remove(&name))
            .collect();
        Ok((ordered, aborted))
    }
}

async fn run_task(ctx: Arc<RunContext>, task: Task, timeout: Option<Duration>) -> TaskReport {
    let started = Instant::now();
    emit_task_started!(task.name);

    let mut report = TaskReport::new(&task.name, TaskOutcome::Failed, "");
    if let Err(e) = process_task(&ctx, &task, timeout, &mut report).await {
        warn!(task = %task.name, error = %e, "Task failed");
        report.outcome = TaskOutcome::Failed;
        report.cause = e.to_string();
        // Outputs may be half-written; never treat them as up to date.
        forget(&ctx, &task.name);
    }

    report.duration_ms = elapsed_ms(started);
    emit_task_completed!(task.name, report.outcome.is_success(), report.duration_ms);
    report
}

/// Report for a task whose job panicked. Its outputs may be half-written,
/// so the run history forgets it as it does for failures.
fn panicked(ctx: &RunContext, name: String, error: &tokio::task::JoinError) -> TaskReport {
    forget(ctx, &name);
    TaskReport::new(name, TaskOutcome::Failed, format!("Task panicked: {error}"))
}

fn forget(ctx: &RunContext, name: &str) {
    if let Err(e) = ctx.history().forget(name) {
        warn!(task = %name, error = %e, "Failed to update run history");
    }
}

async fn process_task(
    ctx: &RunContext,
    task: &Task,
    timeout: Option<Duration>,
    report: &mut TaskReport,
) -> Result<()> {
    let hasher = ContentHasher::new(ctx.project_root());
    let owned = task.clone();
    let current = blocking(&task.name, move || hasher.fingerprint(&owned)).await?;
    report.fingerprint = Some(current.fingerprint);

    let stale_cause = match InvalidationEngine::new(ctx).evaluate(task, &current).await? {
        Decision::UpToDate => {
            emit_task_up_to_date!(task.name, current.fingerprint);
            report.outcome = TaskOutcome::UpToDate;
            report.cause = UP_TO_DATE.to_string();
            return Ok(());
        }
        Decision::CacheHit { entry, cause } => match restore(ctx, task, &entry).await {
            Ok(()) => {
                emit_task_cache_hit!(task.name, current.fingerprint);
                record_history(ctx, task, &current, entry.outputs);
                report.outcome = TaskOutcome::LoadedFromCache;
                report.cause = LOADED_FROM_CACHE.to_string();
                return Ok(());
            }
            Err(Error::Cache(e)) if e.is_corrupt() => CORRUPT_ENTRY_EVICTED.to_string(),
            Err(e) => {
                warn!(task = %task.name, error = %e, "Failed to restore cache entry; executing");
                cause
            }
        },
        Decision::Stale { cause } => cause,
    };
    emit_task_cache_miss!(task.name, stale_cause);

    let files = execute_in_sandbox(ctx, task, timeout).await?;
    let mut cause = format!("Not up-to-date: {stale_cause}");

    let stored = if task.cacheable {
        match ctx
            .cache()
            .put(&current.fingerprint, &task.name, ctx.project_root(), &files)
            .await
        {
            Ok(entry) => {
                emit_task_cache_stored!(task.name, current.fingerprint);
                cause.push_str(&format!(". Stored cache entry for task {}", task.name));
                Some(entry.outputs)
            }
            Err(e) => {
                warn!(task = %task.name, error = %e, "Failed to store cache entry");
                None
            }
        }
    } else {
        None
    };

    let outputs = match stored {
        Some(outputs) => outputs,
        None => {
            let (root, declared) = (ctx.project_root().to_path_buf(), task.outputs.clone());
            blocking(&task.name, move || snapshot_outputs(&root, &declared)).await?
        }
    };
    record_history(ctx, task, &current, outputs);

    report.outcome = TaskOutcome::Executed;
    report.cause = cause;
    Ok(())
}

/// Replace the declared outputs with the entry's files.
async fn restore(ctx: &RunContext, task: &Task, entry: &CacheEntry) -> Result<()> {
    let (root, declared) = (ctx.project_root().to_path_buf(), task.outputs.clone());
    blocking(&task.name, move || clear_outputs(&root, &declared)).await?;
    let files = ctx
        .cache()
        .restore(entry, ctx.project_root(), &task.outputs)
        .await?;
    debug!(task = %task.name, files, "Restored outputs from cache");
    Ok(())
}

async fn execute_in_sandbox(
    ctx: &RunContext,
    task: &Task,
    timeout: Option<Duration>,
) -> Result<Vec<String>> {
    let (scratch, root, owned) = (
        ctx.scratch_dir().to_path_buf(),
        ctx.project_root().to_path_buf(),
        task.clone(),
    );
    let sandbox = blocking(&task.name, move || Sandbox::create(&scratch, &root, &owned)).await?;

    let action_ctx = ActionContext {
        task_name: &task.name,
        work_dir: sandbox.root(),
    };
    info!(task = %task.name, "Executing task");
    match timeout {
        Some(limit) => tokio::time::timeout(limit, task.action.execute(&action_ctx))
            .await
            .map_err(|_| Error::timeout(&task.name, limit))??,
        None => task.action.execute(&action_ctx).await?,
    }

    let (root, owned) = (ctx.project_root().to_path_buf(), task.clone());
    blocking(&task.name, move || sandbox.publish_outputs(&owned, &root)).await
}

fn record_history(
    ctx: &RunContext,
    task: &Task,
    current: &TaskFingerprint,
    outputs: Vec<OutputFile>,
) {
    let record = TaskRecord {
        fingerprint: current.fingerprint,
        input_digests: current.input_digests.clone(),
        outputs,
        recorded_at: Utc::now(),
    };
    if let Err(e) = ctx.history().record(&task.name, record) {
        warn!(task = %task.name, error = %e, "Failed to update run history");
    }
}

async fn blocking<T, F>(task: &str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::execution(task, format!("blocking task panicked: {e}")))?
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
