//! Per-task outcomes and the run summary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use taskmemo_cache::{CacheStats, Fingerprint};
use uuid::Uuid;

/// How a task ended in one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskOutcome {
    /// The action ran and succeeded
    Executed,
    /// Outputs were restored from the cache
    LoadedFromCache,
    /// Nothing changed since the last run
    UpToDate,
    /// The action failed or timed out
    Failed,
    /// A dependency did not succeed
    SkippedDependencyFailed,
    /// Never started because the run aborted
    Cancelled,
}

impl TaskOutcome {
    /// Whether dependents may run after this outcome
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Executed | Self::LoadedFromCache | Self::UpToDate)
    }

    /// Kebab-case name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Executed => "executed",
            Self::LoadedFromCache => "loaded-from-cache",
            Self::UpToDate => "up-to-date",
            Self::Failed => "failed",
            Self::SkippedDependencyFailed => "skipped-dependency-failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one task in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    /// Task name
    pub name: String,
    /// Outcome
    pub outcome: TaskOutcome,
    /// Human-readable reason for the outcome
    pub cause: String,
    /// Fingerprint, when it was computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    /// Wall-clock time spent on the task
    pub duration_ms: u64,
    /// The task was in flight when the run aborted
    #[serde(default)]
    pub completed_after_abort: bool,
}

impl TaskReport {
    /// A report without fingerprint or timing
    #[must_use]
    pub fn new(name: impl Into<String>, outcome: TaskOutcome, cause: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome,
            cause: cause.into(),
            fingerprint: None,
            duration_ms: 0,
            completed_after_abort: false,
        }
    }
}

/// Everything a run produced, tasks in execution order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run id
    pub run_id: Uuid,
    /// Per-task reports in topological order
    pub tasks: Vec<TaskReport>,
    /// Whether scheduling stopped early after a failure
    pub aborted: bool,
    /// Cache counters for the run
    pub cache: CacheStats,
    /// Total wall-clock time
    pub duration_ms: u64,
}

impl RunSummary {
    /// True when every task succeeded
    #[must_use]
    pub fn success(&self) -> bool {
        self.tasks.iter().all(|t| t.outcome.is_success())
    }

    /// Report of one task
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Outcome of one task
    #[must_use]
    pub fn outcome(&self, name: &str) -> Option<TaskOutcome> {
        self.get(name).map(|t| t.outcome)
    }

    /// Number of tasks with `outcome`
    #[must_use]
    pub fn count(&self, outcome: TaskOutcome) -> usize {
        self.tasks.iter().filter(|t| t.outcome == outcome).count()
    }

    /// Task count per outcome, absent outcomes omitted
    #[must_use]
    pub fn counts(&self) -> BTreeMap<TaskOutcome, usize> {
        let mut counts = BTreeMap::new();
        for task in &self.tasks {
            *counts.entry(task.outcome).or_insert(0) += 1;
        }
        counts
    }

    /// Machine-readable form including the derived fields
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let counts: BTreeMap<&str, usize> = self
            .counts()
            .into_iter()
            .map(|(outcome, n)| (outcome.as_str(), n))
            .collect();
        serde_json::json!({
            "run_id": self.run_id,
            "success": self.success(),
            "aborted": self.aborted,
            "duration_ms": self.duration_ms,
            "counts": counts,
            "cache": self.cache,
            "tasks": self.tasks,
        })
    }

    /// Plain-text rendering, one line per task plus totals
    #[must_use]
    pub fn render_text(&self) -> String {
        let width = self.tasks.iter().map(|t| t.name.len()).max().unwrap_or(0);
        let mut out = String::new();

        for task in &self.tasks {
            let mut line = format!(
                "{:<width$}  {:<25}  {}",
                task.name,
                task.outcome.as_str(),
                task.cause
            );
            if task.completed_after_abort {
                line.push_str(" (completed after abort)");
            }
            if task.duration_ms > 0 {
                line.push_str(&format!(" [{}ms]", task.duration_ms));
            }
            out.push_str(line.trim_end());
            out.push('\n');
        }

        let totals: Vec<String> = self
            .counts()
            .into_iter()
            .map(|(outcome, n)| format!("{n} {outcome}"))
            .collect();
        out.push_str(&format!(
            "\n{} task(s): {} in {}ms",
            self.tasks.len(),
            if totals.is_empty() { "nothing to do".to_string() } else { totals.join(", ") },
            self.duration_ms
        ));
        if self.aborted {
            out.push_str(" (aborted)");
        }
        out.push_str(&format!(
            "\ncache: {} lookup(s), {} local hit(s), {} remote hit(s), {} miss(es), {} stored",
            self.cache.lookups,
            self.cache.local_hits,
            self.cache.remote_hits,
            self.cache.misses,
            self.cache.stores
        ));
        if self.cache.remote_failures > 0 {
            out.push_str(&format!(", {} remote failure(s)", self.cache.remote_failures));
        }
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> RunSummary {
        let mut failed = TaskReport::new("compile", TaskOutcome::Failed, "exited with code 1");
        failed.duration_ms = 12;
        let mut finished = TaskReport::new("lint", TaskOutcome::Executed, "No previous execution recorded");
        finished.completed_after_abort = true;
        RunSummary {
            run_id: Uuid::nil(),
            tasks: vec![
                TaskReport::new("stub", TaskOutcome::UpToDate, "Up-to-date"),
                failed,
                finished,
                TaskReport::new("package", TaskOutcome::SkippedDependencyFailed, "Dependency 'compile' failed"),
                TaskReport::new("docs", TaskOutcome::Cancelled, "Run aborted before the task started"),
            ],
            aborted: true,
            cache: CacheStats::default(),
            duration_ms: 40,
        }
    }

    #[test]
    fn test_success_and_counts() {
        let summary = summary();
        assert!(!summary.success());
        assert_eq!(summary.count(TaskOutcome::Failed), 1);
        assert_eq!(summary.outcome("package"), Some(TaskOutcome::SkippedDependencyFailed));
        assert_eq!(summary.counts().len(), 5);
        assert!(summary.get("missing").is_none());
    }

    #[test]
    fn test_render_text() {
        let text = summary().render_text();
        assert!(text.contains("compile  failed"));
        assert!(text.contains("exited with code 1 [12ms]"));
        assert!(text.contains("(completed after abort)"));
        assert!(text.contains("5 task(s): 1 executed, 1 up-to-date, 1 failed, 1 skipped-dependency-failed, 1 cancelled in 40ms (aborted)"));
    }

    #[test]
    fn test_json_uses_kebab_case_outcomes() {
        let json = summary().to_json();
        assert_eq!(json["success"], false);
        assert_eq!(json["counts"]["skipped-dependency-failed"], 1);
        assert_eq!(json["tasks"][0]["outcome"], "up-to-date");
        assert!(json["tasks"][0].get("fingerprint").is_none());
    }

    #[test]
    fn test_outcome_success() {
        assert!(TaskOutcome::LoadedFromCache.is_success());
        assert!(!TaskOutcome::Cancelled.is_success());
        assert_eq!(TaskOutcome::LoadedFromCache.to_string(), "loaded-from-cache");
    }
}
