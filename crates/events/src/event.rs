//! Event type definitions for structured taskmemo events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The kind of a captured event, derived from its `event_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A task began evaluation.
    TaskStarted,
    /// A task's recorded state matched; nothing ran.
    TaskUpToDate,
    /// A task's outputs were restored from the cache.
    TaskCacheHit,
    /// No usable cache entry; the task will execute.
    TaskCacheMiss,
    /// A task's outputs were stored under its fingerprint.
    TaskCacheStored,
    /// A task finished (successfully or not).
    TaskCompleted,
    /// A task was not run because a dependency failed or the run aborted.
    TaskSkipped,
    /// The remote cache tier could not be reached.
    RemoteUnavailable,
    /// A local cache entry was evicted.
    CacheEvicted,
}

impl EventKind {
    /// Parse the `event_type` field value of a tracing event.
    #[must_use]
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        let kind = match event_type {
            "task.started" => Self::TaskStarted,
            "task.up_to_date" => Self::TaskUpToDate,
            "task.cache_hit" => Self::TaskCacheHit,
            "task.cache_miss" => Self::TaskCacheMiss,
            "task.cache_stored" => Self::TaskCacheStored,
            "task.completed" => Self::TaskCompleted,
            "task.skipped" => Self::TaskSkipped,
            "cache.remote_unavailable" => Self::RemoteUnavailable,
            "cache.evicted" => Self::CacheEvicted,
            _ => return None,
        };
        Some(kind)
    }

    /// The `event_type` string this kind is emitted with.
    #[must_use]
    pub const fn as_event_type(self) -> &'static str {
        match self {
            Self::TaskStarted => "task.started",
            Self::TaskUpToDate => "task.up_to_date",
            Self::TaskCacheHit => "task.cache_hit",
            Self::TaskCacheMiss => "task.cache_miss",
            Self::TaskCacheStored => "task.cache_stored",
            Self::TaskCompleted => "task.completed",
            Self::TaskSkipped => "task.skipped",
            Self::RemoteUnavailable => "cache.remote_unavailable",
            Self::CacheEvicted => "cache.evicted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_event_type())
    }
}

/// A structured taskmemo event captured from the tracing stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskmemoEvent {
    /// Unique event identifier.
    pub id: Uuid,
    /// When the event was captured.
    pub timestamp: DateTime<Utc>,
    /// The tracing target the event was emitted under.
    pub target: String,
    /// What happened.
    pub kind: EventKind,
    /// Task the event concerns, if any.
    pub task_name: Option<String>,
    /// Fingerprint (hex) the event concerns, if any.
    pub fingerprint: Option<String>,
    /// Free-form reason or error text.
    pub detail: Option<String>,
    /// Outcome flag for completion events.
    pub success: Option<bool>,
    /// Duration for completion events.
    pub duration_ms: Option<u64>,
}

impl TaskmemoEvent {
    /// Create an event of the given kind with no optional fields set.
    #[must_use]
    pub fn new(target: impl Into<String>, kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            target: target.into(),
            kind,
            task_name: None,
            fingerprint: None,
            detail: None,
            success: None,
            duration_ms: None,
        }
    }

    /// One-line human rendering used by progress output.
    #[must_use]
    pub fn summary_line(&self) -> String {
        let task = self.task_name.as_deref().unwrap_or("-");
        match self.kind {
            EventKind::TaskStarted => format!("> {task}"),
            EventKind::TaskUpToDate => format!("  {task}: up-to-date"),
            EventKind::TaskCacheHit => format!("  {task}: loaded from cache"),
            EventKind::TaskCacheMiss => format!(
                "  {task}: cache miss ({})",
                self.detail.as_deref().unwrap_or("no entry")
            ),
            EventKind::TaskCacheStored => format!("  {task}: stored cache entry"),
            EventKind::TaskCompleted => {
                let status = if self.success.unwrap_or(false) {
                    "ok"
                } else {
                    "FAILED"
                };
                format!("< {task} {status} ({}ms)", self.duration_ms.unwrap_or(0))
            }
            EventKind::TaskSkipped => format!(
                "  {task}: skipped ({})",
                self.detail.as_deref().unwrap_or("dependency failed")
            ),
            EventKind::RemoteUnavailable => format!(
                "! remote cache unavailable: {}",
                self.detail.as_deref().unwrap_or("unknown error")
            ),
            EventKind::CacheEvicted => format!(
                "  evicted {}",
                self.fingerprint.as_deref().unwrap_or("-")
            ),
        }
    }
}
