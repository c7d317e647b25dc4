//! Structured event system for taskmemo.
//!
//! Task and cache events are emitted with `tracing` macros under fixed
//! targets (`taskmemo::task`, `taskmemo::cache`) and carry an `event_type`
//! field. Any subscriber sees them as ordinary log records; the
//! [`TaskmemoEventLayer`] additionally turns them into typed
//! [`TaskmemoEvent`] values for renderers.
//!
//! # Usage
//!
//! ```rust,ignore
//! use taskmemo_events::{TaskmemoEventLayer, emit_task_started};
//! use tracing_subscriber::layer::SubscriberExt;
//! use tracing_subscriber::util::SubscriberInitExt;
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! tracing_subscriber::registry()
//!     .with(TaskmemoEventLayer::new(tx))
//!     .init();
//!
//! emit_task_started!("compile");
//! ```

pub mod event;
pub mod layer;

pub use event::{EventKind, TaskmemoEvent};
pub use layer::TaskmemoEventLayer;

/// Target used for per-task lifecycle events.
pub const TASK_TARGET: &str = "taskmemo::task";
/// Target used for cache tier events.
pub const CACHE_TARGET: &str = "taskmemo::cache";

// ============================================================================
// Task Events
// ============================================================================

/// Emit a task started event.
///
/// # Example
/// ```rust,ignore
/// emit_task_started!("compile");
/// ```
#[macro_export]
macro_rules! emit_task_started {
    ($name:expr) => {
        ::tracing::info!(
            target: "taskmemo::task",
            event_type = "task.started",
            task_name = %$name,
        )
    };
}

/// Emit a task up-to-date event (no cache lookup was needed).
#[macro_export]
macro_rules! emit_task_up_to_date {
    ($name:expr, $fingerprint:expr) => {
        ::tracing::info!(
            target: "taskmemo::task",
            event_type = "task.up_to_date",
            task_name = %$name,
            fingerprint = %$fingerprint,
        )
    };
}

/// Emit a task cache hit event.
///
/// # Example
/// ```rust,ignore
/// emit_task_cache_hit!("compile", fingerprint);
/// ```
#[macro_export]
macro_rules! emit_task_cache_hit {
    ($name:expr, $fingerprint:expr) => {
        ::tracing::info!(
            target: "taskmemo::task",
            event_type = "task.cache_hit",
            task_name = %$name,
            fingerprint = %$fingerprint,
        )
    };
}

/// Emit a task cache miss event.
#[macro_export]
macro_rules! emit_task_cache_miss {
    ($name:expr, $reason:expr) => {
        ::tracing::info!(
            target: "taskmemo::task",
            event_type = "task.cache_miss",
            task_name = %$name,
            reason = %$reason,
        )
    };
}

/// Emit a cache stored event after a successful execution.
#[macro_export]
macro_rules! emit_task_cache_stored {
    ($name:expr, $fingerprint:expr) => {
        ::tracing::info!(
            target: "taskmemo::task",
            event_type = "task.cache_stored",
            task_name = %$name,
            fingerprint = %$fingerprint,
        )
    };
}

/// Emit a task completed event.
///
/// # Example
/// ```rust,ignore
/// emit_task_completed!("compile", true, 1234_u64);
/// ```
#[macro_export]
macro_rules! emit_task_completed {
    ($name:expr, $success:expr, $duration_ms:expr) => {
        ::tracing::info!(
            target: "taskmemo::task",
            event_type = "task.completed",
            task_name = %$name,
            success = $success,
            duration_ms = $duration_ms,
        )
    };
}

/// Emit a task skipped event (dependency failed or run aborted).
#[macro_export]
macro_rules! emit_task_skipped {
    ($name:expr, $reason:expr) => {
        ::tracing::info!(
            target: "taskmemo::task",
            event_type = "task.skipped",
            task_name = %$name,
            reason = %$reason,
        )
    };
}

// ============================================================================
// Cache Events
// ============================================================================

/// Emit a remote cache unavailable event. The run continues local-only.
#[macro_export]
macro_rules! emit_remote_unavailable {
    ($operation:expr, $error:expr) => {
        ::tracing::warn!(
            target: "taskmemo::cache",
            event_type = "cache.remote_unavailable",
            operation = %$operation,
            error = %$error,
        )
    };
}

/// Emit a cache entry evicted event.
#[macro_export]
macro_rules! emit_cache_evicted {
    ($fingerprint:expr, $reason:expr) => {
        ::tracing::debug!(
            target: "taskmemo::cache",
            event_type = "cache.evicted",
            fingerprint = %$fingerprint,
            reason = %$reason,
        )
    };
}
