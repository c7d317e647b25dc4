//! Core types for taskmemo: incremental task execution with content-addressed
//! memoization.
//!
//! - [`tasks::Task`]: declared inputs, outputs, dependencies and an action
//! - [`tasks::ContentHasher`]: relocation-independent task fingerprints
//! - [`tasks::InvalidationEngine`]: up-to-date / cache-hit / stale decisions
//! - [`tasks::Executor`]: dependency-ordered, bounded-parallel execution
//! - [`RunContext`]: run-scoped project root, cache, history and scratch area
//! - [`config::ProjectConfig`]: `taskmemo.toml`
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskmemo_cache::{CacheStore, LocalStore};
//! use taskmemo_core::RunContext;
//! use taskmemo_core::tasks::{CommandAction, Executor, ExecutorConfig, InputDescriptor, Task};
//!
//! # async fn example() -> taskmemo_core::Result<()> {
//! let cache = CacheStore::new(LocalStore::open("/tmp/taskmemo-cache", None)?);
//! let ctx = Arc::new(RunContext::new(std::path::Path::new("."), cache)?);
//! let stub = Task::new("stub", CommandAction::new("kapt-stub").args(["src", "stubs"]))
//!     .input(InputDescriptor::path("src"))
//!     .output("stubs");
//! let mut executor = Executor::new(ctx, ExecutorConfig::default(), vec![stub])?;
//! let summary = executor.run(&["stub"]).await?;
//! assert!(summary.success());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
mod error;
pub mod tasks;

pub use context::RunContext;
pub use error::{Error, Result};
