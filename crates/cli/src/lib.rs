// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

//! taskmemo command-line front end.
//!
//! `main.rs` parses arguments with [`cli::parse`], sets up logging through
//! [`tracing::init_tracing`] and dispatches to [`commands::execute`].

// The CLI writes results to stdout and diagnostics to stderr directly
#![allow(clippy::print_stdout, clippy::print_stderr)]

/// CLI argument parsing, errors and exit codes.
pub mod cli;
/// Command implementations.
pub mod commands;
/// Progress output from task events.
pub mod progress;
/// Tracing and logging configuration.
pub mod tracing;

pub use cli::{CliError, EXIT_CLI, EXIT_OK, EXIT_SIGINT, EXIT_TASK_FAILED};
