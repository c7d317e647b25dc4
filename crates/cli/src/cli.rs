use crate::commands::Command;
use crate::tracing::{LogLevel, TracingFormat};
use clap::{Parser, Subcommand};
use miette::{Diagnostic, Report};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the CLI application
pub const EXIT_OK: i32 = 0;
/// At least one task failed, or the run could not complete
pub const EXIT_TASK_FAILED: i32 = 1;
/// CLI or configuration error exit code
pub const EXIT_CLI: i32 = 2;
/// Exit code for SIGINT (128 + signal number 2)
pub const EXIT_SIGINT: i32 = 130;

/// CLI-specific error types with proper exit code mapping
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum CliError {
    /// CLI or configuration error (exit code 2)
    #[error("Configuration error: {message}")]
    #[diagnostic(code(taskmemo::cli::config))]
    Config {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
    /// Runtime failure outside of any task (exit code 1)
    #[error("{message}")]
    #[diagnostic(code(taskmemo::cli::run))]
    Run {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
}

impl CliError {
    /// Create a new configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a new configuration error with help text
    #[must_use]
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create a new runtime error
    #[must_use]
    pub fn run(message: impl Into<String>) -> Self {
        Self::Run {
            message: message.into(),
            help: None,
        }
    }

    /// Create a new runtime error with help text
    #[must_use]
    pub fn run_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Run {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

/// Configuration problems (bad config, cycles, unknown tasks, unavailable
/// inputs) map to exit code 2; everything else to 1.
impl From<taskmemo_core::Error> for CliError {
    fn from(err: taskmemo_core::Error) -> Self {
        let help = err.help().map(|h| h.to_string());
        match err {
            // Avoid "Configuration error: Configuration error:"
            taskmemo_core::Error::Configuration { message } => Self::Config { message, help },
            err if err.is_configuration() => Self::Config {
                message: err.to_string(),
                help,
            },
            err => Self::Run {
                message: err.to_string(),
                help,
            },
        }
    }
}

impl From<taskmemo_cache::Error> for CliError {
    fn from(err: taskmemo_cache::Error) -> Self {
        Self::from(taskmemo_core::Error::from(err))
    }
}

/// Map CLI error to appropriate exit code
#[must_use]
pub const fn exit_code_for(err: &CliError) -> i32 {
    match err {
        CliError::Config { .. } => EXIT_CLI,
        CliError::Run { .. } => EXIT_TASK_FAILED,
    }
}

/// Render error appropriately based on JSON flag
pub fn render_error(err: &CliError, json_mode: bool) {
    if json_mode {
        let envelope = ErrorEnvelope::new(serde_json::json!({
            "code": match err {
                CliError::Config { .. } => "config",
                CliError::Run { .. } => "run",
            },
            "message": err.to_string()
        }));
        match serde_json::to_string(&envelope) {
            Ok(json) => println!("{json}"),
            Err(_) => eprintln!("Error serializing error response"),
        }
    } else {
        let report = Report::new(err.clone());
        eprintln!("{report:?}");
        let _ = io::stderr().flush();
    }
}

/// Success response envelope for JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkEnvelope<T> {
    /// Status indicator, always "ok"
    pub status: &'static str,
    /// The actual data payload
    pub data: T,
}

impl<T> OkEnvelope<T> {
    /// Create a new success envelope
    #[must_use]
    pub const fn new(data: T) -> Self {
        Self { status: "ok", data }
    }
}

/// Error response envelope for JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope<E> {
    /// Status indicator, always "error"
    pub status: &'static str,
    /// The error details
    pub error: E,
}

impl<E> ErrorEnvelope<E> {
    /// Create a new error envelope
    #[must_use]
    pub const fn new(error: E) -> Self {
        Self {
            status: "error",
            error,
        }
    }
}

/// Incremental task runner with content-addressed caching.
#[derive(Parser, Debug)]
#[command(name = "taskmemo")]
#[command(about = "Run project tasks incrementally, reusing outputs from a content-addressed cache")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Project root directory.
    #[arg(
        long,
        short = 'p',
        global = true,
        env = "TASKMEMO_PROJECT",
        default_value = ".",
        help = "Project root directory"
    )]
    pub project: PathBuf,

    /// Configuration file (defaults to `<project>/taskmemo.toml`).
    #[arg(long, short = 'c', global = true, help = "Configuration file")]
    pub config: Option<PathBuf>,

    /// Logging verbosity level.
    #[arg(
        long = "log-level",
        short = 'L',
        global = true,
        env = "TASKMEMO_LOG_LEVEL",
        default_value = "warn",
        value_enum
    )]
    pub log_level: LogLevel,

    /// Log line format.
    #[arg(
        long = "log-format",
        global = true,
        env = "TASKMEMO_LOG_FORMAT",
        default_value = "compact",
        value_enum
    )]
    pub log_format: TracingFormat,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run tasks and their dependencies.
    #[command(about = "Run tasks and their dependencies (all tasks if none are named)")]
    Run {
        /// Tasks to run.
        #[arg(value_name = "TASK")]
        tasks: Vec<String>,
        /// Maximum number of tasks running at once.
        #[arg(long, short = 'j', help = "Maximum number of tasks running at once")]
        jobs: Option<usize>,
        /// Keep running independent tasks after a failure.
        #[arg(long, help = "Keep running independent tasks after a failure")]
        continue_on_failure: bool,
        /// Ignore the configured remote cache.
        #[arg(long, help = "Ignore the configured remote cache")]
        no_remote: bool,
        /// Print the run summary as JSON.
        #[arg(long, help = "Print the run summary as JSON")]
        json: bool,
    },
    /// Show the execution plan.
    #[command(about = "Show the execution plan grouped by dependency level")]
    Plan {
        /// Tasks to plan.
        #[arg(value_name = "TASK")]
        tasks: Vec<String>,
        /// Print the plan as JSON.
        #[arg(long, help = "Print the plan as JSON")]
        json: bool,
    },
    /// Local cache maintenance.
    #[command(about = "Inspect and maintain the local cache")]
    Cache {
        /// Cache subcommand to execute.
        #[command(subcommand)]
        subcommand: CacheCommands,
    },
}

/// Cache maintenance subcommands.
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show cache location and size.
    #[command(about = "Show cache location and size")]
    Stats {
        /// Print as JSON.
        #[arg(long, help = "Print as JSON")]
        json: bool,
    },
    /// Remove old entries and orphaned blobs.
    #[command(about = "Remove old entries and orphaned blobs")]
    Gc {
        /// Remove entries not used for this many days.
        #[arg(long, default_value_t = 30, help = "Remove entries not used for this many days")]
        max_age_days: u64,
        /// Shrink the cache below this many bytes.
        #[arg(long = "max-size", value_name = "BYTES", help = "Shrink the cache below this many bytes")]
        max_size: Option<u64>,
    },
    /// Remove every cache entry (run history is kept).
    #[command(about = "Remove every cache entry")]
    Clean,
}

impl Cli {
    /// Whether output should be JSON
    #[must_use]
    pub const fn json_output(&self) -> bool {
        match &self.command {
            Commands::Run { json, .. }
            | Commands::Plan { json, .. }
            | Commands::Cache {
                subcommand: CacheCommands::Stats { json },
            } => *json,
            Commands::Cache { .. } => false,
        }
    }

    /// Convert the parsed arguments into an executable command
    #[must_use]
    pub fn into_command(self) -> Command {
        match self.command {
            Commands::Run {
                tasks,
                jobs,
                continue_on_failure,
                no_remote,
                json,
            } => Command::Run {
                tasks,
                jobs,
                continue_on_failure,
                use_remote: !no_remote,
                json,
            },
            Commands::Plan { tasks, json } => Command::Plan { tasks, json },
            Commands::Cache { subcommand } => match subcommand {
                CacheCommands::Stats { json } => Command::CacheStats { json },
                CacheCommands::Gc {
                    max_age_days,
                    max_size,
                } => Command::CacheGc {
                    max_age_days,
                    max_size_bytes: max_size,
                },
                CacheCommands::Clean => Command::CacheClean,
            },
        }
    }
}

/// Parse command line arguments
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::time::Duration;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["taskmemo", "run"]).unwrap();
        assert_eq!(cli.project, PathBuf::from("."));
        assert!(cli.config.is_none());
        assert_eq!(cli.log_level, LogLevel::Warn);
        assert_eq!(cli.log_format, TracingFormat::Compact);
        assert!(!cli.json_output());
        match cli.into_command() {
            Command::Run {
                tasks,
                jobs,
                continue_on_failure,
                use_remote,
                json,
            } => {
                assert!(tasks.is_empty());
                assert!(jobs.is_none());
                assert!(!continue_on_failure);
                assert!(use_remote);
                assert!(!json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "taskmemo",
            "run",
            "stub",
            "process",
            "--jobs",
            "3",
            "--continue-on-failure",
            "--no-remote",
            "--json",
            "--project",
            "/tmp/p",
        ])
        .unwrap();
        assert!(cli.json_output());
        assert_eq!(cli.project, PathBuf::from("/tmp/p"));
        match cli.into_command() {
            Command::Run {
                tasks,
                jobs,
                continue_on_failure,
                use_remote,
                ..
            } => {
                assert_eq!(tasks, vec!["stub", "process"]);
                assert_eq!(jobs, Some(3));
                assert!(continue_on_failure);
                assert!(!use_remote);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cache_subcommands() {
        let cli = Cli::try_parse_from(["taskmemo", "cache", "gc", "--max-size", "1024"]).unwrap();
        assert!(matches!(
            cli.into_command(),
            Command::CacheGc {
                max_age_days: 30,
                max_size_bytes: Some(1024)
            }
        ));

        let cli = Cli::try_parse_from(["taskmemo", "cache", "stats", "--json"]).unwrap();
        assert!(cli.json_output());

        let cli = Cli::try_parse_from(["taskmemo", "cache", "clean"]).unwrap();
        assert!(matches!(cli.into_command(), Command::CacheClean));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "taskmemo",
            "plan",
            "--log-level",
            "debug",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_level, LogLevel::Debug);
        assert_eq!(cli.log_format, TracingFormat::Json);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(EXIT_OK, 0);
        assert_eq!(EXIT_TASK_FAILED, 1);
        assert_eq!(EXIT_CLI, 2);
        assert_eq!(exit_code_for(&CliError::config("bad")), EXIT_CLI);
        assert_eq!(exit_code_for(&CliError::run("io")), EXIT_TASK_FAILED);
    }

    #[test]
    fn test_core_error_mapping() {
        let err = CliError::from(taskmemo_core::Error::configuration("missing name"));
        assert!(matches!(&err, CliError::Config { message, .. } if message == "missing name"));

        let err = CliError::from(taskmemo_core::Error::input_unavailable("process", "stubs"));
        assert_eq!(exit_code_for(&err), EXIT_CLI);
        assert!(err.to_string().contains("Input 'stubs' of task 'process' is unavailable"));

        let err = CliError::from(taskmemo_core::Error::timeout("slow", Duration::from_secs(1)));
        assert_eq!(exit_code_for(&err), EXIT_TASK_FAILED);
    }

    #[test]
    fn test_envelopes() {
        let ok = serde_json::to_value(OkEnvelope::new(1)).unwrap();
        assert_eq!(ok["status"], "ok");
        let err = serde_json::to_value(ErrorEnvelope::new("x")).unwrap();
        assert_eq!(err["status"], "error");
    }
}
