//! taskmemo CLI binary

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::io::Write;
use taskmemo::cli::{self, Commands, exit_code_for, render_error};
use taskmemo::commands;
use taskmemo::progress::Progress;
use taskmemo::tracing::{TracingConfig, init_tracing};
use taskmemo::{EXIT_SIGINT, EXIT_TASK_FAILED};

fn main() {
    // Tracing may be unusable during a panic; print directly.
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panicked: {panic_info}");
        eprintln!("Internal error occurred. Run with RUST_LOG=debug for more information.");
    }));

    let cli = cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Fatal error: Failed to create tokio runtime: {e}");
            std::process::exit(EXIT_TASK_FAILED);
        }
    };

    let exit_code = runtime.block_on(run(cli));
    // Dropping the runtime waits for blocking tasks; a cancelled run must not.
    runtime.shutdown_background();
    std::process::exit(exit_code);
}

async fn run(cli: cli::Cli) -> i32 {
    let json = cli.json_output();
    let show_progress = matches!(cli.command, Commands::Run { json: false, .. });

    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
    let tracing_config = TracingConfig {
        format: cli.log_format,
        level: cli.log_level.into(),
        events: show_progress.then_some(events_tx),
        ..TracingConfig::default()
    };
    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("{e:?}");
    }
    let progress = show_progress.then(|| Progress::spawn(events_rx));

    let project = cli.project.clone();
    let config = cli.config.clone();
    let command = cli.into_command();

    let result = tokio::select! {
        result = commands::execute(command, &project, config.as_deref()) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    if let Some(progress) = progress {
        progress.finish().await;
    }

    match result {
        Some(Ok(output)) => {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(output.stdout.as_bytes());
            if !output.stdout.is_empty() && !output.stdout.ends_with('\n') {
                let _ = writeln!(stdout);
            }
            let _ = stdout.flush();
            output.exit_code
        }
        Some(Err(err)) => {
            render_error(&err, json);
            exit_code_for(&err)
        }
        None => {
            eprintln!("Interrupted");
            EXIT_SIGINT
        }
    }
}
