//! Rebundle - re-sign app bundles with a remotely held key

mod cli;
mod exit_codes;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use cli::Cli;

fn main() {
    let cli = Cli::parse();
    let guard = init_tracing(cli.verbose, cli.quiet);

    let code = match cli.execute() {
        Ok(code) => code,
        Err(e) => {
            cli::output::error(&format!("{:#}", e));
            exit_codes::for_error(&e)
        }
    };

    // Flush the file layer before exiting
    drop(guard);
    std::process::exit(code);
}

/// Set up tracing with two layers:
/// - Console: controlled by RUST_LOG (default: warn, info with --verbose,
///   error with --quiet)
/// - File: always debug-level JSON to ~/.rebundle/logs/
fn init_tracing(verbose: bool, quiet: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if quiet {
        "error"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Some(log_dir) = log_directory() {
        let file_appender = tracing_appender::rolling::daily(&log_dir, "rebundle.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_filter(console_filter),
            )
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_target(true)
                    .with_filter(EnvFilter::new("debug")),
            )
            .init();

        return Some(guard);
    }

    // Fallback: console only
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    None
}

/// Returns the log directory path, creating it if needed.
fn log_directory() -> Option<std::path::PathBuf> {
    let log_dir = dirs::home_dir()?.join(".rebundle").join("logs");
    std::fs::create_dir_all(&log_dir).ok()?;
    Some(log_dir)
}
