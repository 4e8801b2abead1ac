//! Logging and tracing configuration
//!
//! Harness diagnostics go to stderr through tracing; the test report itself is
//! printed to stdout so the two never interleave in captured CI logs.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Default filter for a given `-v` count
fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "crashwatch=info,warn",
        1 => "crashwatch=debug,info",
        _ => "crashwatch=trace,debug",
    }
}

/// Initialize tracing for the CLI (stderr logging, optional log file)
///
/// Logs are controlled by the `RUST_LOG` environment variable, falling back
/// to a level picked from `verbosity`. When `log_file` is given every event is
/// also written there without ANSI colours; keep the returned guard alive until
/// the process exits or buffered lines are lost.
pub fn init_cli(verbosity: u8, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let Some(path) = log_file else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        return None;
    };

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Warning: Could not open log file {}: {}", path.display(), e);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            return None;
        }
    };

    let (writer, guard) = tracing_appender::non_blocking(file);
    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Some(guard)
}
