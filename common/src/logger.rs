use std::fs;
use std::path::Path;

use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs the global `tracing` subscriber.
///
/// Logs always go to a daily-rolling file `<log_dir>/<log_file>`; when
/// `log_to_stdout` is set an ANSI stdout layer is added as well. The filter is
/// taken from the `LOG_LEVEL` environment variable, falling back to
/// `default_filter` (e.g. `services=info`).
///
/// The returned guard flushes the non-blocking file writer on drop and must be
/// held for the lifetime of the process.
pub fn init_logging(
    log_dir: &str,
    log_file: &str,
    default_filter: &str,
    log_to_stdout: bool,
) -> WorkerGuard {
    if !Path::new(log_dir).exists() {
        fs::create_dir_all(log_dir).ok();
    }

    let file_appender = rolling::daily(log_dir, log_file);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true);

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_target(true);

    let env_filter =
        EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    if log_to_stdout {
        registry.with(stdout_layer).init();
    } else {
        registry.init();
    }

    guard
}
