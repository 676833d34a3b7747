//! Logging setup for the kru terminal client
//!
//! Everything goes to `<data dir>/logs/kru.log`. With `--tracing` the same
//! events are mirrored to stderr.

use config::PathManager;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str = "info,kru_core=debug,llm=debug";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn stderr_layer<S>(enabled: bool) -> Option<impl tracing_subscriber::Layer<S>>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    enabled.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(true)
    })
}

/// Install the global subscriber. Only the first call has any effect.
pub fn init_logging(mirror_to_stderr: bool) {
    if LOG_GUARD.get().is_some() {
        return;
    }

    let Some(path) = PathManager::log_file_path() else {
        init_stderr_logging();
        return;
    };

    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("[kru] Failed to create log directory {:?}: {}", parent, e);
        }
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("[kru] Failed to open log file {:?}: {}", path, e);
            init_stderr_logging();
            return;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let _ = LOG_GUARD.set(guard);

    let subscriber = tracing_subscriber::registry()
        .with(filter())
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(stderr_layer(mirror_to_stderr));

    match tracing::subscriber::set_global_default(subscriber) {
        Ok(()) => tracing::info!("Logging initialized, writing to {:?}", path),
        Err(e) => eprintln!("[kru] Failed to set tracing subscriber: {}", e),
    }
}

fn init_stderr_logging() {
    let subscriber = tracing_subscriber::registry()
        .with(filter())
        .with(stderr_layer(true));

    let _ = tracing::subscriber::set_global_default(subscriber);
}
