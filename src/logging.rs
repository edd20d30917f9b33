//! Tracing setup: stdout for interactive runs plus a daily-rolling file
//! under the data directory. Ingestion runs in background tasks whose
//! failures land on the document record and in these logs, long after the
//! triggering request returned, so the file layer is not optional.

use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Keeps the non-blocking writer flushing for the process lifetime.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Service at info; the HTTP and SQL internals are too chatty at that
/// level. `RUST_LOG` overrides the whole set.
const DEFAULT_DIRECTIVES: &str = "info,sqlx=warn,hyper=warn,reqwest=warn";

pub fn init(log_dir: &Path) {
    let _ = std::fs::create_dir_all(log_dir);

    let appender = tracing_appender::rolling::daily(log_dir, "ragflow.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    let _ = LOG_GUARD.set(guard);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();
}
