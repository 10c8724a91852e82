//! Logging initialization.
//!
//! Grounded on the teacher's `logging` module: an `EnvFilter` driven by a
//! default directive, a `fmt` layer to stdout, and an optional rolling file
//! appender. This crate does not need the teacher's runtime filter reload or
//! log-broadcast-to-clients machinery (there is no log-streaming endpoint in
//! this spec), so it keeps only the initialization path.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "conversion_orchestrator=info,sqlx=warn,tower_http=info";

/// Initialize global tracing. Returns the `WorkerGuard` for the file appender,
/// if `log_dir` is set; it must be kept alive for the lifetime of the process.
pub fn init_logging(log_dir: Option<&str>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let stdout_layer = fmt::layer().with_target(true).with_ansi(true);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "orchestrator.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer().with_ansi(false).with_writer(non_blocking);

            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(file_layer)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to install global subscriber: {e}"))?;

            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to install global subscriber: {e}"))?;

            Ok(None)
        }
    }
}
