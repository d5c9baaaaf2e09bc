//! Tracing setup for the daemon.
//!
//! Logs go to stderr and, when the platform log directory is writable, to a
//! daily rolling file. `RUST_LOG` overrides the default `info` filter.

use blackbox_common::logging::{ensure_log_dir, SERVICE_LOG_FILE};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the file writer. Later calls are ignored.
pub fn init_logging() -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match ensure_log_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(&dir, SERVICE_LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()
                .ok();
            tracing::info!("Logging to {}", dir.join(SERVICE_LOG_FILE).display());
            Some(guard)
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init()
                .ok();
            tracing::warn!("File logging disabled, cannot create log directory: {}", e);
            None
        }
    }
}
