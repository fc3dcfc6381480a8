//! Tracing subscribers for console output and per-archive log files.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use comex_core::{archive_io, ComexError};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Settings;

/// Environment variable that overrides the configured filter directives.
pub const LOG_ENV: &str = "COMEX_LOG";

/// Target used for messages emitted through [`crate::Experiment::log`].
pub const EXPERIMENT_TARGET: &str = "comex::experiment";

fn build_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(directives))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs a process-wide console subscriber.
///
/// Returns false when a global subscriber was already installed.
pub fn init_logging(settings: &Settings) -> bool {
    tracing_subscriber::registry()
        .with(build_filter(&settings.log_filter))
        .with(fmt::layer().with_target(false))
        .try_init()
        .is_ok()
}

/// Subscriber scoped to one experiment run; dropping it restores the previous default.
pub struct LogSession {
    _guard: DefaultGuard,
}

impl LogSession {
    /// Tees events to the console (when enabled) and appends them to `log_path`.
    pub fn open(log_path: &Path, settings: &Settings) -> Result<Self, ComexError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(|err| archive_io("logging.open", log_path, err))?;
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(file));
        let console_layer = settings.console.then(|| fmt::layer().with_target(false));
        let subscriber = tracing_subscriber::registry()
            .with(build_filter(&settings.log_filter))
            .with(console_layer)
            .with(file_layer);
        Ok(Self {
            _guard: tracing::subscriber::set_default(subscriber),
        })
    }
}

impl std::fmt::Debug for LogSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LogSession")
    }
}
