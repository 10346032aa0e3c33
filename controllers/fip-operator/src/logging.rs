//! Log subscriber with a runtime-adjustable level.

use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

/// Maps a configured level name onto a filter directive. Unknown names fall
/// back to `info`.
pub fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}

/// Handle for changing the log level after startup.
#[derive(Clone)]
pub struct LogControl {
    handle: Option<reload::Handle<EnvFilter, Registry>>,
}

impl LogControl {
    /// A control that changes nothing; used when no subscriber was installed.
    pub fn disabled() -> Self {
        Self { handle: None }
    }

    /// Replaces the active filter with `level`.
    pub fn set_level(&self, level: &str) {
        let Some(handle) = &self.handle else { return };
        let directive = level_directive(level);
        match handle.reload(EnvFilter::new(directive)) {
            Ok(()) => info!("Log level set to {}", directive),
            Err(e) => error!("Failed to change log level to {}: {}", directive, e),
        }
    }
}

/// Installs the global subscriber. `RUST_LOG` applies until the first
/// configured level is set.
pub fn init() -> LogControl {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    LogControl { handle: Some(handle) }
}
