//! Tracing subscriber setup for hosts that do not install their own.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "TAGSTORE_LOG";

const DEFAULT_FILTER: &str = "info";

/// Output format for [`init_tracing_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Filter from `TAGSTORE_LOG`, falling back to `info`.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a global fmt subscriber. Returns false if one was already set.
pub fn init_tracing() -> bool {
    init_tracing_with(LogFormat::Text)
}

pub fn init_tracing_with(format: LogFormat) -> bool {
    let registry = tracing_subscriber::registry().with(env_filter());
    let installed = match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };
    if installed.is_ok() {
        tracing::debug!(?format, "Tracing initialized");
    }
    installed.is_ok()
}
