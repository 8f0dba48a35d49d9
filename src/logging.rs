//! Tracing subscriber setup.
//!
//! Both initialisers honour `RUST_LOG` and default to `INFO`. They return an error instead
//! of panicking when a global subscriber is already installed.

use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Initialise human-readable logging.
pub fn init_logging() -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

/// Initialise JSON logging with event fields flattened into each record.
pub fn init_json_logging() -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
        .try_init()
}
