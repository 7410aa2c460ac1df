//! Tracing setup for the service.
//!
//! A single compact stdout layer with environment-based filtering. Log level
//! is controlled through `RUST_LOG` (default: "info").

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber.
///
/// # Panics
/// Panics if the subscriber is already initialized.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .expect("Failed to create EnvFilter");

    let stdout_layer = fmt::layer()
        .with_target(true)
        .with_line_number(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}
