//! # sidecar-server
//!
//! HTTP surface for the sidecar worker.
//!
//! Exposes one POST route per registered endpoint adapter plus the fixed
//! operational routes: `/ping` liveness, `/healthcheck`, and the
//! `/health`, `/info`, `/metrics` diagnostic passthroughs. The `sidecard`
//! binary wires configuration, the readiness monitor, the calibrator, and
//! the reporter around this surface.

pub mod handler;
pub mod server;

pub use server::{build_router, serve, AppState};

use sidecar_core::config::LoggingConfig;
use sidecar_core::Result;

/// Initialize logging and tracing
pub fn init_logging(logging_config: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging_config.level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match logging_config.format.as_str() {
        "json" => subscriber.json().init(),
        _ => subscriber.init(),
    }

    Ok(())
}
