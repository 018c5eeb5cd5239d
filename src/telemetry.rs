use tracing_subscriber::{fmt, filter::EnvFilter};
use crate::config::HostConfig;
use crate::error::Result;

/// Initialize global logging based on env or config.
/// Order: SERVHOST_LOG env -> cfg.log_level -> "info"
///
/// Returns `false` when a subscriber was already installed, in which case the
/// existing one is left alone.
pub fn init_telemetry(cfg: &HostConfig) -> Result<bool> {
    let directive = std::env::var("SERVHOST_LOG").unwrap_or_else(|_| cfg.log_level.clone());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    // Services have no terminal attached; keep output free of escape codes.
    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_ansi(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(filter = %directive, "telemetry initialized");
    }
    Ok(installed)
}
