//! Structured logging setup.
//!
//! The library only emits `tracing` events; installing a subscriber is left to
//! the application. `init_logging` is the convenience used by the demos.

use crate::config::LoggingConfig;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber on stderr.
///
/// `RUST_LOG` takes precedence over `config.log_level` when set. Calling this
/// twice is harmless; the second installation is ignored.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false);

    let installed = if config.json_format {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        tracing::debug!(app = %config.app_name, "Logging initialized");
    }
}
