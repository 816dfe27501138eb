//! Process-wide log configuration.
//!
//! The crate emits `tracing` events; embedders that do not install their own
//! subscriber can call [`init`] once with the desired maximum level.
use tracing::Level;

/// Installs a global `tracing` subscriber printing to stderr at the given
/// maximum level. Later calls are no-ops; there is no teardown.
pub fn init(level: Level) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
