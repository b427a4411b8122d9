//! Logging setup for the job-events client.
//!
//! Call sites use `tracing` macros directly with structured fields (`url`,
//! `error`, `attempt`, ...); this module only installs the subscriber.

use tracing_subscriber::EnvFilter;

/// Default filter used when `RUST_LOG` is not set. Covers the library and the
/// `jobwatch` binary.
pub const DEFAULT_FILTER: &str = "jobwatch=info,jobwatch_client=info";

/// Install a `tracing-subscriber` formatter filtered by `RUST_LOG`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .try_init();
}
