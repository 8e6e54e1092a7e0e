//! Shared tracing configuration for provisioning instrumentation.
//!
//! Centralises the log target used by the crate so subscribers can filter
//! provisioning events without pulling in unrelated application logs.

use tracing::Level;

/// Target used by provisioning spans and logs.
pub(crate) const LOG_TARGET: &str = "pg_provision::observability";

/// Installs a formatting subscriber that writes to standard error.
///
/// Standard output is reserved for the reported password, so diagnostics
/// never interleave with it. Repeated installation is ignored.
pub fn init_logging(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!(target: LOG_TARGET, "tracing subscriber already installed");
    }
}
