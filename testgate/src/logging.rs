//! Diagnostic tracing for testgate.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. It is separate from
//! the product output: retained test lines on stderr and the summary on stdout.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn`, or `testgate=debug` when `verbose`.
/// If a subscriber cannot be installed the run continues without diagnostics
/// and says so on stderr.
///
/// # Example
/// ```bash
/// RUST_LOG=testgate=trace testgate run
/// ```
pub fn init(verbose: bool) {
    if let Err(err) = try_init(verbose) {
        eprintln!("testgate: diagnostics disabled: {err}");
    }
}

/// Install the subscriber, failing if one is already set.
pub fn try_init(verbose: bool) -> Result<(), TryInitError> {
    let default = if verbose { "warn,testgate=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init()
}
