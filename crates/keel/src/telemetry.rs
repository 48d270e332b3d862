//! Logging bootstrap shared by the binaries, tests and benchmarks.

use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default directive when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Install a `tracing` subscriber and forward `log` records into it.
///
/// Level directives come from `RUST_LOG` (e.g. "debug,keel_coordinator=trace").
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    init_with_filter(DEFAULT_FILTER);
}

/// Same as [`init`] with an explicit fallback directive.
pub fn init_with_filter(fallback: &str) {
    let _ = LogTracer::init();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let fmt_layer = fmt::layer().with_target(true).compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

/// Discard every event so benchmarks measure the strategies, not the logger.
pub fn init_for_benchmarks() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("off"))
        .try_init();
}
