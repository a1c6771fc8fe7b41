use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, registry, util::SubscriberInitExt};

/// Logs to stderr, filtered by `RUST_LOG` when set.
pub fn init_logging(verbose: bool) {
    let default_directive = if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false).with_filter(filter);

    // A subscriber may already be installed when running under a test harness.
    let _ = registry().with(layer).try_init();
}
