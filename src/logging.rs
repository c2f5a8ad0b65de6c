use tracing_subscriber::EnvFilter;

/// Install the global `fmt` subscriber.
///
/// Honors `RUST_LOG`, falling back to `default_directive` (e.g. `"info"`).
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .try_init();
}
