use tracing_subscriber::EnvFilter;

/// Initialise the diagnostic `tracing` subscriber on stderr.
///
/// Diagnostics are separate from the signal log: the signal log is a
/// product artifact with a fixed line format, while this output is for
/// operators. `RUST_LOG` overrides the default `warn` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
