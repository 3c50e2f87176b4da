use tracing_subscriber::EnvFilter;

/// Logs go to stderr; stdout carries the conversation. `RUST_LOG` wins unless
/// `verbose` is set.
pub(crate) fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("reqrelay=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reqrelay=info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
