use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence when set; otherwise the crate logs at
/// `info`, raised to `debug` with `--verbose`. Safe to call more than
/// once: later calls are no-ops.
pub fn init(verbose: bool) {
    let default_directive = if verbose {
        "prompt_audit=debug"
    } else {
        "prompt_audit=info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
