use tracing_subscriber::{fmt, EnvFilter};

/// Initialize structured logging with environment filter.
/// Set VKBRIDGE_LOG=debug (or trace, info, warn, error) for verbosity control.
///
/// Safe to call more than once: the ICD can be loaded and initialized
/// several times in one process, only the first call installs a subscriber.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env("VKBRIDGE_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();
}
