use tracing_subscriber::EnvFilter;

/// Initialize structured logging on stderr, leaving stdout for run summaries.
///
/// `RUST_LOG` wins over `log_level` when set. `compact` trades span context
/// for one line per event, which suits the long-running `serve` command.
pub fn init(log_level: &str, compact: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if compact {
        builder.compact().init();
    } else {
        builder.init();
    }
}
