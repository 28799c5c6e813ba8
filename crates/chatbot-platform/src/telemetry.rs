use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset. HTTP client internals stay quiet.
pub const DEFAULT_LOG_FILTER: &str = "info,hyper=warn,reqwest=warn,r2d2=warn";

/// Installs the global fmt subscriber with RFC 3339 UTC timestamps.
/// Returns `false` when a subscriber was already installed.
pub fn init_tracing() -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_level(true)
        .with_thread_names(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).is_ok()
}
