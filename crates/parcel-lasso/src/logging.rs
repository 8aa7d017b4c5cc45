use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize logging
///
/// If RUST_LOG is not set, a default is installed: debug for this workspace in debug builds,
/// info in release builds.
pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_err() {
        // Safety: single-threaded at startup, before the runtime is built
        unsafe {
            std::env::set_var("RUST_LOG", default_filter());
        }
    }

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_default_env());
    if tracing_subscriber::registry().with(fmt_layer).try_init().is_err() {
        tracing::warn!("Logging was already initialized");
    }

    tracing::debug!(
        "RUST_LOG: {}",
        std::env::var("RUST_LOG").unwrap_or_default()
    );
}

fn default_filter() -> &'static str {
    if cfg!(debug_assertions) {
        "info,parcel_lasso=debug,parcel_lasso_lib=debug"
    } else {
        "info"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(default_filter()).is_ok());
    }
}
