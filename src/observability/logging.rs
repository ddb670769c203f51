//! # Logging
//!
//! Tracing subscriber setup.

/// Install the global subscriber
///
/// `RUST_LOG` controls filtering (default `catalog_controller=info`).
/// `format` selects `json` output; anything else is plain text.
pub fn init_logging(format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "catalog_controller=info".into());

    let result = if format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_current_span(true)
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    if let Err(e) = result {
        tracing::warn!("Tracing subscriber already initialized: {}", e);
    }
}
