use std::sync::Once;
use tracing::info;
use tracing_subscriber::EnvFilter;

static INIT_TRACING: Once = Once::new();

/// Install the global subscriber. Honours `RUST_LOG`; safe to call repeatedly.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();

        info!("setup engine tracing initialized");
    });
}

/// Crate version, as reported in the User-Agent header.
pub fn engine_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
