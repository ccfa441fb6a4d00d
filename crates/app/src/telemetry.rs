use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "info,tower_http=warn";

static INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Installs the global subscriber. Later calls return the first outcome
/// without touching the registry again.
pub fn init() -> anyhow::Result<()> {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
            .map_err(|error| error.to_string())
    })
    .clone()
    .map_err(|message| anyhow::anyhow!("tracing init failed: {message}"))
}
