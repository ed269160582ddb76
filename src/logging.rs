use anyhow::Context as _;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Server default: request spans from the HTTP layer as well.
pub const SERVER_FILTER: &str = "info,tower_http=debug";

pub fn init() -> anyhow::Result<()> {
    init_with_default(DEFAULT_FILTER)
}

/// Installs the stderr subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_with_default(default_filter: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_filter))
        .with_context(|| format!("build log filter from {default_filter:?}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("initialize tracing subscriber: {err}"))?;

    Ok(())
}
