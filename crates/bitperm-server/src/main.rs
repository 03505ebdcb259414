use std::env;

use anyhow::Context;
use bitperm_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};
use bitperm_server::{AppContainer, ServiceHealth, observability};

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From BITPERM_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (bitperm.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (BITPERM_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    observability::init_tracing();

    let (config_path, source) = resolve_config_path();
    let cfg = load_config(Some(config_path.as_str()))
        .with_context(|| format!("loading configuration from {config_path}"))?;

    tracing::info!(
        path = %config_path,
        source = %source,
        "Configuration loaded"
    );
    observability::apply_logging_level(&cfg.logging.level);

    let container = AppContainer::build(cfg)
        .await
        .context("service initialization failed")?;

    let health = ServiceHealth::collect(&container).await;
    tracing::info!(
        status = ?health.status,
        cache = health.cache.backend,
        cache_degraded = health.cache.is_degraded,
        strategy = health.strategy,
        "BitPerm started"
    );
    if let Ok(report) = serde_json::to_string(&health) {
        tracing::debug!(report = %report, "Startup health report");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    container.shutdown().await;
    Ok(())
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: BITPERM_CONFIG
/// 3. Default: bitperm.toml
fn resolve_config_path() -> (String, ConfigSource) {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config"
            && let Some(path) = args.next()
        {
            return (path, ConfigSource::CliArgument);
        }
    }

    if let Ok(path) = env::var("BITPERM_CONFIG")
        && !path.is_empty()
    {
        return (path, ConfigSource::EnvironmentVariable);
    }

    (DEFAULT_CONFIG_PATH.to_string(), ConfigSource::Default)
}
