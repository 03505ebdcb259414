//! Tracing setup for the BitPerm service.
//!
//! The configured level applies to the BitPerm crates. Connection pool and
//! driver crates are capped at `warn` so a `debug` level shows permission
//! and cache decisions without per-query noise. `RUST_LOG`, when set, replaces
//! the whole filter.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

/// Dependencies that are capped at `warn`.
const QUIET_TARGETS: [&str; 4] = ["sqlx", "sqlx_core", "sqlx_postgres", "deadpool_redis"];

/// Filter directives for `level`.
pub fn filter_directives(level: &str) -> String {
    let level = level.to_ascii_lowercase();
    if matches!(level.as_str(), "off" | "error" | "warn") {
        return level;
    }
    let mut directives = level;
    for target in QUIET_TARGETS {
        directives.push(',');
        directives.push_str(target);
        directives.push_str("=warn");
    }
    directives
}

pub fn init_tracing() {
    init_tracing_with_level("info");
}

pub fn init_tracing_with_level(level: &str) {
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(filter_directives(level)));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Switches to the configured level. No-op before [`init_tracing`] or when
/// `RUST_LOG` is set.
pub fn apply_logging_level(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    let Some(handle) = LOG_RELOAD_HANDLE.get() else {
        return;
    };
    let directives = filter_directives(level);
    match handle.modify(|f| *f = EnvFilter::new(&directives)) {
        Ok(()) => tracing::debug!(filter = %directives, "log filter updated"),
        Err(e) => tracing::warn!(error = %e, "failed to update log filter"),
    }
}
