//! Automatic failover between a primary and a secondary cache backend.
//!
//! The orchestrator holds a single atomic mode flag. Each operation reads the
//! flag, runs against the selected backend and, if that attempt fails while
//! in [`CacheMode::Primary`], flips to [`CacheMode::Fallback`] and retries the
//! same operation once against the secondary. Only the background health
//! check moves the mode back to `Primary`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::CacheBackend;
use crate::{CacheError, CacheResult, DynCacheBackend};

/// Which backend currently serves operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CacheMode {
    Primary = 0,
    Fallback = 1,
}

impl CacheMode {
    fn from_u8(value: u8) -> Self {
        if value == CacheMode::Fallback as u8 {
            CacheMode::Fallback
        } else {
            CacheMode::Primary
        }
    }
}

impl std::fmt::Display for CacheMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheMode::Primary => write!(f, "primary"),
            CacheMode::Fallback => write!(f, "fallback"),
        }
    }
}

/// Timing knobs for [`FailoverCache`].
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Interval between primary health checks.
    pub health_check_interval: Duration,
    /// Bound on a single primary ping.
    pub ping_timeout: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(5),
        }
    }
}

struct FailoverState {
    primary: DynCacheBackend,
    secondary: DynCacheBackend,
    mode: AtomicU8,
    ping_timeout: Duration,
}

impl FailoverState {
    #[inline]
    fn mode(&self) -> CacheMode {
        CacheMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    #[inline]
    fn active(&self, mode: CacheMode) -> &DynCacheBackend {
        match mode {
            CacheMode::Primary => &self.primary,
            CacheMode::Fallback => &self.secondary,
        }
    }

    /// Switch to fallback after a failed primary operation.
    fn fail_over(&self, operation: &'static str, error: &CacheError) {
        if self
            .mode
            .compare_exchange(
                CacheMode::Primary as u8,
                CacheMode::Fallback as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            tracing::warn!(
                operation,
                primary = self.primary.name(),
                secondary = self.secondary.name(),
                error = %error,
                "primary cache failed, switching to fallback"
            );
        }
    }

    async fn ping_primary(&self) -> CacheResult<()> {
        match tokio::time::timeout(self.ping_timeout, self.primary.ping()).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                timeout: self.ping_timeout,
            }),
        }
    }

    async fn check_primary(&self) -> CacheMode {
        let result = self.ping_primary().await;
        match (self.mode(), result) {
            (CacheMode::Primary, Err(e)) => {
                self.mode
                    .store(CacheMode::Fallback as u8, Ordering::Release);
                tracing::warn!(
                    primary = self.primary.name(),
                    error = %e,
                    "primary cache health check failed, switching to fallback"
                );
            }
            (CacheMode::Fallback, Ok(())) => {
                self.mode.store(CacheMode::Primary as u8, Ordering::Release);
                tracing::info!(
                    primary = self.primary.name(),
                    "primary cache recovered, switching back"
                );
            }
            (CacheMode::Fallback, Err(e)) => {
                tracing::debug!(error = %e, "primary cache still unavailable");
            }
            (CacheMode::Primary, Ok(())) => {}
        }
        self.mode()
    }
}

/// Runs an operation against the active backend, retrying once on the
/// secondary when the primary fails.
macro_rules! with_failover {
    ($self:ident, $op:literal, |$backend:ident| $call:expr) => {{
        let state = &$self.state;
        let mode = state.mode();
        let $backend = state.active(mode);
        match $call.await {
            Ok(value) => Ok(value),
            Err(e) if mode == CacheMode::Primary => {
                state.fail_over($op, &e);
                let $backend = &state.secondary;
                $call.await
            }
            Err(e) => Err(e),
        }
    }};
}

/// Cache backend that fails over from a primary to a secondary backend.
pub struct FailoverCache {
    state: Arc<FailoverState>,
    shutdown: watch::Sender<bool>,
    health_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl FailoverCache {
    /// Ping the primary once, pick the initial mode and start the health check.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn new(
        primary: DynCacheBackend,
        secondary: DynCacheBackend,
        config: FailoverConfig,
    ) -> Self {
        let state = Arc::new(FailoverState {
            primary,
            secondary,
            mode: AtomicU8::new(CacheMode::Primary as u8),
            ping_timeout: config.ping_timeout,
        });

        if let Err(e) = state.ping_primary().await {
            state
                .mode
                .store(CacheMode::Fallback as u8, Ordering::Release);
            tracing::warn!(
                primary = state.primary.name(),
                secondary = state.secondary.name(),
                error = %e,
                "primary cache unavailable at startup, starting in fallback mode"
            );
        } else {
            tracing::info!(primary = state.primary.name(), "cache failover started");
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_health_check(
            state.clone(),
            config.health_check_interval,
            shutdown_rx,
        ));

        Self {
            state,
            shutdown,
            health_task: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
        }
    }

    /// Current serving mode.
    pub fn mode(&self) -> CacheMode {
        self.state.mode()
    }

    /// Run one health check immediately and return the resulting mode.
    pub async fn check_primary(&self) -> CacheMode {
        self.state.check_primary().await
    }
}

impl Drop for FailoverCache {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn run_health_check(
    state: Arc<FailoverState>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The startup ping already covered the first tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                state.check_primary().await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::debug!("cache health check stopped");
}

#[async_trait]
impl CacheBackend for FailoverCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        with_failover!(self, "get", |backend| backend.get(key))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()> {
        let state = &self.state;
        let mode = state.mode();
        if mode == CacheMode::Fallback {
            return state.secondary.set(key, value, ttl).await;
        }

        match state.primary.set(key, value.clone(), ttl).await {
            Ok(()) => Ok(()),
            Err(e) => {
                state.fail_over("set", &e);
                state.secondary.set(key, value, ttl).await
            }
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        with_failover!(self, "delete", |backend| backend.delete(key))
    }

    async fn delete_by_prefix(&self, prefix: &str) -> CacheResult<()> {
        with_failover!(self, "delete_by_prefix", |backend| backend
            .delete_by_prefix(prefix))
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        with_failover!(self, "exists", |backend| backend.exists(key))
    }

    async fn increment(&self, key: &str) -> CacheResult<i64> {
        with_failover!(self, "increment", |backend| backend.increment(key))
    }

    async fn increment_with_expire(&self, key: &str, ttl: Duration) -> CacheResult<i64> {
        with_failover!(self, "increment_with_expire", |backend| backend
            .increment_with_expire(key, ttl))
    }

    async fn ping(&self) -> CacheResult<()> {
        self.state.active(self.state.mode()).ping().await
    }

    fn is_available(&self) -> bool {
        self.state.active(self.state.mode()).is_available()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self.shutdown.send(true);
        let handle = self.health_task.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "cache health check task failed");
        }

        self.state.primary.close().await;
        self.state.secondary.close().await;
        tracing::info!("cache failover closed");
    }

    fn is_degraded(&self) -> bool {
        self.mode() == CacheMode::Fallback
    }

    fn name(&self) -> &'static str {
        "failover"
    }
}
