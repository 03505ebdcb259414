//! In-process cache backend.
//!
//! Entries live in a [`DashMap`] with an optional absolute deadline. Reads
//! perform lazy expiry and a background task sweeps expired entries on a
//! fixed interval so memory stays bounded even for keys that are never read
//! again.
//!
//! Counters are kept in a second map. Incrementing a key that holds a plain
//! integer value moves it into the counter map, keeping its deadline; any other
//! value is rejected. A counter touched by [`increment_with_expire`](CacheBackend::increment_with_expire)
//! shares its deadline with the `"{key}:expire"` marker entry: once the window
//! passes, the next increment starts again at 1. Counters created by plain
//! `increment` never expire.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::{CacheBackend, effective_ttl};
use crate::{CacheError, CacheResult};

/// Default interval between background sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Suffix of the marker entry written by `increment_with_expire`.
const EXPIRE_MARKER_SUFFIX: &str = ":expire";

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// Absolute deadline for `ttl`. `None` means the entry never expires, which
/// also covers a TTL too large for `Instant` to represent.
fn deadline(now: Instant, ttl: Option<Duration>) -> Option<Instant> {
    effective_ttl(ttl).and_then(|ttl| now.checked_add(ttl))
}

fn parse_counter(value: &[u8]) -> CacheResult<i64> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| CacheError::backend("value is not an integer or out of range"))
}

impl Entry {
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: deadline(Instant::now(), ttl),
        }
    }

    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    value: i64,
    expires_at: Option<Instant>,
}

impl Counter {
    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct Store {
    entries: DashMap<String, Entry>,
    counters: DashMap<String, Counter>,
    closed: AtomicBool,
}

impl Store {
    fn ensure_open(&self) -> CacheResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(CacheError::Closed)
        } else {
            Ok(())
        }
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len() + self.counters.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        self.counters.retain(|_, counter| !counter.is_expired(now));
        before.saturating_sub(self.entries.len() + self.counters.len())
    }

    fn bump(&self, key: &str, expires_at: Option<Option<Instant>>) -> CacheResult<i64> {
        let now = Instant::now();
        let seed = match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => None,
            Some(entry) => Some(Counter {
                value: parse_counter(&entry.value)?,
                expires_at: entry.expires_at,
            }),
            None => None,
        };
        self.entries.remove(key);

        let mut counter = self.counters.entry(key.to_string()).or_insert(Counter {
            value: 0,
            expires_at: None,
        });
        if let Some(seed) = seed {
            *counter = seed;
        }
        if counter.is_expired(now) {
            counter.value = 0;
            counter.expires_at = None;
        }
        counter.value = counter
            .value
            .checked_add(1)
            .ok_or_else(|| CacheError::backend("increment would overflow"))?;
        if let Some(expires_at) = expires_at {
            counter.expires_at = expires_at;
        }
        Ok(counter.value)
    }
}

/// Local expiring key-value cache.
pub struct MemoryCache {
    store: Arc<Store>,
    shutdown: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryCache {
    /// Create a cache that sweeps expired entries every [`DEFAULT_SWEEP_INTERVAL`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    /// Create a cache with a custom sweep interval.
    pub fn with_sweep_interval(interval: Duration) -> Self {
        let store = Arc::new(Store::default());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_sweeper(store.clone(), interval, shutdown_rx));

        Self {
            store,
            shutdown,
            sweeper: Mutex::new(Some(handle)),
        }
    }

    /// Remove every expired entry and counter now, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired()
    }

    /// Number of entries currently held, including counters and not yet swept ones.
    pub fn len(&self) -> usize {
        self.store.entries.len() + self.store.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn run_sweeper(store: Arc<Store>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = store.purge_expired();
                if removed > 0 {
                    tracing::debug!(removed, "memory cache sweep removed expired entries");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::debug!("memory cache sweeper stopped");
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.store.ensure_open()?;
        let now = Instant::now();

        if let Some(entry) = self.store.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            self.store
                .entries
                .remove_if(key, |_, entry| entry.is_expired(now));
            return Ok(None);
        }

        if let Some(counter) = self.store.counters.get(key) {
            if !counter.is_expired(now) {
                return Ok(Some(counter.value.to_string().into_bytes()));
            }
            drop(counter);
            self.store
                .counters
                .remove_if(key, |_, counter| counter.is_expired(now));
        }

        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()> {
        self.store.ensure_open()?;
        self.store.counters.remove(key);
        self.store
            .entries
            .insert(key.to_string(), Entry::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.store.ensure_open()?;
        self.store.entries.remove(key);
        self.store.counters.remove(key);
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> CacheResult<()> {
        self.store.ensure_open()?;
        self.store.entries.retain(|key, _| !key.starts_with(prefix));
        self.store.counters.retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn increment(&self, key: &str) -> CacheResult<i64> {
        self.store.ensure_open()?;
        self.store.bump(key, None)
    }

    async fn increment_with_expire(&self, key: &str, ttl: Duration) -> CacheResult<i64> {
        self.store.ensure_open()?;
        let expires_at = deadline(Instant::now(), Some(ttl));
        let value = self.store.bump(key, Some(expires_at))?;

        self.store.entries.insert(
            format!("{key}{EXPIRE_MARKER_SUFFIX}"),
            Entry {
                value: b"1".to_vec(),
                expires_at,
            },
        );

        Ok(value)
    }

    async fn ping(&self) -> CacheResult<()> {
        self.store.ensure_open()
    }

    fn is_available(&self) -> bool {
        !self.store.closed.load(Ordering::Acquire)
    }

    async fn close(&self) {
        if self.store.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self.shutdown.send(true);
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "memory cache sweeper task failed");
        }

        self.store.entries.clear();
        self.store.counters.clear();
        tracing::debug!("memory cache closed");
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
