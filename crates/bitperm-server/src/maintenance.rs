//! Periodic permission-cache maintenance.
//!
//! Each run purges expired cache rows through the active strategy and drops
//! per-user locks that nobody holds.

use std::sync::Arc;
use std::time::Duration;

use bitperm_rbac::{PermissionCache, RbacResult, UserLocks};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// Outcome of one maintenance run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub purged_rows: u64,
    pub pruned_locks: usize,
}

/// Background maintenance of the permission cache.
pub struct MaintenanceTask {
    cache: Arc<dyn PermissionCache>,
    locks: Arc<UserLocks>,
    interval: Duration,
}

impl MaintenanceTask {
    pub fn new(cache: Arc<dyn PermissionCache>, locks: Arc<UserLocks>, interval: Duration) -> Self {
        Self {
            cache,
            locks,
            interval,
        }
    }

    /// Run one maintenance pass.
    pub async fn run_once(&self) -> RbacResult<MaintenanceReport> {
        let purged_rows = self.cache.purge_expired().await?;
        let pruned_locks = self.locks.prune();
        Ok(MaintenanceReport {
            purged_rows,
            pruned_locks,
        })
    }

    /// Start the task in the background.
    ///
    /// The first run happens one interval after start.
    pub fn start(self) -> MaintenanceHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                strategy = self.cache.name(),
                "Permission cache maintenance started"
            );

            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.run_once().await {
                            Ok(report) if report != MaintenanceReport::default() => {
                                debug!(
                                    purged_rows = report.purged_rows,
                                    pruned_locks = report.pruned_locks,
                                    "Permission cache maintenance run"
                                );
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "Permission cache maintenance failed"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("Permission cache maintenance shutting down");
                            break;
                        }
                    }
                }
            }
        });

        MaintenanceHandle {
            shutdown: shutdown_tx,
            handle,
        }
    }
}

/// Handle to a running [`MaintenanceTask`].
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Signal the task and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Permission cache maintenance task ended abnormally");
        }
    }
}
