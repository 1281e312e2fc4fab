//! Shutdown drain: flush every open store once before the process exits.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures_util::future::join_all;
use tracing::{error, info, warn};

use crate::storage::registry::StoreRegistry;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub flushed: Vec<String>,
    pub failed: Vec<String>,
    pub timed_out: bool,
    /// Set when a drain had already been started; nothing was done.
    pub skipped: bool,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        !self.skipped && !self.timed_out && self.failed.is_empty()
    }
}

pub struct ShutdownDrain {
    registry: Arc<StoreRegistry>,
    timeout: Duration,
    started: AtomicBool,
}

impl ShutdownDrain {
    pub fn new(registry: Arc<StoreRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout, started: AtomicBool::new(false) }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Wait out every queued mutation and force a final write per store.
    ///
    /// Only the first call does anything. Failures are logged and reported,
    /// never retried here; the whole drain is bounded by the timeout so the
    /// process can always exit.
    pub async fn drain(&self) -> DrainReport {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("shutdown drain already started, ignoring");
            return DrainReport { skipped: true, ..DrainReport::default() };
        }

        let stores = self.registry.stores();
        info!(stores = stores.len(), "draining stores");
        let flushes = stores.iter().map(|store| async move {
            let key = store.key().to_string();
            let result = store.close().await;
            (key, result)
        });

        let mut report = DrainReport::default();
        match tokio::time::timeout(self.timeout, join_all(flushes)).await {
            Ok(results) => {
                for (key, result) in results {
                    match result {
                        Ok(()) => report.flushed.push(key),
                        Err(e) => {
                            error!(%key, error = %e, "final flush failed, latest changes may be lost");
                            report.failed.push(key);
                        }
                    }
                }
            }
            Err(_) => {
                error!(timeout_secs = self.timeout.as_secs_f64(), "shutdown drain timed out, latest changes may be lost");
                report.timed_out = true;
            }
        }
        info!(flushed = report.flushed.len(), failed = report.failed.len(), "drain finished");
        report
    }
}

/// Resolves on the first termination signal (Ctrl+C, or SIGTERM on unix).
pub async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
