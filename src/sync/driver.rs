//! Periodic pass scheduling

use crate::error::{Error, Result};
use crate::store::RemotePath;
use crate::sync::{Reconciler, SyncOutcome};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

/// Runs passes of a [`Reconciler`] one after another on a fixed interval
pub struct SyncDriver {
    reconciler: Reconciler,
    local_root: PathBuf,
    remote_root: RemotePath,
    interval: Duration,
}

impl SyncDriver {
    pub fn new(
        reconciler: Reconciler,
        local_root: PathBuf,
        remote_root: RemotePath,
        interval: Duration,
    ) -> Self {
        SyncDriver {
            reconciler,
            local_root,
            remote_root,
            interval,
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Run a single pass and log its summary
    pub async fn run_once(&self) -> Result<SyncOutcome> {
        info!("Sync pass {:?} -> {}", self.local_root, self.remote_root);
        let outcome = self
            .reconciler
            .reconcile(&self.local_root, &self.remote_root)
            .await?;

        let stats = &outcome.stats;
        info!(
            "Pass finished in {:?}: {} dirs, {} uploaded, {} unchanged, {} removed, {} folders created, {} folders removed",
            outcome.elapsed,
            stats.directories_synced,
            stats.files_uploaded,
            stats.files_unchanged,
            stats.files_removed,
            stats.folders_created,
            stats.folders_removed,
        );
        if !stats.failures.is_empty() {
            warn!("{} entries skipped, retrying next pass", stats.failures.len());
        }
        Ok(outcome)
    }

    /// Run passes until the reconciler's cancel token fires
    ///
    /// A failed pass is logged and retried after the interval; passes never
    /// overlap.
    pub async fn run(&self) {
        let cancel = self.reconciler.cancel_token();
        let mut passes: u64 = 0;

        loop {
            passes += 1;
            match self.run_once().await {
                Ok(outcome) if outcome.stats.cancelled => break,
                Ok(_) => {}
                Err(Error::Cancelled) => break,
                Err(e) => error!("Sync pass failed: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancel.cancelled() => break,
            }
        }

        info!("Sync loop stopped after {} passes", passes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{EnvelopeCodec, Identity};
    use crate::store::MemoryStore;
    use crate::sync::SyncOptions;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn driver(local: PathBuf, store: Arc<MemoryStore>, interval: Duration) -> SyncDriver {
        let crypto = Arc::new(EnvelopeCodec::for_self(Arc::new(Identity::generate().unwrap())));
        let reconciler = Reconciler::new(store, crypto, SyncOptions::default());
        SyncDriver::new(reconciler, local, RemotePath::parse("/files").unwrap(), interval)
    }

    #[tokio::test]
    async fn test_run_once() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let store = Arc::new(MemoryStore::new());

        let outcome = driver(dir.path().to_path_buf(), store.clone(), Duration::from_secs(10))
            .run_once()
            .await
            .unwrap();
        assert_eq!(outcome.stats.files_uploaded, 1);
        assert!(store.contains_file(&RemotePath::parse("/files/a.txt").unwrap()));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let store = Arc::new(MemoryStore::new());
        let driver = driver(dir.path().to_path_buf(), store.clone(), Duration::from_millis(10));

        let cancel = driver.reconciler().cancel_token();
        let stopper = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        };

        tokio::time::timeout(Duration::from_secs(10), async {
            tokio::join!(driver.run(), stopper)
        })
        .await
        .unwrap();
        assert!(store.contains_file(&RemotePath::parse("/files/a.txt").unwrap()));
    }

    #[tokio::test]
    async fn test_failed_pass_does_not_stop_loop() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        // local root does not exist, every pass fails
        let driver = driver(dir.path().join("missing"), store, Duration::from_millis(5));

        let cancel = driver.reconciler().cancel_token();
        let stopper = async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            cancel.cancel();
        };

        tokio::time::timeout(Duration::from_secs(10), async {
            tokio::join!(driver.run(), stopper)
        })
        .await
        .unwrap();
    }
}
