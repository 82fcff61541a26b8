//! Reconciliation of a local tree against the remote store
//!
//! A pass walks the local tree depth-first. For every directory it loads the
//! previous manifest, uploads changed files, tombstones remote entries that
//! no longer exist locally, rewrites the manifest and then descends into
//! the subfolders in manifest order.

mod driver;
mod engine;
mod local;
mod policy;

pub use driver::SyncDriver;
pub use engine::Reconciler;
pub use local::{list_local_dir, LocalEntry, LocalKind};
pub use policy::{ExcludeFilter, PathPolicy};

use crate::error::ErrorKind;
use crate::manifest::Manifest;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Default number of files reconciled concurrently within one directory
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Tunables for a [`Reconciler`]
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub path_policy: PathPolicy,
    pub concurrency: usize,
    /// Gitignore-style patterns, relative to the local root
    pub exclude: Vec<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            path_policy: PathPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
            exclude: Vec::new(),
        }
    }
}

/// An entry skipped during a pass; it is retried on the next one
#[derive(Debug, Clone)]
pub struct EntryFailure {
    pub path: PathBuf,
    pub kind: ErrorKind,
    pub error: String,
}

/// Counters for one pass
#[derive(Debug, Clone, Default)]
pub struct PassStats {
    pub directories_synced: usize,
    pub files_uploaded: usize,
    pub files_unchanged: usize,
    pub files_removed: usize,
    pub folders_created: usize,
    pub folders_removed: usize,
    pub failures: Vec<EntryFailure>,
    /// The pass stopped early after completing the root
    pub cancelled: bool,
}

/// Result of a pass that converged at least the root directory
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// Manifest written for the root
    pub manifest: Manifest,
    pub stats: PassStats,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation shared between a driver and its passes
///
/// A running pass finishes the directory it is working on, including its
/// manifest write, and then stops descending.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
