//! The reconciliation engine

use crate::crypto::CryptoCodec;
use crate::error::{Error, Result};
use crate::hash::{hash_bytes, hash_file};
use crate::manifest::{FileRecord, FolderRecord, Manifest, ManifestCodec, MANIFEST_NAME};
use crate::store::{
    ContentStore, EntryKind, MkdirOptions, RemotePath, RemoveOptions, WriteOptions,
};
use crate::sync::{
    list_local_dir, CancelToken, EntryFailure, ExcludeFilter, LocalEntry, LocalKind, PassStats,
    SyncOptions, SyncOutcome,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One local/remote directory pair waiting to be reconciled
struct DirTask {
    local: PathBuf,
    remote: RemotePath,
    /// `local` relative to the local root
    relative: PathBuf,
}

/// What happened to one local file
enum FileOutcome {
    Unchanged(FileRecord),
    Uploaded(FileRecord),
}

/// Remote entries of one directory, split by kind
struct RemoteListing {
    files: BTreeSet<String>,
    dirs: BTreeSet<String>,
}

/// Reconciles a local tree against a remote one
pub struct Reconciler {
    store: Arc<dyn ContentStore>,
    crypto: Arc<dyn CryptoCodec>,
    manifests: ManifestCodec,
    options: SyncOptions,
    cancel: CancelToken,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ContentStore>,
        crypto: Arc<dyn CryptoCodec>,
        options: SyncOptions,
    ) -> Self {
        let manifests = ManifestCodec::new(store.clone(), crypto.clone());
        Reconciler {
            store,
            crypto,
            manifests,
            options,
            cancel: CancelToken::new(),
        }
    }

    /// Share an existing cancellation token
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Use a separate codec for manifests
    ///
    /// Needed when file blobs are encrypted to a recipient other than this
    /// device, since the manifests must stay readable here.
    pub fn with_manifest_crypto(mut self, crypto: Arc<dyn CryptoCodec>) -> Self {
        self.manifests = ManifestCodec::new(self.store.clone(), crypto);
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn manifests(&self) -> &ManifestCodec {
        &self.manifests
    }

    /// Run one full pass over the tree rooted at `local_root`
    ///
    /// Fails only if the root directory itself could not be converged.
    /// Failures below the root are reported in [`PassStats::failures`].
    pub async fn reconcile(
        &self,
        local_root: &Path,
        remote_root: &RemotePath,
    ) -> Result<SyncOutcome> {
        let started = Instant::now();
        let filter = ExcludeFilter::new(local_root, &self.options.exclude)?;

        let meta = tokio::fs::metadata(local_root)
            .await
            .map_err(|e| Error::filesystem(local_root, e))?;
        if !meta.is_dir() {
            return Err(Error::filesystem(
                local_root,
                io::Error::new(io::ErrorKind::InvalidInput, "sync root is not a directory"),
            ));
        }

        self.ensure_remote_root(remote_root).await?;

        let mut stats = PassStats::default();
        let mut root_manifest: Option<Manifest> = None;
        let mut stack = vec![DirTask {
            local: local_root.to_path_buf(),
            remote: remote_root.clone(),
            relative: PathBuf::new(),
        }];

        while let Some(task) = stack.pop() {
            if self.cancel.is_cancelled() {
                if root_manifest.is_none() {
                    return Err(Error::Cancelled);
                }
                info!("Pass cancelled, {} directories left unvisited", stack.len() + 1);
                stats.cancelled = true;
                break;
            }

            let is_root = root_manifest.is_none();
            let manifest = match self.reconcile_dir(&task, &filter, &mut stats).await {
                Ok(manifest) => manifest,
                Err(e) if is_root => return Err(e),
                Err(e) => {
                    warn!("Directory {:?} not converged: {}", task.local, e);
                    stats.failures.push(EntryFailure {
                        path: task.local.clone(),
                        kind: e.kind(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            stats.directories_synced += 1;

            // Reverse so the first folder is popped first
            for folder in manifest.folders.iter().rev() {
                match task.remote.join(&folder.folder_id) {
                    Ok(remote) => stack.push(DirTask {
                        local: task.local.join(&folder.name),
                        remote,
                        relative: task.relative.join(&folder.name),
                    }),
                    Err(e) => stats.failures.push(EntryFailure {
                        path: task.local.join(&folder.name),
                        kind: e.kind(),
                        error: e.to_string(),
                    }),
                }
            }

            if is_root {
                root_manifest = Some(manifest);
            }
        }

        Ok(SyncOutcome {
            manifest: root_manifest.unwrap_or_default(),
            stats,
            elapsed: started.elapsed(),
        })
    }

    async fn ensure_remote_root(&self, remote_root: &RemotePath) -> Result<()> {
        match self.store.list(remote_root).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                info!("Creating remote root {}", remote_root);
                self.store
                    .mkdir(remote_root, MkdirOptions { parents: true })
                    .await
            }
            Err(e) => Err(e),
        }
    }

    async fn list_remote(&self, dir: &RemotePath) -> Result<RemoteListing> {
        let mut listing = RemoteListing {
            files: BTreeSet::new(),
            dirs: BTreeSet::new(),
        };
        for entry in self.store.list(dir).await? {
            if entry.name == MANIFEST_NAME {
                continue;
            }
            match entry.kind {
                EntryKind::File => listing.files.insert(entry.name),
                EntryKind::Directory => listing.dirs.insert(entry.name),
            };
        }
        Ok(listing)
    }

    /// Converge one directory level and persist its manifest
    async fn reconcile_dir(
        &self,
        task: &DirTask,
        filter: &ExcludeFilter,
        stats: &mut PassStats,
    ) -> Result<Manifest> {
        debug!("Reconciling {:?} -> {}", task.local, task.remote);

        let previous = self.manifests.read(&task.remote).await;
        let local = list_local_dir(&task.local, &task.relative, filter).await?;
        let remote = self.list_remote(&task.remote).await?;

        let (local_files, local_dirs): (Vec<&LocalEntry>, Vec<&LocalEntry>) =
            local.iter().partition(|e| e.kind == LocalKind::File);

        let mut manifest = Manifest::new();
        let mut touched_files = HashSet::new();

        let results: Vec<(&LocalEntry, Result<FileOutcome>)> = stream::iter(local_files)
            .map(|entry| {
                let record = previous.file(&entry.name);
                let remote = &remote;
                async move {
                    (entry, self.reconcile_file(&task.remote, entry, record, remote).await)
                }
            })
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await;

        for (entry, result) in results {
            let segment = self.options.path_policy.segment(&entry.name);
            match result {
                Ok(FileOutcome::Unchanged(record)) => {
                    stats.files_unchanged += 1;
                    manifest.files.push(record);
                }
                Ok(FileOutcome::Uploaded(record)) => {
                    stats.files_uploaded += 1;
                    manifest.files.push(record);
                }
                Err(e) => {
                    warn!("Skipping {:?} this pass: {}", entry.path, e);
                    // A stale record may stay only while its blob still exists
                    if let Some(old) = previous.file(&entry.name) {
                        if remote.files.contains(&segment) {
                            manifest.files.push(old.clone());
                        }
                    }
                    stats.failures.push(EntryFailure {
                        path: entry.path.clone(),
                        kind: e.kind(),
                        error: e.to_string(),
                    });
                }
            }
            touched_files.insert(segment);
        }

        for name in remote.files.iter().filter(|n| !touched_files.contains(*n)) {
            let path = task.remote.join(name)?;
            match self.store.remove(&path, RemoveOptions::default()).await {
                Ok(()) => {
                    info!("Removed {}", path);
                    stats.files_removed += 1;
                }
                Err(e) if e.is_not_found() => debug!("{} already gone", path),
                Err(e) => {
                    warn!("Failed to remove {}: {}", path, e);
                    stats.failures.push(EntryFailure {
                        path: task.local.join(name),
                        kind: e.kind(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let mut touched_dirs = HashSet::new();
        for entry in local_dirs {
            let segment = self.options.path_policy.segment(&entry.name);
            touched_dirs.insert(segment.clone());

            if !remote.dirs.contains(&segment) {
                let created = match task.remote.join(&segment) {
                    Ok(path) => self.store.mkdir(&path, MkdirOptions { parents: true }).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = created {
                    warn!("Failed to create remote folder for {:?}: {}", entry.path, e);
                    stats.failures.push(EntryFailure {
                        path: entry.path.clone(),
                        kind: e.kind(),
                        error: e.to_string(),
                    });
                    continue;
                }
                debug!("Created folder {}/{}", task.remote, segment);
                stats.folders_created += 1;
            }

            manifest.folders.push(FolderRecord {
                name: entry.name.clone(),
                folder_id: segment,
            });
        }

        // A file may have taken over the segment of a removed folder
        let stale_dirs = remote
            .dirs
            .iter()
            .filter(|n| !touched_dirs.contains(*n) && !touched_files.contains(*n));
        for name in stale_dirs {
            let path = task.remote.join(name)?;
            match self.store.remove(&path, RemoveOptions { recursive: true }).await {
                Ok(()) => {
                    info!("Removed folder {}", path);
                    stats.folders_removed += 1;
                }
                Err(e) if e.is_not_found() => debug!("{} already gone", path),
                Err(e) => {
                    warn!("Failed to remove folder {}: {}", path, e);
                    stats.failures.push(EntryFailure {
                        path: task.local.join(name),
                        kind: e.kind(),
                        error: e.to_string(),
                    });
                }
            }
        }

        self.manifests.write(&task.remote, &manifest).await?;
        Ok(manifest)
    }

    async fn reconcile_file(
        &self,
        dir: &RemotePath,
        entry: &LocalEntry,
        previous: Option<&FileRecord>,
        remote: &RemoteListing,
    ) -> Result<FileOutcome> {
        let segment = self.options.path_policy.segment(&entry.name);
        let remote_path = dir.join(&segment)?;
        let remote_present = remote.files.contains(&segment);

        let meta = tokio::fs::metadata(&entry.path)
            .await
            .map_err(|e| Error::filesystem(&entry.path, e))?;
        let modified: DateTime<Utc> = meta
            .modified()
            .map_err(|e| Error::filesystem(&entry.path, e))?
            .into();
        let mime_type = mime_guess::from_path(&entry.name)
            .first()
            .map(|mime| mime.essence_str().to_string());

        if let Some(record) = previous.filter(|_| remote_present) {
            let local_same = record.modified == modified
                || hash_file(entry.path.clone()).await? == record.content_hash;

            if local_same {
                if self.blob_matches(&remote_path, record).await? {
                    debug!("{:?} unchanged", entry.path);
                    return Ok(FileOutcome::Unchanged(FileRecord {
                        mime_type,
                        modified,
                        ..record.clone()
                    }));
                }
                warn!("Remote blob {} no longer matches its record, uploading again", remote_path);
            }
        }

        if remote.dirs.contains(&segment) {
            debug!("Replacing remote folder {} with a file", remote_path);
            self.store
                .remove(&remote_path, RemoveOptions { recursive: true })
                .await?;
        }

        let data = tokio::fs::read(&entry.path)
            .await
            .map_err(|e| Error::filesystem(&entry.path, e))?;
        // Hash what is actually uploaded; the file may have changed since stat
        let content_hash = hash_bytes(&data);
        let size = data.len();

        let crypto = self.crypto.clone();
        let name = entry.name.clone();
        let sealed = tokio::task::spawn_blocking(move || crypto.encrypt(&name, &data))
            .await
            .map_err(|e| Error::Internal(format!("Encrypt task failed: {}", e)))??;

        let content_id = match self
            .store
            .write(&remote_path, Bytes::from(sealed), WriteOptions::OVERWRITE)
            .await?
        {
            Some(id) => id,
            None => self.store.stat(&remote_path).await?.content_id,
        };

        info!("Uploaded {:?} ({} bytes) to {}", entry.path, size, remote_path);
        Ok(FileOutcome::Uploaded(FileRecord {
            filename: entry.name.clone(),
            content_hash,
            mime_type,
            content_id,
            modified,
        }))
    }

    /// Whether the blob at `path` is still the one `record` points to
    async fn blob_matches(&self, path: &RemotePath, record: &FileRecord) -> Result<bool> {
        match self.store.stat(path).await {
            Ok(stat) => Ok(stat.kind == EntryKind::File && stat.content_id == record.content_id),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
