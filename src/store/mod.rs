//! Content store adapters
//!
//! The reconciliation engine only talks to the remote side through the
//! [`ContentStore`] trait: a mutable, path-addressed view over a
//! content-addressed store. Paths are logical, slash-separated and rooted
//! at `/`.

mod local;
mod memory;
mod path;
mod retry;

pub use local::LocalStore;
pub use memory::{MemoryStore, StoreOp};
pub use path::RemotePath;
pub use retry::{ExponentialBackoff, RetryingStore};

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name prefix a store may use for its own bookkeeping entries
///
/// Entries with this prefix never appear in listings, so local entries
/// carrying it cannot be mirrored.
pub const RESERVED_PREFIX: &str = ".cm-tmp-";

/// Kind of an entry in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// An entry currently present under a remote directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// Opaque identifier the store assigns to stored bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(pub String);

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stat result for a remote path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStat {
    pub content_id: ContentId,
    pub kind: EntryKind,
    pub size: u64,
}

/// Blob write flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Create the blob if it does not exist
    pub create: bool,
    /// Replace existing content instead of failing
    pub truncate: bool,
}

impl WriteOptions {
    /// Create-if-absent, truncate-if-present
    pub const OVERWRITE: WriteOptions = WriteOptions {
        create: true,
        truncate: true,
    };
}

/// Directory creation flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MkdirOptions {
    /// Create missing parents, and succeed if the directory already exists
    pub parents: bool,
}

/// Removal flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Remove directories together with their contents
    pub recursive: bool,
}

/// Path-addressed view over a remote content store
///
/// Implementations must not hang: slow operations surface as errors. A
/// blob write either lands completely or leaves the previous blob readable.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// List the direct children of a directory
    async fn list(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>>;

    /// Read a whole blob
    async fn read(&self, path: &RemotePath) -> Result<Bytes>;

    /// Write a whole blob; returns its content id when the store reports one
    async fn write(
        &self,
        path: &RemotePath,
        data: Bytes,
        options: WriteOptions,
    ) -> Result<Option<ContentId>>;

    /// Create a directory
    async fn mkdir(&self, path: &RemotePath, options: MkdirOptions) -> Result<()>;

    /// Remove a blob or directory
    async fn remove(&self, path: &RemotePath, options: RemoveOptions) -> Result<()>;

    /// Describe the entry at a path
    async fn stat(&self, path: &RemotePath) -> Result<StoreStat>;
}

/// Content id of a directory listing: digest over sorted `kind:name:id` lines
pub(crate) fn directory_content_id<'a>(
    children: impl IntoIterator<Item = (&'a str, EntryKind, &'a ContentId)>,
) -> ContentId {
    let mut lines: Vec<String> = children
        .into_iter()
        .map(|(name, kind, id)| format!("{:?}:{}:{}", kind, name, id))
        .collect();
    lines.sort();
    ContentId(crate::hash::hash_bytes(lines.join("\n").as_bytes()))
}
