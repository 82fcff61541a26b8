//! In-memory content store
//!
//! Keeps the whole tree in a map and records every mutating operation, which
//! makes it the store of choice for tests and dry runs. Individual paths can
//! be told to fail reads or writes.

use crate::error::{Error, Result};
use crate::hash::hash_bytes;
use crate::store::{
    directory_content_id, ContentId, ContentStore, EntryKind, MkdirOptions, RemoteEntry,
    RemotePath, RemoveOptions, StoreStat, WriteOptions,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

/// A mutating operation observed by a [`MemoryStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Write(RemotePath),
    Mkdir(RemotePath),
    Remove(RemotePath),
}

#[derive(Debug, Clone)]
enum Node {
    Directory,
    File(Bytes),
}

/// [`ContentStore`] held entirely in memory
pub struct MemoryStore {
    nodes: RwLock<BTreeMap<RemotePath, Node>>,
    ops: Mutex<Vec<StoreOp>>,
    fail_writes: RwLock<HashSet<RemotePath>>,
    fail_reads: RwLock<HashSet<RemotePath>>,
    report_write_ids: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store containing only the root directory
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(RemotePath::root(), Node::Directory);

        MemoryStore {
            nodes: RwLock::new(nodes),
            ops: Mutex::new(Vec::new()),
            fail_writes: RwLock::new(HashSet::new()),
            fail_reads: RwLock::new(HashSet::new()),
            report_write_ids: AtomicBool::new(true),
        }
    }

    /// Drain the recorded operations
    pub fn take_ops(&self) -> Vec<StoreOp> {
        std::mem::take(&mut *self.ops.lock())
    }

    /// Make writes to `path` fail until cleared
    pub fn fail_writes_to(&self, path: RemotePath) {
        self.fail_writes.write().insert(path);
    }

    /// Make reads of `path` fail until cleared
    pub fn fail_reads_of(&self, path: RemotePath) {
        self.fail_reads.write().insert(path);
    }

    /// Clear all injected failures
    pub fn clear_failures(&self) {
        self.fail_writes.write().clear();
        self.fail_reads.write().clear();
    }

    /// Whether `write` reports content ids (callers must `stat` otherwise)
    pub fn set_report_write_ids(&self, enabled: bool) {
        self.report_write_ids.store(enabled, Ordering::SeqCst);
    }

    /// Whether a blob exists at `path`
    pub fn contains_file(&self, path: &RemotePath) -> bool {
        matches!(self.nodes.read().get(path), Some(Node::File(_)))
    }

    /// Whether a directory exists at `path`
    pub fn contains_dir(&self, path: &RemotePath) -> bool {
        matches!(self.nodes.read().get(path), Some(Node::Directory))
    }

    /// All blob paths, sorted
    pub fn file_paths(&self) -> Vec<RemotePath> {
        self.nodes
            .read()
            .iter()
            .filter(|(_, node)| matches!(node, Node::File(_)))
            .map(|(path, _)| path.clone())
            .collect()
    }

    fn record(&self, op: StoreOp) {
        self.ops.lock().push(op);
    }

    fn children(nodes: &BTreeMap<RemotePath, Node>, dir: &RemotePath) -> Vec<(String, Node)> {
        nodes
            .iter()
            .filter(|(path, _)| path.parent().as_ref() == Some(dir))
            .filter_map(|(path, node)| path.file_name().map(|name| (name.to_string(), node.clone())))
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn list(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>> {
        let nodes = self.nodes.read();
        match nodes.get(path) {
            Some(Node::Directory) => {}
            Some(Node::File(_)) => return Err(Error::store(path, "not a directory")),
            None => return Err(Error::StoreNotFound(path.to_string())),
        }

        Ok(Self::children(&nodes, path)
            .into_iter()
            .map(|(name, node)| RemoteEntry {
                name,
                kind: match node {
                    Node::Directory => EntryKind::Directory,
                    Node::File(_) => EntryKind::File,
                },
            })
            .collect())
    }

    async fn read(&self, path: &RemotePath) -> Result<Bytes> {
        if self.fail_reads.read().contains(path) {
            return Err(Error::store(path, "injected read failure"));
        }

        match self.nodes.read().get(path) {
            Some(Node::File(data)) => Ok(data.clone()),
            Some(Node::Directory) => Err(Error::store(path, "is a directory")),
            None => Err(Error::StoreNotFound(path.to_string())),
        }
    }

    async fn write(
        &self,
        path: &RemotePath,
        data: Bytes,
        options: WriteOptions,
    ) -> Result<Option<ContentId>> {
        if self.fail_writes.read().contains(path) {
            return Err(Error::store(path, "injected write failure"));
        }

        let parent = path
            .parent()
            .ok_or_else(|| Error::store(path, "cannot write to the store root"))?;

        let mut nodes = self.nodes.write();
        match nodes.get(&parent) {
            Some(Node::Directory) => {}
            Some(Node::File(_)) => return Err(Error::store(&parent, "parent is not a directory")),
            None => return Err(Error::StoreNotFound(parent.to_string())),
        }

        match nodes.get(path) {
            Some(Node::Directory) => return Err(Error::store(path, "a directory exists at this path")),
            Some(Node::File(_)) if !options.truncate => {
                return Err(Error::store(path, "blob exists and truncate is not set"));
            }
            None if !options.create => return Err(Error::StoreNotFound(path.to_string())),
            _ => {}
        }

        let id = ContentId(hash_bytes(&data));
        nodes.insert(path.clone(), Node::File(data));
        drop(nodes);

        self.record(StoreOp::Write(path.clone()));
        if self.report_write_ids.load(Ordering::SeqCst) {
            Ok(Some(id))
        } else {
            Ok(None)
        }
    }

    async fn mkdir(&self, path: &RemotePath, options: MkdirOptions) -> Result<()> {
        let mut nodes = self.nodes.write();

        if options.parents {
            let mut current = RemotePath::root();
            for segment in path.segments() {
                current = current.join(segment)?;
                match nodes.get(&current) {
                    Some(Node::Directory) => {}
                    Some(Node::File(_)) => {
                        return Err(Error::store(&current, "a blob exists at this path"));
                    }
                    None => {
                        nodes.insert(current.clone(), Node::Directory);
                    }
                }
            }
        } else {
            if nodes.contains_key(path) {
                return Err(Error::store(path, "already exists"));
            }
            let parent = path
                .parent()
                .ok_or_else(|| Error::store(path, "root already exists"))?;
            if !matches!(nodes.get(&parent), Some(Node::Directory)) {
                return Err(Error::StoreNotFound(parent.to_string()));
            }
            nodes.insert(path.clone(), Node::Directory);
        }
        drop(nodes);

        self.record(StoreOp::Mkdir(path.clone()));
        Ok(())
    }

    async fn remove(&self, path: &RemotePath, options: RemoveOptions) -> Result<()> {
        if path.is_root() {
            return Err(Error::store(path, "refusing to remove the store root"));
        }

        let mut nodes = self.nodes.write();
        match nodes.get(path) {
            None => return Err(Error::StoreNotFound(path.to_string())),
            Some(Node::Directory) => {
                let has_children = nodes.keys().any(|p| p != path && p.starts_with(path));
                if has_children && !options.recursive {
                    return Err(Error::store(path, "directory not empty"));
                }
            }
            Some(Node::File(_)) => {}
        }

        nodes.retain(|p, _| !p.starts_with(path));
        drop(nodes);

        self.record(StoreOp::Remove(path.clone()));
        Ok(())
    }

    async fn stat(&self, path: &RemotePath) -> Result<StoreStat> {
        let nodes = self.nodes.read();
        match nodes.get(path) {
            Some(Node::File(data)) => Ok(StoreStat {
                content_id: ContentId(hash_bytes(data)),
                kind: EntryKind::File,
                size: data.len() as u64,
            }),
            Some(Node::Directory) => {
                let children: Vec<(String, EntryKind, ContentId)> = Self::children(&nodes, path)
                    .into_iter()
                    .map(|(name, node)| match node {
                        Node::File(data) => (name, EntryKind::File, ContentId(hash_bytes(&data))),
                        Node::Directory => (name, EntryKind::Directory, ContentId(String::new())),
                    })
                    .collect();
                Ok(StoreStat {
                    content_id: directory_content_id(
                        children.iter().map(|(name, kind, id)| (name.as_str(), *kind, id)),
                    ),
                    kind: EntryKind::Directory,
                    size: 0,
                })
            }
            None => Err(Error::StoreNotFound(path.to_string())),
        }
    }
}
