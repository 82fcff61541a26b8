//! Directory-backed content store
//!
//! Mirrors the remote tree under a local directory, e.g. a mounted volume or
//! a folder picked up by another replication tool. Content ids are BLAKE3
//! digests of the stored bytes.

use crate::error::{Error, Result};
use crate::hash::{hash_bytes, hash_file_blocking};
use crate::store::{
    directory_content_id, ContentId, ContentStore, EntryKind, MkdirOptions, RemoteEntry,
    RemotePath, RemoveOptions, StoreStat, WriteOptions, RESERVED_PREFIX,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// [`ContentStore`] over a local directory
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| Error::filesystem(&root, e))?;
        info!("Local content store opened at {:?}", root);
        Ok(LocalStore { root })
    }

    /// Directory this store lives in
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &RemotePath) -> PathBuf {
        let mut out = self.root.clone();
        for segment in path.segments() {
            out.push(segment);
        }
        out
    }
}

fn store_error(path: &RemotePath, e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::NotFound {
        Error::StoreNotFound(path.to_string())
    } else {
        Error::store(path, e)
    }
}

#[async_trait]
impl ContentStore for LocalStore {
    async fn list(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>> {
        let dir = self.resolve(path);
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| store_error(path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|e| store_error(path, e))? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with(RESERVED_PREFIX) {
                continue;
            }

            let file_type = entry.file_type().await.map_err(|e| store_error(path, e))?;
            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                continue;
            };
            entries.push(RemoteEntry { name, kind });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &RemotePath) -> Result<Bytes> {
        let data = tokio::fs::read(self.resolve(path))
            .await
            .map_err(|e| store_error(path, e))?;
        Ok(Bytes::from(data))
    }

    async fn write(
        &self,
        path: &RemotePath,
        data: Bytes,
        options: WriteOptions,
    ) -> Result<Option<ContentId>> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::store(path, "cannot write to the store root"))?;
        let target = self.resolve(path);
        let parent_dir = self.resolve(&parent);

        match tokio::fs::metadata(&parent_dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(Error::store(&parent, "parent is not a directory")),
            Err(e) => return Err(store_error(&parent, e)),
        }

        match tokio::fs::metadata(&target).await {
            Ok(meta) if meta.is_dir() => {
                return Err(Error::store(path, "a directory exists at this path"));
            }
            Ok(_) if !options.truncate => {
                return Err(Error::store(path, "blob exists and truncate is not set"));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound && !options.create => {
                return Err(Error::StoreNotFound(path.to_string()));
            }
            _ => {}
        }

        // Write beside the target and rename over it, so readers only ever
        // observe the old or the new blob
        let temp = parent_dir.join(format!("{}{}", RESERVED_PREFIX, uuid::Uuid::new_v4()));
        let written = async {
            let mut file = tokio::fs::File::create(&temp).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            tokio::fs::rename(&temp, &target).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(store_error(path, e));
        }

        debug!("Wrote {} ({} bytes)", path, data.len());
        Ok(Some(ContentId(hash_bytes(&data))))
    }

    async fn mkdir(&self, path: &RemotePath, options: MkdirOptions) -> Result<()> {
        let dir = self.resolve(path);
        let result = if options.parents {
            tokio::fs::create_dir_all(&dir).await
        } else {
            tokio::fs::create_dir(&dir).await
        };
        result.map_err(|e| store_error(path, e))?;
        debug!("Created directory {}", path);
        Ok(())
    }

    async fn remove(&self, path: &RemotePath, options: RemoveOptions) -> Result<()> {
        if path.is_root() {
            return Err(Error::store(path, "refusing to remove the store root"));
        }

        let target = self.resolve(path);
        let meta = tokio::fs::symlink_metadata(&target)
            .await
            .map_err(|e| store_error(path, e))?;

        let result = if meta.is_dir() {
            if options.recursive {
                tokio::fs::remove_dir_all(&target).await
            } else {
                tokio::fs::remove_dir(&target).await
            }
        } else {
            tokio::fs::remove_file(&target).await
        };
        result.map_err(|e| store_error(path, e))?;

        debug!("Removed {}", path);
        Ok(())
    }

    async fn stat(&self, path: &RemotePath) -> Result<StoreStat> {
        let target = self.resolve(path);
        let meta = tokio::fs::metadata(&target)
            .await
            .map_err(|e| store_error(path, e))?;

        if meta.is_dir() {
            let mut children = Vec::new();
            for entry in self.list(path).await? {
                let child = path.join(&entry.name)?;
                let id = match entry.kind {
                    EntryKind::File => self.stat(&child).await?.content_id,
                    EntryKind::Directory => ContentId(String::new()),
                };
                children.push((entry.name, entry.kind, id));
            }
            let content_id = directory_content_id(
                children.iter().map(|(name, kind, id)| (name.as_str(), *kind, id)),
            );
            return Ok(StoreStat {
                content_id,
                kind: EntryKind::Directory,
                size: 0,
            });
        }

        let digest = tokio::task::spawn_blocking(move || hash_file_blocking(&target))
            .await
            .map_err(|e| Error::Internal(format!("Hash task failed: {}", e)))?
            .map_err(|e| Error::store(path, e))?;

        Ok(StoreStat {
            content_id: ContentId(digest),
            kind: EntryKind::File,
            size: meta.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, LocalStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path().join("store")).unwrap();
        (dir, store)
    }

    fn p(raw: &str) -> RemotePath {
        RemotePath::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_write_read_stat() {
        let (_dir, store) = store();
        store.mkdir(&p("/files"), MkdirOptions { parents: true }).await.unwrap();

        let id = store
            .write(&p("/files/a.bin"), Bytes::from_static(b"sealed"), WriteOptions::OVERWRITE)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(store.read(&p("/files/a.bin")).await.unwrap(), Bytes::from_static(b"sealed"));
        let stat = store.stat(&p("/files/a.bin")).await.unwrap();
        assert_eq!(stat.content_id, id);
        assert_eq!(stat.kind, EntryKind::File);
        assert_eq!(stat.size, 6);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let (_dir, store) = store();
        let path = p("/a.bin");
        store.write(&path, Bytes::from_static(b"first version"), WriteOptions::OVERWRITE).await.unwrap();
        store.write(&path, Bytes::from_static(b"v2"), WriteOptions::OVERWRITE).await.unwrap();
        assert_eq!(store.read(&path).await.unwrap(), Bytes::from_static(b"v2"));
    }

    #[tokio::test]
    async fn test_write_flags() {
        let (_dir, store) = store();
        let path = p("/a.bin");
        let no_create = WriteOptions { create: false, truncate: true };
        assert!(matches!(
            store.write(&path, Bytes::new(), no_create).await,
            Err(Error::StoreNotFound(_))
        ));

        store.write(&path, Bytes::new(), WriteOptions::OVERWRITE).await.unwrap();
        let no_truncate = WriteOptions { create: true, truncate: false };
        assert!(store.write(&path, Bytes::new(), no_truncate).await.is_err());
    }

    #[tokio::test]
    async fn test_write_requires_parent() {
        let (_dir, store) = store();
        let result = store
            .write(&p("/missing/a.bin"), Bytes::new(), WriteOptions::OVERWRITE)
            .await;
        assert!(matches!(result, Err(Error::StoreNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_hides_temp_files() {
        let (_dir, store) = store();
        store.mkdir(&p("/sub"), MkdirOptions::default()).await.unwrap();
        store.write(&p("/b.bin"), Bytes::new(), WriteOptions::OVERWRITE).await.unwrap();
        std::fs::write(store.root().join(".cm-tmp-leftover"), b"x").unwrap();

        let entries = store.list(&RemotePath::root()).await.unwrap();
        assert_eq!(
            entries,
            vec![
                RemoteEntry { name: "b.bin".into(), kind: EntryKind::File },
                RemoteEntry { name: "sub".into(), kind: EntryKind::Directory },
            ]
        );
    }

    #[tokio::test]
    async fn test_remove() {
        let (_dir, store) = store();
        store.mkdir(&p("/d/e"), MkdirOptions { parents: true }).await.unwrap();
        store.write(&p("/d/e/f"), Bytes::new(), WriteOptions::OVERWRITE).await.unwrap();

        assert!(store.remove(&p("/d"), RemoveOptions::default()).await.is_err());
        store.remove(&p("/d"), RemoveOptions { recursive: true }).await.unwrap();
        assert!(matches!(store.list(&p("/d")).await, Err(Error::StoreNotFound(_))));
        assert!(store.remove(&RemotePath::root(), RemoveOptions { recursive: true }).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_paths_are_not_found() {
        let (_dir, store) = store();
        assert!(store.read(&p("/nope")).await.unwrap_err().is_not_found());
        assert!(store.stat(&p("/nope")).await.unwrap_err().is_not_found());
        assert!(store.list(&p("/nope")).await.unwrap_err().is_not_found());
    }
}
