//! Encrypted manifest persistence

use crate::crypto::CryptoCodec;
use crate::error::{Error, Result};
use crate::manifest::{Manifest, MANIFEST_NAME};
use crate::store::{ContentStore, RemotePath, WriteOptions};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reads and writes the manifest blob of a remote directory
#[derive(Clone)]
pub struct ManifestCodec {
    store: Arc<dyn ContentStore>,
    crypto: Arc<dyn CryptoCodec>,
}

impl ManifestCodec {
    pub fn new(store: Arc<dyn ContentStore>, crypto: Arc<dyn CryptoCodec>) -> Self {
        ManifestCodec { store, crypto }
    }

    /// Path of the manifest blob for `dir`
    pub fn path(dir: &RemotePath) -> Result<RemotePath> {
        dir.join(MANIFEST_NAME)
    }

    /// Fetch, verify and parse the manifest of `dir`; `None` if there is none
    pub async fn load(&self, dir: &RemotePath) -> Result<Option<Manifest>> {
        let path = Self::path(dir)?;
        let sealed = match self.store.read(&path).await {
            Ok(sealed) => sealed,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let crypto = self.crypto.clone();
        let opened = tokio::task::spawn_blocking(move || crypto.open(&sealed))
            .await
            .map_err(|e| Error::Internal(format!("Decrypt task failed: {}", e)))??;

        if opened.name != MANIFEST_NAME {
            return Err(Error::Decryption(format!(
                "manifest envelope carries name {:?}",
                opened.name
            )));
        }

        Manifest::from_bytes(&opened.data).map(Some)
    }

    /// Manifest of `dir`, or an empty one if it is missing or unusable
    pub async fn read(&self, dir: &RemotePath) -> Manifest {
        match self.load(dir).await {
            Ok(Some(manifest)) => manifest,
            Ok(None) => {
                debug!("No manifest at {}, starting empty", dir);
                Manifest::new()
            }
            Err(e) => {
                warn!("Unusable manifest at {}, treating as empty: {}", dir, e);
                Manifest::new()
            }
        }
    }

    /// Encrypt and store the manifest of `dir`, replacing the previous one
    pub async fn write(&self, dir: &RemotePath, manifest: &Manifest) -> Result<()> {
        let path = Self::path(dir)?;
        let plaintext = manifest.to_bytes()?;

        let crypto = self.crypto.clone();
        let sealed = tokio::task::spawn_blocking(move || crypto.encrypt(MANIFEST_NAME, &plaintext))
            .await
            .map_err(|e| Error::Internal(format!("Encrypt task failed: {}", e)))??;

        self.store
            .write(&path, Bytes::from(sealed), WriteOptions::OVERWRITE)
            .await?;
        debug!(
            "Wrote manifest for {} ({} files, {} folders)",
            dir,
            manifest.files.len(),
            manifest.folders.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{EnvelopeCodec, Identity};
    use crate::manifest::FolderRecord;
    use crate::store::MemoryStore;

    fn codec_with(store: Arc<MemoryStore>, identity: Arc<Identity>) -> ManifestCodec {
        ManifestCodec::new(store, Arc::new(EnvelopeCodec::for_self(identity)))
    }

    fn sample() -> Manifest {
        let mut manifest = Manifest::new();
        manifest.upsert_folder(FolderRecord {
            name: "docs".into(),
            folder_id: "docs".into(),
        });
        manifest
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let store = Arc::new(MemoryStore::new());
        let codec = codec_with(store.clone(), Arc::new(Identity::generate().unwrap()));
        let dir = RemotePath::root();

        codec.write(&dir, &sample()).await.unwrap();
        assert!(store.contains_file(&ManifestCodec::path(&dir).unwrap()));
        assert_eq!(codec.read(&dir).await, sample());
        assert_eq!(codec.load(&dir).await.unwrap(), Some(sample()));
    }

    #[tokio::test]
    async fn test_missing_manifest_is_empty() {
        let store = Arc::new(MemoryStore::new());
        let codec = codec_with(store, Arc::new(Identity::generate().unwrap()));
        assert!(codec.load(&RemotePath::root()).await.unwrap().is_none());
        assert!(codec.read(&RemotePath::root()).await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_manifest_is_empty() {
        let store = Arc::new(MemoryStore::new());
        let codec = codec_with(store.clone(), Arc::new(Identity::generate().unwrap()));
        let dir = RemotePath::root();
        store
            .write(
                &ManifestCodec::path(&dir).unwrap(),
                Bytes::from_static(b"not an envelope"),
                WriteOptions::OVERWRITE,
            )
            .await
            .unwrap();

        assert!(codec.load(&dir).await.is_err());
        assert!(codec.read(&dir).await.is_empty());
    }

    #[tokio::test]
    async fn test_foreign_key_manifest_is_empty() {
        let store = Arc::new(MemoryStore::new());
        let dir = RemotePath::root();
        codec_with(store.clone(), Arc::new(Identity::generate().unwrap()))
            .write(&dir, &sample())
            .await
            .unwrap();

        let other = codec_with(store, Arc::new(Identity::generate().unwrap()));
        assert!(other.read(&dir).await.is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_propagates() {
        let store = Arc::new(MemoryStore::new());
        let codec = codec_with(store.clone(), Arc::new(Identity::generate().unwrap()));
        let dir = RemotePath::root();
        codec.write(&dir, &Manifest::new()).await.unwrap();

        store.fail_writes_to(ManifestCodec::path(&dir).unwrap());
        assert!(codec.write(&dir, &sample()).await.is_err());
        // previous manifest is still readable
        assert!(codec.load(&dir).await.unwrap().unwrap().is_empty());
    }
}
