//! Per-directory manifests
//!
//! Every synced remote directory holds one encrypted manifest blob listing
//! the files and subfolders the engine last reconciled there, with the
//! fingerprints used for change detection.

mod codec;

pub use codec::ManifestCodec;

use crate::error::{Error, Result};
use crate::store::ContentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Reserved name of the manifest blob inside each remote directory
pub const MANIFEST_NAME: &str = ".cryptmirror-manifest";

/// Current manifest schema version
pub const MANIFEST_VERSION: u32 = 1;

/// Last-synced state of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    /// Digest of the plaintext last uploaded
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Identifier the store reported for the encrypted blob
    pub content_id: ContentId,
    /// Source modification time at last sync
    pub modified: DateTime<Utc>,
}

/// A reconciled subfolder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub name: String,
    /// Remote path segment the folder lives under
    pub folder_id: String,
}

/// Document of record for one remote directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    #[serde(default)]
    pub files: Vec<FileRecord>,
    #[serde(default)]
    pub folders: Vec<FolderRecord>,
}

impl Manifest {
    pub fn new() -> Self {
        Manifest {
            version: MANIFEST_VERSION,
            files: Vec::new(),
            folders: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.folders.is_empty()
    }

    pub fn file(&self, filename: &str) -> Option<&FileRecord> {
        self.files.iter().find(|f| f.filename == filename)
    }

    pub fn folder(&self, name: &str) -> Option<&FolderRecord> {
        self.folders.iter().find(|f| f.name == name)
    }

    /// Insert or replace the record for `record.filename`, keeping its position
    pub fn upsert_file(&mut self, record: FileRecord) {
        match self.files.iter_mut().find(|f| f.filename == record.filename) {
            Some(existing) => *existing = record,
            None => self.files.push(record),
        }
    }

    /// Insert or replace the record for `record.name`, keeping its position
    pub fn upsert_folder(&mut self, record: FolderRecord) {
        match self.folders.iter_mut().find(|f| f.name == record.name) {
            Some(existing) => *existing = record,
            None => self.folders.push(record),
        }
    }

    /// Canonical serialized form
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and validate a serialized manifest
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let manifest: Manifest =
            serde_json::from_slice(data).map_err(|e| Error::ManifestParse(e.to_string()))?;

        if manifest.version != MANIFEST_VERSION {
            return Err(Error::ManifestParse(format!(
                "unsupported manifest version {}",
                manifest.version
            )));
        }

        let mut names = HashSet::new();
        for file in &manifest.files {
            if !names.insert(file.filename.as_str()) {
                return Err(Error::ManifestParse(format!("duplicate file {:?}", file.filename)));
            }
        }
        names.clear();
        for folder in &manifest.folders {
            if !names.insert(folder.name.as_str()) {
                return Err(Error::ManifestParse(format!("duplicate folder {:?}", folder.name)));
            }
        }

        Ok(manifest)
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(name: &str, hash: &str) -> FileRecord {
        FileRecord {
            filename: name.to_string(),
            content_hash: hash.to_string(),
            mime_type: Some("text/plain".to_string()),
            content_id: ContentId(format!("id-{}", hash)),
            modified: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_upsert_keeps_order() {
        let mut manifest = Manifest::new();
        manifest.upsert_file(record("b.txt", "1"));
        manifest.upsert_file(record("a.txt", "2"));
        manifest.upsert_file(record("b.txt", "3"));

        let names: Vec<_> = manifest.files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["b.txt", "a.txt"]);
        assert_eq!(manifest.file("b.txt").unwrap().content_hash, "3");
        assert!(manifest.file("c.txt").is_none());
    }

    #[test]
    fn test_bytes_round_trip() {
        let mut manifest = Manifest::new();
        manifest.upsert_file(record("a.txt", "1"));
        manifest.upsert_folder(FolderRecord {
            name: "docs".into(),
            folder_id: "docs".into(),
        });

        let parsed = Manifest::from_bytes(&manifest.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, manifest);
        assert!(!parsed.is_empty());
    }

    #[test]
    fn test_missing_mime_type_is_accepted() {
        let json = br#"{"version":1,"files":[{"filename":"x","content_hash":"h","content_id":"c","modified":"2024-01-01T00:00:00Z"}]}"#;
        let manifest = Manifest::from_bytes(json).unwrap();
        assert_eq!(manifest.files[0].mime_type, None);
        assert!(manifest.folders.is_empty());
    }

    #[test]
    fn test_rejects_unknown_version() {
        let result = Manifest::from_bytes(br#"{"version":2,"files":[],"folders":[]}"#);
        assert!(matches!(result, Err(Error::ManifestParse(_))));
    }

    #[test]
    fn test_rejects_duplicates() {
        let mut manifest = Manifest::new();
        manifest.files.push(record("a.txt", "1"));
        manifest.files.push(record("a.txt", "2"));
        let result = Manifest::from_bytes(&manifest.to_bytes().unwrap());
        assert!(matches!(result, Err(Error::ManifestParse(_))));
    }

    #[test]
    fn test_garbage_is_parse_error() {
        assert!(matches!(Manifest::from_bytes(b"\x00\x01"), Err(Error::ManifestParse(_))));
    }
}
