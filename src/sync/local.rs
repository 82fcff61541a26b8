//! Local directory listing

use crate::error::{Error, Result};
use crate::sync::ExcludeFilter;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalKind {
    File,
    Directory,
}

/// A regular file or directory found while scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub name: String,
    pub kind: LocalKind,
    pub path: PathBuf,
}

/// List the syncable children of `dir`, sorted by name
///
/// `relative` is `dir` relative to the local root, used for exclude
/// matching. Symlinks, special files, excluded entries and names that are
/// not UTF-8 are skipped.
pub async fn list_local_dir(
    dir: &Path,
    relative: &Path,
    filter: &ExcludeFilter,
) -> Result<Vec<LocalEntry>> {
    let mut reader = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::filesystem(dir, e))?;

    let mut entries = Vec::new();
    while let Some(entry) = reader
        .next_entry()
        .await
        .map_err(|e| Error::filesystem(dir, e))?
    {
        let path = entry.path();
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                warn!("Skipping non UTF-8 name {:?} in {:?}", raw, dir);
                continue;
            }
        };

        // does not follow symlinks
        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            Err(e) => {
                warn!("Skipping {:?}: {}", path, e);
                continue;
            }
        };

        let kind = if file_type.is_symlink() {
            debug!("Skipping symlink {:?}", path);
            continue;
        } else if file_type.is_dir() {
            LocalKind::Directory
        } else if file_type.is_file() {
            LocalKind::File
        } else {
            debug!("Skipping special file {:?}", path);
            continue;
        };

        if filter.is_excluded(&relative.join(&name), kind == LocalKind::Directory) {
            debug!("Excluded {:?}", path);
            continue;
        }

        entries.push(LocalEntry { name, kind, path });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::MANIFEST_NAME;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_lists_sorted_files_and_dirs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join(MANIFEST_NAME), b"x").unwrap();

        let entries = list_local_dir(dir.path(), Path::new(""), &ExcludeFilter::none())
            .await
            .unwrap();
        let summary: Vec<_> = entries.iter().map(|e| (e.name.as_str(), e.kind)).collect();
        assert_eq!(
            summary,
            vec![
                ("a.txt", LocalKind::File),
                ("b.txt", LocalKind::File),
                ("sub", LocalKind::Directory),
            ]
        );
        assert_eq!(entries[0].path, dir.path().join("a.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_skips_symlinks() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("real.txt"), b"r").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("link.txt"))
            .unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();

        let entries = list_local_dir(dir.path(), Path::new(""), &ExcludeFilter::none())
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "real.txt");
    }

    #[tokio::test]
    async fn test_applies_excludes_relative_to_root() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/keep.md"), b"k").unwrap();
        std::fs::write(dir.path().join("docs/skip.tmp"), b"s").unwrap();

        let filter = ExcludeFilter::new(dir.path(), &["docs/*.tmp".to_string()]).unwrap();
        let entries = list_local_dir(&dir.path().join("docs"), Path::new("docs"), &filter)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "keep.md");
    }

    #[tokio::test]
    async fn test_missing_dir_is_filesystem_error() {
        let dir = TempDir::new().unwrap();
        let result =
            list_local_dir(&dir.path().join("gone"), Path::new("gone"), &ExcludeFilter::none())
                .await;
        assert!(matches!(result, Err(Error::Filesystem { .. })));
    }
}
