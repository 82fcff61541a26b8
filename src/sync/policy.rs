//! Remote naming and local exclusion policies

use crate::error::{Error, Result};
use crate::hash::hash_name;
use crate::manifest::MANIFEST_NAME;
use crate::store::RESERVED_PREFIX;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::Path;

/// How local names map to remote path segments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathPolicy {
    /// Use the plaintext name
    #[default]
    Plain,
    /// Use the hex digest of the name, so listings do not leak names
    Hashed,
}

impl PathPolicy {
    /// Remote segment for a local entry name
    pub fn segment(&self, name: &str) -> String {
        match self {
            PathPolicy::Plain => name.to_string(),
            PathPolicy::Hashed => hash_name(name),
        }
    }
}

/// Gitignore-style exclusion of local entries
pub struct ExcludeFilter {
    matcher: Gitignore,
}

impl ExcludeFilter {
    /// Build a filter from patterns interpreted relative to `root`
    pub fn new(root: &Path, patterns: &[String]) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(root);
        for pattern in patterns {
            builder.add_line(None, pattern).map_err(|e| {
                Error::InvalidConfig(format!("bad exclude pattern {:?}: {}", pattern, e))
            })?;
        }
        let matcher = builder
            .build()
            .map_err(|e| Error::InvalidConfig(format!("bad exclude patterns: {}", e)))?;
        Ok(ExcludeFilter { matcher })
    }

    /// Filter that only excludes the manifest name and reserved store names
    pub fn none() -> Self {
        ExcludeFilter {
            matcher: Gitignore::empty(),
        }
    }

    /// Whether the entry at `relative` (from the local root) is skipped
    pub fn is_excluded(&self, relative: &Path, is_dir: bool) -> bool {
        if let Some(name) = relative.file_name() {
            if name == OsStr::new(MANIFEST_NAME)
                || name.to_str().is_some_and(|n| n.starts_with(RESERVED_PREFIX))
            {
                return true;
            }
        }
        self.matcher.matched(relative, is_dir).is_ignore()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments() {
        assert_eq!(PathPolicy::Plain.segment("a.txt"), "a.txt");
        let hashed = PathPolicy::Hashed.segment("a.txt");
        assert_eq!(hashed, hash_name("a.txt"));
        assert_ne!(hashed, "a.txt");
    }

    #[test]
    fn test_policy_serde() {
        let policy: PathPolicy = serde_json::from_str("\"hashed\"").unwrap();
        assert_eq!(policy, PathPolicy::Hashed);
        assert_eq!(serde_json::to_string(&PathPolicy::Plain).unwrap(), "\"plain\"");
    }

    #[test]
    fn test_exclude_patterns() {
        let filter = ExcludeFilter::new(
            Path::new("/data"),
            &["*.tmp".to_string(), "build/".to_string()],
        )
        .unwrap();

        assert!(filter.is_excluded(Path::new("x.tmp"), false));
        assert!(filter.is_excluded(Path::new("docs/x.tmp"), false));
        assert!(filter.is_excluded(Path::new("build"), true));
        assert!(!filter.is_excluded(Path::new("build"), false));
        assert!(!filter.is_excluded(Path::new("x.txt"), false));
    }

    #[test]
    fn test_manifest_name_always_excluded() {
        let filter = ExcludeFilter::none();
        assert!(filter.is_excluded(Path::new(MANIFEST_NAME), false));
        assert!(filter.is_excluded(&Path::new("docs").join(MANIFEST_NAME), false));
        assert!(!filter.is_excluded(Path::new("docs"), true));
    }

    #[test]
    fn test_reserved_store_names_always_excluded() {
        let filter = ExcludeFilter::none();
        let reserved = format!("{}notes", RESERVED_PREFIX);
        assert!(filter.is_excluded(Path::new(&reserved), false));
        assert!(filter.is_excluded(&Path::new("docs").join(&reserved), true));
        assert!(!filter.is_excluded(Path::new("cm-tmp-notes"), false));
    }
}
