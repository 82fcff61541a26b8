//! Logical remote paths

use crate::error::{Error, Result};
use std::fmt;

/// Normalized absolute remote path such as `/files/photos`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemotePath(String);

impl RemotePath {
    /// The store root, `/`
    pub fn root() -> Self {
        RemotePath("/".to_string())
    }

    /// Parse and normalize a path; repeated and trailing slashes are dropped
    pub fn parse(raw: &str) -> Result<Self> {
        let mut path = RemotePath::root();
        for segment in raw.split('/').filter(|s| !s.is_empty()) {
            path = path.join(segment)?;
        }
        Ok(path)
    }

    /// Append one segment
    pub fn join(&self, segment: &str) -> Result<Self> {
        validate_segment(segment)?;

        if self.is_root() {
            Ok(RemotePath(format!("/{}", segment)))
        } else {
            Ok(RemotePath(format!("{}/{}", self.0, segment)))
        }
    }

    /// Parent directory, `None` for the root
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(RemotePath::root()),
            Some(idx) => Some(RemotePath(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Last segment, `None` for the root
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.0.rsplit('/').next()
        }
    }

    /// Segments from the root down
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Whether `self` is `other` or lies below it
    pub fn starts_with(&self, other: &RemotePath) -> bool {
        other.is_root() || self == other || self.0.starts_with(&format!("{}/", other.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() || segment == "." || segment == ".." || segment.contains('/') {
        return Err(Error::InvalidPath(format!("invalid segment {:?}", segment)));
    }
    if segment.contains('\0') {
        return Err(Error::InvalidPath("segment contains NUL".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes() {
        assert_eq!(RemotePath::parse("files//photos/").unwrap().as_str(), "/files/photos");
        assert!(RemotePath::parse("/").unwrap().is_root());
        assert!(RemotePath::parse("").unwrap().is_root());
    }

    #[test]
    fn test_rejects_traversal() {
        assert!(RemotePath::parse("/files/../etc").is_err());
        assert!(RemotePath::root().join("a/b").is_err());
        assert!(RemotePath::root().join("").is_err());
    }

    #[test]
    fn test_parent_and_name() {
        let path = RemotePath::parse("/files/photos/a.jpg").unwrap();
        assert_eq!(path.file_name(), Some("a.jpg"));
        assert_eq!(path.parent().unwrap().as_str(), "/files/photos");
        assert_eq!(RemotePath::parse("/files").unwrap().parent(), Some(RemotePath::root()));
        assert_eq!(RemotePath::root().parent(), None);
        assert_eq!(RemotePath::root().file_name(), None);
    }

    #[test]
    fn test_starts_with() {
        let dir = RemotePath::parse("/files").unwrap();
        assert!(RemotePath::parse("/files/a").unwrap().starts_with(&dir));
        assert!(dir.starts_with(&dir));
        assert!(!RemotePath::parse("/filesystem").unwrap().starts_with(&dir));
        assert!(dir.starts_with(&RemotePath::root()));
    }
}
