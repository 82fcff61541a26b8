//! Error types for cryptmirror

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for cryptmirror
#[derive(Error, Debug)]
pub enum Error {
    // Crypto errors
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    // Local filesystem errors
    #[error("Filesystem error at {path:?}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // Content store errors
    #[error("Store error at {path}: {reason}")]
    Store { path: String, reason: String },

    #[error("Not found in store: {0}")]
    StoreNotFound(String),

    #[error("Store operation {op} timed out at {path}")]
    StoreTimeout { path: String, op: &'static str },

    #[error("Invalid remote path: {0}")]
    InvalidPath(String),

    // Manifest errors
    #[error("Manifest parse error: {0}")]
    ManifestParse(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Sync pass cancelled")]
    Cancelled,
}

/// Coarse classification of an [`Error`], used for reporting and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Filesystem,
    Store,
    Crypto,
    ManifestParse,
    Config,
    Other,
}

impl Error {
    /// Build a filesystem error for a local path
    pub fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Build a store error for a remote path
    pub fn store(path: impl ToString, reason: impl ToString) -> Self {
        Error::Store {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Filesystem { .. } | Error::Io(_) => ErrorKind::Filesystem,
            Error::Store { .. }
            | Error::StoreNotFound(_)
            | Error::StoreTimeout { .. }
            | Error::InvalidPath(_) => ErrorKind::Store,
            Error::Encryption(_)
            | Error::Decryption(_)
            | Error::SignatureInvalid
            | Error::KeyDerivation(_)
            | Error::InvalidKey(_) => ErrorKind::Crypto,
            Error::ManifestParse(_) => ErrorKind::ManifestParse,
            Error::Config(_) | Error::InvalidConfig(_) => ErrorKind::Config,
            Error::Serialization(_) | Error::Internal(_) | Error::Cancelled => ErrorKind::Other,
        }
    }

    /// Whether retrying the same store operation might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Store { .. } | Error::StoreTimeout { .. })
    }

    /// Whether this is a store "not found"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::StoreNotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let fs = Error::filesystem("/tmp/x", io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(fs.kind(), ErrorKind::Filesystem);
        assert_eq!(Error::store("/a", "boom").kind(), ErrorKind::Store);
        assert_eq!(Error::SignatureInvalid.kind(), ErrorKind::Crypto);
        assert_eq!(Error::ManifestParse("x".into()).kind(), ErrorKind::ManifestParse);
    }

    #[test]
    fn test_retryable() {
        assert!(Error::store("/a", "reset").is_retryable());
        assert!(Error::StoreTimeout { path: "/a".into(), op: "write" }.is_retryable());
        assert!(!Error::StoreNotFound("/a".into()).is_retryable());
        assert!(!Error::Decryption("bad".into()).is_retryable());
    }
}
