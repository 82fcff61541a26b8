//! Content hashing using BLAKE3
//!
//! Digests are rendered as 64 lowercase hex characters. They are only ever
//! compared against a fresh digest of the same-named entry.

use crate::error::{Error, Result};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Length of a rendered digest
pub const DIGEST_HEX_LEN: usize = 64;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Hash arbitrary bytes
pub fn hash_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Hash an entry name, used as an opaque remote path segment
pub fn hash_name(name: &str) -> String {
    hash_bytes(name.as_bytes())
}

/// Hash a local file by streaming it
pub fn hash_file_blocking(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| Error::filesystem(path, e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(|e| Error::filesystem(path, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

/// Hash a local file on the blocking pool
pub async fn hash_file(path: PathBuf) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_file_blocking(&path))
        .await
        .map_err(|e| Error::Internal(format!("Hash task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_digest_shape() {
        let digest = hash_bytes(b"hello");
        assert_eq!(digest.len(), DIGEST_HEX_LEN);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_name_hash_is_deterministic() {
        assert_eq!(hash_name("Photos"), hash_name("Photos"));
        assert_ne!(hash_name("Photos"), hash_name("photos"));
    }

    #[tokio::test]
    async fn test_file_hash_matches_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        assert_eq!(hash_file(path).await.unwrap(), hash_bytes(&data));
    }

    #[tokio::test]
    async fn test_missing_file_is_filesystem_error() {
        let dir = TempDir::new().unwrap();
        let result = hash_file(dir.path().join("nope")).await;
        assert!(matches!(result, Err(Error::Filesystem { .. })));
    }
}
