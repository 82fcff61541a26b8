//! cryptmirror - One-way encrypted folder replication
//!
//! This library mirrors a local directory tree into a path-addressed content
//! store. Every file and every per-directory manifest is signed and encrypted
//! before it leaves the machine, and repeated passes only touch what changed.

pub mod config;
pub mod crypto;
pub mod error;
pub mod hash;
pub mod manifest;
pub mod store;
pub mod sync;

pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::crypto::{CryptoCodec, EnvelopeCodec, Identity, PublicIdentity};
    pub use crate::error::{Error, Result};
    pub use crate::manifest::{Manifest, ManifestCodec};
    pub use crate::store::{ContentStore, RemotePath};
    pub use crate::sync::{CancelToken, Reconciler, SyncDriver, SyncOptions};
}
