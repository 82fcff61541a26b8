//! Cryptography module for cryptmirror
//!
//! Provides the crypto codec used for every blob that leaves the machine:
//! X25519 key agreement, HKDF-SHA256 key derivation, AES-256-GCM sealing
//! and Ed25519 signatures.

mod encryption;
mod envelope;
mod keys;

pub use encryption::{open, seal};
pub use envelope::{CryptoCodec, EnvelopeCodec, Opened};
pub use keys::{Identity, PublicIdentity};

/// Size of AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Size of an X25519 or Ed25519 public key
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 signature
pub const SIGNATURE_SIZE: usize = 64;
