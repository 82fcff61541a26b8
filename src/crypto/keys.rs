//! Key material for cryptmirror
//!
//! A device [`Identity`] holds two secrets:
//! - an X25519 static secret, used to open envelopes addressed to it
//! - an Ed25519 seed, used to sign envelopes it produces
//!
//! The matching [`PublicIdentity`] is what other devices (or this one)
//! encrypt to and verify against.

use crate::crypto::{PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
use crate::error::{Error, Result};
use rand::RngCore;
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use x25519_dalek::{PublicKey as AgreementPublic, StaticSecret};
use zeroize::Zeroizing;

const IDENTITY_KIND: &str = "cryptmirror-identity";
const IDENTITY_VERSION: u32 = 1;

/// Public half of an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIdentity {
    /// X25519 public key envelopes are encrypted to
    #[serde(with = "hex_array")]
    pub agreement: [u8; PUBLIC_KEY_SIZE],
    /// Ed25519 public key signatures are checked against
    #[serde(with = "hex_array")]
    pub verifying: [u8; PUBLIC_KEY_SIZE],
}

impl PublicIdentity {
    /// Load a public identity from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::InvalidKey(format!("Failed to read public key {:?}: {}", path.as_ref(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| Error::InvalidKey(format!("Failed to parse public key: {}", e)))
    }

    /// Save this public identity as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Check an Ed25519 signature made by this identity
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        UnparsedPublicKey::new(&ED25519, &self.verifying)
            .verify(message, signature)
            .map_err(|_| Error::SignatureInvalid)
    }

    /// Short fingerprint for logs
    pub fn fingerprint(&self) -> String {
        let digest = blake3::hash(&[self.agreement, self.verifying].concat());
        hex::encode(&digest.as_bytes()[..8])
    }
}

/// On-disk layout of a secret identity
#[derive(Serialize, Deserialize)]
struct IdentityFile {
    kind: String,
    version: u32,
    #[serde(with = "hex_array")]
    agreement_secret: [u8; 32],
    #[serde(with = "hex_array")]
    signing_seed: [u8; 32],
}

/// Secret identity of this device
pub struct Identity {
    agreement: StaticSecret,
    signing_seed: Zeroizing<[u8; 32]>,
    signing: Ed25519KeyPair,
}

impl Identity {
    /// Generate a fresh random identity
    pub fn generate() -> Result<Self> {
        let mut agreement = Zeroizing::new([0u8; 32]);
        let mut seed = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(&mut agreement[..]);
        rand::thread_rng().fill_bytes(&mut seed[..]);
        Self::from_secret_bytes(*agreement, *seed)
    }

    /// Rebuild an identity from raw secret material
    pub fn from_secret_bytes(agreement: [u8; 32], signing_seed: [u8; 32]) -> Result<Self> {
        let signing = Ed25519KeyPair::from_seed_unchecked(&signing_seed)
            .map_err(|_| Error::InvalidKey("Invalid Ed25519 seed".to_string()))?;

        Ok(Identity {
            agreement: StaticSecret::from(agreement),
            signing_seed: Zeroizing::new(signing_seed),
            signing,
        })
    }

    /// Load an identity file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = Zeroizing::new(std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::InvalidKey(format!("Failed to read identity {:?}: {}", path.as_ref(), e))
        })?);

        let file: IdentityFile = serde_json::from_str(&content)
            .map_err(|e| Error::InvalidKey(format!("Failed to parse identity: {}", e)))?;

        if file.kind != IDENTITY_KIND {
            return Err(Error::InvalidKey(format!("Not an identity file: {}", file.kind)));
        }
        if file.version != IDENTITY_VERSION {
            return Err(Error::InvalidKey(format!(
                "Unsupported identity version: {}",
                file.version
            )));
        }

        Self::from_secret_bytes(file.agreement_secret, file.signing_seed)
    }

    /// Save this identity, readable by the owner only on unix
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = IdentityFile {
            kind: IDENTITY_KIND.to_string(),
            version: IDENTITY_VERSION,
            agreement_secret: self.agreement.to_bytes(),
            signing_seed: *self.signing_seed,
        };
        let content = Zeroizing::new(serde_json::to_string_pretty(&file)?);

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        use std::io::Write;
        let mut out = options.open(path.as_ref())?;
        out.write_all(content.as_bytes())?;
        Ok(())
    }

    /// The public half of this identity
    pub fn public(&self) -> PublicIdentity {
        let mut verifying = [0u8; PUBLIC_KEY_SIZE];
        verifying.copy_from_slice(self.signing.public_key().as_ref());

        PublicIdentity {
            agreement: AgreementPublic::from(&self.agreement).to_bytes(),
            verifying,
        }
    }

    /// Sign a message with the Ed25519 key
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        let mut out = [0u8; SIGNATURE_SIZE];
        out.copy_from_slice(self.signing.sign(message).as_ref());
        out
    }

    /// X25519 shared secret with a peer public key
    pub fn agree(&self, peer: &[u8; PUBLIC_KEY_SIZE]) -> Zeroizing<[u8; 32]> {
        let shared = self.agreement.diffie_hellman(&AgreementPublic::from(*peer));
        Zeroizing::new(shared.to_bytes())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("fingerprint", &self.public().fingerprint())
            .finish_non_exhaustive()
    }
}

/// Hex serialization for fixed-size byte arrays
mod hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sign_and_verify() {
        let identity = Identity::generate().unwrap();
        let sig = identity.sign(b"manifest");

        assert!(identity.public().verify(b"manifest", &sig).is_ok());
        assert!(matches!(
            identity.public().verify(b"tampered", &sig),
            Err(Error::SignatureInvalid)
        ));
    }

    #[test]
    fn test_agreement_is_symmetric() {
        let alice = Identity::generate().unwrap();
        let bob = Identity::generate().unwrap();

        let ab = alice.agree(&bob.public().agreement);
        let ba = bob.agree(&alice.public().agreement);
        assert_eq!(*ab, *ba);
    }

    #[test]
    fn test_save_and_load_identity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys/identity.json");

        let identity = Identity::generate().unwrap();
        identity.save(&path).unwrap();

        let loaded = Identity::load(&path).unwrap();
        assert_eq!(loaded.public(), identity.public());
    }

    #[test]
    fn test_save_and_load_public() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("public.json");

        let public = Identity::generate().unwrap().public();
        public.save(&path).unwrap();
        assert_eq!(PublicIdentity::load(&path).unwrap(), public);
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("identity.json");
        std::fs::write(&path, r#"{"kind":"other","version":1,"agreement_secret":"","signing_seed":""}"#)
            .unwrap();

        assert!(matches!(Identity::load(&path), Err(Error::InvalidKey(_))));
    }
}
