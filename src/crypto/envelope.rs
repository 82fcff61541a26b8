//! Sign-then-encrypt envelopes
//!
//! Binary layout:
//!
//! ```text
//! "CMv1" | ephemeral X25519 public key (32) | nonce (12) | AES-256-GCM(inner) + tag (16)
//! inner = Ed25519 signature (64) | name length (u16 BE) | name | data
//! ```
//!
//! The magic and the ephemeral key are authenticated as AAD. The content key
//! is HKDF-SHA256 over the X25519 shared secret, salted with the ephemeral
//! and recipient public keys. The signature covers `name length | name | data`
//! and is itself encrypted, so the envelope does not reveal who signed it.

use crate::crypto::{open, seal, Identity, PublicIdentity, KEY_SIZE, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
use crate::error::{Error, Result};
use rand::RngCore;
use ring::hkdf::{self, Salt, HKDF_SHA256};
use std::sync::Arc;
use x25519_dalek::{PublicKey as AgreementPublic, StaticSecret};
use zeroize::Zeroizing;

const MAGIC: &[u8; 4] = b"CMv1";
const HEADER_SIZE: usize = MAGIC.len() + PUBLIC_KEY_SIZE;
const KDF_INFO: &[u8] = b"cryptmirror-envelope-v1";

/// Encrypts named byte streams for a recipient and opens them again
///
/// Keys are bound when the codec is built, so callers only pass content.
pub trait CryptoCodec: Send + Sync {
    /// Sign and encrypt `plaintext`, embedding `name` in the envelope
    fn encrypt(&self, name: &str, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt and verify an envelope, returning the embedded name and data
    fn open(&self, ciphertext: &[u8]) -> Result<Opened>;

    /// Decrypt and verify an envelope, returning only the data
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(self.open(ciphertext)?.data)
    }
}

/// Contents of an opened envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    pub name: String,
    pub data: Vec<u8>,
}

/// [`CryptoCodec`] backed by X25519 + AES-256-GCM + Ed25519
pub struct EnvelopeCodec {
    /// Signs outgoing envelopes and opens incoming ones
    identity: Arc<Identity>,
    /// Who outgoing envelopes are encrypted to
    recipient: PublicIdentity,
    /// Whose signature incoming envelopes must carry
    verifier: PublicIdentity,
}

impl EnvelopeCodec {
    /// Codec that encrypts to `recipient` and verifies envelopes signed by `verifier`
    pub fn new(identity: Arc<Identity>, recipient: PublicIdentity, verifier: PublicIdentity) -> Self {
        EnvelopeCodec {
            identity,
            recipient,
            verifier,
        }
    }

    /// Codec where this device is signer, recipient and verifier
    pub fn for_self(identity: Arc<Identity>) -> Self {
        let public = identity.public();
        Self::new(identity, public, public)
    }

    /// The public identity outgoing envelopes are encrypted to
    pub fn recipient(&self) -> &PublicIdentity {
        &self.recipient
    }
}

impl CryptoCodec for EnvelopeCodec {
    fn encrypt(&self, name: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let name_len = u16::try_from(name.len())
            .map_err(|_| Error::Encryption(format!("Name too long: {} bytes", name.len())))?;

        let mut ephemeral_bytes = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(&mut ephemeral_bytes[..]);
        let ephemeral = StaticSecret::from(*ephemeral_bytes);
        let ephemeral_public = AgreementPublic::from(&ephemeral).to_bytes();
        let shared = Zeroizing::new(
            ephemeral
                .diffie_hellman(&AgreementPublic::from(self.recipient.agreement))
                .to_bytes(),
        );
        let key = derive_content_key(&shared, &ephemeral_public, &self.recipient.agreement)?;

        let mut inner = Zeroizing::new(Vec::with_capacity(
            SIGNATURE_SIZE + 2 + name.len() + plaintext.len(),
        ));
        inner.extend_from_slice(&[0u8; SIGNATURE_SIZE]);
        inner.extend_from_slice(&name_len.to_be_bytes());
        inner.extend_from_slice(name.as_bytes());
        inner.extend_from_slice(plaintext);
        let signature = self.identity.sign(&inner[SIGNATURE_SIZE..]);
        inner[..SIGNATURE_SIZE].copy_from_slice(&signature);

        let mut header = Vec::with_capacity(HEADER_SIZE);
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&ephemeral_public);

        let sealed = seal(&key, &inner, &header)?;

        let mut out = header;
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn open(&self, ciphertext: &[u8]) -> Result<Opened> {
        if ciphertext.len() < HEADER_SIZE || &ciphertext[..MAGIC.len()] != MAGIC {
            return Err(Error::Decryption("Not a cryptmirror envelope".to_string()));
        }

        let (header, sealed) = ciphertext.split_at(HEADER_SIZE);
        let mut ephemeral_public = [0u8; PUBLIC_KEY_SIZE];
        ephemeral_public.copy_from_slice(&header[MAGIC.len()..]);

        let shared = self.identity.agree(&ephemeral_public);
        let own_agreement = self.identity.public().agreement;
        let key = derive_content_key(&shared, &ephemeral_public, &own_agreement)?;

        let inner = Zeroizing::new(open(&key, sealed, header)?);
        if inner.len() < SIGNATURE_SIZE + 2 {
            return Err(Error::Decryption("Envelope payload too short".to_string()));
        }

        let (signature, signed) = inner.split_at(SIGNATURE_SIZE);
        self.verifier.verify(signed, signature)?;

        let name_len = u16::from_be_bytes([signed[0], signed[1]]) as usize;
        let body = &signed[2..];
        if body.len() < name_len {
            return Err(Error::Decryption("Envelope name truncated".to_string()));
        }

        let name = String::from_utf8(body[..name_len].to_vec())
            .map_err(|_| Error::Decryption("Envelope name is not UTF-8".to_string()))?;

        Ok(Opened {
            name,
            data: body[name_len..].to_vec(),
        })
    }
}

/// HKDF key type for ring
struct HkdfKeyType;

impl hkdf::KeyType for HkdfKeyType {
    fn len(&self) -> usize {
        KEY_SIZE
    }
}

fn derive_content_key(
    shared: &[u8; 32],
    ephemeral_public: &[u8; PUBLIC_KEY_SIZE],
    recipient_public: &[u8; PUBLIC_KEY_SIZE],
) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    let salt_bytes = [ephemeral_public.as_slice(), recipient_public.as_slice()].concat();
    let prk = Salt::new(HKDF_SHA256, &salt_bytes).extract(shared);

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    prk.expand(&[KDF_INFO], HkdfKeyType)
        .map_err(|_| Error::KeyDerivation("HKDF expansion failed".to_string()))?
        .fill(&mut key[..])
        .map_err(|_| Error::KeyDerivation("HKDF fill failed".to_string()))?;

    Ok(key)
}
