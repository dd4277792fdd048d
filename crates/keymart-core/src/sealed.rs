//! Anonymous public-key sealing of key material.
//!
//! A seller delivers a bought data key by sealing it to the buyer's receive
//! key. The sender generates a one-time X25519 key pair, so the envelope is
//! producible by anyone holding the buyer's public key and openable only by
//! the buyer. The sender is not authenticated.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{EphemeralKeyPair, ReceiveSecret, X25519PublicKey};
use crate::error::{CoreError, Result};
use crate::keybox::{KeyMaterial, NONCE_SIZE};

const WRAP_KEY_CONTEXT: &str = "keymart-v1 sealed key envelope wrap key";

/// Key material sealed to one buyer's receive key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedKeyEnvelope {
    /// Sender's one-time X25519 public key.
    pub ephemeral_public: X25519PublicKey,

    /// Nonce used for the wrap encryption.
    #[serde(with = "crate::fixed_bytes")]
    pub nonce: [u8; NONCE_SIZE],

    /// The key material, encrypted under the derived wrap key.
    pub ciphertext: Vec<u8>,
}

impl SealedKeyEnvelope {
    /// Seal `material` so that only the holder of `recipient`'s secret can open it.
    pub fn seal(material: &KeyMaterial, recipient: &X25519PublicKey) -> Result<Self> {
        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();

        let shared = ephemeral.diffie_hellman(recipient);
        let wrap_key = derive_wrap_key(&shared, &ephemeral_public, recipient);

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = XChaCha20Poly1305::new(Key::from_slice(&wrap_key[..]))
            .encrypt(XNonce::from_slice(&nonce), material.as_bytes().as_slice())
            .map_err(|e| CoreError::Encryption(e.to_string()))?;

        Ok(Self {
            ephemeral_public,
            nonce,
            ciphertext,
        })
    }

    /// Open the envelope with the recipient's receive secret.
    pub fn open(&self, recipient: &ReceiveSecret) -> Result<KeyMaterial> {
        let recipient_public = recipient.public_key();
        let shared = recipient.diffie_hellman(&self.ephemeral_public);
        let wrap_key = derive_wrap_key(&shared, &self.ephemeral_public, &recipient_public);

        let key_bytes = Zeroizing::new(
            XChaCha20Poly1305::new(Key::from_slice(&wrap_key[..]))
                .decrypt(XNonce::from_slice(&self.nonce), self.ciphertext.as_slice())
                .map_err(|_| CoreError::Unseal)?,
        );

        KeyMaterial::from_slice(&key_bytes)
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| CoreError::Encoding(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::Decoding(e.to_string()))
    }
}

/// Wrap key over the shared secret and both public keys.
fn derive_wrap_key(
    shared: &[u8; 32],
    ephemeral_public: &X25519PublicKey,
    recipient_public: &X25519PublicKey,
) -> Zeroizing<[u8; 32]> {
    let mut hasher = blake3::Hasher::new_derive_key(WRAP_KEY_CONTEXT);
    hasher.update(shared);
    hasher.update(ephemeral_public.as_bytes());
    hasher.update(recipient_public.as_bytes());
    Zeroizing::new(*hasher.finalize().as_bytes())
}
