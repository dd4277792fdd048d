//! Symmetric data keys.
//!
//! A [`KeyBox`] holds one rotation epoch's key material and performs
//! XChaCha20-Poly1305 authenticated encryption under it. Ciphertexts carry
//! their nonce: `nonce (24 bytes) || ciphertext || tag (16 bytes)`.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CoreError, Result};
use crate::types::{now_millis, KeyId, Timestamp};

/// Size of the symmetric key material in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of the per-message nonce in bytes.
pub const NONCE_SIZE: usize = 24;

/// Size of the Poly1305 authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// A 256-bit symmetric secret.
///
/// Never printed and wiped from memory on drop. The only way it leaves the
/// process is inside a [`crate::SealedKeyEnvelope`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial([u8; KEY_SIZE]);

impl KeyMaterial {
    /// Generate fresh key material from the CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a byte slice, checking its length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| CoreError::InvalidKeyLength {
            expected: KEY_SIZE,
            got: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl Eq for KeyMaterial {}

/// One symmetric data key with its identifier and creation time.
///
/// Immutable once created.
pub struct KeyBox {
    id: KeyId,
    material: KeyMaterial,
    created_at: Timestamp,
    cipher: XChaCha20Poly1305,
}

impl KeyBox {
    /// Mint a new box with a random id and fresh key material.
    pub fn generate() -> Self {
        Self::new(KeyId::random(), KeyMaterial::generate(), now_millis())
    }

    /// Wrap existing key material, e.g. a key just bought from a seller.
    pub fn new(id: KeyId, material: KeyMaterial, created_at: Timestamp) -> Self {
        let cipher = XChaCha20Poly1305::new(Key::from_slice(material.as_bytes()));
        Self {
            id,
            material,
            created_at,
            cipher,
        }
    }

    pub fn id(&self) -> KeyId {
        self.id
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// The raw key material, for sealing it to a buyer.
    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    /// Authenticated-encrypt `plaintext` under this key.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|e| CoreError::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Decrypt and verify a ciphertext produced by [`KeyBox::encrypt`].
    ///
    /// Fails with [`CoreError::Authentication`] if it was produced under a
    /// different key, truncated, or tampered with.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CoreError::Authentication);
        }
        let (nonce, body) = ciphertext.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(XNonce::from_slice(nonce), body)
            .map_err(|_| CoreError::Authentication)
    }
}

impl fmt::Debug for KeyBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyBox")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encrypt_decrypt() {
        let keybox = KeyBox::generate();
        let plaintext = b"hello, world!";

        let ciphertext = keybox.encrypt(plaintext).unwrap();
        assert_ne!(&ciphertext[NONCE_SIZE..], plaintext);
        assert_eq!(ciphertext.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);

        let decrypted = keybox.decrypt(&ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_decrypt_wrong_key_fails() {
        let box1 = KeyBox::generate();
        let box2 = KeyBox::generate();

        let ciphertext = box1.encrypt(b"secret").unwrap();

        assert!(matches!(
            box2.decrypt(&ciphertext),
            Err(CoreError::Authentication)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let keybox = KeyBox::generate();
        let mut ciphertext = keybox.encrypt(b"secret").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;

        assert!(matches!(
            keybox.decrypt(&ciphertext),
            Err(CoreError::Authentication)
        ));
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let keybox = KeyBox::generate();
        assert!(matches!(
            keybox.decrypt(&[0u8; 10]),
            Err(CoreError::Authentication)
        ));
    }

    #[test]
    fn test_same_material_different_box_decrypts() {
        let original = KeyBox::generate();
        let copy = KeyBox::new(original.id(), original.material().clone(), 0);

        let ciphertext = original.encrypt(b"late reader").unwrap();
        assert_eq!(copy.decrypt(&ciphertext).unwrap(), b"late reader");
    }

    #[test]
    fn test_key_material_debug_is_redacted() {
        let material = KeyMaterial::from_bytes([0x41; KEY_SIZE]);
        assert_eq!(format!("{:?}", material), "KeyMaterial(<redacted>)");
    }

    #[test]
    fn test_key_material_from_slice_checks_length() {
        assert!(KeyMaterial::from_slice(&[0u8; 31]).is_err());
        assert!(KeyMaterial::from_slice(&[0u8; KEY_SIZE]).is_ok());
    }

    proptest! {
        #[test]
        fn prop_roundtrip_and_foreign_key_rejects(payload in prop::collection::vec(any::<u8>(), 0..512)) {
            let keybox = KeyBox::generate();
            let other = KeyBox::generate();

            let ciphertext = keybox.encrypt(&payload).unwrap();
            prop_assert_eq!(keybox.decrypt(&ciphertext).unwrap(), payload);
            prop_assert!(matches!(other.decrypt(&ciphertext), Err(CoreError::Authentication)));
        }
    }
}
