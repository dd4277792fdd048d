//! Encrypted payloads as they travel from seller to buyer.

use serde::{Deserialize, Serialize};

use crate::types::KeyId;

/// A payload encrypted under one key of a series.
///
/// The serializer is carried as a free-form tag so that a receiver can
/// reject formats it does not understand before doing any work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedPayload {
    /// The key the payload was encrypted under.
    pub key_id: KeyId,
    /// How the plaintext was serialized, e.g. `"cbor"`.
    pub serializer: String,
    /// `nonce || ciphertext || tag`.
    pub ciphertext: Vec<u8>,
}
