//! Error types for keymart core primitives.

use thiserror::Error;

/// Errors raised by the cryptographic and encoding primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Ciphertext was not produced under this key, or was tampered with.
    #[error("authentication failed: ciphertext does not verify under this key")]
    Authentication,

    /// A sealed envelope could not be opened with the given receive key.
    #[error("failed to unseal key envelope")]
    Unseal,

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("unsupported serializer: {0}")]
    UnsupportedSerializer(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("decoding error: {0}")]
    Decoding(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
