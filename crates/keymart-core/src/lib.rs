//! # keymart core
//!
//! Pure primitives for the keymart data market: key identifiers, symmetric
//! key boxes, sealed key envelopes, and signed market terms.
//!
//! This crate contains no I/O, no networking, no async. It is pure
//! computation over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`KeyId`] - Identifier of one rotation epoch's data key
//! - [`KeyBox`] - A data key with authenticated encrypt/decrypt
//! - [`SealedKeyEnvelope`] - Key material sealed to a buyer's receive key
//! - [`Keypair`] - Ed25519 identity used to sign market terms
//! - [`PayloadSerializer`] - How plaintext payloads are serialized
//! - [`WrappedPayload`] - An encrypted payload tagged with its key id

pub mod crypto;
pub mod error;
pub mod fixed_bytes;
pub mod keybox;
pub mod payload;
pub mod sealed;
pub mod serializer;
pub mod terms;
pub mod types;

pub use crypto::{Ed25519PublicKey, Ed25519Signature, Keypair, ReceiveSecret, X25519PublicKey};
pub use error::{CoreError, Result};
pub use keybox::{KeyBox, KeyMaterial, KEY_SIZE};
pub use payload::WrappedPayload;
pub use sealed::SealedKeyEnvelope;
pub use serializer::PayloadSerializer;
pub use terms::{BuyTerms, OfferTerms, SaleTerms, Terms};
pub use types::{now_millis, ApiId, ChannelId, KeyId, OfferId, Timestamp, TokenAmount};
