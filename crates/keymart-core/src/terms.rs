//! Signed terms.
//!
//! Every authorization on the market is an Ed25519 signature over a
//! domain-separated CBOR encoding of a terms struct:
//!
//! - [`OfferTerms`]: signed by the seller when offering a key.
//! - [`BuyTerms`]: signed by the buyer when paying for a key from its channel.
//! - [`SaleTerms`]: signed by the market maker when relaying a settled
//!   purchase to the seller.
//!
//! Field order is fixed by the struct definitions, which makes the encoding
//! deterministic.

use serde::{Deserialize, Serialize};

use crate::crypto::{Ed25519PublicKey, Ed25519Signature, Keypair, X25519PublicKey};
use crate::error::{CoreError, Result};
use crate::types::{ApiId, ChannelId, KeyId, Timestamp, TokenAmount};

/// A struct that can be signed as market terms.
pub trait Terms: Serialize {
    /// Domain separation prefix for this kind of terms.
    const DOMAIN: &'static [u8];

    /// The exact bytes that get signed.
    fn signing_message(&self) -> Result<Vec<u8>> {
        let mut buf = Self::DOMAIN.to_vec();
        ciborium::into_writer(self, &mut buf).map_err(|e| CoreError::Encoding(e.to_string()))?;
        Ok(buf)
    }

    /// Sign these terms.
    fn sign(&self, keypair: &Keypair) -> Result<Ed25519Signature> {
        Ok(keypair.sign(&self.signing_message()?))
    }

    /// Verify a signature over these terms.
    fn verify(&self, signer: &Ed25519PublicKey, signature: &Ed25519Signature) -> Result<()> {
        signer.verify(&self.signing_message()?, signature)
    }
}

/// What a seller commits to when offering a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferTerms {
    pub key_id: KeyId,
    pub api_id: ApiId,
    pub uri_prefix: String,
    pub valid_from: Timestamp,
    pub price: TokenAmount,
}

impl Terms for OfferTerms {
    const DOMAIN: &'static [u8] = b"keymart-v1/offer\x00";
}

/// What a buyer authorizes against its payment channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyTerms {
    pub channel_id: ChannelId,
    pub sequence: u64,
    pub buyer_pubkey: X25519PublicKey,
    pub key_id: KeyId,
    pub amount: TokenAmount,
    pub balance: TokenAmount,
}

impl Terms for BuyTerms {
    const DOMAIN: &'static [u8] = b"keymart-v1/buy\x00";
}

/// What the market maker attests to the seller after settling a purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleTerms {
    pub key_id: KeyId,
    pub buyer_pubkey: X25519PublicKey,
    pub amount_paid: TokenAmount,
    pub post_balance: TokenAmount,
}

impl Terms for SaleTerms {
    const DOMAIN: &'static [u8] = b"keymart-v1/sale\x00";
}
