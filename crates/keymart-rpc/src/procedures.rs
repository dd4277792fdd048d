//! Procedure names and message types.
//!
//! Arguments and results are CBOR-encoded structs. The market maker exposes
//! the `market.*` procedures; each seller exposes one provider-scoped `sell`.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use keymart_core::{
    ApiId, BuyTerms, ChannelId, Ed25519Signature, KeyId, OfferId, OfferTerms, SaleTerms,
    Timestamp, TokenAmount, X25519PublicKey,
};

use crate::error::{Result, RpcError};

/// Procedure names.
pub mod names {
    /// Market maker: announce a key for sale.
    pub const PLACE_OFFER: &str = "market.place_offer";
    /// Market maker: pay for and receive a key.
    pub const BUY: &str = "market.buy";
    /// Market maker: find a buyer's payment channel.
    pub const LOOKUP_PAYMENT_CHANNEL: &str = "market.lookup_payment_channel";

    /// Seller: deliver a paid-for key. Scoped by provider id.
    pub fn provider_sell(provider_id: &str) -> String {
        format!("market.provider.{provider_id}.sell")
    }
}

/// Application error URIs carried in [`RpcError::Application`].
pub mod errors {
    pub const UNKNOWN_KEY: &str = "market.error.unknown_key";
    pub const OFFER_INVALID: &str = "market.error.offer_invalid";
    pub const PAYMENT_INVALID: &str = "market.error.payment_invalid";
    pub const CHANNEL_INVALID: &str = "market.error.channel_invalid";
    pub const INSUFFICIENT_BALANCE: &str = "market.error.insufficient_balance";
    pub const INTERNAL: &str = "market.error.internal";
}

/// Encode a message to CBOR.
pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(message, &mut buf).map_err(|e| RpcError::Codec(e.to_string()))?;
    Ok(buf)
}

/// Decode a message from CBOR.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| RpcError::Codec(e.to_string()))
}

/// Arguments of [`names::PLACE_OFFER`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOfferRequest {
    pub key_id: KeyId,
    pub api_id: ApiId,
    pub uri_prefix: String,
    /// Unix ms from which the offer is valid.
    pub valid_from: Timestamp,
    /// Seller signature over [`OfferTerms`].
    pub signature: Ed25519Signature,
    pub price: TokenAmount,
    pub categories: Option<BTreeMap<String, String>>,
    /// Unix ms after which the offer lapses.
    pub expires: Option<Timestamp>,
    /// Maximum number of sales.
    pub copies: Option<u32>,
}

impl PlaceOfferRequest {
    /// The terms the signature covers.
    pub fn terms(&self) -> OfferTerms {
        OfferTerms {
            key_id: self.key_id,
            api_id: self.api_id,
            uri_prefix: self.uri_prefix.clone(),
            valid_from: self.valid_from,
            price: self.price,
        }
    }
}

/// Result of [`names::PLACE_OFFER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOfferResponse {
    pub offer_id: OfferId,
}

/// Arguments of [`names::BUY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyRequest {
    pub channel_id: ChannelId,
    pub sequence: u64,
    pub buyer_pubkey: X25519PublicKey,
    pub key_id: KeyId,
    pub amount: TokenAmount,
    /// Channel balance remaining after this payment.
    pub balance: TokenAmount,
    /// Buyer signature over [`BuyTerms`].
    pub signature: Ed25519Signature,
}

impl BuyRequest {
    /// The terms the signature covers.
    pub fn terms(&self) -> BuyTerms {
        BuyTerms {
            channel_id: self.channel_id,
            sequence: self.sequence,
            buyer_pubkey: self.buyer_pubkey,
            key_id: self.key_id,
            amount: self.amount,
            balance: self.balance,
        }
    }
}

/// Arguments of a provider's `sell` procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellRequest {
    pub key_id: KeyId,
    pub buyer_pubkey: X25519PublicKey,
    pub amount_paid: TokenAmount,
    pub post_balance: TokenAmount,
    /// Market maker signature over [`SaleTerms`].
    pub signature: Ed25519Signature,
}

impl SellRequest {
    /// The terms the signature covers.
    pub fn terms(&self) -> SaleTerms {
        SaleTerms {
            key_id: self.key_id,
            buyer_pubkey: self.buyer_pubkey,
            amount_paid: self.amount_paid,
            post_balance: self.post_balance,
        }
    }
}

/// Arguments of [`names::LOOKUP_PAYMENT_CHANNEL`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLookupRequest {
    /// The buyer's market address.
    pub buyer_address: String,
}

/// Lifecycle state of a payment channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Open,
    Closing,
    Closed,
}

/// A payment channel as the market maker sees it.
///
/// Result of [`names::LOOKUP_PAYMENT_CHANNEL`], wrapped in `Option`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentChannelInfo {
    pub id: ChannelId,
    pub status: ChannelStatus,
    /// Last sequence number used on the channel.
    pub sequence: u64,
    pub balance: TokenAmount,
}
