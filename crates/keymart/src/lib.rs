//! # keymart
//!
//! A pay-per-key data market.
//!
//! ## Overview
//!
//! Sellers encrypt their data with symmetric keys that rotate on a timer and
//! offer every key to a market maker. Buyers receive ciphertext freely and
//! pay, through an off-chain payment channel, for the keys they need. The
//! market maker settles each payment and relays it to the seller, which
//! answers with the key sealed to the buyer.
//!
//! ```text
//! Seller --place_offer--> Market maker <--buy-- Buyer
//!    ^                         |
//!    +---------sell------------+
//! ```
//!
//! ## Key Concepts
//!
//! - **KeyBox**: one symmetric data key, identified by a [`KeyId`].
//! - **KeySeries**: the rotating keys of one api, with every past key archived.
//! - **Offer**: the announcement of a key's price to the market maker.
//! - **Sealed envelope**: a key encrypted so that only one buyer can open it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keymart::{MarketConfig, SignedPaymentVerifier, Keypair};
//!
//! let config = MarketConfig::load("market.toml")?;
//! let seller = config.build_seller(
//!     Keypair::generate(),
//!     Arc::new(SignedPaymentVerifier::new(market_maker_key)),
//! )?;
//! seller.start(session.clone()).await?;
//!
//! let buyer = config.build_buyer(Keypair::generate());
//! buyer.start(session).await?;
//! ```
//!
//! ## Re-exports
//!
//! - `keymart::core` - keys, envelopes, signed terms
//! - `keymart::rpc` - the session contract and procedure messages
//! - `keymart::seller` - key series, offers and sales
//! - `keymart::buyer` - purchases and decryption

pub mod config;
pub mod error;

pub use keymart_buyer as buyer;
pub use keymart_core as core;
pub use keymart_rpc as rpc;
pub use keymart_seller as seller;

pub use config::{ConfigError, MarketConfig};
pub use error::{MarketError, Result};

pub use keymart_buyer::{Buyer, BuyerConfig, ChannelState};
pub use keymart_core::{
    ApiId, ChannelId, Ed25519PublicKey, KeyBox, KeyId, Keypair, ReceiveSecret, SealedKeyEnvelope,
    TokenAmount, WrappedPayload,
};
pub use keymart_rpc::{KeyProvider, MarketMaker, Session};
pub use keymart_seller::{
    KeySeries, PaymentVerifier, RetryPolicy, Seller, SellerConfig, SeriesConfig,
    SignedPaymentVerifier,
};
