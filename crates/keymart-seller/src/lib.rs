//! # keymart seller
//!
//! The selling side of the keymart market.
//!
//! - [`KeySeries`] rotates the data keys of one api and keeps every key it
//!   ever issued.
//! - [`OfferPublisher`] announces each new key to the market maker.
//! - [`Seller`] ties series together, encrypts outgoing payloads, and
//!   fulfills purchases relayed by the market maker.
//!
//! ## Example
//!
//! ```ignore
//! use keymart_seller::{Seller, SellerConfig, SeriesConfig, SignedPaymentVerifier};
//!
//! let seller = Arc::new(Seller::new(
//!     keypair,
//!     SellerConfig::default(),
//!     Arc::new(SignedPaymentVerifier::new(market_maker_key)),
//! ));
//! seller.add(SeriesConfig::new(api_id, "io.example.ticks", 35, Duration::from_secs(60)))?;
//! seller.start(session).await?;
//!
//! let wrapped = seller.wrap(&api_id, "io.example.ticks.eur", &tick)?;
//! ```

pub mod config;
pub mod error;
pub mod offer;
pub mod payment;
pub mod seller;
pub mod series;

pub use config::{RetryPolicy, SellerConfig, SeriesConfig};
pub use error::{PublishError, Result, SellerError, SeriesError, SeriesResult};
pub use offer::{KeyOffer, OfferPublisher};
pub use payment::{PaymentVerifier, SignedPaymentVerifier};
pub use seller::Seller;
pub use series::{KeySeries, RotationHook, SeriesState};
