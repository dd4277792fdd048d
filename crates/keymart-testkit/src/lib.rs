//! # keymart testkit
//!
//! Testing utilities for keymart.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Mock market maker**: an in-process [`MockMarketMaker`] with payment
//!   channels, scripted failures and call counters
//! - **Fixtures**: a router with the market maker already serving, plus
//!   helpers that attach sellers and buyers
//! - **Generators**: Proptest strategies for property-based testing
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use keymart_testkit::fixtures::{seller_config, series_config, MarketFixture};
//!
//! let fixture = MarketFixture::new().await?;
//! let seller = fixture
//!     .start_seller(seller_config("acme"), [series_config(35)])
//!     .await?;
//! let buyer = fixture.start_buyer(Default::default(), 1_000).await?;
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use keymart_testkit::generators::{receive_secret, Tick};
//!
//! proptest! {
//!     #[test]
//!     fn ticks_encode(tick: Tick) {
//!         prop_assert!(PayloadSerializer::Cbor.encode(&tick).is_ok());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod market;

pub use fixtures::{active_key, seller_config, series_config, MarketFixture, TEST_URI_PREFIX};
pub use generators::Tick;
pub use market::{MockMarketMaker, OfferRecord};
