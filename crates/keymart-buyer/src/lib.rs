//! # keymart buyer
//!
//! The buying side of the keymart market.
//!
//! A [`Buyer`] finds its payment channel on the market maker, then decrypts
//! payloads as they arrive. The first payload under an unknown key triggers
//! exactly one purchase of that key; concurrent payloads under the same key
//! wait for it.
//!
//! ```ignore
//! let buyer = Buyer::new(identity, BuyerConfig::default());
//! let balance = buyer.start(session).await?;
//! let tick: Tick = buyer.unwrap_payload(&wrapped).await?;
//! ```

pub mod buyer;
pub mod config;
pub mod error;

pub use buyer::{Buyer, ChannelState};
pub use config::BuyerConfig;
pub use error::{BuyerError, Result};
