//! Buyer configuration.

use std::time::Duration;

use keymart_core::TokenAmount;
use serde::{Deserialize, Serialize};

/// Buyer tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuyerConfig {
    /// Amount offered for every key.
    pub purchase_amount: TokenAmount,
    /// How often a caller waiting on another caller's purchase reports in.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for BuyerConfig {
    fn default() -> Self {
        Self {
            purchase_amount: 35,
            poll_interval: Duration::from_millis(200),
        }
    }
}
