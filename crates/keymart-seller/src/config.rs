//! Seller configuration.
//!
//! All tunables have defaults matching the reference market constants and
//! can be loaded from TOML with human-readable durations (`"1s"`, `"5m"`).

use std::collections::BTreeMap;
use std::time::Duration;

use keymart_core::{ApiId, TokenAmount};
use serde::{Deserialize, Serialize};

/// Retry policy for offer publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

/// One sellable api and how its keys rotate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesConfig {
    /// The api, in UUID form in config files.
    #[serde(with = "uuid_string")]
    pub api_id: ApiId,
    /// Every payload of this api is published under this prefix.
    pub uri_prefix: String,
    /// Price per key, in token units.
    pub price: TokenAmount,
    #[serde(with = "humantime_serde")]
    pub rotation_interval: Duration,
    /// Free-form tags forwarded with each offer.
    #[serde(default)]
    pub categories: BTreeMap<String, String>,
}

impl SeriesConfig {
    pub fn new(
        api_id: ApiId,
        uri_prefix: impl Into<String>,
        price: TokenAmount,
        rotation_interval: Duration,
    ) -> Self {
        Self {
            api_id,
            uri_prefix: uri_prefix.into(),
            price,
            rotation_interval,
            categories: BTreeMap::new(),
        }
    }
}

/// Seller-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SellerConfig {
    /// Scopes the seller's `sell` procedure name.
    pub provider_id: String,
    pub offer_retry: RetryPolicy,
    /// How far `valid_from` of an offer lies before the key's creation,
    /// to absorb clock skew between seller and market maker.
    #[serde(with = "humantime_serde")]
    pub offer_backdate: Duration,
}

impl Default for SellerConfig {
    fn default() -> Self {
        Self {
            provider_id: "default".to_string(),
            offer_retry: RetryPolicy::default(),
            offer_backdate: Duration::from_secs(10),
        }
    }
}

mod uuid_string {
    use keymart_core::ApiId;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &ApiId, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(id)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ApiId, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_market_constants() {
        let seller = SellerConfig::default();
        assert_eq!(seller.offer_retry.max_attempts, 5);
        assert_eq!(seller.offer_retry.delay, Duration::from_secs(1));
        assert_eq!(seller.offer_backdate, Duration::from_secs(10));
    }
}
