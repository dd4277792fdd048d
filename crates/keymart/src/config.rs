//! Market configuration.
//!
//! One TOML document configures a process that sells, buys, or both:
//!
//! ```toml
//! [seller]
//! provider_id = "acme"
//! offer_backdate = "10s"
//!
//! [seller.offer_retry]
//! max_attempts = 5
//! delay = "1s"
//!
//! [[series]]
//! api_id = "5e1d3f0a-6b1c-4a4e-9d1f-2c3b4a5d6e7f"
//! uri_prefix = "io.acme.prices"
//! price = 35
//! rotation_interval = "5m"
//!
//! [buyer]
//! purchase_amount = 35
//! poll_interval = "200ms"
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use keymart_buyer::{Buyer, BuyerConfig};
use keymart_core::Keypair;
use keymart_seller::{PaymentVerifier, Seller, SellerConfig, SeriesConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Result;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings for a market participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub seller: Option<SellerConfig>,
    pub series: Vec<SeriesConfig>,
    pub buyer: Option<BuyerConfig>,
}

impl MarketConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> std::result::Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> std::result::Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check the values a running market cannot work with.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if let Some(seller) = &self.seller {
            if seller.provider_id.is_empty() {
                return Err(ConfigError::Invalid("seller.provider_id is empty".into()));
            }
            if seller.offer_retry.max_attempts == 0 {
                return Err(ConfigError::Invalid(
                    "seller.offer_retry.max_attempts must be at least 1".into(),
                ));
            }
        }

        let mut apis = HashSet::new();
        for series in &self.series {
            if !apis.insert(series.api_id) {
                return Err(ConfigError::Invalid(format!(
                    "api {} configured twice",
                    series.api_id
                )));
            }
            if series.rotation_interval.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "api {} has a zero rotation_interval",
                    series.api_id
                )));
            }
        }

        if let Some(buyer) = &self.buyer {
            if buyer.purchase_amount == 0 {
                return Err(ConfigError::Invalid("buyer.purchase_amount is zero".into()));
            }
            if buyer.poll_interval.is_zero() {
                return Err(ConfigError::Invalid("buyer.poll_interval is zero".into()));
            }
        }

        Ok(())
    }

    /// A seller with every configured series added.
    ///
    /// Uses the default seller settings when the `[seller]` table is absent.
    pub fn build_seller(
        &self,
        keypair: Keypair,
        verifier: Arc<dyn PaymentVerifier>,
    ) -> Result<Arc<Seller>> {
        let seller = Seller::new(keypair, self.seller.clone().unwrap_or_default(), verifier);
        for series in &self.series {
            seller.add(series.clone())?;
        }
        Ok(Arc::new(seller))
    }

    /// A buyer with the configured settings, or the defaults.
    pub fn build_buyer(&self, identity: Keypair) -> Buyer {
        Buyer::new(identity, self.buyer.clone().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_empty_document_is_default() {
        let config = MarketConfig::from_toml_str("").unwrap();
        assert_eq!(config, MarketConfig::default());
    }

    #[test]
    fn test_partial_tables_take_defaults() {
        let config = MarketConfig::from_toml_str(
            r#"
            [seller]
            provider_id = "acme"

            [buyer]
            poll_interval = "50ms"
            "#,
        )
        .unwrap();

        let seller = config.seller.unwrap();
        assert_eq!(seller.provider_id, "acme");
        assert_eq!(seller.offer_retry.max_attempts, 5);
        assert_eq!(seller.offer_backdate, Duration::from_secs(10));

        let buyer = config.buyer.unwrap();
        assert_eq!(buyer.purchase_amount, 35);
        assert_eq!(buyer.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let err = MarketConfig::from_toml_str(
            r#"
            [seller.offer_retry]
            max_attempts = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_duplicate_api() {
        let series = r#"
            [[series]]
            api_id = "00000000-0000-0000-0000-000000000001"
            uri_prefix = "a"
            price = 1
            rotation_interval = "1m"
        "#;
        let err = MarketConfig::from_toml_str(&series.repeat(2)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("twice")));
    }

    #[test]
    fn test_rejects_malformed_api_id() {
        let err = MarketConfig::from_toml_str(
            r#"
            [[series]]
            api_id = "acme"
            uri_prefix = "a"
            price = 1
            rotation_interval = "1m"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
