//! Test fixtures and helpers.
//!
//! Common setup for integration tests: a router, a market maker serving on
//! it, and helpers that attach sellers and buyers.

use std::sync::Arc;
use std::time::Duration;

use keymart_buyer::{Buyer, BuyerConfig};
use keymart_core::{ApiId, KeyId, Keypair, TokenAmount};
use keymart_rpc::memory::{MemoryRouter, MemorySession};
use keymart_seller::{
    KeySeries, PaymentVerifier, RetryPolicy, Seller, SellerConfig, SeriesConfig,
    SignedPaymentVerifier,
};

use crate::market::MockMarketMaker;

/// Prefix used by [`series_config`].
pub const TEST_URI_PREFIX: &str = "io.keymart.test";

/// A series with a random api under [`TEST_URI_PREFIX`].
///
/// The interval is long enough that only the initial rotation happens on
/// its own; tests rotate further by hand.
pub fn series_config(price: TokenAmount) -> SeriesConfig {
    SeriesConfig::new(
        ApiId::random(),
        TEST_URI_PREFIX,
        price,
        Duration::from_secs(3600),
    )
}

/// Seller settings with a short retry delay.
pub fn seller_config(provider_id: &str) -> SellerConfig {
    SellerConfig {
        provider_id: provider_id.to_string(),
        offer_retry: RetryPolicy {
            max_attempts: 5,
            delay: Duration::from_millis(20),
        },
        ..SellerConfig::default()
    }
}

/// A market maker serving on an in-memory router.
pub struct MarketFixture {
    pub router: Arc<MemoryRouter>,
    pub market: Arc<MockMarketMaker>,
}

impl MarketFixture {
    /// Create a router and serve a fresh market maker on it.
    pub async fn new() -> keymart_rpc::Result<Self> {
        let router = MemoryRouter::new();
        let market = MockMarketMaker::new(Keypair::generate(), router.attach());
        market.serve().await?;
        Ok(Self { router, market })
    }

    /// A new session on the router.
    pub fn session(&self) -> Arc<MemorySession> {
        self.router.attach()
    }

    /// A verifier trusting this fixture's market maker.
    pub fn verifier(&self) -> Arc<dyn PaymentVerifier> {
        Arc::new(SignedPaymentVerifier::new(self.market.public_key()))
    }

    /// A seller known to the market maker, with `series` added. Not started.
    pub fn seller(
        &self,
        config: SellerConfig,
        series: impl IntoIterator<Item = SeriesConfig>,
    ) -> keymart_seller::Result<Arc<Seller>> {
        self.seller_with_verifier(config, series, self.verifier())
    }

    /// Like [`MarketFixture::seller`] with a custom payment verifier.
    pub fn seller_with_verifier(
        &self,
        config: SellerConfig,
        series: impl IntoIterator<Item = SeriesConfig>,
        verifier: Arc<dyn PaymentVerifier>,
    ) -> keymart_seller::Result<Arc<Seller>> {
        let provider_id = config.provider_id.clone();
        let seller = Seller::new(Keypair::generate(), config, verifier);
        for s in series {
            seller.add(s)?;
        }
        self.market.register_seller(provider_id, seller.public_key());
        Ok(Arc::new(seller))
    }

    /// A started seller on its own session.
    pub async fn start_seller(
        &self,
        config: SellerConfig,
        series: impl IntoIterator<Item = SeriesConfig>,
    ) -> keymart_seller::Result<Arc<Seller>> {
        let seller = self.seller(config, series)?;
        seller.start(self.session()).await?;
        Ok(seller)
    }

    /// A buyer with an open channel of `balance` tokens. Not started.
    pub fn buyer(&self, config: BuyerConfig, balance: TokenAmount) -> Buyer {
        let buyer = Buyer::new(Keypair::generate(), config);
        self.market.open_channel(buyer.public_key(), balance);
        buyer
    }

    /// A started buyer on its own session.
    pub async fn start_buyer(
        &self,
        config: BuyerConfig,
        balance: TokenAmount,
    ) -> keymart_buyer::Result<Arc<Buyer>> {
        let buyer = Arc::new(self.buyer(config, balance));
        buyer.start(self.session()).await?;
        Ok(buyer)
    }
}

/// Wait for `series` to have an active key.
pub async fn active_key(series: &KeySeries, timeout: Duration) -> Option<KeyId> {
    let poll = async {
        loop {
            if let Some(key_id) = series.active_key_id() {
                return key_id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(timeout, poll).await.ok()
}
