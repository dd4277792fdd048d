//! Capability traits and the procedure adapters that serve them.
//!
//! A component that answers remote calls implements one of these traits and
//! is exposed on a [`Session`] with [`serve_provider`] or
//! [`serve_market_maker`]. The adapters own the CBOR decoding so the
//! implementations only see typed requests.

use std::sync::Arc;

use async_trait::async_trait;

use keymart_core::SealedKeyEnvelope;

use crate::error::Result;
use crate::procedures::{
    decode, encode, names, BuyRequest, ChannelLookupRequest, PaymentChannelInfo,
    PlaceOfferRequest, PlaceOfferResponse, SellRequest,
};
use crate::session::{CallDetails, Procedure, Registration, Session};

/// A data provider that sells keys it has issued.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Deliver a paid-for key sealed to the buyer.
    async fn sell(&self, details: &CallDetails, request: SellRequest)
        -> Result<SealedKeyEnvelope>;
}

/// The market maker: settles payments and brokers keys.
#[async_trait]
pub trait MarketMaker: Send + Sync {
    /// Accept an offer for a freshly issued key.
    async fn place_offer(
        &self,
        details: &CallDetails,
        request: PlaceOfferRequest,
    ) -> Result<PlaceOfferResponse>;

    /// Charge the buyer's channel and obtain the key from its seller.
    async fn buy(&self, details: &CallDetails, request: BuyRequest) -> Result<SealedKeyEnvelope>;

    /// Find the payment channel of a buyer address, if any.
    async fn lookup_payment_channel(
        &self,
        details: &CallDetails,
        request: ChannelLookupRequest,
    ) -> Result<Option<PaymentChannelInfo>>;
}

struct SellProcedure(Arc<dyn KeyProvider>);

#[async_trait]
impl Procedure for SellProcedure {
    async fn invoke(&self, details: CallDetails, args: Vec<u8>) -> Result<Vec<u8>> {
        let request: SellRequest = decode(&args)?;
        let envelope = self.0.sell(&details, request).await?;
        encode(&envelope)
    }
}

#[derive(Clone, Copy)]
enum MarketOp {
    PlaceOffer,
    Buy,
    LookupChannel,
}

struct MarketProcedure {
    op: MarketOp,
    market: Arc<dyn MarketMaker>,
}

#[async_trait]
impl Procedure for MarketProcedure {
    async fn invoke(&self, details: CallDetails, args: Vec<u8>) -> Result<Vec<u8>> {
        match self.op {
            MarketOp::PlaceOffer => {
                let response = self.market.place_offer(&details, decode(&args)?).await?;
                encode(&response)
            }
            MarketOp::Buy => {
                let envelope = self.market.buy(&details, decode(&args)?).await?;
                encode(&envelope)
            }
            MarketOp::LookupChannel => {
                let channel = self
                    .market
                    .lookup_payment_channel(&details, decode(&args)?)
                    .await?;
                encode(&channel)
            }
        }
    }
}

/// Register a provider's `sell` procedure under its provider-scoped name.
pub async fn serve_provider(
    session: &dyn Session,
    provider_id: &str,
    provider: Arc<dyn KeyProvider>,
) -> Result<Registration> {
    let name = names::provider_sell(provider_id);
    let registration = session
        .register(&name, Arc::new(SellProcedure(provider)))
        .await?;
    tracing::info!(procedure = %name, "procedure registered");
    Ok(registration)
}

/// Register all market maker procedures.
pub async fn serve_market_maker(
    session: &dyn Session,
    market: Arc<dyn MarketMaker>,
) -> Result<Vec<Registration>> {
    let table = [
        (names::PLACE_OFFER, MarketOp::PlaceOffer),
        (names::BUY, MarketOp::Buy),
        (names::LOOKUP_PAYMENT_CHANNEL, MarketOp::LookupChannel),
    ];

    let mut registrations = Vec::with_capacity(table.len());
    for (name, op) in table {
        let procedure = MarketProcedure {
            op,
            market: Arc::clone(&market),
        };
        registrations.push(session.register(name, Arc::new(procedure)).await?);
        tracing::info!(procedure = name, "procedure registered");
    }
    Ok(registrations)
}
