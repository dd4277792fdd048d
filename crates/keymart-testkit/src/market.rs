//! An in-process market maker.
//!
//! [`MockMarketMaker`] keeps payment channels and offers in memory, checks
//! the signatures a real market maker would check, and relays paid
//! purchases to the seller's `sell` procedure. Failures can be scripted per
//! operation and every operation is counted.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use keymart_core::{
    ChannelId, Ed25519PublicKey, Ed25519Signature, KeyId, Keypair, OfferId, SaleTerms,
    SealedKeyEnvelope, Terms, TokenAmount,
};
use keymart_rpc::{
    errors, names, serve_market_maker, BuyRequest, CallDetails, ChannelLookupRequest,
    ChannelStatus, MarketMaker, PaymentChannelInfo, PlaceOfferRequest, PlaceOfferResponse,
    Registration, Result, RpcError, SellRequest, Session, SessionExt,
};

/// An offer the market maker accepted.
#[derive(Debug, Clone)]
pub struct OfferRecord {
    pub offer_id: OfferId,
    pub provider_id: String,
    pub request: PlaceOfferRequest,
}

#[derive(Debug)]
struct Channel {
    owner: Ed25519PublicKey,
    status: ChannelStatus,
    /// Sequence the channel was opened at; payments must use higher ones.
    base_sequence: u64,
    sequence: u64,
    balance: TokenAmount,
    spent: HashSet<u64>,
}

impl Channel {
    fn info(&self, id: ChannelId) -> PaymentChannelInfo {
        PaymentChannelInfo {
            id,
            status: self.status,
            sequence: self.sequence,
            balance: self.balance,
        }
    }
}

#[derive(Default)]
struct Counters {
    place_offer: AtomicUsize,
    buy: AtomicUsize,
    lookup: AtomicUsize,
}

#[derive(Default)]
struct Script {
    place_offer: VecDeque<RpcError>,
    buy: VecDeque<RpcError>,
}

/// A market maker for tests.
pub struct MockMarketMaker {
    keypair: Keypair,
    session: Arc<dyn Session>,
    sellers: Mutex<HashMap<Ed25519PublicKey, String>>,
    offers: Mutex<HashMap<KeyId, OfferRecord>>,
    channels: Mutex<HashMap<ChannelId, Channel>>,
    script: Mutex<Script>,
    counters: Counters,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockMarketMaker {
    /// Create a market maker that calls sellers through `session`.
    pub fn new(keypair: Keypair, session: Arc<dyn Session>) -> Arc<Self> {
        Arc::new(Self {
            keypair,
            session,
            sellers: Mutex::new(HashMap::new()),
            offers: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            script: Mutex::new(Script::default()),
            counters: Counters::default(),
        })
    }

    /// Register the market procedures on the market maker's session.
    pub async fn serve(self: &Arc<Self>) -> Result<Vec<Registration>> {
        let market: Arc<dyn MarketMaker> = Arc::clone(self) as Arc<dyn MarketMaker>;
        serve_market_maker(self.session.as_ref(), market).await
    }

    /// The key sales are signed with; sellers verify payments against it.
    pub fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Setup
    // ─────────────────────────────────────────────────────────────────────────

    /// Accept offers signed by `seller` on behalf of `provider_id`.
    pub fn register_seller(&self, provider_id: impl Into<String>, seller: Ed25519PublicKey) {
        lock(&self.sellers).insert(seller, provider_id.into());
    }

    /// Open a channel for `buyer` with `balance` tokens.
    pub fn open_channel(&self, buyer: Ed25519PublicKey, balance: TokenAmount) -> ChannelId {
        self.open_channel_at(buyer, balance, 0)
    }

    /// Open a channel whose last used sequence is `sequence`.
    pub fn open_channel_at(
        &self,
        buyer: Ed25519PublicKey,
        balance: TokenAmount,
        sequence: u64,
    ) -> ChannelId {
        let id = ChannelId::random();
        lock(&self.channels).insert(
            id,
            Channel {
                owner: buyer,
                status: ChannelStatus::Open,
                base_sequence: sequence,
                sequence,
                balance,
                spent: HashSet::new(),
            },
        );
        id
    }

    pub fn set_channel_status(&self, id: ChannelId, status: ChannelStatus) {
        if let Some(channel) = lock(&self.channels).get_mut(&id) {
            channel.status = status;
        }
    }

    /// Fail the next `place_offer` calls with these errors, in order.
    pub fn fail_place_offer(&self, errors: impl IntoIterator<Item = RpcError>) {
        lock(&self.script).place_offer.extend(errors);
    }

    /// Fail the next `buy` calls with these errors, in order.
    pub fn fail_buy(&self, errors: impl IntoIterator<Item = RpcError>) {
        lock(&self.script).buy.extend(errors);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────

    pub fn channel(&self, id: ChannelId) -> Option<PaymentChannelInfo> {
        lock(&self.channels).get(&id).map(|c| c.info(id))
    }

    pub fn offer(&self, key_id: &KeyId) -> Option<OfferRecord> {
        lock(&self.offers).get(key_id).cloned()
    }

    pub fn offer_count(&self) -> usize {
        lock(&self.offers).len()
    }

    pub fn place_offer_calls(&self) -> usize {
        self.counters.place_offer.load(Ordering::SeqCst)
    }

    pub fn buy_calls(&self) -> usize {
        self.counters.buy.load(Ordering::SeqCst)
    }

    pub fn lookup_calls(&self) -> usize {
        self.counters.lookup.load(Ordering::SeqCst)
    }

    /// Wait until `key_id` has been offered, or `timeout` elapses.
    pub async fn wait_for_offer(&self, key_id: &KeyId, timeout: Duration) -> bool {
        let poll = async {
            while self.offer(key_id).is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }

    /// Wait until `place_offer` has been called `n` times, or `timeout` elapses.
    pub async fn wait_for_place_offer_calls(&self, n: usize, timeout: Duration) -> bool {
        let poll = async {
            while self.place_offer_calls() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Settlement
    // ─────────────────────────────────────────────────────────────────────────

    /// Check a buy against its channel and reserve the payment.
    fn charge(&self, request: &BuyRequest) -> Result<()> {
        let mut channels = lock(&self.channels);
        let channel = channels.get_mut(&request.channel_id).ok_or_else(|| {
            RpcError::application(errors::CHANNEL_INVALID, "unknown payment channel")
        })?;

        if channel.status != ChannelStatus::Open {
            return Err(RpcError::application(
                errors::CHANNEL_INVALID,
                "payment channel not open",
            ));
        }
        request
            .terms()
            .verify(&channel.owner, &request.signature)
            .map_err(|e| RpcError::application(errors::PAYMENT_INVALID, e.to_string()))?;
        if request.sequence <= channel.base_sequence || channel.spent.contains(&request.sequence) {
            return Err(RpcError::application(
                errors::CHANNEL_INVALID,
                format!("sequence {} already used", request.sequence),
            ));
        }
        if request.amount > channel.balance {
            return Err(RpcError::application(
                errors::INSUFFICIENT_BALANCE,
                format!("balance {} below {}", channel.balance, request.amount),
            ));
        }

        channel.spent.insert(request.sequence);
        channel.sequence = channel.sequence.max(request.sequence);
        channel.balance -= request.amount;
        Ok(())
    }

    fn refund(&self, request: &BuyRequest) {
        if let Some(channel) = lock(&self.channels).get_mut(&request.channel_id) {
            channel.balance += request.amount;
        }
    }
}

#[async_trait]
impl MarketMaker for MockMarketMaker {
    async fn place_offer(
        &self,
        _details: &CallDetails,
        request: PlaceOfferRequest,
    ) -> Result<PlaceOfferResponse> {
        self.counters.place_offer.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = lock(&self.script).place_offer.pop_front() {
            return Err(e);
        }

        let terms = request.terms();
        let provider_id = lock(&self.sellers)
            .iter()
            .find(|(seller, _)| terms.verify(seller, &request.signature).is_ok())
            .map(|(_, provider)| provider.clone())
            .ok_or_else(|| {
                RpcError::application(errors::OFFER_INVALID, "offer not signed by a known seller")
            })?;

        let offer_id = OfferId::random();
        debug!(
            key_id = %request.key_id,
            offer_id = %offer_id,
            provider_id = %provider_id,
            "offer accepted"
        );
        lock(&self.offers).insert(
            request.key_id,
            OfferRecord {
                offer_id,
                provider_id,
                request,
            },
        );
        Ok(PlaceOfferResponse { offer_id })
    }

    async fn buy(&self, _details: &CallDetails, request: BuyRequest) -> Result<SealedKeyEnvelope> {
        self.counters.buy.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = lock(&self.script).buy.pop_front() {
            return Err(e);
        }

        let offer = self.offer(&request.key_id).ok_or_else(|| {
            RpcError::application(errors::UNKNOWN_KEY, format!("no offer for {}", request.key_id))
        })?;
        if request.amount < offer.request.price {
            return Err(RpcError::application(
                errors::PAYMENT_INVALID,
                format!("amount {} below price {}", request.amount, offer.request.price),
            ));
        }

        self.charge(&request)?;

        let mut sale = SellRequest {
            key_id: request.key_id,
            buyer_pubkey: request.buyer_pubkey,
            amount_paid: request.amount,
            post_balance: request.balance,
            signature: Ed25519Signature::ZERO,
        };
        let terms: SaleTerms = sale.terms();
        sale.signature = match terms.sign(&self.keypair) {
            Ok(signature) => signature,
            Err(e) => {
                self.refund(&request);
                return Err(RpcError::application(errors::INTERNAL, e.to_string()));
            }
        };

        let result: Result<SealedKeyEnvelope> = self
            .session
            .call_typed(&names::provider_sell(&offer.provider_id), &sale)
            .await;
        if result.is_err() {
            self.refund(&request);
        }
        result
    }

    async fn lookup_payment_channel(
        &self,
        _details: &CallDetails,
        request: ChannelLookupRequest,
    ) -> Result<Option<PaymentChannelInfo>> {
        self.counters.lookup.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.channels)
            .iter()
            .find(|(_, c)| c.owner.address() == request.buyer_address)
            .map(|(id, c)| c.info(*id)))
    }
}
