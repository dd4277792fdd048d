//! The Buyer: payment channel, key purchases and payload decryption.
//!
//! A buyer holds two keys. Its Ed25519 identity signs every payment and
//! names its payment channel on the market. Its X25519 receive key is what
//! sellers seal purchased keys to.
//!
//! Purchases are deduplicated per [`KeyId`]: whatever the number of
//! concurrent `unwrap` calls for a key not yet held, exactly one of them
//! buys it and the others wait for that purchase to resolve.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use keymart_core::{
    now_millis, BuyTerms, ChannelId, Ed25519PublicKey, KeyBox, KeyId, Keypair, PayloadSerializer,
    ReceiveSecret, SealedKeyEnvelope, Terms, TokenAmount, WrappedPayload, X25519PublicKey,
};
use keymart_rpc::{
    names, BuyRequest, ChannelLookupRequest, ChannelStatus, PaymentChannelInfo, Session,
    SessionExt,
};

use crate::config::BuyerConfig;
use crate::error::{BuyerError, Result};

/// The buyer's view of its payment channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelState {
    pub id: ChannelId,
    /// Sequence number of the last payment made on the channel.
    pub sequence: u64,
    /// Advisory remaining balance. The market maker holds the real one.
    pub balance: TokenAmount,
}

/// Outcome of a purchase, as seen by callers waiting on it.
#[derive(Clone)]
enum Purchase {
    InFlight,
    Done(Arc<KeyBox>),
    Failed(String),
    Aborted,
}

enum Slot {
    Pending(watch::Receiver<Purchase>),
    Ready(Arc<KeyBox>),
}

type KeyTable = Mutex<HashMap<KeyId, Slot>>;

/// Marks a key in flight for as long as its purchase runs.
///
/// Dropping the guard without resolving it (the purchasing future was
/// cancelled) clears the mark and releases waiters with
/// [`BuyerError::PurchaseAborted`].
struct PendingPurchase<'a> {
    keys: &'a KeyTable,
    key_id: KeyId,
    tx: Option<watch::Sender<Purchase>>,
}

impl PendingPurchase<'_> {
    fn resolve(mut self, key: Arc<KeyBox>) {
        if let Some(tx) = self.tx.take() {
            lock(self.keys).insert(self.key_id, Slot::Ready(Arc::clone(&key)));
            tx.send_replace(Purchase::Done(key));
        }
    }

    fn fail(mut self, error: &BuyerError) {
        if let Some(tx) = self.tx.take() {
            lock(self.keys).remove(&self.key_id);
            tx.send_replace(Purchase::Failed(error.to_string()));
        }
    }
}

impl Drop for PendingPurchase<'_> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            lock(self.keys).remove(&self.key_id);
            tx.send_replace(Purchase::Aborted);
        }
    }
}

enum Next<'a> {
    Ready(Arc<KeyBox>),
    Wait(watch::Receiver<Purchase>),
    Buy(PendingPurchase<'a>),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A data consumer buying keys through its payment channel.
pub struct Buyer {
    identity: Keypair,
    receive: ReceiveSecret,
    config: BuyerConfig,
    started: AtomicBool,
    session: RwLock<Option<Arc<dyn Session>>>,
    channel: Mutex<Option<ChannelState>>,
    keys: KeyTable,
}

impl Buyer {
    /// Create a buyer with its identity key and a fresh receive key.
    pub fn new(identity: Keypair, config: BuyerConfig) -> Self {
        Self::with_receive_secret(identity, ReceiveSecret::generate(), config)
    }

    pub fn with_receive_secret(
        identity: Keypair,
        receive: ReceiveSecret,
        config: BuyerConfig,
    ) -> Self {
        Self {
            identity,
            receive,
            config,
            started: AtomicBool::new(false),
            session: RwLock::new(None),
            channel: Mutex::new(None),
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// The identity that signs payments.
    pub fn public_key(&self) -> Ed25519PublicKey {
        self.identity.public_key()
    }

    /// The key sellers seal purchased keys to.
    pub fn receive_key(&self) -> X25519PublicKey {
        self.receive.public_key()
    }

    /// The market address the payment channel is registered under.
    pub fn address(&self) -> String {
        self.identity.public_key().address()
    }

    /// Snapshot of the payment channel, once started.
    pub fn channel(&self) -> Option<ChannelState> {
        *lock(&self.channel)
    }

    /// Whether the key has been bought and is cached.
    pub fn has_key(&self, key_id: &KeyId) -> bool {
        matches!(lock(&self.keys).get(key_id), Some(Slot::Ready(_)))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Channel
    // ─────────────────────────────────────────────────────────────────────────

    /// Look up and validate the payment channel. Returns its balance.
    pub async fn start(&self, session: Arc<dyn Session>) -> Result<TokenAmount> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(BuyerError::AlreadyStarted);
        }

        let channel = match self.open_channel(session.as_ref()).await {
            Ok(channel) => channel,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        *lock(&self.channel) = Some(channel);
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = Some(session);

        info!(
            address = %self.address(),
            channel_id = %channel.id,
            sequence = channel.sequence,
            balance = channel.balance,
            "buyer started"
        );
        Ok(channel.balance)
    }

    async fn open_channel(&self, session: &dyn Session) -> Result<ChannelState> {
        let address = self.address();
        let info: Option<PaymentChannelInfo> = session
            .call_typed(
                names::LOOKUP_PAYMENT_CHANNEL,
                &ChannelLookupRequest {
                    buyer_address: address.clone(),
                },
            )
            .await?;

        let info = info.ok_or(BuyerError::NoChannel(address))?;
        if info.status != ChannelStatus::Open {
            return Err(BuyerError::ChannelNotOpen);
        }
        if info.balance == 0 {
            return Err(BuyerError::NoBalance);
        }

        Ok(ChannelState {
            id: info.id,
            sequence: info.sequence,
            balance: info.balance,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Payloads
    // ─────────────────────────────────────────────────────────────────────────

    /// Decrypt and deserialize a payload, buying its key first if needed.
    pub async fn unwrap<T: DeserializeOwned>(
        &self,
        key_id: KeyId,
        serializer: &str,
        ciphertext: &[u8],
    ) -> Result<T> {
        let serializer = PayloadSerializer::from_str(serializer)
            .map_err(|_| BuyerError::UnsupportedSerialization(serializer.to_string()))?;

        let key = self.key(key_id).await?;
        let plaintext = key
            .decrypt(ciphertext)
            .map_err(|_| BuyerError::Decrypt(key_id))?;

        serializer
            .decode(&plaintext)
            .map_err(|e| BuyerError::Deserialization(e.to_string()))
    }

    /// [`Buyer::unwrap`] for a [`WrappedPayload`].
    pub async fn unwrap_payload<T: DeserializeOwned>(&self, wrapped: &WrappedPayload) -> Result<T> {
        self.unwrap(wrapped.key_id, &wrapped.serializer, &wrapped.ciphertext)
            .await
    }

    /// The key for `key_id`: cached, awaited, or bought.
    async fn key(&self, key_id: KeyId) -> Result<Arc<KeyBox>> {
        let next = {
            let mut keys = lock(&self.keys);
            match keys.get(&key_id) {
                Some(Slot::Ready(key)) => Next::Ready(Arc::clone(key)),
                Some(Slot::Pending(rx)) => Next::Wait(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(Purchase::InFlight);
                    keys.insert(key_id, Slot::Pending(rx));
                    Next::Buy(PendingPurchase {
                        keys: &self.keys,
                        key_id,
                        tx: Some(tx),
                    })
                }
            }
        };

        match next {
            Next::Ready(key) => Ok(key),
            Next::Wait(rx) => self.wait(key_id, rx).await,
            Next::Buy(pending) => match self.purchase(key_id).await {
                Ok(key) => {
                    pending.resolve(Arc::clone(&key));
                    Ok(key)
                }
                Err(e) => {
                    pending.fail(&e);
                    Err(e)
                }
            },
        }
    }

    async fn wait(&self, key_id: KeyId, mut rx: watch::Receiver<Purchase>) -> Result<Arc<KeyBox>> {
        loop {
            let settled = rx.wait_for(|p| !matches!(p, Purchase::InFlight));
            let outcome = match tokio::time::timeout(self.config.poll_interval, settled).await {
                Ok(Ok(purchase)) => Some(purchase.clone()),
                Ok(Err(_)) => Some(Purchase::Aborted),
                Err(_) => None,
            };

            match outcome {
                Some(Purchase::Done(key)) => return Ok(key),
                Some(Purchase::Failed(reason)) => {
                    return Err(BuyerError::PurchaseFailed { key_id, reason })
                }
                Some(Purchase::Aborted | Purchase::InFlight) => {
                    return Err(BuyerError::PurchaseAborted(key_id))
                }
                None => debug!(key_id = %key_id, "waiting for in-flight key purchase"),
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Purchase
    // ─────────────────────────────────────────────────────────────────────────

    async fn purchase(&self, key_id: KeyId) -> Result<Arc<KeyBox>> {
        let session = self
            .session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(BuyerError::NotStarted)?;
        let amount = self.config.purchase_amount;

        // The sequence number is spent here and never handed back.
        let (channel_id, sequence, balance) = {
            let mut guard = lock(&self.channel);
            let channel = guard.as_mut().ok_or(BuyerError::NotStarted)?;
            if channel.balance < amount {
                return Err(BuyerError::InsufficientBalance {
                    balance: channel.balance,
                    amount,
                });
            }
            channel.sequence += 1;
            channel.balance -= amount;
            (channel.id, channel.sequence, channel.balance)
        };

        // The balance comes back only when the market maker did not settle.
        let envelope = match self
            .buy(session.as_ref(), key_id, channel_id, sequence, amount, balance)
            .await
        {
            Ok(envelope) => envelope,
            Err(e) => {
                if let Some(channel) = lock(&self.channel).as_mut() {
                    channel.balance += amount;
                }
                warn!(key_id = %key_id, sequence, error = %e, "key purchase failed");
                return Err(e);
            }
        };

        let Ok(material) = envelope.open(&self.receive) else {
            warn!(key_id = %key_id, sequence, amount, "bought key did not unseal");
            return Err(BuyerError::Unseal(key_id));
        };

        info!(
            key_id = %key_id,
            channel_id = %channel_id,
            sequence,
            amount,
            balance,
            "key bought"
        );
        Ok(Arc::new(KeyBox::new(key_id, material, now_millis())))
    }

    async fn buy(
        &self,
        session: &dyn Session,
        key_id: KeyId,
        channel_id: ChannelId,
        sequence: u64,
        amount: TokenAmount,
        balance: TokenAmount,
    ) -> Result<SealedKeyEnvelope> {
        let terms = BuyTerms {
            channel_id,
            sequence,
            buyer_pubkey: self.receive.public_key(),
            key_id,
            amount,
            balance,
        };
        let signature = terms.sign(&self.identity)?;
        let request = BuyRequest {
            channel_id,
            sequence,
            buyer_pubkey: terms.buyer_pubkey,
            key_id,
            amount,
            balance,
            signature,
        };

        Ok(session.call_typed(names::BUY, &request).await?)
    }
}

impl std::fmt::Debug for Buyer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buyer")
            .field("address", &self.address())
            .field("channel", &self.channel())
            .finish_non_exhaustive()
    }
}
