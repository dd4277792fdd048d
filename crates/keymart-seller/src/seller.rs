//! The Seller: key series, offers and sales for one provider.
//!
//! A seller owns one [`KeySeries`] per api it sells. Once started on a
//! session it registers its provider-scoped `sell` procedure, starts every
//! series, and publishes an offer for each rotated key. The market maker
//! relays paid purchases to `sell`, which answers with the archived key
//! sealed to the buyer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use keymart_core::{ApiId, Ed25519PublicKey, Keypair, SealedKeyEnvelope, WrappedPayload};
use keymart_rpc::{serve_provider, CallDetails, KeyProvider, Registration, SellRequest, Session};

use crate::config::{SellerConfig, SeriesConfig};
use crate::error::{Result, SellerError};
use crate::offer::OfferPublisher;
use crate::payment::PaymentVerifier;
use crate::series::{KeySeries, RotationHook};

struct Attachment {
    session: Arc<dyn Session>,
    registration: Registration,
}

/// A data provider selling keys on the market.
pub struct Seller {
    keypair: Keypair,
    config: SellerConfig,
    verifier: Arc<dyn PaymentVerifier>,
    series: RwLock<HashMap<ApiId, Arc<KeySeries>>>,
    started: AtomicBool,
    stop: watch::Sender<bool>,
    attachment: Mutex<Option<Attachment>>,
}

impl Seller {
    /// Create a seller with its identity key.
    pub fn new(keypair: Keypair, config: SellerConfig, verifier: Arc<dyn PaymentVerifier>) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            keypair,
            config,
            verifier,
            series: RwLock::new(HashMap::new()),
            started: AtomicBool::new(false),
            stop,
            attachment: Mutex::new(None),
        }
    }

    /// The seller's identity public key; offers are signed with it.
    pub fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }

    pub fn provider_id(&self) -> &str {
        &self.config.provider_id
    }

    pub fn config(&self) -> &SellerConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Series
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a key series for an api. Only allowed before [`Seller::start`].
    pub fn add(&self, config: SeriesConfig) -> Result<Arc<KeySeries>> {
        if self.started.load(Ordering::SeqCst) {
            return Err(SellerError::AlreadyStarted);
        }

        let mut series = self.series.write().unwrap_or_else(|e| e.into_inner());
        if series.contains_key(&config.api_id) {
            return Err(SellerError::DuplicateApi(config.api_id));
        }

        let api_id = config.api_id;
        let added = Arc::new(KeySeries::new(config));
        series.insert(api_id, Arc::clone(&added));
        debug!(api_id = %api_id, "key series added");
        Ok(added)
    }

    /// The series selling `api_id`.
    pub fn series(&self, api_id: &ApiId) -> Option<Arc<KeySeries>> {
        self.read_series().get(api_id).cloned()
    }

    /// Encrypt `payload` for publication under `uri`.
    pub fn wrap<T: Serialize + ?Sized>(
        &self,
        api_id: &ApiId,
        uri: &str,
        payload: &T,
    ) -> Result<WrappedPayload> {
        let series = self
            .series(api_id)
            .ok_or(SellerError::UnknownApi(*api_id))?;

        if !uri.starts_with(series.uri_prefix()) {
            return Err(SellerError::UriOutsidePrefix {
                uri: uri.to_string(),
                prefix: series.uri_prefix().to_string(),
            });
        }

        Ok(series.encrypt(payload)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Register `sell` on `session` and start rotating every series.
    ///
    /// Every series is checked before anything is registered. If a step
    /// fails after registration, `sell` is withdrawn again and the seller
    /// can be started once the cause is fixed. A stopped seller never
    /// starts again.
    pub async fn start(self: &Arc<Self>, session: Arc<dyn Session>) -> Result<()> {
        if *self.stop.borrow() {
            return Err(SellerError::Stopped);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SellerError::AlreadyStarted);
        }

        let series: Vec<Arc<KeySeries>> = self.read_series().values().cloned().collect();
        if let Err(e) = series.iter().try_for_each(|s| s.check_startable()) {
            self.started.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        let provider: Arc<dyn KeyProvider> = Arc::clone(self) as Arc<dyn KeyProvider>;
        let registration = match serve_provider(session.as_ref(), self.provider_id(), provider).await
        {
            Ok(registration) => registration,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        let publisher: Arc<dyn RotationHook> = Arc::new(OfferPublisher::new(
            Arc::clone(&session),
            self.keypair.clone(),
            self.config.offer_retry.clone(),
            self.config.offer_backdate,
            self.stop.subscribe(),
        ));

        let mut attachment = self.attachment.lock().await;
        // A stop racing this call finds no attachment to withdraw.
        let outcome = if *self.stop.borrow() {
            Err(SellerError::Stopped)
        } else {
            series
                .iter()
                .try_for_each(|s| s.start(Some(Arc::clone(&publisher))))
                .map_err(SellerError::from)
        };

        if let Err(e) = outcome {
            if let Err(unregister) = session.unregister(&registration).await {
                warn!(error = %unregister, "failed to unregister sell procedure");
            }
            self.started.store(false, Ordering::SeqCst);
            warn!(provider_id = %self.config.provider_id, error = %e, "seller failed to start");
            return Err(e);
        }

        *attachment = Some(Attachment {
            session,
            registration,
        });
        drop(attachment);

        info!(
            provider_id = %self.config.provider_id,
            series = series.len(),
            "seller started"
        );
        Ok(())
    }

    /// Stop every series and withdraw `sell`.
    ///
    /// Offers still retrying make no further attempts. Safe to call more
    /// than once.
    pub async fn stop(&self) {
        self.stop.send_replace(true);
        for series in self.read_series().values() {
            series.stop();
        }

        let Some(attachment) = self.attachment.lock().await.take() else {
            return;
        };
        if attachment.session.is_attached() {
            if let Err(e) = attachment.session.unregister(&attachment.registration).await {
                warn!(error = %e, "failed to unregister sell procedure");
            }
        }
        info!(provider_id = %self.config.provider_id, "seller stopped");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sales
    // ─────────────────────────────────────────────────────────────────────────

    /// Fulfill a paid purchase: seal the archived key to the buyer.
    pub async fn sell(
        &self,
        details: &CallDetails,
        request: SellRequest,
    ) -> Result<SealedKeyEnvelope> {
        let (series, key) = self
            .read_series()
            .values()
            .find_map(|s| s.lookup(&request.key_id).ok().map(|k| (Arc::clone(s), k)))
            .ok_or(SellerError::UnknownKey(request.key_id))?;

        if let Err(e) = self.verifier.verify(&request, series.price()) {
            warn!(key_id = %request.key_id, error = %e, "sale rejected");
            return Err(e);
        }

        let envelope = SealedKeyEnvelope::seal(key.material(), &request.buyer_pubkey)?;

        info!(
            key_id = %request.key_id,
            api_id = %series.api_id(),
            buyer = %request.buyer_pubkey.to_hex(),
            amount_paid = request.amount_paid,
            post_balance = request.post_balance,
            caller = details.caller,
            "key sold"
        );
        Ok(envelope)
    }

    fn read_series(&self) -> RwLockReadGuard<'_, HashMap<ApiId, Arc<KeySeries>>> {
        self.series.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl KeyProvider for Seller {
    async fn sell(
        &self,
        details: &CallDetails,
        request: SellRequest,
    ) -> keymart_rpc::Result<SealedKeyEnvelope> {
        Seller::sell(self, details, request)
            .await
            .map_err(SellerError::into_rpc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SeriesError;
    use crate::payment::SignedPaymentVerifier;
    use keymart_core::{Ed25519Signature, KeyId, ReceiveSecret, Terms, TokenAmount};
    use keymart_rpc::memory::MemoryRouter;
    use keymart_rpc::{errors, names, RpcError};
    use std::time::Duration;

    const API: ApiId = ApiId::from_bytes([3; 16]);

    struct Fixture {
        seller: Arc<Seller>,
        market_maker: Keypair,
    }

    fn fixture() -> Fixture {
        let market_maker = Keypair::generate();
        let seller = Arc::new(Seller::new(
            Keypair::generate(),
            SellerConfig {
                provider_id: "acme".into(),
                ..SellerConfig::default()
            },
            Arc::new(SignedPaymentVerifier::new(market_maker.public_key())),
        ));
        seller
            .add(SeriesConfig::new(API, "io.acme.prices", 35, Duration::from_secs(60)))
            .unwrap();
        Fixture {
            seller,
            market_maker,
        }
    }

    fn sale(
        market_maker: &Keypair,
        key_id: KeyId,
        buyer: &ReceiveSecret,
        amount_paid: TokenAmount,
    ) -> SellRequest {
        let mut request = SellRequest {
            key_id,
            buyer_pubkey: buyer.public_key(),
            amount_paid,
            post_balance: 65,
            signature: Ed25519Signature::ZERO,
        };
        request.signature = request.terms().sign(market_maker).unwrap();
        request
    }

    fn details() -> CallDetails {
        CallDetails {
            caller: 42,
            procedure: names::provider_sell("acme"),
        }
    }

    #[test]
    fn test_add_duplicate_api() {
        let f = fixture();
        let again = SeriesConfig::new(API, "io.acme.other", 1, Duration::from_secs(1));
        assert!(matches!(
            f.seller.add(again),
            Err(SellerError::DuplicateApi(api)) if api == API
        ));
    }

    #[tokio::test]
    async fn test_wrap_checks_api_and_prefix() {
        let f = fixture();
        let unknown = ApiId::from_bytes([9; 16]);
        assert!(matches!(
            f.seller.wrap(&unknown, "io.acme.prices.eur", "x"),
            Err(SellerError::UnknownApi(_))
        ));
        assert!(matches!(
            f.seller.wrap(&API, "io.other.prices", "x"),
            Err(SellerError::UriOutsidePrefix { .. })
        ));

        f.seller.series(&API).unwrap().rotate().await.unwrap();
        let wrapped = f.seller.wrap(&API, "io.acme.prices.eur", "x").unwrap();
        assert_eq!(wrapped.serializer, "cbor");
    }

    #[tokio::test]
    async fn test_sell_unknown_key() {
        let f = fixture();
        let buyer = ReceiveSecret::generate();
        let request = sale(&f.market_maker, KeyId::random(), &buyer, 35);

        let err = f.seller.sell(&details(), request).await.unwrap_err();
        assert!(matches!(err, SellerError::UnknownKey(_)));
        assert!(matches!(
            err.into_rpc(),
            RpcError::Application { error, .. } if error == errors::UNKNOWN_KEY
        ));
    }

    #[tokio::test]
    async fn test_sell_rejects_underpayment() {
        let f = fixture();
        let key_id = f.seller.series(&API).unwrap().rotate().await.unwrap();
        let buyer = ReceiveSecret::generate();

        let err = f
            .seller
            .sell(&details(), sale(&f.market_maker, key_id, &buyer, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, SellerError::PaymentInvalid(_)));
    }

    #[tokio::test]
    async fn test_sell_is_repeatable_per_buyer() {
        let f = fixture();
        let series = f.seller.series(&API).unwrap();
        let key_id = series.rotate().await.unwrap();
        series.rotate().await.unwrap();
        let buyer = ReceiveSecret::generate();

        let first = f
            .seller
            .sell(&details(), sale(&f.market_maker, key_id, &buyer, 35))
            .await
            .unwrap();
        let second = f
            .seller
            .sell(&details(), sale(&f.market_maker, key_id, &buyer, 35))
            .await
            .unwrap();

        assert_ne!(first, second);
        let material = first.open(&buyer).unwrap();
        assert_eq!(material, second.open(&buyer).unwrap());
        assert_eq!(&material, series.lookup(&key_id).unwrap().material());
    }

    #[tokio::test]
    async fn test_start_registers_and_stop_unregisters() {
        let f = fixture();
        let router = MemoryRouter::new();
        let session = router.attach();

        f.seller.start(session.clone()).await.unwrap();
        assert_eq!(router.procedures().await, vec![names::provider_sell("acme")]);
        assert!(matches!(
            f.seller.start(session.clone()).await,
            Err(SellerError::AlreadyStarted)
        ));
        assert!(matches!(
            f.seller
                .add(SeriesConfig::new(ApiId::random(), "io.acme.x", 1, Duration::from_secs(1))),
            Err(SellerError::AlreadyStarted)
        ));

        f.seller.stop().await;
        f.seller.stop().await;
        assert!(router.procedures().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_start_registers_nothing() {
        let f = fixture();
        f.seller
            .add(SeriesConfig::new(
                ApiId::from_bytes([4; 16]),
                "io.acme.volumes",
                10,
                Duration::ZERO,
            ))
            .unwrap();
        let router = MemoryRouter::new();
        let session = router.attach();

        for _ in 0..2 {
            assert!(matches!(
                f.seller.start(session.clone()).await,
                Err(SellerError::Series(SeriesError::InvalidInterval))
            ));
            assert!(router.procedures().await.is_empty());
        }

        tokio::task::yield_now().await;
        let prices = f.seller.series(&API).unwrap();
        assert!(prices.archived_key_ids().is_empty());
        assert!(prices.check_startable().is_ok());
    }

    #[tokio::test]
    async fn test_start_after_stop_fails() {
        let f = fixture();
        let router = MemoryRouter::new();

        f.seller.stop().await;
        assert!(matches!(
            f.seller.start(router.attach()).await,
            Err(SellerError::Stopped)
        ));
        assert!(router.procedures().await.is_empty());

        let restarted = fixture();
        restarted.seller.start(router.attach()).await.unwrap();
        restarted.seller.stop().await;
        assert!(matches!(
            restarted.seller.start(router.attach()).await,
            Err(SellerError::Stopped)
        ));
        assert!(router.procedures().await.is_empty());
    }

    #[tokio::test]
    async fn test_remote_sell_maps_errors() {
        let f = fixture();
        let router = MemoryRouter::new();
        f.seller.start(router.attach()).await.unwrap();

        let client = router.attach();
        let buyer = ReceiveSecret::generate();
        let request = sale(&f.market_maker, KeyId::random(), &buyer, 35);
        let err = client
            .call(
                &names::provider_sell("acme"),
                keymart_rpc::encode(&request).unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RpcError::Application { error, .. } if error == errors::UNKNOWN_KEY
        ));
        f.seller.stop().await;
    }
}
