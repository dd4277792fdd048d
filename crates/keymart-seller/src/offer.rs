//! Offer publication.
//!
//! After each rotation the seller announces the new key to the market maker.
//! Publication is best effort: the key is usable for encryption whether or
//! not the offer lands, and a key that is never offered simply cannot be
//! sold. The next rotation offers a new key.
//!
//! Failures are classified:
//!
//! - procedure missing or unsupported, transport lost: abort at once
//! - anything else: wait, retry, give up after the configured attempts

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use keymart_core::{
    ApiId, KeyBox, KeyId, Keypair, OfferId, OfferTerms, Terms, Timestamp, TokenAmount,
};
use keymart_rpc::{names, PlaceOfferRequest, PlaceOfferResponse, Session, SessionExt};

use crate::config::{RetryPolicy, SeriesConfig};
use crate::error::PublishError;
use crate::series::RotationHook;

/// A freshly rotated key, ready to be offered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOffer {
    pub key_id: KeyId,
    pub api_id: ApiId,
    pub uri_prefix: String,
    pub price: TokenAmount,
    /// When the key was minted.
    pub issued_at: Timestamp,
    pub categories: BTreeMap<String, String>,
}

impl KeyOffer {
    pub(crate) fn for_key(config: &SeriesConfig, key: &KeyBox) -> Self {
        Self {
            key_id: key.id(),
            api_id: config.api_id,
            uri_prefix: config.uri_prefix.clone(),
            price: config.price,
            issued_at: key.created_at(),
            categories: config.categories.clone(),
        }
    }
}

/// Places offers on the market maker with retries.
pub struct OfferPublisher {
    session: Arc<dyn Session>,
    keypair: Keypair,
    policy: RetryPolicy,
    backdate: Duration,
    stop: watch::Receiver<bool>,
}

impl OfferPublisher {
    /// `stop` turning true ends publication before its next attempt.
    pub fn new(
        session: Arc<dyn Session>,
        keypair: Keypair,
        policy: RetryPolicy,
        backdate: Duration,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            session,
            keypair,
            policy,
            backdate,
            stop,
        }
    }

    /// Build the signed request for an offer.
    pub fn request_for(&self, offer: &KeyOffer) -> Result<PlaceOfferRequest, PublishError> {
        let backdate_ms = Timestamp::try_from(self.backdate.as_millis()).unwrap_or(Timestamp::MAX);
        let terms = OfferTerms {
            key_id: offer.key_id,
            api_id: offer.api_id,
            uri_prefix: offer.uri_prefix.clone(),
            valid_from: offer.issued_at.saturating_sub(backdate_ms),
            price: offer.price,
        };
        let signature = terms.sign(&self.keypair)?;

        Ok(PlaceOfferRequest {
            key_id: terms.key_id,
            api_id: terms.api_id,
            uri_prefix: terms.uri_prefix,
            valid_from: terms.valid_from,
            signature,
            price: terms.price,
            categories: (!offer.categories.is_empty()).then(|| offer.categories.clone()),
            expires: None,
            copies: None,
        })
    }

    /// Place `offer`, retrying per the policy.
    pub async fn publish(&self, offer: &KeyOffer) -> Result<OfferId, PublishError> {
        let request = self.request_for(offer)?;
        let max_attempts = self.policy.max_attempts.max(1);
        let mut stop = self.stop.clone();

        for attempt in 1..=max_attempts {
            if *stop.borrow() {
                return Err(PublishError::Stopped);
            }

            let result: keymart_rpc::Result<PlaceOfferResponse> =
                self.session.call_typed(names::PLACE_OFFER, &request).await;

            let error = match result {
                Ok(response) => {
                    info!(
                        key_id = %offer.key_id,
                        offer_id = %response.offer_id,
                        attempt,
                        "offer placed"
                    );
                    return Ok(response.offer_id);
                }
                Err(e) => e,
            };

            if error.is_unavailable() {
                warn!(key_id = %offer.key_id, error = %error, "offer publication aborted");
                return Err(PublishError::Unavailable(error));
            }

            if attempt == max_attempts {
                warn!(
                    key_id = %offer.key_id,
                    attempts = attempt,
                    error = %error,
                    "offer publication exhausted"
                );
                return Err(PublishError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            warn!(
                key_id = %offer.key_id,
                attempt,
                error = %error,
                "offer publication failed, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.policy.delay) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        return Err(PublishError::Stopped);
                    }
                }
            }
        }

        Err(PublishError::Stopped)
    }
}

#[async_trait]
impl RotationHook for OfferPublisher {
    async fn key_rotated(&self, offer: KeyOffer) -> anyhow::Result<()> {
        self.publish(&offer).await?;
        Ok(())
    }
}
