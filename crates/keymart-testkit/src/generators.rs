//! Proptest generators for property-based testing.

use std::time::Duration;

use proptest::prelude::*;
use serde::{Deserialize, Serialize};

use keymart_core::{ApiId, KeyId, Keypair, ReceiveSecret, Timestamp, TokenAmount};
use keymart_seller::SeriesConfig;

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random receive secret.
pub fn receive_secret() -> impl Strategy<Value = ReceiveSecret> {
    any::<[u8; 32]>().prop_map(ReceiveSecret::from_bytes)
}

/// Generate a random KeyId.
pub fn key_id() -> impl Strategy<Value = KeyId> {
    any::<[u8; 16]>().prop_map(KeyId::from_bytes)
}

/// Generate a random ApiId.
pub fn api_id() -> impl Strategy<Value = ApiId> {
    any::<[u8; 16]>().prop_map(ApiId::from_bytes)
}

/// Generate a dotted uri prefix.
pub fn uri_prefix() -> impl Strategy<Value = String> {
    "[a-z]{2,8}(\\.[a-z][a-z0-9]{0,11}){1,3}".prop_map(String::from)
}

/// Generate a price.
pub fn price() -> impl Strategy<Value = TokenAmount> {
    1u64..=10_000u64
}

/// Generate a series configuration.
pub fn series_config() -> impl Strategy<Value = SeriesConfig> {
    (api_id(), uri_prefix(), price(), 1u64..=3600u64).prop_map(
        |(api_id, uri_prefix, price, secs)| {
            SeriesConfig::new(api_id, uri_prefix, price, Duration::from_secs(secs))
        },
    )
}

/// A market data record, the kind of payload sellers publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: i64,
    pub volume: u64,
    pub at: Timestamp,
    pub venues: Vec<String>,
}

impl Arbitrary for Tick {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            "[A-Z]{1,5}",
            any::<i64>(),
            any::<u64>(),
            0i64..=1_700_000_000_000i64,
            prop::collection::vec("[a-z]{1,8}", 0..4),
        )
            .prop_map(|(symbol, price, volume, at, venues)| Tick {
                symbol,
                price,
                volume,
                at,
                venues,
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keymart_core::{
        BuyTerms, ChannelId, KeyBox, KeyMaterial, PayloadSerializer, SealedKeyEnvelope, Terms,
    };

    proptest! {
        #[test]
        fn test_envelope_opens_only_for_recipient(
            recipient in receive_secret(),
            other in receive_secret(),
        ) {
            prop_assume!(recipient.public_key() != other.public_key());

            let material = KeyMaterial::generate();
            let envelope = SealedKeyEnvelope::seal(&material, &recipient.public_key()).unwrap();

            prop_assert!(envelope.open(&recipient).unwrap() == material);
            prop_assert!(envelope.open(&other).is_err());
        }

        #[test]
        fn test_ciphertext_bound_to_its_key(tick: Tick) {
            let key = KeyBox::generate();
            let other = KeyBox::generate();

            let plaintext = PayloadSerializer::Cbor.encode(&tick).unwrap();
            let ciphertext = key.encrypt(&plaintext).unwrap();

            let decoded: Tick = PayloadSerializer::Cbor
                .decode(&key.decrypt(&ciphertext).unwrap())
                .unwrap();
            prop_assert_eq!(decoded, tick);
            prop_assert!(other.decrypt(&ciphertext).is_err());
        }

        #[test]
        fn test_buy_terms_signature_covers_amount(
            kp in keypair(),
            recipient in receive_secret(),
            key_id in key_id(),
            amount in price(),
            sequence in 1u64..1_000_000u64,
        ) {
            let terms = BuyTerms {
                channel_id: ChannelId::from_bytes([7; 16]),
                sequence,
                buyer_pubkey: recipient.public_key(),
                key_id,
                amount,
                balance: 100_000 - amount,
            };
            let signature = terms.sign(&kp).unwrap();
            prop_assert!(terms.verify(&kp.public_key(), &signature).is_ok());

            let inflated = BuyTerms { amount: amount + 1, ..terms };
            prop_assert!(inflated.verify(&kp.public_key(), &signature).is_err());
        }

        #[test]
        fn test_series_config_strategy_is_usable(config in series_config()) {
            prop_assert!(config.price >= 1);
            prop_assert!(config.uri_prefix.contains('.'));
            prop_assert!(!config.rotation_interval.is_zero());
        }
    }
}
