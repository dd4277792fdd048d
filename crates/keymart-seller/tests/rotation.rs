//! Rotation properties of a key series.

use std::collections::HashSet;
use std::time::Duration;

use keymart_core::{ApiId, PayloadSerializer};
use keymart_seller::{KeySeries, SeriesConfig};
use proptest::prelude::*;

fn series() -> KeySeries {
    KeySeries::new(SeriesConfig::new(
        ApiId::from_bytes([1; 16]),
        "io.example.feed",
        10,
        Duration::from_secs(1),
    ))
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn active_key_is_latest_and_all_are_archived(rotations in 1usize..24) {
        let series = series();
        let issued = runtime().block_on(async {
            let mut issued = Vec::new();
            for _ in 0..rotations {
                issued.push(series.rotate().await.unwrap());
            }
            issued
        });

        prop_assert_eq!(series.active_key_id(), issued.last().copied());
        prop_assert_eq!(series.archived_key_ids(), issued.clone());
        prop_assert_eq!(issued.iter().collect::<HashSet<_>>().len(), rotations);
        for key_id in &issued {
            prop_assert_eq!(series.lookup(key_id).unwrap().id(), *key_id);
        }
    }

    #[test]
    fn old_keys_decrypt_what_they_encrypted(
        payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..256), 1..8),
    ) {
        let series = series();
        let rt = runtime();

        let mut wrapped = Vec::new();
        for payload in &payloads {
            rt.block_on(series.rotate()).unwrap();
            wrapped.push(series.encrypt(payload).unwrap());
        }

        for (payload, w) in payloads.iter().zip(&wrapped) {
            let key = series.lookup(&w.key_id).unwrap();
            let plaintext = key.decrypt(&w.ciphertext).unwrap();
            let decoded: Vec<u8> = PayloadSerializer::Cbor.decode(&plaintext).unwrap();
            prop_assert_eq!(&decoded, payload);
        }
    }
}
