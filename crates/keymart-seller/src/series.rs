//! Rotating key series.
//!
//! A [`KeySeries`] owns every key ever issued for one api. On each rotation
//! it mints a fresh [`KeyBox`], archives it, makes it the active key for new
//! encryption, and hands an offer for it to the rotation hook.
//!
//! ## Lifecycle
//!
//! ```text
//! idle --rotate--> active --rotate--> active
//!                    |
//!                  stop
//!                    v
//!                 stopped
//! ```
//!
//! The archive is append-only. Keys stay retrievable for the lifetime of the
//! series so that ciphertext emitted under an old key can still be sold.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use keymart_core::{ApiId, KeyBox, KeyId, PayloadSerializer, TokenAmount, WrappedPayload};

use crate::config::SeriesConfig;
use crate::error::{SeriesError, SeriesResult};
use crate::offer::KeyOffer;

/// Called after every rotation with the offer for the new key.
///
/// Runs detached from the rotation: a slow or failing hook never delays the
/// next rotation and never affects the new key.
#[async_trait]
pub trait RotationHook: Send + Sync {
    async fn key_rotated(&self, offer: KeyOffer) -> anyhow::Result<()>;
}

/// Where a series is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesState {
    /// No key yet.
    Idle,
    /// A key is active for encryption.
    Active,
    /// Rotation has stopped. The last key stays usable.
    Stopped,
}

struct Archive {
    state: SeriesState,
    active: Option<Arc<KeyBox>>,
    keys: HashMap<KeyId, Arc<KeyBox>>,
    order: Vec<KeyId>,
}

/// A rotating sequence of data keys for one api.
pub struct KeySeries {
    config: SeriesConfig,
    archive: RwLock<Archive>,
    /// Serializes rotations, timer-driven or manual.
    rotation: Mutex<()>,
    hook: RwLock<Option<Arc<dyn RotationHook>>>,
    started: AtomicBool,
    stop: watch::Sender<bool>,
}

impl KeySeries {
    pub fn new(config: SeriesConfig) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            config,
            archive: RwLock::new(Archive {
                state: SeriesState::Idle,
                active: None,
                keys: HashMap::new(),
                order: Vec::new(),
            }),
            rotation: Mutex::new(()),
            hook: RwLock::new(None),
            started: AtomicBool::new(false),
            stop,
        }
    }

    pub fn api_id(&self) -> ApiId {
        self.config.api_id
    }

    pub fn price(&self) -> TokenAmount {
        self.config.price
    }

    pub fn uri_prefix(&self) -> &str {
        &self.config.uri_prefix
    }

    pub fn config(&self) -> &SeriesConfig {
        &self.config
    }

    pub fn state(&self) -> SeriesState {
        self.read().state
    }

    /// Id of the key currently used for encryption.
    pub fn active_key_id(&self) -> Option<KeyId> {
        self.read().active.as_ref().map(|key| key.id())
    }

    /// Every key issued so far, oldest first.
    pub fn archived_key_ids(&self) -> Vec<KeyId> {
        self.read().order.clone()
    }

    /// Whether [`start`](Self::start) would be accepted right now.
    ///
    /// A stopped series never starts again.
    pub fn check_startable(&self) -> SeriesResult<()> {
        if self.config.rotation_interval.is_zero() {
            return Err(SeriesError::InvalidInterval);
        }
        if *self.stop.borrow() || self.state() == SeriesState::Stopped {
            return Err(SeriesError::Stopped);
        }
        if self.started.load(Ordering::SeqCst) {
            return Err(SeriesError::AlreadyStarted);
        }
        Ok(())
    }

    /// Start periodic rotation.
    ///
    /// The first rotation happens immediately. `hook`, if given, receives
    /// an offer for every key rotated from now on.
    pub fn start(self: &Arc<Self>, hook: Option<Arc<dyn RotationHook>>) -> SeriesResult<()> {
        self.check_startable()?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SeriesError::AlreadyStarted);
        }
        *self.hook.write().unwrap_or_else(|e| e.into_inner()) = hook;

        let series = Arc::downgrade(self);
        let stop = self.stop.subscribe();
        let period = self.config.rotation_interval;
        tokio::spawn(run_rotation(series, stop, period));

        debug!(api_id = %self.config.api_id, interval = ?period, "key series started");
        Ok(())
    }

    /// Stop periodic rotation.
    ///
    /// A rotation already in progress completes. Safe to call more than once.
    pub fn stop(&self) {
        self.stop.send_replace(true);
        let mut archive = self.write();
        if archive.state != SeriesState::Stopped {
            archive.state = SeriesState::Stopped;
            debug!(api_id = %self.config.api_id, "key series stopped");
        }
    }

    /// Mint a new key and make it the active one.
    pub async fn rotate(&self) -> SeriesResult<KeyId> {
        let _rotation = self.rotation.lock().await;
        if *self.stop.borrow() {
            return Err(SeriesError::Stopped);
        }

        let key = loop {
            let candidate = KeyBox::generate();
            if !self.read().keys.contains_key(&candidate.id()) {
                break Arc::new(candidate);
            }
        };
        let key_id = key.id();

        {
            let mut archive = self.write();
            archive.keys.insert(key_id, Arc::clone(&key));
            archive.order.push(key_id);
            archive.active = Some(Arc::clone(&key));
            if archive.state == SeriesState::Idle {
                archive.state = SeriesState::Active;
            }
        }

        info!(key_id = %key_id, api_id = %self.config.api_id, "key rotated");

        let hook = self.hook.read().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(hook) = hook {
            let offer = KeyOffer::for_key(&self.config, &key);
            tokio::spawn(async move {
                if let Err(e) = hook.key_rotated(offer).await {
                    warn!(key_id = %key_id, error = %e, "rotation hook failed");
                }
            });
        }

        Ok(key_id)
    }

    /// Serialize and encrypt `payload` under the active key.
    pub fn encrypt<T: Serialize + ?Sized>(&self, payload: &T) -> SeriesResult<WrappedPayload> {
        let key = self.read().active.clone().ok_or(SeriesError::NotStarted)?;
        let serializer = PayloadSerializer::Cbor;
        let plaintext = serializer.encode(payload)?;
        let ciphertext = key.encrypt(&plaintext)?;

        Ok(WrappedPayload {
            key_id: key.id(),
            serializer: serializer.tag().to_string(),
            ciphertext,
        })
    }

    /// Find an issued key by id.
    pub fn lookup(&self, key_id: &KeyId) -> SeriesResult<Arc<KeyBox>> {
        self.read()
            .keys
            .get(key_id)
            .cloned()
            .ok_or(SeriesError::KeyNotFound(*key_id))
    }

    fn read(&self) -> RwLockReadGuard<'_, Archive> {
        self.archive.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Archive> {
        self.archive.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for KeySeries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySeries")
            .field("api_id", &self.config.api_id)
            .field("state", &self.state())
            .field("active_key_id", &self.active_key_id())
            .finish_non_exhaustive()
    }
}

async fn run_rotation(
    series: Weak<KeySeries>,
    mut stop: watch::Receiver<bool>,
    period: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                if *stop.borrow() {
                    break;
                }
                let Some(series) = series.upgrade() else { break };
                if let Err(e) = series.rotate().await {
                    warn!(api_id = %series.api_id(), error = %e, "scheduled rotation failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn config(interval: Duration) -> SeriesConfig {
        SeriesConfig::new(ApiId::from_bytes([7; 16]), "io.example.ticks", 35, interval)
    }

    #[derive(Default)]
    struct Recorder(StdMutex<Vec<KeyOffer>>);

    #[async_trait]
    impl RotationHook for Recorder {
        async fn key_rotated(&self, offer: KeyOffer) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(offer);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl RotationHook for Failing {
        async fn key_rotated(&self, _offer: KeyOffer) -> anyhow::Result<()> {
            anyhow::bail!("market maker unreachable")
        }
    }

    #[tokio::test]
    async fn test_encrypt_before_rotation_fails() {
        let series = KeySeries::new(config(Duration::from_secs(1)));
        assert_eq!(series.state(), SeriesState::Idle);
        assert!(matches!(series.encrypt("x"), Err(SeriesError::NotStarted)));
    }

    #[tokio::test]
    async fn test_three_rotations_keep_archive() {
        let series = KeySeries::new(config(Duration::from_secs(1)));

        let first = series.rotate().await.unwrap();
        let second = series.rotate().await.unwrap();
        let third = series.rotate().await.unwrap();

        let distinct: HashSet<_> = [first, second, third].into_iter().collect();
        assert_eq!(distinct.len(), 3);
        assert_eq!(series.active_key_id(), Some(third));
        assert_eq!(series.archived_key_ids(), vec![first, second, third]);
        assert_eq!(series.lookup(&first).unwrap().id(), first);
        assert_eq!(series.state(), SeriesState::Active);
    }

    #[tokio::test]
    async fn test_encrypt_uses_active_key() {
        let series = KeySeries::new(config(Duration::from_secs(1)));
        let key_id = series.rotate().await.unwrap();

        let wrapped = series.encrypt(&vec![1u32, 2, 3]).unwrap();
        assert_eq!(wrapped.key_id, key_id);
        assert_eq!(wrapped.serializer, "cbor");

        let key = series.lookup(&key_id).unwrap();
        let plaintext = key.decrypt(&wrapped.ciphertext).unwrap();
        let decoded: Vec<u32> = PayloadSerializer::Cbor.decode(&plaintext).unwrap();
        assert_eq!(decoded, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_lookup_unknown_key() {
        let series = KeySeries::new(config(Duration::from_secs(1)));
        series.rotate().await.unwrap();
        let missing = KeyId::from_bytes([0xee; 16]);
        assert!(matches!(
            series.lookup(&missing),
            Err(SeriesError::KeyNotFound(id)) if id == missing
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rotates_immediately_then_on_interval() {
        let series = Arc::new(KeySeries::new(config(Duration::from_secs(10))));
        let recorder = Arc::new(Recorder::default());
        series
            .start(Some(recorder.clone() as Arc<dyn RotationHook>))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(series.archived_key_ids().len(), 1);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(series.archived_key_ids().len(), 3);

        let offered: Vec<KeyId> = recorder.0.lock().unwrap().iter().map(|o| o.key_id).collect();
        assert_eq!(offered, series.archived_key_ids());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_fails() {
        let series = Arc::new(KeySeries::new(config(Duration::from_secs(1))));
        series.start(None).unwrap();
        assert!(matches!(series.start(None), Err(SeriesError::AlreadyStarted)));
        series.stop();
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let series = Arc::new(KeySeries::new(config(Duration::ZERO)));
        assert!(matches!(series.start(None), Err(SeriesError::InvalidInterval)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_after_stop_fails() {
        let series = Arc::new(KeySeries::new(config(Duration::from_secs(1))));
        series.stop();
        assert!(matches!(series.start(None), Err(SeriesError::Stopped)));
        assert!(matches!(series.check_startable(), Err(SeriesError::Stopped)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(series.archived_key_ids().is_empty());
        assert_eq!(series.state(), SeriesState::Stopped);

        let running = Arc::new(KeySeries::new(config(Duration::from_secs(1))));
        running.start(None).unwrap();
        running.stop();
        assert!(matches!(running.start(None), Err(SeriesError::Stopped)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_rotation() {
        let series = Arc::new(KeySeries::new(config(Duration::from_secs(1))));
        series.start(None).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let before = series.archived_key_ids().len();

        series.stop();
        series.stop();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(series.archived_key_ids().len(), before);
        assert_eq!(series.state(), SeriesState::Stopped);
        assert!(matches!(series.rotate().await, Err(SeriesError::Stopped)));
        // The last key still encrypts.
        assert!(series.encrypt("after stop").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_hook_does_not_block_rotation() {
        let series = Arc::new(KeySeries::new(config(Duration::from_secs(1))));
        series
            .start(Some(Arc::new(Failing) as Arc<dyn RotationHook>))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(series.archived_key_ids().len(), 3);
        assert!(series.encrypt("still works").is_ok());
        series.stop();
    }

    #[tokio::test]
    async fn test_concurrent_rotations_are_serialized() {
        let series = Arc::new(KeySeries::new(config(Duration::from_secs(1))));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let series = Arc::clone(&series);
                tokio::spawn(async move { series.rotate().await.unwrap() })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }

        let archived = series.archived_key_ids();
        assert_eq!(archived.len(), 8);
        assert_eq!(archived.iter().collect::<HashSet<_>>().len(), 8);
        assert_eq!(series.active_key_id().as_ref(), archived.last());
    }
}
