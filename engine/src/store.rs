use crate::classifier::{Classification, HealthBucket, UtxoClassifier};
use crate::coin_selection::{CoinSelector, SelectionObjective, SelectionOptions, SelectionPlan};
use crate::config::{DUST_LIMIT, WalletConfig};
use crate::health::{DustAttackPattern, HealthMonitor, HealthReport, UtxoAssessment};
use crate::indexer::Indexer;
use chrono::{DateTime, Utc};
use common::address::Address;
use common::errors::{WalletError, WalletResult};
use common::model::{Outpoint, Utxo};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// One immutable snapshot of the wallet cache. Readers hold an `Arc` to a
/// snapshot; refreshes build a new state and swap the pointer, so a read
/// during refresh observes the pre-refresh snapshot.
#[derive(Debug, Default)]
pub struct WalletState {
    pub address: Option<Address>,
    // Sorted by (sats desc, outpoint) so iteration order is deterministic.
    pub utxos: Vec<Utxo>,
    pub classifications: HashMap<Outpoint, Classification>,
    pub health: HashMap<Outpoint, UtxoAssessment>,
    pub privacy: HashMap<Outpoint, u8>,
    pub last_updated: Option<DateTime<Utc>>,
    pub classified_at_height: i32,
    pub tip_height: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BalanceSummary {
    pub confirmed: u64,
    pub unconfirmed: u64,
    pub total: u64,
}

/// Filter applied by `spendable_plain_utxos`.
#[derive(Clone, Debug, Default)]
pub struct SpendableFilter {
    pub min_health: Option<u8>,
    pub min_privacy: Option<u8>,
    pub exclude_suspicious: bool,
    pub include_unconfirmed: bool,
}

/// Authoritative UTXO cache for one address. Owns every mutable map; all
/// other components receive immutable snapshots.
pub struct UtxoStore<C: Indexer> {
    indexer: Arc<C>,
    config: WalletConfig,
    classifier: UtxoClassifier,
    state: RwLock<Arc<WalletState>>,
    monitor: Mutex<HealthMonitor>,
    // Serializes refreshes; concurrent init calls coalesce behind it.
    refresh_lock: Mutex<()>,
}

impl<C: Indexer + 'static> UtxoStore<C> {
    pub fn new(indexer: Arc<C>, config: WalletConfig) -> Self {
        let classifier = UtxoClassifier::new(config.classifier.clone());
        let monitor = HealthMonitor::new(
            config.health.clone(),
            UtxoClassifier::new(config.classifier.clone()),
        );
        Self {
            indexer,
            config,
            classifier,
            state: RwLock::new(Arc::new(WalletState::default())),
            monitor: Mutex::new(monitor),
            refresh_lock: Mutex::new(()),
        }
    }

    pub async fn snapshot(&self) -> Arc<WalletState> {
        let guard = self.state.read().await;
        Arc::clone(&guard)
    }

    /// Loads the UTXO set for `address`, refreshing when the cache has
    /// expired or `force_refresh` is set. Concurrent calls coalesce into
    /// one underlying fetch.
    pub async fn init(&self, address: &Address, force_refresh: bool) -> WalletResult<()> {
        if !force_refresh && self.is_fresh(address).await {
            return Ok(());
        }
        let _refresh_guard = self.refresh_lock.lock().await;
        // A concurrent init may have refreshed while this call waited.
        if !force_refresh && self.is_fresh(address).await {
            return Ok(());
        }

        let tip = self
            .fetch_with_retry(|| self.indexer.blockchain_info())
            .await?;
        let raw_utxos = self
            .fetch_with_retry(|| self.indexer.utxos_by_address(address))
            .await?;
        debug!("fetched {} raw UTXOs at tip {}", raw_utxos.len(), tip.height);

        let mut utxos = Vec::with_capacity(raw_utxos.len());
        let mut rejected = 0usize;
        for utxo in raw_utxos {
            if let Err(e) = utxo.validate() {
                rejected += 1;
                warn!("rejecting UTXO: {e}");
                continue;
            }
            if utxo.sats < DUST_LIMIT {
                rejected += 1;
                continue;
            }
            utxos.push(utxo);
        }
        if rejected > 0 {
            info!("rejected {rejected} UTXOs during refresh");
        }
        utxos.sort_by(|a, b| b.sats.cmp(&a.sats).then(a.outpoint.cmp(&b.outpoint)));

        let (classifications, health, privacy) =
            self.run_analytics(&utxos, tip.height).await;

        let new_state = Arc::new(WalletState {
            address: Some(address.clone()),
            utxos,
            classifications,
            health,
            privacy,
            last_updated: Some(Utc::now()),
            classified_at_height: tip.height,
            tip_height: tip.height,
        });

        // Swap the Arc pointer under a brief write lock.
        let mut guard = self.state.write().await;
        *guard = new_state;
        Ok(())
    }

    /// Classification, health and privacy passes run as three concurrent
    /// tasks that all complete before `init` resolves.
    async fn run_analytics(
        &self,
        utxos: &[Utxo],
        tip_height: i32,
    ) -> (
        HashMap<Outpoint, Classification>,
        HashMap<Outpoint, UtxoAssessment>,
        HashMap<Outpoint, u8>,
    ) {
        let fee_rate = self.config.fee_rate();
        let classification_pass = async {
            let (classifications, errors) = self.classifier.classify_batch(utxos, tip_height);
            if errors > 0 {
                warn!("{errors} UTXOs failed classification");
            }
            classifications
        };
        let health_pass = async {
            let mut monitor = self.monitor.lock().await;
            let report = monitor.assess_wallet(utxos, None, fee_rate, tip_height);
            report
                .assessments
                .into_iter()
                .map(|assessment| (assessment.outpoint, assessment))
                .collect::<HashMap<_, _>>()
        };
        let privacy_pass = async {
            let (classifications, _) = self.classifier.classify_batch(utxos, tip_height);
            classifications
                .into_iter()
                .map(|(outpoint, classification)| (outpoint, classification.privacy_score))
                .collect::<HashMap<_, _>>()
        };
        tokio::join!(classification_pass, health_pass, privacy_pass)
    }

    async fn is_fresh(&self, address: &Address) -> bool {
        let state = self.snapshot().await;
        if state.address.as_ref() != Some(address) {
            return false;
        }
        match state.last_updated {
            Some(updated) => {
                let age_ms = (Utc::now() - updated).num_milliseconds();
                age_ms < self.config.store.cache_timeout_ms
            }
            None => false,
        }
    }

    async fn fetch_with_retry<T, F, Fut>(&self, operation: F) -> WalletResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = WalletResult<T>>,
    {
        let retries = self.config.store.fetch_retries.max(1);
        let mut last_err = None;
        for attempt in 0..retries {
            if attempt > 0 {
                let delay = self.config.store.fetch_base_delay_ms << (attempt - 1);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!("store fetch attempt {} failed: {e}", attempt + 1);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(WalletError::Cancelled))
    }

    /// Plain spendable UTXOs. Token UTXOs are never surfaced here.
    pub async fn spendable_plain_utxos(&self, filter: &SpendableFilter) -> Vec<Utxo> {
        let state = self.snapshot().await;
        state
            .utxos
            .iter()
            .filter(|utxo| !utxo.has_token())
            .filter(|utxo| filter.include_unconfirmed || utxo.is_confirmed())
            .filter(|utxo| {
                if let Some(min_health) = filter.min_health {
                    match state.classifications.get(&utxo.outpoint) {
                        Some(c) if c.health_score >= min_health => {}
                        _ => return false,
                    }
                }
                if let Some(min_privacy) = filter.min_privacy {
                    match state.privacy.get(&utxo.outpoint) {
                        Some(&score) if score >= min_privacy => {}
                        _ => return false,
                    }
                }
                if filter.exclude_suspicious {
                    if let Some(c) = state.classifications.get(&utxo.outpoint) {
                        if c.health_bucket == HealthBucket::Suspicious {
                            return false;
                        }
                    }
                }
                true
            })
            .cloned()
            .collect()
    }

    pub async fn total_balance(&self) -> BalanceSummary {
        let state = self.snapshot().await;
        let mut balance = BalanceSummary::default();
        for utxo in &state.utxos {
            if utxo.is_confirmed() {
                balance.confirmed += utxo.sats;
            } else {
                balance.unconfirmed += utxo.sats;
            }
        }
        balance.total = balance.confirmed + balance.unconfirmed;
        balance
    }

    /// Thin wrapper over the coin selector with the default objective.
    pub async fn select_for_amount(
        &self,
        target_sats: u64,
        fee_rate: f64,
    ) -> WalletResult<SelectionPlan> {
        let state = self.snapshot().await;
        if state.last_updated.is_none() {
            return Err(WalletError::CacheStale);
        }
        let candidates = self
            .spendable_plain_utxos(&SpendableFilter::default())
            .await;
        let selector = CoinSelector::new(self.config.selection.clone());
        let options = SelectionOptions {
            objective: SelectionObjective::Hybrid,
            ..SelectionOptions::default()
        };
        selector.select(
            &candidates,
            target_sats,
            fee_rate,
            &options,
            Some(&state.classifications),
        )
    }

    pub async fn classification(&self, outpoint: &Outpoint) -> Option<Classification> {
        self.snapshot().await.classifications.get(outpoint).cloned()
    }

    pub async fn health_assessment(&self, outpoint: &Outpoint) -> Option<UtxoAssessment> {
        self.snapshot().await.health.get(outpoint).cloned()
    }

    pub async fn privacy_score(&self, outpoint: &Outpoint) -> Option<u8> {
        self.snapshot().await.privacy.get(outpoint).copied()
    }

    pub async fn refresh_cache(&self, address: &Address) -> WalletResult<()> {
        self.init(address, true).await
    }

    pub async fn clear_cache(&self) {
        let mut guard = self.state.write().await;
        *guard = Arc::new(WalletState::default());
    }

    /// Records a new chain tip. A height advance of at least the configured
    /// interval triggers background reclassification; readers keep the old
    /// snapshot until the new one is swapped in.
    pub async fn update_block_height(self: &Arc<Self>, height: i32) {
        let classified_at_height;
        {
            // Track the tip even when no reclassification is due.
            let mut guard = self.state.write().await;
            let mut updated = (**guard).clone_shallow();
            classified_at_height = updated.classified_at_height;
            updated.tip_height = height;
            *guard = Arc::new(updated);
        }
        if height - classified_at_height < self.config.store.reclassify_interval_blocks {
            return;
        }
        let store = Arc::clone(self);
        tokio::spawn(async move {
            store.reclassify_at(height).await;
        });
    }

    async fn reclassify_at(&self, height: i32) {
        let _refresh_guard = self.refresh_lock.lock().await;
        let state = self.snapshot().await;
        if state.utxos.is_empty() {
            return;
        }
        debug!(
            "reclassifying {} UTXOs at height {height}",
            state.utxos.len()
        );
        let (classifications, health, privacy) = self.run_analytics(&state.utxos, height).await;
        let mut updated = (*state).clone_shallow();
        updated.classifications = classifications;
        updated.health = health;
        updated.privacy = privacy;
        updated.classified_at_height = height;
        updated.tip_height = height;

        let mut guard = self.state.write().await;
        *guard = Arc::new(updated);
    }

    pub async fn health_report(&self, fee_rate: f64) -> HealthReport {
        let state = self.snapshot().await;
        let mut monitor = self.monitor.lock().await;
        monitor.assess_wallet(
            &state.utxos,
            Some(&state.classifications),
            fee_rate,
            state.tip_height,
        )
    }

    pub async fn detect_dust_attack(&self, address: &Address) -> DustAttackPattern {
        let state = self.snapshot().await;
        let mut monitor = self.monitor.lock().await;
        monitor.detect_dust_attack(&state.utxos, &address.to_string(), state.tip_height)
    }
}

impl WalletState {
    fn clone_shallow(&self) -> WalletState {
        WalletState {
            address: self.address.clone(),
            utxos: self.utxos.clone(),
            classifications: self.classifications.clone(),
            health: self.health.clone(),
            privacy: self.privacy.clone(),
            last_updated: self.last_updated,
            classified_at_height: self.classified_at_height,
            tip_height: self.tip_height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{ChainTip, TokenInfo};
    use async_trait::async_trait;
    use common::model::{TokenData, TokenId, TokenProtocol, TxId};
    use common::script::p2pkh_script;
    use std::sync::atomic::{AtomicU32, Ordering::Relaxed};

    fn txid(i: u32) -> TxId {
        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&i.to_le_bytes());
        TxId::new(bytes)
    }

    fn plain_utxo(i: u32, sats: u64, block_height: i32) -> Utxo {
        Utxo::new(
            Outpoint::new(txid(i), 0),
            sats,
            block_height,
            p2pkh_script(&[0x11; 20]),
            false,
            None,
        )
    }

    fn token_utxo(i: u32) -> Utxo {
        Utxo::new(
            Outpoint::new(txid(i), 1),
            546,
            100,
            p2pkh_script(&[0x11; 20]),
            false,
            Some(TokenData::new(txid(900), 10, TokenProtocol::Slp, 1)),
        )
    }

    struct MockIndexer {
        utxos: Vec<Utxo>,
        tip_height: i32,
        fetch_count: AtomicU32,
    }

    impl MockIndexer {
        fn new(utxos: Vec<Utxo>, tip_height: i32) -> Self {
            Self {
                utxos,
                tip_height,
                fetch_count: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Indexer for MockIndexer {
        async fn blockchain_info(&self) -> WalletResult<ChainTip> {
            Ok(ChainTip {
                hash: "00".repeat(32),
                height: self.tip_height,
            })
        }

        async fn utxos_by_address(&self, _address: &Address) -> WalletResult<Vec<Utxo>> {
            self.fetch_count.fetch_add(1, Relaxed);
            Ok(self.utxos.clone())
        }

        async fn token_info(&self, token_id: &TokenId) -> WalletResult<TokenInfo> {
            Err(WalletError::UnknownProtocol(token_id.to_string()))
        }

        async fn broadcast_tx(&self, _raw_tx: &[u8]) -> WalletResult<TxId> {
            Ok(txid(0xffff))
        }
    }

    fn test_address() -> Address {
        Address::p2pkh("ecash", [0x22; 20])
    }

    fn store_with(utxos: Vec<Utxo>, tip_height: i32) -> Arc<UtxoStore<MockIndexer>> {
        Arc::new(UtxoStore::new(
            Arc::new(MockIndexer::new(utxos, tip_height)),
            WalletConfig::default(),
        ))
    }

    #[tokio::test]
    async fn init_sorts_descending_and_filters_dust() {
        let store = store_with(
            vec![
                plain_utxo(1, 2_000, 100),
                plain_utxo(2, 100, 100), // below the dust limit
                plain_utxo(3, 90_000, 100),
                plain_utxo(4, 5_000, 100),
            ],
            200,
        );
        store.init(&test_address(), false).await.unwrap();

        let state = store.snapshot().await;
        let amounts: Vec<u64> = state.utxos.iter().map(|u| u.sats).collect();
        assert_eq!(amounts, vec![90_000, 5_000, 2_000]);
        // Classification keys are a subset of stored outpoints.
        for outpoint in state.classifications.keys() {
            assert!(state.utxos.iter().any(|u| u.outpoint == *outpoint));
        }
        assert_eq!(state.classifications.len(), 3);
        assert_eq!(state.privacy.len(), 3);
        assert_eq!(state.health.len(), 3);
    }

    #[tokio::test]
    async fn init_uses_cache_until_forced() {
        let store = store_with(vec![plain_utxo(1, 2_000, 100)], 200);
        let address = test_address();
        store.init(&address, false).await.unwrap();
        store.init(&address, false).await.unwrap();
        assert_eq!(store.indexer.fetch_count.load(Relaxed), 1);
        store.init(&address, true).await.unwrap();
        assert_eq!(store.indexer.fetch_count.load(Relaxed), 2);
    }

    #[tokio::test]
    async fn concurrent_inits_coalesce_into_one_fetch() {
        let store = store_with(vec![plain_utxo(1, 2_000, 100)], 200);
        let address = test_address();
        let (a, b, c) = tokio::join!(
            store.init(&address, false),
            store.init(&address, false),
            store.init(&address, false),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();
        assert_eq!(store.indexer.fetch_count.load(Relaxed), 1);
    }

    #[tokio::test]
    async fn spendable_never_yields_token_utxos() {
        let store = store_with(
            vec![plain_utxo(1, 2_000, 100), token_utxo(2), plain_utxo(3, 9_000, -1)],
            200,
        );
        store.init(&test_address(), false).await.unwrap();

        let confirmed_only = store
            .spendable_plain_utxos(&SpendableFilter::default())
            .await;
        assert_eq!(confirmed_only.len(), 1);
        assert_eq!(confirmed_only[0].sats, 2_000);

        let with_unconfirmed = store
            .spendable_plain_utxos(&SpendableFilter {
                include_unconfirmed: true,
                ..SpendableFilter::default()
            })
            .await;
        assert_eq!(with_unconfirmed.len(), 2);
        assert!(with_unconfirmed.iter().all(|u| !u.has_token()));
    }

    #[tokio::test]
    async fn spendable_filters_by_health_and_privacy() {
        let store = store_with(
            vec![plain_utxo(1, 100_000, 100), plain_utxo(2, 560, 100)],
            200,
        );
        store.init(&test_address(), false).await.unwrap();

        let strict = store
            .spendable_plain_utxos(&SpendableFilter {
                min_health: Some(90),
                ..SpendableFilter::default()
            })
            .await;
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].sats, 100_000);
    }

    #[tokio::test]
    async fn balance_splits_confirmed_and_unconfirmed() {
        let store = store_with(
            vec![plain_utxo(1, 2_000, 100), plain_utxo(2, 700, -1)],
            200,
        );
        store.init(&test_address(), false).await.unwrap();
        let balance = store.total_balance().await;
        assert_eq!(
            balance,
            BalanceSummary {
                confirmed: 2_000,
                unconfirmed: 700,
                total: 2_700,
            }
        );
    }

    #[tokio::test]
    async fn snapshot_stays_valid_across_refresh() {
        let store = store_with(vec![plain_utxo(1, 2_000, 100)], 200);
        let address = test_address();
        store.init(&address, false).await.unwrap();
        let old_state = store.snapshot().await;
        assert_eq!(old_state.utxos.len(), 1);

        store.clear_cache().await;
        assert_eq!(store.snapshot().await.utxos.len(), 0);
        // The old snapshot is untouched.
        assert_eq!(old_state.utxos.len(), 1);
    }

    #[tokio::test]
    async fn select_for_amount_produces_valid_plan() {
        let store = store_with(
            vec![
                plain_utxo(1, 100_000, 100),
                plain_utxo(2, 60_000, 100),
                plain_utxo(3, 40_000, 100),
            ],
            200,
        );
        store.init(&test_address(), false).await.unwrap();
        let plan = store.select_for_amount(90_000, 1.0).await.unwrap();
        assert_eq!(
            plan.total_input_sats,
            plan.inputs.iter().map(|u| u.sats).sum::<u64>()
        );
        assert!(plan.change == 0 || plan.change >= DUST_LIMIT);
    }

    #[tokio::test]
    async fn block_height_advance_triggers_reclassification() {
        let store = store_with(vec![plain_utxo(1, 2_000, 100)], 200);
        let address = test_address();
        store.init(&address, false).await.unwrap();
        let before = store.snapshot().await;
        assert_eq!(before.classified_at_height, 200);

        store.update_block_height(200 + 144).await;
        // The reclassification runs in the background; wait for the swap.
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if store.snapshot().await.classified_at_height == 344 {
                break;
            }
        }
        let after = store.snapshot().await;
        assert_eq!(after.classified_at_height, 344);
        assert_eq!(after.utxos.len(), 1);
    }

    #[tokio::test]
    async fn small_height_advance_does_not_reclassify() {
        let store = store_with(vec![plain_utxo(1, 2_000, 100)], 200);
        store.init(&test_address(), false).await.unwrap();
        store.update_block_height(210).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let state = store.snapshot().await;
        assert_eq!(state.classified_at_height, 200);
        assert_eq!(state.tip_height, 210);
    }
}
