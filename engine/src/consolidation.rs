use crate::builder::TransactionBuilder;
use crate::coin_selection::estimate_fee;
use crate::config::{ConsolidationConfig, DUST_LIMIT};
use crate::indexer::Indexer;
use crate::store::UtxoStore;
use common::address::Address;
use common::errors::{WalletError, WalletResult};
use common::model::{TxId, Utxo};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ConsolidationOptions {
    pub dry_run: bool,
    pub fee_rate: f64,
    pub max_inputs_per_tx: usize,
    /// Only UTXOs at or below this value are considered.
    pub value_ceiling_sats: u64,
}

impl ConsolidationOptions {
    pub fn from_config(config: &ConsolidationConfig, fee_rate: f64) -> Self {
        Self {
            dry_run: false,
            fee_rate,
            max_inputs_per_tx: config.max_inputs_per_tx,
            value_ceiling_sats: config.threshold_sats,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConsolidationBatch {
    pub inputs: Vec<Utxo>,
    pub fee: u64,
    pub output_sats: u64,
}

#[derive(Clone, Debug)]
pub struct ConsolidationPlan {
    pub batches: Vec<ConsolidationBatch>,
    pub candidates_considered: usize,
    /// Fee to spend every candidate as-is in a typical 2-output spend.
    pub current_cost: u64,
    /// Fee of the consolidation transactions themselves.
    pub consolidation_cost: u64,
    /// Fee to later spend the consolidated outputs in 2-output spends.
    pub future_cost: u64,
    pub recommended: bool,
}

impl ConsolidationPlan {
    pub fn estimated_savings(&self) -> i64 {
        self.current_cost as i64 - self.consolidation_cost as i64 - self.future_cost as i64
    }
}

/// Outcome of broadcasting one batch.
#[derive(Clone, Debug)]
pub struct BatchOutcome {
    pub batch_index: usize,
    pub txid: Option<TxId>,
    pub error: Option<String>,
}

/// Plans and executes multi-transaction dust consolidation.
pub struct ConsolidationPlanner<C: Indexer> {
    indexer: Arc<C>,
    config: ConsolidationConfig,
}

impl<C: Indexer + 'static> ConsolidationPlanner<C> {
    pub fn new(indexer: Arc<C>, config: ConsolidationConfig) -> Self {
        Self { indexer, config }
    }

    /// Selects plain sub-threshold UTXOs, batches them, and prices the
    /// whole operation. Token-bearing UTXOs are never candidates.
    pub fn plan(&self, utxos: &[Utxo], options: &ConsolidationOptions) -> ConsolidationPlan {
        let ceiling = options.value_ceiling_sats;
        let mut candidates: Vec<Utxo> = utxos
            .iter()
            .filter(|u| !u.has_token() && u.sats <= ceiling)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.sats.cmp(&b.sats).then(a.outpoint.cmp(&b.outpoint)));
        let considered = candidates.len();

        let mut batches = Vec::new();
        for chunk in candidates.chunks(options.max_inputs_per_tx.max(1)) {
            let fee = estimate_fee(chunk.len(), 1, options.fee_rate, 0);
            let total: u64 = chunk.iter().map(|u| u.sats).sum();
            let output_sats = total.saturating_sub(fee);
            if output_sats < DUST_LIMIT {
                debug!(
                    "skipping batch of {} inputs: output {output_sats} would be dust",
                    chunk.len()
                );
                continue;
            }
            batches.push(ConsolidationBatch {
                inputs: chunk.to_vec(),
                fee,
                output_sats,
            });
        }

        // Costs compare three worlds: spending every input as-is (one
        // 2-output transaction each), the consolidation itself, and later
        // spending each consolidated output in a 2-output transaction.
        let batched_inputs: usize = batches.iter().map(|b| b.inputs.len()).sum();
        let spend_cost = estimate_fee(1, 2, options.fee_rate, 0);
        let current_cost = batched_inputs as u64 * spend_cost;
        let consolidation_cost: u64 = batches.iter().map(|b| b.fee).sum();
        let future_cost = batches.len() as u64 * spend_cost;
        let recommended = !batches.is_empty()
            && current_cost as i64 - consolidation_cost as i64 - future_cost as i64 > 0;

        ConsolidationPlan {
            batches,
            candidates_considered: considered,
            current_cost,
            consolidation_cost,
            future_cost,
            recommended,
        }
    }

    /// Broadcasts each batch as a single-output sweep back to the wallet,
    /// pausing between transactions. Per-batch failures are collected
    /// without aborting the run; a token-bearing input aborts hard.
    pub async fn execute(
        &self,
        builder: &TransactionBuilder,
        plan: &ConsolidationPlan,
        options: &ConsolidationOptions,
        store: Option<&UtxoStore<C>>,
        address: &Address,
    ) -> WalletResult<Vec<BatchOutcome>> {
        for batch in &plan.batches {
            if batch.inputs.iter().any(|u| u.has_token()) {
                return Err(WalletError::InvalidUtxoStructure(
                    "consolidation batch contains a token-bearing UTXO".to_string(),
                ));
            }
        }
        if options.dry_run {
            info!(
                "dry run: {} batches consolidating {} UTXOs",
                plan.batches.len(),
                plan.candidates_considered
            );
            return Ok(Vec::new());
        }

        let mut outcomes = Vec::with_capacity(plan.batches.len());
        for (batch_index, batch) in plan.batches.iter().enumerate() {
            if batch_index > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.inter_tx_delay_ms)).await;
            }
            let outcome = match self.broadcast_batch(builder, batch, options).await {
                Ok(txid) => {
                    info!("consolidation batch {batch_index} broadcast as {txid}");
                    BatchOutcome {
                        batch_index,
                        txid: Some(txid),
                        error: None,
                    }
                }
                Err(e) => {
                    warn!("consolidation batch {batch_index} failed: {e}");
                    BatchOutcome {
                        batch_index,
                        txid: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        if let Some(store) = store {
            if let Err(e) = store.refresh_cache(address).await {
                warn!("cache refresh after consolidation failed: {e}");
            }
        }
        Ok(outcomes)
    }

    async fn broadcast_batch(
        &self,
        builder: &TransactionBuilder,
        batch: &ConsolidationBatch,
        options: &ConsolidationOptions,
    ) -> WalletResult<TxId> {
        let built =
            builder.build_send_all(&batch.inputs, builder.keys().address(), options.fee_rate)?;
        self.indexer.broadcast_tx(&built.tx.serialize()).await
    }
}
