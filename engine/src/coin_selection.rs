use crate::classifier::{Classification, HealthBucket};
use crate::config::{
    DUST_LIMIT, P2PKH_INPUT_SIZE, P2PKH_OUTPUT_SIZE, SelectionConfig, TX_OVERHEAD_SIZE,
};
use common::errors::{WalletError, WalletResult};
use common::model::{Outpoint, Utxo};
use itertools::Itertools;
use log::debug;
use std::collections::HashMap;
use std::time::Instant;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SelectionObjective {
    /// Largest-first greedy.
    Legacy,
    /// Weighted composite of sats, health and privacy.
    #[default]
    Hybrid,
}

#[derive(Clone, Debug)]
pub struct SelectionOptions {
    pub objective: SelectionObjective,
    pub include_unconfirmed: bool,
    pub min_health: Option<u8>,
    pub min_privacy: Option<u8>,
    pub exclude_suspicious: bool,
    pub allow_consolidation: bool,
    pub time_budget_ms: Option<u64>,
    /// Number of explicit (non-change) outputs the plan must fund.
    pub n_outputs: usize,
    /// Extra estimator overhead, e.g. an OP_RETURN script length.
    pub extra_overhead: usize,
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            objective: SelectionObjective::default(),
            include_unconfirmed: false,
            min_health: None,
            min_privacy: None,
            exclude_suspicious: false,
            allow_consolidation: false,
            time_budget_ms: None,
            n_outputs: 1,
            extra_overhead: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PlanMetadata {
    pub algorithm: &'static str,
    /// Fraction of selected value actually spent on target plus fee.
    pub efficiency: f64,
    pub avg_health_score: f64,
    pub avg_privacy_score: f64,
}

#[derive(Clone, Debug)]
pub struct SelectionPlan {
    pub inputs: Vec<Utxo>,
    pub total_input_sats: u64,
    pub fee: u64,
    pub change: u64,
    pub metadata: PlanMetadata,
}

/// `ceil((inputs * 148 + outputs * 34 + 10 + extra) * fee_rate)`
pub fn estimate_fee(n_inputs: usize, n_outputs: usize, fee_rate: f64, extra_overhead: usize) -> u64 {
    let size = n_inputs * P2PKH_INPUT_SIZE
        + n_outputs * P2PKH_OUTPUT_SIZE
        + TX_OVERHEAD_SIZE
        + extra_overhead;
    (size as f64 * fee_rate).ceil() as u64
}

pub struct CoinSelector {
    config: SelectionConfig,
}

impl CoinSelector {
    pub fn new(config: SelectionConfig) -> Self {
        Self { config }
    }

    /// Selects inputs covering `target_sats` plus fees under the requested
    /// objective. Hybrid falls through to legacy when the wallet is too
    /// small, scores are unavailable, or the hybrid pass fails.
    pub fn select(
        &self,
        candidates: &[Utxo],
        target_sats: u64,
        fee_rate: f64,
        options: &SelectionOptions,
        classifications: Option<&HashMap<Outpoint, Classification>>,
    ) -> WalletResult<SelectionPlan> {
        let started = Instant::now();
        let filtered = self.filter_candidates(candidates, options, classifications);
        debug!(
            "selecting from {} of {} candidates for {target_sats} sats at {fee_rate} sat/B",
            filtered.len(),
            candidates.len()
        );

        if options.objective == SelectionObjective::Hybrid {
            if let Some(scores) = classifications {
                if self.hybrid_applicable(&filtered) {
                    let mut ranked = filtered.clone();
                    ranked.sort_by_key(|utxo| {
                        std::cmp::Reverse(self.composite_key(utxo, scores))
                    });
                    let within_budget = options
                        .time_budget_ms
                        .is_none_or(|budget| started.elapsed().as_millis() <= budget as u128);
                    if within_budget {
                        if let Ok(plan) =
                            self.greedy(&ranked, target_sats, fee_rate, options, scores, "hybrid")
                        {
                            return Ok(plan);
                        }
                        debug!("hybrid selection failed; falling back to legacy");
                    }
                }
            }
        }

        let mut ranked = filtered;
        ranked.sort_by(|a, b| b.sats.cmp(&a.sats).then(a.outpoint.cmp(&b.outpoint)));
        let empty = HashMap::new();
        let scores = classifications.unwrap_or(&empty);
        self.greedy(&ranked, target_sats, fee_rate, options, scores, "legacy")
    }

    fn filter_candidates(
        &self,
        candidates: &[Utxo],
        options: &SelectionOptions,
        classifications: Option<&HashMap<Outpoint, Classification>>,
    ) -> Vec<Utxo> {
        candidates
            .iter()
            .filter(|utxo| !utxo.has_token())
            .filter(|utxo| options.include_unconfirmed || utxo.is_confirmed())
            .filter(|utxo| {
                let Some(scores) = classifications else {
                    return true;
                };
                let Some(classification) = scores.get(&utxo.outpoint) else {
                    // Unclassified candidates only pass when no score
                    // filters were requested.
                    return options.min_health.is_none()
                        && options.min_privacy.is_none()
                        && !options.exclude_suspicious;
                };
                if let Some(min_health) = options.min_health {
                    if classification.health_score < min_health {
                        return false;
                    }
                }
                if let Some(min_privacy) = options.min_privacy {
                    if classification.privacy_score < min_privacy {
                        return false;
                    }
                }
                if options.exclude_suspicious
                    && classification.health_bucket == HealthBucket::Suspicious
                {
                    return false;
                }
                true
            })
            .cloned()
            .collect()
    }

    fn hybrid_applicable(&self, candidates: &[Utxo]) -> bool {
        let total: u64 = candidates.iter().map(|u| u.sats).sum();
        candidates.len() >= self.config.hybrid_min_utxos
            && total >= self.config.hybrid_min_total_sats
    }

    fn composite_key(&self, utxo: &Utxo, scores: &HashMap<Outpoint, Classification>) -> u64 {
        let (health, privacy) = scores
            .get(&utxo.outpoint)
            .map(|c| (c.health_score as u64, c.privacy_score as u64))
            .unwrap_or((0, 0));
        utxo.sats
            .saturating_add(health * self.config.health_weight)
            .saturating_add(privacy * self.config.privacy_weight)
    }

    fn greedy(
        &self,
        ranked: &[Utxo],
        target_sats: u64,
        fee_rate: f64,
        options: &SelectionOptions,
        scores: &HashMap<Outpoint, Classification>,
        algorithm: &'static str,
    ) -> WalletResult<SelectionPlan> {
        let mut inputs: Vec<Utxo> = Vec::new();
        let mut total: u64 = 0;
        let mut last_fee = estimate_fee(1, options.n_outputs + 1, fee_rate, options.extra_overhead);

        for utxo in ranked {
            inputs.push(utxo.clone());
            total += utxo.sats;

            let fee_with_change = estimate_fee(
                inputs.len(),
                options.n_outputs + 1,
                fee_rate,
                options.extra_overhead,
            );
            last_fee = fee_with_change;
            if total >= target_sats + fee_with_change {
                let change = total - target_sats - fee_with_change;
                let (fee, change) = if change >= DUST_LIMIT {
                    (fee_with_change, change)
                } else {
                    // Sub-dust residual is absorbed into the fee and the
                    // change output is dropped.
                    (total - target_sats, 0)
                };
                debug!(
                    "{algorithm} selection picked {} inputs: {}",
                    inputs.len(),
                    inputs.iter().map(|u| &u.outpoint).join(", ")
                );
                return Ok(self.plan(inputs, total, fee, change, target_sats, scores, algorithm));
            }

            let fee_without_change =
                estimate_fee(inputs.len(), options.n_outputs, fee_rate, options.extra_overhead);
            if total >= target_sats + fee_without_change {
                // Covers target without a change output; residual goes to fee.
                let fee = total - target_sats;
                return Ok(self.plan(inputs, total, fee, 0, target_sats, scores, algorithm));
            }
        }

        Err(WalletError::InsufficientFunds {
            required: target_sats + last_fee,
            available: total,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn plan(
        &self,
        inputs: Vec<Utxo>,
        total: u64,
        fee: u64,
        change: u64,
        target_sats: u64,
        scores: &HashMap<Outpoint, Classification>,
        algorithm: &'static str,
    ) -> SelectionPlan {
        let scored: Vec<&Classification> = inputs
            .iter()
            .filter_map(|u| scores.get(&u.outpoint))
            .collect();
        let avg = |f: fn(&Classification) -> u8| {
            if scored.is_empty() {
                0.0
            } else {
                scored.iter().map(|c| f(c) as f64).sum::<f64>() / scored.len() as f64
            }
        };
        SelectionPlan {
            total_input_sats: total,
            fee,
            change,
            metadata: PlanMetadata {
                algorithm,
                efficiency: if total > 0 {
                    (target_sats + fee) as f64 / total as f64
                } else {
                    0.0
                },
                avg_health_score: avg(|c| c.health_score),
                avg_privacy_score: avg(|c| c.privacy_score),
            },
            inputs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::UtxoClassifier;
    use crate::config::ClassifierConfig;
    use common::model::TxId;
    use common::script::p2pkh_script;

    fn txid(i: u32) -> TxId {
        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&i.to_le_bytes());
        TxId::new(bytes)
    }

    fn utxo(i: u32, sats: u64) -> Utxo {
        Utxo::new(
            Outpoint::new(txid(i), 0),
            sats,
            790_000,
            p2pkh_script(&[0x11; 20]),
            false,
            None,
        )
    }

    fn selector() -> CoinSelector {
        CoinSelector::new(SelectionConfig::default())
    }

    fn legacy_options() -> SelectionOptions {
        SelectionOptions {
            objective: SelectionObjective::Legacy,
            ..SelectionOptions::default()
        }
    }

    fn classify(utxos: &[Utxo]) -> HashMap<Outpoint, Classification> {
        UtxoClassifier::new(ClassifierConfig::default())
            .classify_batch(utxos, 800_000)
            .0
    }

    #[test]
    fn legacy_largest_first_scenario() {
        // Candidates [100000, 60000, 40000, 20000], target 90000 at 1.0.
        let candidates = vec![
            utxo(1, 100_000),
            utxo(2, 60_000),
            utxo(3, 40_000),
            utxo(4, 20_000),
        ];
        let plan = selector()
            .select(&candidates, 90_000, 1.0, &legacy_options(), None)
            .unwrap();
        assert_eq!(plan.inputs.len(), 1);
        assert_eq!(plan.inputs[0].sats, 100_000);
        assert_eq!(plan.fee, 226);
        assert_eq!(plan.change, 9_774);
        assert_eq!(plan.total_input_sats, 100_000);
        assert_eq!(plan.metadata.algorithm, "legacy");
    }

    #[test]
    fn plan_invariants_hold() {
        let candidates = vec![utxo(1, 50_000), utxo(2, 30_000), utxo(3, 20_000)];
        let plan = selector()
            .select(&candidates, 60_000, 1.2, &legacy_options(), None)
            .unwrap();
        assert_eq!(
            plan.total_input_sats,
            plan.inputs.iter().map(|u| u.sats).sum::<u64>()
        );
        assert_eq!(plan.total_input_sats, plan.fee + 60_000 + plan.change);
        assert!(plan.change == 0 || plan.change >= DUST_LIMIT);
        assert!(plan.fee >= estimate_fee(plan.inputs.len(), 1, 1.2, 0));
    }

    #[test]
    fn sub_dust_change_collapses_into_fee() {
        // One input of target + fee + a sliver below the dust limit.
        let fee_two_outputs = estimate_fee(1, 2, 1.0, 0);
        let candidates = vec![utxo(1, 10_000 + fee_two_outputs + 100)];
        let plan = selector()
            .select(&candidates, 10_000, 1.0, &legacy_options(), None)
            .unwrap();
        assert_eq!(plan.change, 0);
        assert_eq!(plan.fee, fee_two_outputs + 100);
        assert_eq!(plan.total_input_sats, plan.fee + 10_000);
    }

    #[test]
    fn insufficient_funds_reports_deficit() {
        let candidates = vec![utxo(1, 1_000), utxo(2, 2_000)];
        let err = selector()
            .select(&candidates, 50_000, 1.0, &legacy_options(), None)
            .unwrap_err();
        match err {
            WalletError::InsufficientFunds { required, available } => {
                assert_eq!(available, 3_000);
                assert!(required > 50_000);
            }
            other => panic!("expected INSUFFICIENT_FUNDS, got {other:?}"),
        }
    }

    #[test]
    fn unconfirmed_candidates_need_opt_in() {
        let mut mempool_utxo = utxo(1, 100_000);
        mempool_utxo.block_height = -1;
        let candidates = vec![mempool_utxo];

        let err = selector().select(&candidates, 50_000, 1.0, &legacy_options(), None);
        assert!(err.is_err());

        let options = SelectionOptions {
            include_unconfirmed: true,
            ..legacy_options()
        };
        let plan = selector().select(&candidates, 50_000, 1.0, &options, None).unwrap();
        assert_eq!(plan.inputs.len(), 1);
    }

    #[test]
    fn token_utxos_are_never_candidates() {
        use common::model::{TokenData, TokenProtocol};
        let mut token_utxo = utxo(1, 100_000);
        token_utxo.token = Some(TokenData::new(txid(9), 5, TokenProtocol::Alp, 0));
        let err = selector().select(&[token_utxo], 50_000, 1.0, &legacy_options(), None);
        assert!(err.is_err());
    }

    #[test]
    fn hybrid_prefers_healthier_inputs_and_reports_algorithm() {
        // Equal-value candidates; the suspicious one scores far lower.
        let healthy = utxo(1, 60_000);
        let mut shady = utxo(2, 60_000);
        shady.block_height = -1;
        shady.sats = 60_000;
        let filler = utxo(3, 60_000);

        let candidates = vec![shady.clone(), healthy.clone(), filler.clone()];
        let scores = classify(&candidates);
        let options = SelectionOptions {
            include_unconfirmed: true,
            ..SelectionOptions::default()
        };
        let plan = selector()
            .select(&candidates, 50_000, 1.0, &options, Some(&scores))
            .unwrap();
        assert_eq!(plan.metadata.algorithm, "hybrid");
        assert_eq!(plan.inputs.len(), 1);
        // The unconfirmed candidate ranks last under the composite key.
        assert_ne!(plan.inputs[0].outpoint, shady.outpoint);
        assert!(plan.metadata.avg_health_score > 0.0);
    }

    #[test]
    fn hybrid_falls_back_to_legacy_for_tiny_wallets() {
        let candidates = vec![utxo(1, 100_000)];
        let scores = classify(&candidates);
        let plan = selector()
            .select(&candidates, 50_000, 1.0, &SelectionOptions::default(), Some(&scores))
            .unwrap();
        assert_eq!(plan.metadata.algorithm, "legacy");
    }

    #[test]
    fn min_health_prefilter_excludes_weak_candidates() {
        let strong = utxo(1, 100_000);
        let weak = utxo(2, 560); // not economical at 2 sat/byte
        let candidates = vec![strong.clone(), weak];
        let scores = classify(&candidates);
        let options = SelectionOptions {
            min_health: Some(90),
            ..legacy_options()
        };
        let plan = selector()
            .select(&candidates, 50_000, 1.0, &options, Some(&scores))
            .unwrap();
        assert!(plan.inputs.iter().all(|u| u.outpoint == strong.outpoint));
    }

    #[test]
    fn exact_match_without_change_output() {
        let fee_one_output = estimate_fee(1, 1, 1.0, 0);
        let candidates = vec![utxo(1, 20_000 + fee_one_output)];
        let plan = selector()
            .select(&candidates, 20_000, 1.0, &legacy_options(), None)
            .unwrap();
        assert_eq!(plan.change, 0);
        assert_eq!(plan.fee, fee_one_output);
    }

    #[test]
    fn fee_estimator_matches_formula() {
        assert_eq!(estimate_fee(1, 2, 1.0, 0), 226);
        assert_eq!(estimate_fee(3, 4, 1.2, 40), 756);
        assert_eq!(estimate_fee(2, 1, 1.2, 0), (340.0f64 * 1.2).ceil() as u64);
    }
}
