use crate::classifier::{Classification, HealthBucket, UtxoClassifier, is_round_number};
use crate::config::{DUST_LIMIT, HealthConfig, P2PKH_INPUT_SIZE};
use chrono::{DateTime, Duration, Utc};
use common::model::{Outpoint, Utxo};
use std::collections::{HashMap, VecDeque};

const ALERT_RETENTION_HOURS: i64 = 24;
const ASSESSMENT_HISTORY_LEN: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AlertKind {
    UtxoHealth,
    WalletFragmentation,
    PotentialAttack,
    EconomicInefficiency,
    DustAttack,
}

impl AlertKind {
    pub fn code(&self) -> &'static str {
        match self {
            AlertKind::UtxoHealth => "utxo_health",
            AlertKind::WalletFragmentation => "wallet_fragmentation",
            AlertKind::PotentialAttack => "potential_attack",
            AlertKind::EconomicInefficiency => "economic_inefficiency",
            AlertKind::DustAttack => "dust_attack",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub outpoint: Option<Outpoint>,
    pub message: String,
    pub recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct UtxoAssessment {
    pub outpoint: Outpoint,
    pub status: HealthBucket,
    pub severity: Severity,
    pub health_score: u8,
    /// Cost in sats of spending this UTXO at the assessed fee rate.
    pub spending_cost_sats: u64,
    /// Fee rate above which this UTXO stops being economical.
    pub break_even_fee_rate: f64,
    pub risk_factors: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct HealthSummary {
    pub total_utxos: usize,
    pub counts_by_status: HashMap<HealthBucket, usize>,
    pub total_sats: u128,
    pub spendable_sats: u128,
    pub uneconomical_sats: u128,
    pub spendable_pct: f64,
    pub uneconomical_pct: f64,
}

#[derive(Clone, Debug)]
pub struct Recommendation {
    pub kind: &'static str,
    pub priority: Severity,
    pub action: &'static str,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct HealthReport {
    pub assessments: Vec<UtxoAssessment>,
    pub summary: HealthSummary,
    pub alerts: Vec<Alert>,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Clone, Debug)]
pub struct DustAttackPattern {
    pub severity: Severity,
    pub indicators: Vec<String>,
    pub suspicious_utxos: Vec<Outpoint>,
    pub recommendations: Vec<String>,
}

impl DustAttackPattern {
    fn clean() -> Self {
        Self {
            severity: Severity::None,
            indicators: Vec::new(),
            suspicious_utxos: Vec::new(),
            recommendations: Vec::new(),
        }
    }
}

/// Aggregates per-UTXO classifications into wallet-wide health state.
/// Owns the alert log, per-address dust-attack patterns and a short
/// assessment history per outpoint.
pub struct HealthMonitor {
    config: HealthConfig,
    classifier: UtxoClassifier,
    alerts: Vec<Alert>,
    patterns: HashMap<String, DustAttackPattern>,
    history: HashMap<Outpoint, VecDeque<UtxoAssessment>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, classifier: UtxoClassifier) -> Self {
        Self {
            config,
            classifier,
            alerts: Vec::new(),
            patterns: HashMap::new(),
            history: HashMap::new(),
        }
    }

    /// Produces the wallet health report. When `classifications` is absent
    /// the monitor classifies on the fly.
    pub fn assess_wallet(
        &mut self,
        utxos: &[Utxo],
        classifications: Option<&HashMap<Outpoint, Classification>>,
        fee_rate: f64,
        tip_height: i32,
    ) -> HealthReport {
        let computed;
        let classifications = match classifications {
            Some(map) => map,
            None => {
                computed = self.classifier.classify_batch(utxos, tip_height).0;
                &computed
            }
        };

        let mut assessments = Vec::with_capacity(utxos.len());
        let mut summary = HealthSummary {
            total_utxos: utxos.len(),
            ..HealthSummary::default()
        };
        let mut new_alerts = Vec::new();

        for utxo in utxos {
            let Some(classification) = classifications.get(&utxo.outpoint) else {
                continue;
            };
            let assessment = self.assess_utxo(utxo, classification, fee_rate);

            summary.total_sats += utxo.sats as u128;
            *summary.counts_by_status.entry(assessment.status).or_insert(0) += 1;
            if classification.is_economical_at(fee_rate) {
                summary.spendable_sats += utxo.sats as u128;
            }
            if assessment.status == HealthBucket::Uneconomical {
                summary.uneconomical_sats += utxo.sats as u128;
            }

            if assessment.severity >= Severity::High {
                new_alerts.push(Alert {
                    kind: AlertKind::UtxoHealth,
                    severity: assessment.severity,
                    outpoint: Some(assessment.outpoint),
                    message: format!(
                        "UTXO {} is {} ({} sats)",
                        assessment.outpoint, assessment.status, utxo.sats
                    ),
                    recommendations: assessment.recommendations.clone(),
                    created_at: Utc::now(),
                });
            }

            let history = self.history.entry(utxo.outpoint).or_default();
            if history.len() == ASSESSMENT_HISTORY_LEN {
                history.pop_front();
            }
            history.push_back(assessment.clone());

            assessments.push(assessment);
        }

        if summary.total_sats > 0 {
            summary.spendable_pct =
                summary.spendable_sats as f64 / summary.total_sats as f64 * 100.0;
            summary.uneconomical_pct =
                summary.uneconomical_sats as f64 / summary.total_sats as f64 * 100.0;
        }

        // Pattern alerts come after every per-UTXO alert of this scan.
        new_alerts.extend(self.pattern_alerts(&summary));
        let recommendations = self.system_recommendations(&summary);

        self.alerts.extend(new_alerts.clone());
        self.prune_alerts();

        HealthReport {
            assessments,
            summary,
            alerts: new_alerts,
            recommendations,
        }
    }

    fn assess_utxo(
        &self,
        utxo: &Utxo,
        classification: &Classification,
        fee_rate: f64,
    ) -> UtxoAssessment {
        let status = classification.health_bucket;
        let spending_cost_sats = (P2PKH_INPUT_SIZE as f64 * fee_rate).ceil() as u64;
        let break_even_fee_rate = utxo.sats as f64 / (P2PKH_INPUT_SIZE as f64 * 2.0);

        let mut risk_factors = Vec::new();
        let mut recommendations = Vec::new();
        if !utxo.is_confirmed() {
            risk_factors.push("unconfirmed".to_string());
            recommendations.push("wait for confirmation before spending".to_string());
        }
        if !classification.is_economical_at(fee_rate) {
            risk_factors.push(format!("uneconomical at {fee_rate} sats/byte"));
            recommendations.push("consolidate during a low-fee period".to_string());
        }
        if status == HealthBucket::Suspicious {
            risk_factors.push("matches dust-attack shape".to_string());
            recommendations.push("do not spend; isolate from other coins".to_string());
        }
        if classification.metadata.is_round_number {
            risk_factors.push("round-number amount".to_string());
        }

        let severity = match status {
            HealthBucket::Healthy => Severity::None,
            HealthBucket::AtRisk | HealthBucket::Unconfirmed => Severity::Low,
            HealthBucket::Uneconomical | HealthBucket::Dust => Severity::Medium,
            HealthBucket::Suspicious => Severity::High,
        };

        UtxoAssessment {
            outpoint: utxo.outpoint,
            status,
            severity,
            health_score: classification.health_score,
            spending_cost_sats,
            break_even_fee_rate,
            risk_factors,
            recommendations,
        }
    }

    fn pattern_alerts(&self, summary: &HealthSummary) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let count = |bucket: HealthBucket| summary.counts_by_status.get(&bucket).copied().unwrap_or(0);

        let dust_count = count(HealthBucket::Dust);
        if dust_count > self.config.fragmentation_dust_count {
            alerts.push(Alert {
                kind: AlertKind::WalletFragmentation,
                severity: Severity::Medium,
                outpoint: None,
                message: format!("{dust_count} dust UTXOs fragment this wallet"),
                recommendations: vec!["consolidate dust during a low-fee period".to_string()],
                created_at: Utc::now(),
            });
        }

        let suspicious_count = count(HealthBucket::Suspicious);
        if suspicious_count > self.config.attack_suspicious_count {
            alerts.push(Alert {
                kind: AlertKind::PotentialAttack,
                severity: Severity::High,
                outpoint: None,
                message: format!("{suspicious_count} UTXOs match a dust-attack pattern"),
                recommendations: vec![
                    "do not spend micro-UTXOs from unknown senders".to_string(),
                    "use a new receiving address".to_string(),
                ],
                created_at: Utc::now(),
            });
        }

        if summary.uneconomical_pct > self.config.uneconomical_alert_fraction * 100.0 {
            alerts.push(Alert {
                kind: AlertKind::EconomicInefficiency,
                severity: Severity::Medium,
                outpoint: None,
                message: format!(
                    "{:.1}% of wallet value is uneconomical to spend",
                    summary.uneconomical_pct
                ),
                recommendations: vec!["consolidate small UTXOs".to_string()],
                created_at: Utc::now(),
            });
        }
        alerts
    }

    fn system_recommendations(&self, summary: &HealthSummary) -> Vec<Recommendation> {
        let count = |bucket: HealthBucket| summary.counts_by_status.get(&bucket).copied().unwrap_or(0);
        let mut recommendations = Vec::new();

        let dusty = count(HealthBucket::Dust) + count(HealthBucket::Uneconomical);
        if dusty > 0 {
            recommendations.push(Recommendation {
                kind: "consolidation",
                priority: if dusty > self.config.fragmentation_dust_count {
                    Severity::High
                } else {
                    Severity::Medium
                },
                action: "consolidate_utxos",
                message: format!("{dusty} UTXOs would benefit from consolidation"),
            });
        }
        if count(HealthBucket::AtRisk) > 0 {
            recommendations.push(Recommendation {
                kind: "wallet_health",
                priority: Severity::Low,
                action: "review_small_utxos",
                message: "small UTXOs may become uneconomical if fees rise".to_string(),
            });
        }
        if count(HealthBucket::Suspicious) > 0 {
            recommendations.push(Recommendation {
                kind: "security",
                priority: Severity::High,
                action: "quarantine_suspicious_utxos",
                message: "suspicious UTXOs detected; avoid spending them".to_string(),
            });
        }
        if count(HealthBucket::Unconfirmed) > 0 {
            recommendations.push(Recommendation {
                kind: "confirmation",
                priority: Severity::Low,
                action: "await_confirmations",
                message: "some UTXOs are still unconfirmed".to_string(),
            });
        }
        recommendations
    }

    /// Ordered dust-attack rules; severity only ever escalates.
    pub fn detect_dust_attack(
        &mut self,
        utxos: &[Utxo],
        address: &str,
        tip_height: i32,
    ) -> DustAttackPattern {
        let recent_dust: Vec<&Utxo> = utxos
            .iter()
            .filter(|u| u.sats > DUST_LIMIT && u.sats < 5 * DUST_LIMIT)
            .filter(|u| {
                !u.is_confirmed()
                    || (tip_height as i64 - u.block_height as i64)
                        <= self.config.recent_window_blocks
            })
            .collect();

        let mut pattern = DustAttackPattern::clean();
        pattern.suspicious_utxos = recent_dust.iter().map(|u| u.outpoint).collect();

        if recent_dust.len() >= self.config.dust_attack_size {
            pattern.severity = pattern.severity.max(Severity::High);
            pattern.indicators.push(format!(
                "{} near-dust deposits received recently",
                recent_dust.len()
            ));
        }

        let round_count = recent_dust
            .iter()
            .filter(|u| is_round_number(u.sats))
            .count();
        if round_count >= 3 {
            pattern.severity = pattern.severity.max(Severity::Critical);
            pattern
                .indicators
                .push(format!("{round_count} round-number amounts"));
        }

        let mut amount_counts: HashMap<u64, usize> = HashMap::new();
        for utxo in &recent_dust {
            *amount_counts.entry(utxo.sats).or_insert(0) += 1;
        }
        if let Some((&sats, &repeats)) = amount_counts
            .iter()
            .filter(|&(_, &count)| count >= 3)
            .max_by_key(|&(_, &count)| count)
        {
            pattern.severity = pattern.severity.max(Severity::Critical);
            pattern
                .indicators
                .push(format!("{repeats} identical amounts of {sats} sats"));
        }

        if recent_dust.len() >= self.config.rapid_deposit_count {
            pattern.severity = pattern.severity.max(Severity::Medium);
            pattern
                .indicators
                .push(format!("{} rapid deposits", recent_dust.len()));
        }

        if pattern.severity > Severity::None {
            pattern.recommendations = vec![
                "do not spend micro-UTXOs from unknown senders".to_string(),
                "use a new receiving address".to_string(),
            ];
            self.alerts.push(Alert {
                kind: AlertKind::DustAttack,
                severity: pattern.severity,
                outpoint: None,
                message: format!("dust-attack pattern detected for {address}"),
                recommendations: pattern.recommendations.clone(),
                created_at: Utc::now(),
            });
            self.prune_alerts();
        }

        self.patterns.insert(address.to_string(), pattern.clone());
        pattern
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn pattern_for(&self, address: &str) -> Option<&DustAttackPattern> {
        self.patterns.get(address)
    }

    pub fn history_for(&self, outpoint: &Outpoint) -> Option<&VecDeque<UtxoAssessment>> {
        self.history.get(outpoint)
    }

    fn prune_alerts(&mut self) {
        let cutoff = Utc::now() - Duration::hours(ALERT_RETENTION_HOURS);
        self.alerts.retain(|alert| alert.created_at > cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassifierConfig;
    use common::model::{Outpoint, TxId};
    use common::script::p2pkh_script;

    fn txid(i: u32) -> TxId {
        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&i.to_le_bytes());
        TxId::new(bytes)
    }

    fn utxo(i: u32, sats: u64, block_height: i32) -> Utxo {
        Utxo::new(
            Outpoint::new(txid(i), 0),
            sats,
            block_height,
            p2pkh_script(&[0x11; 20]),
            false,
            None,
        )
    }

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(
            HealthConfig::default(),
            UtxoClassifier::new(ClassifierConfig::default()),
        )
    }

    #[test]
    fn identical_dust_amounts_escalate_to_critical() {
        // Six unconfirmed near-dust deposits with 547 repeated three times.
        let utxos = vec![
            utxo(1, 547, -1),
            utxo(2, 547, -1),
            utxo(3, 547, -1),
            utxo(4, 548, -1),
            utxo(5, 549, -1),
            utxo(6, 550, -1),
        ];
        let pattern = monitor().detect_dust_attack(&utxos, "ecash:qtest", 800_000);
        assert_eq!(pattern.severity, Severity::Critical);
        assert!(
            pattern
                .indicators
                .iter()
                .any(|i| i == "3 identical amounts of 547 sats")
        );
        assert_eq!(pattern.suspicious_utxos.len(), 6);
    }

    #[test]
    fn five_recent_dust_deposits_reach_high() {
        let utxos: Vec<Utxo> = (0..5).map(|i| utxo(i, 600 + i as u64, -1)).collect();
        let pattern = monitor().detect_dust_attack(&utxos, "ecash:qtest", 800_000);
        assert_eq!(pattern.severity, Severity::High);
    }

    #[test]
    fn old_confirmed_dust_does_not_count_as_recent() {
        // Confirmed 1000 blocks ago, outside the 144-block window.
        let utxos: Vec<Utxo> = (0..6).map(|i| utxo(i, 600, 799_000)).collect();
        let pattern = monitor().detect_dust_attack(&utxos, "ecash:qtest", 800_000);
        assert_eq!(pattern.severity, Severity::None);
        assert!(pattern.indicators.is_empty());
    }

    #[test]
    fn severity_is_monotone_in_the_number_of_suspicious_utxos() {
        let mut previous = Severity::None;
        for n in 1..12u32 {
            let utxos: Vec<Utxo> = (0..n).map(|i| utxo(i, 700, -1)).collect();
            let severity = monitor()
                .detect_dust_attack(&utxos, "ecash:qtest", 800_000)
                .severity;
            assert!(severity >= previous, "severity dropped at n={n}");
            previous = severity;
        }
    }

    #[test]
    fn patterns_are_stored_per_address() {
        let mut monitor = monitor();
        let utxos: Vec<Utxo> = (0..6).map(|i| utxo(i, 700, -1)).collect();
        monitor.detect_dust_attack(&utxos, "ecash:qone", 800_000);
        assert!(monitor.pattern_for("ecash:qone").is_some());
        assert!(monitor.pattern_for("ecash:qtwo").is_none());
    }

    #[test]
    fn report_summary_counts_statuses_and_value() {
        let utxos = vec![
            utxo(1, 100_000, 790_000), // healthy
            utxo(2, 400, 790_000),     // below dust limit
            utxo(3, 500, 790_000),     // below dust limit
            utxo(4, 2_000, -1),        // unconfirmed
        ];
        let mut monitor = monitor();
        let report = monitor.assess_wallet(&utxos, None, 1.2, 800_000);
        assert_eq!(report.summary.total_utxos, 4);
        assert_eq!(report.summary.counts_by_status[&HealthBucket::Healthy], 1);
        assert_eq!(report.summary.counts_by_status[&HealthBucket::Dust], 2);
        assert_eq!(
            report.summary.counts_by_status[&HealthBucket::Unconfirmed],
            1
        );
        assert_eq!(report.summary.total_sats, 102_900);
        assert!(report.summary.spendable_sats >= 100_000);
        assert_eq!(report.assessments.len(), 4);
    }

    #[test]
    fn fragmentation_alert_fires_above_ten_dust_utxos() {
        let utxos: Vec<Utxo> = (0..11).map(|i| utxo(i, 300, 790_000)).collect();
        let mut monitor = monitor();
        let report = monitor.assess_wallet(&utxos, None, 1.2, 800_000);
        assert!(
            report
                .alerts
                .iter()
                .any(|a| a.kind == AlertKind::WalletFragmentation)
        );
    }

    #[test]
    fn per_utxo_alerts_precede_pattern_alerts() {
        // Four suspicious UTXOs trigger both per-UTXO and pattern alerts.
        let utxos: Vec<Utxo> = (0..4).map(|i| utxo(i, 600, -1)).collect();
        let mut monitor = monitor();
        let report = monitor.assess_wallet(&utxos, None, 1.2, 800_000);
        let first_pattern = report
            .alerts
            .iter()
            .position(|a| a.kind == AlertKind::PotentialAttack)
            .expect("pattern alert expected");
        let last_utxo = report
            .alerts
            .iter()
            .rposition(|a| a.kind == AlertKind::UtxoHealth)
            .expect("per-utxo alerts expected");
        assert!(last_utxo < first_pattern);
    }

    #[test]
    fn history_is_capped_at_ten_assessments() {
        let mut monitor = monitor();
        let utxos = vec![utxo(1, 100_000, 790_000)];
        for _ in 0..15 {
            monitor.assess_wallet(&utxos, None, 1.2, 800_000);
        }
        let history = monitor.history_for(&utxos[0].outpoint).unwrap();
        assert_eq!(history.len(), ASSESSMENT_HISTORY_LEN);
    }

    #[test]
    fn break_even_rate_matches_economical_threshold() {
        let mut monitor = monitor();
        let utxos = vec![utxo(1, 29_600, 790_000)];
        let report = monitor.assess_wallet(&utxos, None, 1.2, 800_000);
        let assessment = &report.assessments[0];
        // 29600 / (148 * 2) = 100 sats/byte
        assert_eq!(assessment.break_even_fee_rate, 100.0);
        assert_eq!(assessment.spending_cost_sats, (148.0f64 * 1.2).ceil() as u64);
    }
}
