use crate::config::{COINBASE_MATURITY, ClassifierConfig, DUST_LIMIT, P2PKH_INPUT_SIZE};
use common::errors::WalletResult;
use common::model::{Outpoint, Utxo};
use common::script::is_p2pkh;
use log::warn;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AgeBucket {
    Unconfirmed,
    Fresh,
    Recent,
    Mature,
    Aged,
    Ancient,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueBucket {
    Dust,
    Micro,
    Small,
    Medium,
    Large,
    Whale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HealthBucket {
    Healthy,
    AtRisk,
    Uneconomical,
    Suspicious,
    Dust,
    Unconfirmed,
}

impl Display for HealthBucket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            HealthBucket::Healthy => "healthy",
            HealthBucket::AtRisk => "at-risk",
            HealthBucket::Uneconomical => "uneconomical",
            HealthBucket::Suspicious => "suspicious",
            HealthBucket::Dust => "dust",
            HealthBucket::Unconfirmed => "unconfirmed",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptType {
    P2pkh,
    Unknown,
}

#[derive(Clone, Debug)]
pub struct ClassificationMetadata {
    pub has_token: bool,
    pub script_type: ScriptType,
    pub estimated_input_size: usize,
    pub is_round_number: bool,
}

#[derive(Clone, Debug)]
pub struct Classification {
    pub outpoint: Outpoint,
    pub sats: u64,
    pub age_bucket: AgeBucket,
    pub value_bucket: ValueBucket,
    pub health_bucket: HealthBucket,
    pub age_score: u8,
    pub value_score: u8,
    pub health_score: u8,
    pub privacy_score: u8,
    pub metadata: ClassificationMetadata,
}

impl Classification {
    /// Whether spending this UTXO at `fee_rate` leaves more than half its
    /// value after paying for its own input.
    pub fn is_economical_at(&self, fee_rate: f64) -> bool {
        is_economical(self.sats, fee_rate)
    }
}

pub fn is_economical(sats: u64, fee_rate: f64) -> bool {
    sats as f64 > P2PKH_INPUT_SIZE as f64 * fee_rate * 2.0
}

/// `sats/100` is whole and a multiple of 10, 100 or 1000.
pub fn is_round_number(sats: u64) -> bool {
    if sats == 0 || sats % 100 != 0 {
        return false;
    }
    let hundreds = sats / 100;
    hundreds % 10 == 0
}

/// Dust slightly above the limit that arrived unconfirmed; the signature
/// shape of address-dusting campaigns.
pub fn is_suspicious_dust(sats: u64, confirmed: bool) -> bool {
    !confirmed && sats > DUST_LIMIT && sats < 2 * DUST_LIMIT
}

pub struct UtxoClassifier {
    config: ClassifierConfig,
}

impl UtxoClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, utxo: &Utxo, tip_height: i32) -> WalletResult<Classification> {
        utxo.validate()?;

        let age_blocks = if utxo.is_confirmed() {
            Some((tip_height as i64 - utxo.block_height as i64).max(0))
        } else {
            None
        };
        let sats = utxo.sats;

        let age_bucket = self.age_bucket(age_blocks);
        let value_bucket = self.value_bucket(sats);
        let round = is_round_number(sats);
        let suspicious = is_suspicious_dust(sats, utxo.is_confirmed());
        let script_type = if is_p2pkh(&utxo.script) {
            ScriptType::P2pkh
        } else {
            ScriptType::Unknown
        };

        let classification = Classification {
            outpoint: utxo.outpoint,
            sats,
            age_bucket,
            value_bucket,
            health_bucket: self.health_bucket(utxo, suspicious),
            age_score: age_score(age_blocks),
            value_score: self.value_score(sats),
            health_score: self.health_score(utxo, age_blocks, suspicious),
            privacy_score: self.privacy_score(utxo, age_blocks, round, script_type),
            metadata: ClassificationMetadata {
                has_token: utxo.has_token(),
                script_type,
                estimated_input_size: P2PKH_INPUT_SIZE,
                is_round_number: round,
            },
        };
        Ok(classification)
    }

    /// Classifies a whole set. A malformed UTXO never halts the batch; it
    /// is logged and counted instead.
    pub fn classify_batch(
        &self,
        utxos: &[Utxo],
        tip_height: i32,
    ) -> (HashMap<Outpoint, Classification>, usize) {
        let mut classifications = HashMap::with_capacity(utxos.len());
        let mut errors = 0usize;
        for utxo in utxos {
            match self.classify(utxo, tip_height) {
                Ok(classification) => {
                    classifications.insert(utxo.outpoint, classification);
                }
                Err(e) => {
                    errors += 1;
                    warn!("classification failed for {}: {e}", utxo.outpoint);
                }
            }
        }
        (classifications, errors)
    }

    fn age_bucket(&self, age_blocks: Option<i64>) -> AgeBucket {
        let Some(age) = age_blocks else {
            return AgeBucket::Unconfirmed;
        };
        let thresholds = &self.config.age;
        if age < thresholds.fresh {
            AgeBucket::Fresh
        } else if age < thresholds.recent {
            AgeBucket::Recent
        } else if age < thresholds.mature {
            AgeBucket::Mature
        } else if age < thresholds.aged {
            AgeBucket::Aged
        } else {
            AgeBucket::Ancient
        }
    }

    fn value_bucket(&self, sats: u64) -> ValueBucket {
        let thresholds = &self.config.value;
        if sats < thresholds.dust {
            ValueBucket::Dust
        } else if sats < thresholds.micro {
            ValueBucket::Micro
        } else if sats < thresholds.small {
            ValueBucket::Small
        } else if sats < thresholds.medium {
            ValueBucket::Medium
        } else if sats < thresholds.large {
            ValueBucket::Large
        } else {
            ValueBucket::Whale
        }
    }

    fn value_score(&self, sats: u64) -> u8 {
        let thresholds = &self.config.value;
        if sats < thresholds.dust {
            return 0;
        }
        if sats < thresholds.small {
            let score = sats as f64 / thresholds.small as f64 * 80.0;
            return score.round() as u8;
        }
        if sats <= thresholds.medium {
            return 100;
        }
        let over = (sats as f64 / thresholds.medium as f64).log10() * 10.0;
        let score = 100.0 - over.min(30.0);
        score.max(50.0).round() as u8
    }

    fn health_score(&self, utxo: &Utxo, age_blocks: Option<i64>, suspicious: bool) -> u8 {
        let sats = utxo.sats;
        if sats < DUST_LIMIT {
            return 0;
        }
        let mut score = 100.0f64;
        if !utxo.is_confirmed() {
            score -= 30.0;
        }
        if !is_economical(sats, 1.0) {
            score -= 40.0;
        }
        if !is_economical(sats, 2.0) {
            score -= 20.0;
        }
        if suspicious {
            score -= 50.0;
        }
        if utxo.has_token() {
            score += 10.0;
        }
        if utxo.is_coinbase {
            let matured = age_blocks.is_some_and(|age| age >= COINBASE_MATURITY as i64);
            if !matured {
                score -= 30.0;
            }
        }
        score.clamp(0.0, 100.0).round() as u8
    }

    fn health_bucket(&self, utxo: &Utxo, suspicious: bool) -> HealthBucket {
        let sats = utxo.sats;
        if sats < DUST_LIMIT {
            return HealthBucket::Dust;
        }
        if suspicious {
            return HealthBucket::Suspicious;
        }
        if !utxo.is_confirmed() {
            return HealthBucket::Unconfirmed;
        }
        if !is_economical(sats, 2.0) {
            return HealthBucket::Uneconomical;
        }
        if sats < self.config.value.micro {
            return HealthBucket::AtRisk;
        }
        HealthBucket::Healthy
    }

    fn privacy_score(
        &self,
        utxo: &Utxo,
        age_blocks: Option<i64>,
        round: bool,
        script_type: ScriptType,
    ) -> u8 {
        let mut score = 100.0f64;
        if round {
            score -= 15.0;
        }
        if self.config.surveillance_amounts.contains(&utxo.sats) {
            score -= 25.0;
        }
        if script_type == ScriptType::P2pkh {
            score += 10.0;
        }
        match age_blocks {
            Some(age) => {
                let bonus = ((age + 1) as f64).log10() * 5.0;
                score += bonus.min(20.0);
            }
            None => score -= 20.0,
        }
        if utxo.sats < self.config.value.dust {
            score -= 30.0;
        }
        if utxo.sats >= self.config.value.large {
            score -= 15.0;
        }
        if utxo.has_token() {
            score -= 10.0;
        }
        score.clamp(0.0, 100.0).round() as u8
    }
}

fn age_score(age_blocks: Option<i64>) -> u8 {
    match age_blocks {
        None => 0,
        Some(0) => 10,
        Some(age) => {
            let score = ((age + 1) as f64).log10() * 25.0;
            score.min(100.0).round() as u8
        }
    }
}
