/// Minimum sats for a standard output on the target network.
pub const DUST_LIMIT: u64 = 546;

/// Default fee rate in sats per byte.
pub const DEFAULT_FEE_RATE: f64 = 1.2;

/// Serialized size of a standard P2PKH input (outpoint, script sig with
/// signature and pubkey, sequence).
pub const P2PKH_INPUT_SIZE: usize = 148;

/// Serialized size of a standard P2PKH output.
pub const P2PKH_OUTPUT_SIZE: usize = 34;

/// Version, counts and locktime of a transaction.
pub const TX_OVERHEAD_SIZE: usize = 10;

/// Fixed estimator surcharge for an ALP eMPP carrier output.
pub const EMPP_FEE_SURCHARGE: usize = 40;

/// Maximum combined prefix-plus-message length of an OP_RETURN payload.
pub const MAX_OP_RETURN_PAYLOAD: usize = 223;

/// Default OP_RETURN payload prefix.
pub const OP_RETURN_PREFIX: [u8; 2] = [0x6d, 0x02];

/// Token transactions address at most this many recipients.
pub const MAX_TOKEN_RECIPIENTS: usize = 19;

/// Blocks a coinbase output must age before it is spendable.
pub const COINBASE_MATURITY: i32 = 100;

#[derive(Clone, Debug)]
pub struct AgeThresholds {
    /// Upper bounds in blocks, exclusive, from newest to oldest bucket.
    pub fresh: i64,
    pub recent: i64,
    pub mature: i64,
    pub aged: i64,
}

impl Default for AgeThresholds {
    fn default() -> Self {
        Self {
            fresh: 6,
            recent: 144,
            mature: 1008,
            aged: 4032,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ValueThresholds {
    /// Upper bounds in sats, exclusive, from smallest to largest bucket.
    pub dust: u64,
    pub micro: u64,
    pub small: u64,
    pub medium: u64,
    pub large: u64,
}

impl Default for ValueThresholds {
    fn default() -> Self {
        Self {
            dust: 1_000,
            micro: 5_000,
            small: 50_000,
            medium: 500_000,
            large: 5_000_000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClassifierConfig {
    pub age: AgeThresholds,
    pub value: ValueThresholds,
    /// Amounts observed in address-surveillance dusting campaigns.
    pub surveillance_amounts: Vec<u64>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            age: AgeThresholds::default(),
            value: ValueThresholds::default(),
            surveillance_amounts: vec![546, 547, 558, 666, 1111, 1337],
        }
    }
}

#[derive(Clone, Debug)]
pub struct HealthConfig {
    /// Rule 1: this many recent near-dust deposits flags a dust attack.
    pub dust_attack_size: usize,
    /// Rule 4: this many recent near-dust deposits is at least suspicious.
    pub rapid_deposit_count: usize,
    /// Window in blocks within which a deposit counts as recent.
    pub recent_window_blocks: i64,
    pub fragmentation_dust_count: usize,
    pub attack_suspicious_count: usize,
    /// Fraction of wallet value that may be uneconomical before alerting.
    pub uneconomical_alert_fraction: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            dust_attack_size: 5,
            rapid_deposit_count: 8,
            recent_window_blocks: 144,
            fragmentation_dust_count: 10,
            attack_suspicious_count: 3,
            uneconomical_alert_fraction: 0.3,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SelectionConfig {
    /// Weight of the health score in the hybrid composite sort key.
    pub health_weight: u64,
    /// Weight of the privacy score in the hybrid composite sort key.
    pub privacy_weight: u64,
    /// Hybrid selection falls through to legacy below these sizes.
    pub hybrid_min_utxos: usize,
    pub hybrid_min_total_sats: u64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            health_weight: 1_000,
            privacy_weight: 500,
            hybrid_min_utxos: 3,
            hybrid_min_total_sats: 10_000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Per-endpoint retry budget; total attempts = endpoints x retries.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub attempt_timeout_ms: u64,
    pub health_check_interval_ms: u64,
    pub health_check_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            attempt_timeout_ms: 10_000,
            health_check_interval_ms: 30_000,
            health_check_timeout_ms: 5_000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub cache_timeout_ms: i64,
    /// Height advance that triggers background reclassification.
    pub reclassify_interval_blocks: i32,
    pub fetch_retries: u32,
    pub fetch_base_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_timeout_ms: 60_000,
            reclassify_interval_blocks: 144,
            fetch_retries: 3,
            fetch_base_delay_ms: 500,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConsolidationConfig {
    /// Only UTXOs at or below this value are consolidation candidates.
    pub threshold_sats: u64,
    pub max_inputs_per_tx: usize,
    pub inter_tx_delay_ms: u64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            threshold_sats: 10_000,
            max_inputs_per_tx: 50,
            inter_tx_delay_ms: 1_000,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct WalletConfig {
    pub classifier: ClassifierConfig,
    pub health: HealthConfig,
    pub selection: SelectionConfig,
    pub retry: RetryConfig,
    pub store: StoreConfig,
    pub consolidation: ConsolidationConfig,
    pub fee_rate: Option<f64>,
}

impl WalletConfig {
    pub fn fee_rate(&self) -> f64 {
        self.fee_rate.unwrap_or(DEFAULT_FEE_RATE)
    }
}
