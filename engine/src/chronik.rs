use crate::config::RetryConfig;
use crate::indexer::{ChainTip, Indexer, TokenGenesisInfo, TokenInfo};
use async_trait::async_trait;
use common::address::Address;
use common::errors::{NetworkErrorKind, WalletError, WalletResult};
use common::model::{Outpoint, TokenData, TokenId, TokenProtocol, TxId, Utxo};
use futures::future::join_all;
use log::{debug, info, warn};
use rand::Rng;
use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, VecDeque};
use std::error::Error as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;

const LATENCY_WINDOW: usize = 10;
const HEALTHY_SCORE_FLOOR: f64 = 20.0;

/// Per-endpoint health bookkeeping, mutated only behind the client's lock.
#[derive(Clone, Debug)]
pub struct EndpointState {
    pub url: String,
    latencies_ms: VecDeque<f64>,
    consecutive_failures: u32,
    health_score: f64,
}

impl EndpointState {
    fn new(url: String) -> Self {
        Self {
            url,
            latencies_ms: VecDeque::with_capacity(LATENCY_WINDOW),
            consecutive_failures: 0,
            health_score: 100.0,
        }
    }

    pub fn health_score(&self) -> f64 {
        self.health_score
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.latencies_ms.is_empty() {
            return 0.0;
        }
        self.latencies_ms.iter().sum::<f64>() / self.latencies_ms.len() as f64
    }

    fn record_success(&mut self, latency_ms: f64) {
        if self.latencies_ms.len() == LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(latency_ms);
        self.consecutive_failures = 0;
        self.health_score = (self.health_score + 10.0).min(100.0);
    }

    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        let penalty = 30.0f64.min(self.consecutive_failures as f64 * 10.0);
        self.health_score = (self.health_score - penalty).max(0.0);
    }
}

#[derive(Clone, Debug, Default)]
pub struct AdapterStats {
    pub request_count: u64,
    pub failover_count: u64,
    pub error_counts: HashMap<&'static str, u64>,
    latency_sum_ms: f64,
    latency_samples: u64,
}

impl AdapterStats {
    pub fn avg_latency_ms(&self) -> f64 {
        if self.latency_samples == 0 {
            return 0.0;
        }
        self.latency_sum_ms / self.latency_samples as f64
    }
}

/// What the decision table says about a classified failure.
#[derive(Clone, Copy, Debug, PartialEq)]
struct RetryDecision {
    retry: bool,
    delay_multiplier: f64,
    failover: bool,
    /// Some kinds only get a fixed number of retries regardless of budget.
    retry_cap: Option<u32>,
}

fn retry_decision(kind: NetworkErrorKind) -> RetryDecision {
    match kind {
        NetworkErrorKind::Timeout
        | NetworkErrorKind::ConnectionRefused
        | NetworkErrorKind::ServerUnavailable => RetryDecision {
            retry: true,
            delay_multiplier: 1.5,
            failover: true,
            retry_cap: None,
        },
        NetworkErrorKind::RateLimited => RetryDecision {
            retry: true,
            delay_multiplier: 3.0,
            failover: false,
            retry_cap: None,
        },
        NetworkErrorKind::ServerIndexing => RetryDecision {
            retry: true,
            delay_multiplier: 5.0,
            failover: false,
            retry_cap: Some(1),
        },
        NetworkErrorKind::Protocol => RetryDecision {
            retry: false,
            delay_multiplier: 0.0,
            failover: false,
            retry_cap: None,
        },
    }
}

fn backoff_delay(attempt: u32, multiplier: f64, config: &RetryConfig, jitter: f64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let base = config.base_delay_ms as f64 * multiplier * (1u64 << exponent) as f64;
    let delayed = base * (1.0 + jitter);
    Duration::from_millis(delayed.min(config.max_delay_ms as f64) as u64)
}

fn classify_status(status: u16, body: &str) -> NetworkErrorKind {
    static INDEXING: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let indexing =
        INDEXING.get_or_init(|| Regex::new(r"(?i)index|sync|not ready|catching up").unwrap());
    match status {
        429 => NetworkErrorKind::RateLimited,
        504 => NetworkErrorKind::Timeout,
        503 | 502 if indexing.is_match(body) => NetworkErrorKind::ServerIndexing,
        500..=599 => NetworkErrorKind::ServerUnavailable,
        _ => NetworkErrorKind::Protocol,
    }
}

fn classify_transport(err: &reqwest::Error) -> NetworkErrorKind {
    static REFUSED: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let refused = REFUSED.get_or_init(|| Regex::new(r"(?i)connection refused").unwrap());
    if err.is_timeout() {
        return NetworkErrorKind::Timeout;
    }
    if err.is_connect() {
        let mut source: Option<&(dyn std::error::Error + 'static)> = err.source();
        while let Some(cause) = source {
            if refused.is_match(&cause.to_string()) {
                return NetworkErrorKind::ConnectionRefused;
            }
            source = cause.source();
        }
        return NetworkErrorKind::ServerUnavailable;
    }
    if err.is_decode() {
        return NetworkErrorKind::Protocol;
    }
    NetworkErrorKind::ServerUnavailable
}

/// Fault-tolerant router over N indexer endpoints.
pub struct ChronikClient {
    http: reqwest::Client,
    endpoints: RwLock<Vec<EndpointState>>,
    stats: Mutex<AdapterStats>,
    config: RetryConfig,
}

impl ChronikClient {
    pub fn new(urls: Vec<String>, config: RetryConfig) -> WalletResult<Self> {
        if urls.is_empty() {
            return Err(WalletError::network(
                NetworkErrorKind::Protocol,
                "",
                "no indexer endpoints configured",
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.attempt_timeout_ms))
            .build()
            .map_err(|e| {
                WalletError::network(NetworkErrorKind::Protocol, "", format!("http client: {e}"))
            })?;
        let endpoints = urls
            .into_iter()
            .map(|url| EndpointState::new(url.trim_end_matches('/').to_string()))
            .collect();
        Ok(Self {
            http,
            endpoints: RwLock::new(endpoints),
            stats: Mutex::new(AdapterStats::default()),
            config,
        })
    }

    pub async fn stats(&self) -> AdapterStats {
        self.stats.lock().await.clone()
    }

    pub async fn endpoint_states(&self) -> Vec<EndpointState> {
        self.endpoints.read().await.clone()
    }

    /// Endpoints ranked by (health desc, latency asc), keeping only healthy
    /// ones. When nothing qualifies the first configured endpoint is used.
    async fn ranked_endpoints(&self) -> Vec<String> {
        let endpoints = self.endpoints.read().await;
        let mut ranked: Vec<&EndpointState> = endpoints
            .iter()
            .filter(|e| e.health_score > HEALTHY_SCORE_FLOOR)
            .collect();
        ranked.sort_by(|a, b| {
            b.health_score
                .total_cmp(&a.health_score)
                .then(a.avg_latency_ms().total_cmp(&b.avg_latency_ms()))
        });
        if ranked.is_empty() {
            return vec![endpoints[0].url.clone()];
        }
        ranked.iter().map(|e| e.url.clone()).collect()
    }

    async fn record_outcome(&self, url: &str, outcome: Result<f64, NetworkErrorKind>) {
        {
            let mut endpoints = self.endpoints.write().await;
            if let Some(endpoint) = endpoints.iter_mut().find(|e| e.url == url) {
                match outcome {
                    Ok(latency_ms) => endpoint.record_success(latency_ms),
                    Err(_) => endpoint.record_failure(),
                }
            }
        }
        let mut stats = self.stats.lock().await;
        match outcome {
            Ok(latency_ms) => {
                stats.latency_sum_ms += latency_ms;
                stats.latency_samples += 1;
            }
            Err(kind) => {
                *stats.error_counts.entry(kind.code()).or_insert(0) += 1;
            }
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        url: &str,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, (NetworkErrorKind, String)> {
        let full = format!("{url}{path}");
        let request = match body {
            Some(json) => self.http.post(&full).json(json),
            None => self.http.get(&full),
        };
        let response = request
            .send()
            .await
            .map_err(|e| (classify_transport(&e), e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err((classify_status(status.as_u16(), &text), text));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| (NetworkErrorKind::Protocol, format!("malformed response: {e}")))
    }

    /// Retry/failover loop implementing the §4.1 decision table.
    async fn request<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> WalletResult<T> {
        {
            let mut stats = self.stats.lock().await;
            stats.request_count += 1;
        }

        let ranked = self.ranked_endpoints().await;
        let max_attempts = {
            let endpoints = self.endpoints.read().await;
            (endpoints.len() as u32) * self.config.max_retries
        };

        let mut endpoint_cursor = 0usize;
        let mut retries_for_kind: HashMap<&'static str, u32> = HashMap::new();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let url = ranked[endpoint_cursor % ranked.len()].clone();
            let started = Instant::now();
            match self.execute::<T>(&url, path, body).await {
                Ok(value) => {
                    let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
                    self.record_outcome(&url, Ok(latency_ms)).await;
                    return Ok(value);
                }
                Err((kind, message)) => {
                    self.record_outcome(&url, Err(kind)).await;
                    let decision = retry_decision(kind);
                    let kind_retries = retries_for_kind.entry(kind.code()).or_insert(0);
                    let capped_out = decision
                        .retry_cap
                        .is_some_and(|cap| *kind_retries >= cap);
                    if !decision.retry || capped_out || attempt >= max_attempts {
                        warn!("giving up on {path} after {attempt} attempts: {kind} ({message})");
                        return Err(WalletError::network(kind, url, message));
                    }
                    *kind_retries += 1;

                    if decision.failover {
                        endpoint_cursor += 1;
                        let mut stats = self.stats.lock().await;
                        stats.failover_count += 1;
                    }

                    let jitter = rand::rng().random_range(0.0..0.1);
                    let delay = backoff_delay(attempt, decision.delay_multiplier, &self.config, jitter);
                    debug!(
                        "attempt {attempt}/{max_attempts} for {path} failed with {kind}; retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn health_check_round(&self) {
        let urls: Vec<String> = {
            let endpoints = self.endpoints.read().await;
            endpoints.iter().map(|e| e.url.clone()).collect()
        };
        let probes = urls.into_iter().map(|url| async move {
            let started = Instant::now();
            let outcome = self
                .http
                .get(format!("{url}/blockchain-info"))
                .timeout(Duration::from_millis(self.config.health_check_timeout_ms))
                .send()
                .await;
            match &outcome {
                Ok(response) if response.status().is_success() => {
                    let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
                    (url, Ok(latency_ms))
                }
                Ok(response) => (url, Err(classify_status(response.status().as_u16(), ""))),
                Err(e) => (url, Err(classify_transport(e))),
            }
        });
        for (url, outcome) in join_all(probes).await {
            if let Err(kind) = outcome {
                warn!("health check failed for {url}: {kind}");
            }
            self.record_outcome(&url, outcome).await;
        }
    }
}

/// Handle to the background endpoint health-check loop.
pub struct HealthCheckTask {
    pub handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl HealthCheckTask {
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Spawns the 30 s health-check loop. The task exits cleanly when the
/// returned handle signals shutdown.
pub fn start_health_checks(client: Arc<ChronikClient>) -> HealthCheckTask {
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let interval_ms = client.config.health_check_interval_ms;
    let handle = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_millis(interval_ms));
        loop {
            tokio::select! {
                _ = ticker.tick() => client.health_check_round().await,
                _ = shutdown_rx.changed() => {
                    info!("stopping endpoint health checks");
                    break;
                }
            }
        }
    });
    HealthCheckTask { handle, shutdown }
}

#[derive(Deserialize)]
struct ChainTipDto {
    tip_hash: String,
    tip_height: i32,
}

#[derive(Deserialize)]
struct TokenEntryDto {
    token_id: String,
    #[serde(deserialize_with = "common::model::serde_atoms::deserialize")]
    atoms: u128,
    protocol: String,
    #[serde(default)]
    token_type: u8,
}

fn default_block_height() -> i32 {
    -1
}

#[derive(Deserialize)]
struct UtxoDto {
    txid: String,
    out_idx: u32,
    #[serde(deserialize_with = "common::model::serde_sats::deserialize")]
    sats: u64,
    #[serde(default = "default_block_height")]
    block_height: i32,
    #[serde(default)]
    is_coinbase: bool,
    output_script: String,
    #[serde(default)]
    token: Option<TokenEntryDto>,
}

impl UtxoDto {
    fn into_utxo(self) -> WalletResult<Utxo> {
        let txid: TxId = self.txid.parse()?;
        let script = hex::decode(&self.output_script).map_err(|e| {
            WalletError::InvalidUtxoStructure(format!("output script is not hex: {e}"))
        })?;
        let token = match self.token {
            Some(entry) => Some(TokenData::new(
                entry.token_id.parse()?,
                entry.atoms,
                TokenProtocol::parse(&entry.protocol)?,
                entry.token_type,
            )),
            None => None,
        };
        Ok(Utxo::new(
            Outpoint::new(txid, self.out_idx),
            self.sats,
            self.block_height,
            script,
            self.is_coinbase,
            token,
        ))
    }
}

#[derive(Deserialize)]
struct UtxoListDto {
    utxos: Vec<UtxoDto>,
}

#[derive(Deserialize)]
struct TokenTypeDto {
    protocol: String,
    #[serde(rename = "type", default)]
    type_code: u8,
}

#[derive(Deserialize)]
struct GenesisInfoDto {
    #[serde(default)]
    token_ticker: String,
    #[serde(default)]
    token_name: String,
    #[serde(default)]
    decimals: u8,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    auth_pubkey: Option<String>,
}

#[derive(Deserialize)]
struct TokenInfoDto {
    token_id: String,
    token_type: TokenTypeDto,
    genesis_info: GenesisInfoDto,
    #[serde(default)]
    time_first_seen: i64,
}

#[derive(Deserialize)]
struct BroadcastDto {
    txid: String,
}

#[async_trait]
impl Indexer for ChronikClient {
    async fn blockchain_info(&self) -> WalletResult<ChainTip> {
        let dto: ChainTipDto = self.request("/blockchain-info", None).await?;
        Ok(ChainTip {
            hash: dto.tip_hash,
            height: dto.tip_height,
        })
    }

    async fn utxos_by_address(&self, address: &Address) -> WalletResult<Vec<Utxo>> {
        let path = format!("/address/{address}/utxos");
        let dto: UtxoListDto = self.request(&path, None).await?;
        let mut utxos = Vec::with_capacity(dto.utxos.len());
        for entry in dto.utxos {
            match entry.into_utxo() {
                Ok(utxo) => utxos.push(utxo),
                Err(e) => warn!("skipping malformed UTXO from indexer: {e}"),
            }
        }
        debug!("fetched {} UTXOs for {address}", utxos.len());
        Ok(utxos)
    }

    async fn token_info(&self, token_id: &TokenId) -> WalletResult<TokenInfo> {
        let path = format!("/token/{token_id}");
        let dto: TokenInfoDto = self.request(&path, None).await?;
        Ok(TokenInfo {
            token_id: dto.token_id.parse()?,
            protocol: TokenProtocol::parse(&dto.token_type.protocol)?,
            token_type: dto.token_type.type_code,
            genesis: TokenGenesisInfo {
                ticker: dto.genesis_info.token_ticker,
                name: dto.genesis_info.token_name,
                decimals: dto.genesis_info.decimals,
                url: dto.genesis_info.url,
                auth_pubkey: dto.genesis_info.auth_pubkey,
            },
            time_first_seen: dto.time_first_seen,
        })
    }

    async fn broadcast_tx(&self, raw_tx: &[u8]) -> WalletResult<TxId> {
        let body = serde_json::json!({ "raw_tx": hex::encode(raw_tx) });
        let dto: BroadcastDto = self.request("/broadcast-tx", Some(&body)).await?;
        dto.txid.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_raises_score_and_failure_lowers_it() {
        let mut endpoint = EndpointState::new("https://a".to_string());
        endpoint.health_score = 50.0;

        endpoint.record_success(12.0);
        assert_eq!(endpoint.health_score, 60.0);
        assert_eq!(endpoint.consecutive_failures, 0);

        endpoint.record_failure();
        assert_eq!(endpoint.health_score, 50.0); // -min(30, 1*10)
        endpoint.record_failure();
        assert_eq!(endpoint.health_score, 30.0); // -min(30, 2*10)
        endpoint.record_failure();
        endpoint.record_failure();
        assert_eq!(endpoint.health_score, 0.0); // floored

        endpoint.record_success(8.0);
        assert_eq!(endpoint.health_score, 10.0);
        assert_eq!(endpoint.consecutive_failures, 0);
    }

    #[test]
    fn score_caps_at_100_and_latency_window_slides() {
        let mut endpoint = EndpointState::new("https://a".to_string());
        for i in 0..20 {
            endpoint.record_success(i as f64);
        }
        assert_eq!(endpoint.health_score, 100.0);
        assert_eq!(endpoint.latencies_ms.len(), LATENCY_WINDOW);
        // Only the last ten samples remain: 10..=19.
        assert_eq!(endpoint.avg_latency_ms(), 14.5);
    }

    #[tokio::test]
    async fn ranking_prefers_health_then_latency_and_filters_unhealthy() {
        let client = ChronikClient::new(
            vec![
                "https://a".to_string(),
                "https://b".to_string(),
                "https://c".to_string(),
            ],
            RetryConfig::default(),
        )
        .unwrap();
        {
            let mut endpoints = client.endpoints.write().await;
            endpoints[0].health_score = 90.0;
            endpoints[0].latencies_ms = VecDeque::from(vec![50.0]);
            endpoints[1].health_score = 90.0;
            endpoints[1].latencies_ms = VecDeque::from(vec![10.0]);
            endpoints[2].health_score = 5.0; // unhealthy
        }
        let ranked = client.ranked_endpoints().await;
        assert_eq!(ranked, vec!["https://b", "https://a"]);
    }

    #[tokio::test]
    async fn ranking_falls_back_to_first_configured_endpoint() {
        let client = ChronikClient::new(
            vec!["https://a".to_string(), "https://b".to_string()],
            RetryConfig::default(),
        )
        .unwrap();
        {
            let mut endpoints = client.endpoints.write().await;
            for endpoint in endpoints.iter_mut() {
                endpoint.health_score = 0.0;
            }
        }
        assert_eq!(client.ranked_endpoints().await, vec!["https://a"]);
    }

    #[test]
    fn status_classification_covers_the_taxonomy() {
        assert_eq!(classify_status(429, ""), NetworkErrorKind::RateLimited);
        assert_eq!(classify_status(504, ""), NetworkErrorKind::Timeout);
        assert_eq!(
            classify_status(503, "chronik is still indexing"),
            NetworkErrorKind::ServerIndexing
        );
        assert_eq!(
            classify_status(503, "maintenance"),
            NetworkErrorKind::ServerUnavailable
        );
        assert_eq!(
            classify_status(500, "boom"),
            NetworkErrorKind::ServerUnavailable
        );
        assert_eq!(classify_status(404, ""), NetworkErrorKind::Protocol);
        assert_eq!(classify_status(400, ""), NetworkErrorKind::Protocol);
    }

    #[test]
    fn retry_decision_table() {
        for kind in [
            NetworkErrorKind::Timeout,
            NetworkErrorKind::ConnectionRefused,
            NetworkErrorKind::ServerUnavailable,
        ] {
            let decision = retry_decision(kind);
            assert!(decision.retry && decision.failover);
        }
        let rate_limited = retry_decision(NetworkErrorKind::RateLimited);
        assert!(rate_limited.retry);
        assert_eq!(rate_limited.delay_multiplier, 3.0);
        let indexing = retry_decision(NetworkErrorKind::ServerIndexing);
        assert_eq!(indexing.retry_cap, Some(1));
        assert_eq!(indexing.delay_multiplier, 5.0);
        assert!(!retry_decision(NetworkErrorKind::Protocol).retry);
    }

    #[test]
    fn backoff_grows_exponentially_and_caps_at_30s() {
        let config = RetryConfig::default();
        let d1 = backoff_delay(1, 1.5, &config, 0.0);
        let d2 = backoff_delay(2, 1.5, &config, 0.0);
        let d3 = backoff_delay(3, 1.5, &config, 0.0);
        assert_eq!(d1.as_millis(), 1_500);
        assert_eq!(d2.as_millis(), 3_000);
        assert_eq!(d3.as_millis(), 6_000);
        let capped = backoff_delay(12, 3.0, &config, 0.09);
        assert_eq!(capped.as_millis(), 30_000);
    }

    #[test]
    fn utxo_dto_normalizes_string_amounts() {
        let json = r#"{
            "txid": "1111111111111111111111111111111111111111111111111111111111111111",
            "out_idx": 2,
            "sats": "100000",
            "block_height": 800000,
            "output_script": "76a914000000000000000000000000000000000000000088ac",
            "token": {
                "token_id": "2222222222222222222222222222222222222222222222222222222222222222",
                "atoms": "12345678901234567890",
                "protocol": "ALP"
            }
        }"#;
        let dto: UtxoDto = serde_json::from_str(json).unwrap();
        let utxo = dto.into_utxo().unwrap();
        assert_eq!(utxo.sats, 100_000);
        assert_eq!(utxo.outpoint.index, 2);
        let token = utxo.token.unwrap();
        assert_eq!(token.atoms, 12_345_678_901_234_567_890);
        assert_eq!(token.protocol, TokenProtocol::Alp);
    }

    #[test]
    fn utxo_dto_rejects_unknown_protocol() {
        let json = r#"{
            "txid": "1111111111111111111111111111111111111111111111111111111111111111",
            "out_idx": 0,
            "sats": 546,
            "output_script": "6a",
            "token": {
                "token_id": "2222222222222222222222222222222222222222222222222222222222222222",
                "atoms": 1,
                "protocol": "NFT1"
            }
        }"#;
        let dto: UtxoDto = serde_json::from_str(json).unwrap();
        let err = dto.into_utxo().unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_PROTOCOL");
    }
}
