use async_trait::async_trait;
use common::address::Address;
use common::errors::WalletResult;
use common::model::{TokenId, TokenProtocol, TxId, Utxo};

/// Current chain tip as reported by the indexer.
#[derive(Clone, Debug)]
pub struct ChainTip {
    pub hash: String,
    pub height: i32,
}

#[derive(Clone, Debug, Default)]
pub struct TokenGenesisInfo {
    pub ticker: String,
    pub name: String,
    pub decimals: u8,
    pub url: Option<String>,
    pub auth_pubkey: Option<String>,
}

#[derive(Clone, Debug)]
pub struct TokenInfo {
    pub token_id: TokenId,
    pub protocol: TokenProtocol,
    pub token_type: u8,
    pub genesis: TokenGenesisInfo,
    pub time_first_seen: i64,
}

/// The narrow interface the engine consumes from an indexer. Everything
/// network-facing sits behind this seam so the store, token engine and
/// consolidation planner are testable against in-process fakes.
#[async_trait]
pub trait Indexer: Send + Sync {
    async fn blockchain_info(&self) -> WalletResult<ChainTip>;

    async fn utxos_by_address(&self, address: &Address) -> WalletResult<Vec<Utxo>>;

    async fn token_info(&self, token_id: &TokenId) -> WalletResult<TokenInfo>;

    async fn broadcast_tx(&self, raw_tx: &[u8]) -> WalletResult<TxId>;
}
