mod alp;
mod slp;

use crate::builder::{BuiltTransaction, TransactionBuilder};
use crate::coin_selection::estimate_fee;
use crate::config::{DUST_LIMIT, MAX_TOKEN_RECIPIENTS};
use crate::indexer::{Indexer, TokenGenesisInfo, TokenInfo};
use crate::protocol::{TokenFilterResult, filter_for_token, inventory};
use common::address::Address;
use common::errors::{WalletError, WalletResult};
use common::model::{TokenId, TokenProtocol, Utxo};
use log::{debug, warn};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;

const METADATA_CACHE_SIZE: usize = 256;

#[derive(Clone, Debug)]
pub struct TokenRecipient {
    pub address: Address,
    pub atoms: u128,
}

impl TokenRecipient {
    pub fn new(address: Address, atoms: u128) -> Self {
        Self { address, atoms }
    }
}

/// Display balance of one token, enriched with genesis metadata where the
/// lookup succeeded.
#[derive(Clone, Debug)]
pub struct TokenBalance {
    pub token_id: TokenId,
    /// `None` when the protocol could not be determined.
    pub protocol: Option<TokenProtocol>,
    pub ticker: String,
    pub name: String,
    pub decimals: u8,
    pub utxo_count: usize,
    pub atoms: u128,
    pub display: String,
}

/// `display = atoms / 10^decimals`, rendered exactly.
pub fn atoms_to_display(atoms: u128, decimals: u8) -> String {
    if decimals == 0 {
        return atoms.to_string();
    }
    let scale = 10u128.pow(decimals as u32);
    let integer = atoms / scale;
    let fraction = atoms % scale;
    if fraction == 0 {
        return integer.to_string();
    }
    let digits = format!("{fraction:0width$}", width = decimals as usize);
    format!("{integer}.{}", digits.trim_end_matches('0'))
}

/// `atoms = floor(display * 10^decimals)`; extra fractional digits are
/// truncated, anything non-numeric is rejected.
pub fn display_to_atoms(display: &str, decimals: u8) -> WalletResult<u128> {
    let invalid =
        || WalletError::InvalidUtxoStructure(format!("invalid token amount {display:?}"));
    let (integer_part, fraction_part) = match display.split_once('.') {
        Some((i, f)) => (i, f),
        None => (display, ""),
    };
    if integer_part.is_empty() && fraction_part.is_empty() {
        return Err(invalid());
    }
    if !integer_part.chars().all(|c| c.is_ascii_digit())
        || !fraction_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }
    let scale = 10u128.pow(decimals as u32);
    let integer: u128 = if integer_part.is_empty() {
        0
    } else {
        integer_part.parse().map_err(|_| invalid())?
    };
    let truncated: String = fraction_part.chars().take(decimals as usize).collect();
    let fraction: u128 = if truncated.is_empty() {
        0
    } else {
        let padded = format!("{truncated:0<width$}", width = decimals as usize);
        padded.parse().map_err(|_| invalid())?
    };
    integer
        .checked_mul(scale)
        .and_then(|v| v.checked_add(fraction))
        .ok_or_else(invalid)
}

/// How leftover plain sats are treated after dust outputs and fee.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ChangePolicy {
    /// SLP: a change output below the dust limit is suppressed.
    SuppressBelowDust,
    /// ALP: a change output is emitted whenever it is strictly positive.
    EmitIfPositive,
}

/// Greedy atom-descending token input selection.
pub(crate) fn select_token_inputs(
    filtered: &TokenFilterResult,
    required_atoms: u128,
    info: &TokenInfo,
) -> WalletResult<(Vec<Utxo>, u128)> {
    let mut sorted = filtered.token_utxos.clone();
    sorted.sort_by(|a, b| {
        let a_atoms = a.token.as_ref().map(|t| t.atoms).unwrap_or(0);
        let b_atoms = b.token.as_ref().map(|t| t.atoms).unwrap_or(0);
        b_atoms.cmp(&a_atoms).then(a.outpoint.cmp(&b.outpoint))
    });

    let mut selected = Vec::new();
    let mut total: u128 = 0;
    for utxo in sorted {
        if total >= required_atoms {
            // When change atoms remain, a single token input is avoided so
            // the change output never rides alone on one parent coin.
            if total == required_atoms || selected.len() > 1 {
                break;
            }
        }
        total += utxo.token.as_ref().map(|t| t.atoms).unwrap_or(0);
        selected.push(utxo);
    }
    if total < required_atoms {
        return Err(WalletError::InsufficientToken {
            ticker: info.genesis.ticker.clone(),
            need: atoms_to_display(required_atoms, info.genesis.decimals),
            have: atoms_to_display(filtered.total_atoms, info.genesis.decimals),
        });
    }
    Ok((selected, total - required_atoms))
}

/// Covers dust outputs plus fee from the selected token inputs' own dust,
/// adding plain UTXOs largest-first until the budget closes. The fee is
/// recomputed after every added input.
pub(crate) fn fund_fee(
    token_input_count: usize,
    n_dust_outputs: usize,
    fee_candidates: &[Utxo],
    fee_rate: f64,
    extra_overhead: usize,
    policy: ChangePolicy,
) -> WalletResult<(Vec<Utxo>, u64, u64)> {
    let dust_total = n_dust_outputs as u64 * DUST_LIMIT;
    let token_dust = token_input_count as u64 * DUST_LIMIT;

    let mut extras: Vec<Utxo> = Vec::new();
    let mut plain_total: u64 = 0;
    let mut candidates = fee_candidates.iter();
    loop {
        let n_inputs = token_input_count + extras.len();
        // The carrier plus every dust output, plus a plain change output
        // once plain funds are involved.
        let n_outputs = 1 + n_dust_outputs + usize::from(plain_total > 0);
        let fee = estimate_fee(n_inputs, n_outputs, fee_rate, extra_overhead);

        if token_dust + plain_total >= dust_total + fee {
            let plain_change = plain_total
                .saturating_sub(dust_total)
                .saturating_sub(fee);
            let plain_change = match policy {
                ChangePolicy::SuppressBelowDust if plain_change < DUST_LIMIT => 0,
                _ => plain_change,
            };
            return Ok((extras, fee, plain_change));
        }

        match candidates.next() {
            Some(utxo) => {
                plain_total += utxo.sats;
                extras.push(utxo.clone());
            }
            None => {
                return Err(WalletError::InsufficientXec {
                    need_sats: dust_total + fee,
                    have_sats: token_dust + plain_total,
                });
            }
        }
    }
}

pub(crate) fn check_recipient_cap(count: usize) -> WalletResult<()> {
    if count > MAX_TOKEN_RECIPIENTS {
        return Err(WalletError::TooManyRecipients {
            count,
            max: MAX_TOKEN_RECIPIENTS,
        });
    }
    Ok(())
}

/// Splits the non-target UTXOs into pure plain coins and coins carrying
/// some other token. SLP fee funding must never touch the latter.
pub(crate) fn split_fee_candidates(other_utxos: &[Utxo]) -> (Vec<Utxo>, Vec<Utxo>) {
    let mut plain: Vec<Utxo> = other_utxos
        .iter()
        .filter(|u| !u.has_token())
        .cloned()
        .collect();
    plain.sort_by(|a, b| b.sats.cmp(&a.sats).then(a.outpoint.cmp(&b.outpoint)));
    let other_token: Vec<Utxo> = other_utxos
        .iter()
        .filter(|u| u.has_token())
        .cloned()
        .collect();
    (plain, other_token)
}

/// Protocol-dispatching token engine. Caches genesis metadata by token id
/// for the lifetime of the process.
pub struct TokenManager<C: Indexer> {
    indexer: Arc<C>,
    metadata_cache: Mutex<LruCache<TokenId, TokenInfo>>,
}

impl<C: Indexer> TokenManager<C> {
    pub fn new(indexer: Arc<C>) -> Self {
        Self {
            indexer,
            metadata_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(METADATA_CACHE_SIZE).expect("nonzero cache size"),
            )),
        }
    }

    pub async fn token_info(&self, token_id: &TokenId) -> WalletResult<TokenInfo> {
        {
            let mut cache = self.metadata_cache.lock().await;
            if let Some(info) = cache.get(token_id) {
                return Ok(info.clone());
            }
        }
        let info = self.indexer.token_info(token_id).await?;
        let mut cache = self.metadata_cache.lock().await;
        cache.put(*token_id, info.clone());
        Ok(info)
    }

    pub async fn clear_metadata_cache(&self) {
        self.metadata_cache.lock().await.clear();
    }

    /// Metadata for building: prefers the indexer, falls back to what the
    /// UTXOs themselves carry so sends keep working while the lookup is
    /// unavailable.
    async fn resolve_info(
        &self,
        token_id: &TokenId,
        filtered: &TokenFilterResult,
    ) -> WalletResult<TokenInfo> {
        match self.token_info(token_id).await {
            Ok(info) => {
                if let Some(derived) = filtered.protocol {
                    if derived != info.protocol {
                        return Err(WalletError::WrongProtocolForToken {
                            token_id: token_id.to_string(),
                            requested: info.protocol.to_string(),
                            actual: derived.to_string(),
                        });
                    }
                }
                Ok(info)
            }
            Err(lookup_err) => {
                let Some(protocol) = filtered.protocol else {
                    return Err(lookup_err);
                };
                warn!("token metadata lookup failed for {token_id}: {lookup_err}");
                let token_type = filtered
                    .token_utxos
                    .first()
                    .and_then(|u| u.token.as_ref())
                    .map(|t| t.token_type)
                    .unwrap_or_default();
                Ok(TokenInfo {
                    token_id: *token_id,
                    protocol,
                    token_type,
                    genesis: TokenGenesisInfo {
                        ticker: "UNKNOWN".to_string(),
                        ..TokenGenesisInfo::default()
                    },
                    time_first_seen: 0,
                })
            }
        }
    }

    /// Sends `recipients` their atom amounts, funding dust and fee from the
    /// wallet's plain coins.
    pub async fn send(
        &self,
        builder: &TransactionBuilder,
        utxos: &[Utxo],
        token_id: &TokenId,
        recipients: &[TokenRecipient],
        fee_rate: f64,
    ) -> WalletResult<BuiltTransaction> {
        check_recipient_cap(recipients.len())?;
        let filtered = filter_for_token(utxos, token_id);
        let info = self.resolve_info(token_id, &filtered).await?;
        debug!(
            "token send of {} recipients via {}",
            recipients.len(),
            info.protocol
        );
        match info.protocol {
            TokenProtocol::Slp => slp::build_send(builder, &info, &filtered, recipients, fee_rate),
            TokenProtocol::Alp => alp::build_send(builder, &info, &filtered, recipients, fee_rate),
        }
    }

    /// Burns `atoms` of the given token.
    pub async fn burn(
        &self,
        builder: &TransactionBuilder,
        utxos: &[Utxo],
        token_id: &TokenId,
        atoms: u128,
        fee_rate: f64,
    ) -> WalletResult<BuiltTransaction> {
        let filtered = filter_for_token(utxos, token_id);
        let info = self.resolve_info(token_id, &filtered).await?;
        debug!("token burn of {atoms} atoms via {}", info.protocol);
        match info.protocol {
            TokenProtocol::Slp => slp::build_burn(builder, &info, &filtered, atoms, fee_rate),
            TokenProtocol::Alp => alp::build_burn(builder, &info, &filtered, atoms, fee_rate),
        }
    }

    /// Display balances for every token present in the UTXO set.
    pub async fn list_tokens(&self, utxos: &[Utxo]) -> Vec<TokenBalance> {
        let mut balances = Vec::new();
        for entry in inventory(utxos) {
            let (ticker, name, decimals) = match self.token_info(&entry.token_id).await {
                Ok(info) => (info.genesis.ticker, info.genesis.name, info.genesis.decimals),
                Err(e) => {
                    warn!("metadata lookup failed for {}: {e}", entry.token_id);
                    ("UNKNOWN".to_string(), String::new(), 0)
                }
            };
            balances.push(TokenBalance {
                token_id: entry.token_id,
                protocol: Some(entry.protocol),
                ticker,
                name,
                decimals,
                utxo_count: entry.utxo_count,
                atoms: entry.total_atoms,
                display: atoms_to_display(entry.total_atoms, decimals),
            });
        }
        balances
    }

    /// Balance of one token id; a zero record is returned even when the
    /// wallet holds none of it.
    pub async fn balance(&self, token_id: &TokenId, utxos: &[Utxo]) -> TokenBalance {
        let filtered = filter_for_token(utxos, token_id);
        let info = self.token_info(token_id).await;
        let (protocol, ticker, name, decimals) = match &info {
            Ok(info) => (
                Some(info.protocol),
                info.genesis.ticker.clone(),
                info.genesis.name.clone(),
                info.genesis.decimals,
            ),
            Err(_) => (filtered.protocol, "UNKNOWN".to_string(), String::new(), 0),
        };
        TokenBalance {
            token_id: *token_id,
            protocol,
            ticker,
            name,
            decimals,
            utxo_count: filtered.token_utxos.len(),
            atoms: filtered.total_atoms,
            display: atoms_to_display(filtered.total_atoms, decimals),
        }
    }
}
