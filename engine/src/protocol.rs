use common::model::{TokenId, TokenProtocol, Utxo};
use std::collections::HashMap;

/// Protocol family of a single UTXO.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UtxoProtocol {
    Plain,
    Slp,
    Alp,
}

/// Classifies one UTXO. Unknown protocol tags are rejected upstream when
/// the indexer payload is decoded, so detection itself is total.
pub fn detect(utxo: &Utxo) -> UtxoProtocol {
    match &utxo.token {
        None => UtxoProtocol::Plain,
        Some(token) => match token.protocol {
            TokenProtocol::Slp => UtxoProtocol::Slp,
            TokenProtocol::Alp => UtxoProtocol::Alp,
        },
    }
}

#[derive(Clone, Debug, Default)]
pub struct CategorySummary {
    pub total_utxos: usize,
    pub plain_count: usize,
    pub token_count: usize,
    pub plain_sats: u128,
    pub token_carried_sats: u128,
    pub atoms_by_token: HashMap<TokenId, u128>,
}

#[derive(Clone, Debug, Default)]
pub struct CategorizedUtxos {
    pub plain: Vec<Utxo>,
    pub by_token_id: HashMap<TokenId, Vec<Utxo>>,
    pub by_protocol: HashMap<TokenProtocol, Vec<Utxo>>,
    pub summary: CategorySummary,
}

/// Splits a UTXO set by protocol and token id in a single pass.
pub fn categorize(utxos: &[Utxo]) -> CategorizedUtxos {
    let mut result = CategorizedUtxos {
        summary: CategorySummary {
            total_utxos: utxos.len(),
            ..CategorySummary::default()
        },
        ..CategorizedUtxos::default()
    };
    for utxo in utxos {
        match &utxo.token {
            None => {
                result.summary.plain_count += 1;
                result.summary.plain_sats += utxo.sats as u128;
                result.plain.push(utxo.clone());
            }
            Some(token) => {
                result.summary.token_count += 1;
                result.summary.token_carried_sats += utxo.sats as u128;
                *result.summary.atoms_by_token.entry(token.token_id).or_insert(0) += token.atoms;
                result
                    .by_token_id
                    .entry(token.token_id)
                    .or_default()
                    .push(utxo.clone());
                result
                    .by_protocol
                    .entry(token.protocol)
                    .or_default()
                    .push(utxo.clone());
            }
        }
    }
    result
}

#[derive(Clone, Debug)]
pub struct TokenFilterResult {
    pub token_utxos: Vec<Utxo>,
    pub other_utxos: Vec<Utxo>,
    /// `None` when no UTXO carries the requested token.
    pub protocol: Option<TokenProtocol>,
    pub total_atoms: u128,
}

/// Separates the UTXOs of one token from everything else.
pub fn filter_for_token(utxos: &[Utxo], token_id: &TokenId) -> TokenFilterResult {
    let mut result = TokenFilterResult {
        token_utxos: Vec::new(),
        other_utxos: Vec::new(),
        protocol: None,
        total_atoms: 0,
    };
    for utxo in utxos {
        match &utxo.token {
            Some(token) if token.token_id == *token_id => {
                result.protocol.get_or_insert(token.protocol);
                result.total_atoms += token.atoms;
                result.token_utxos.push(utxo.clone());
            }
            _ => result.other_utxos.push(utxo.clone()),
        }
    }
    result
}

#[derive(Clone, Debug)]
pub struct TokenInventoryEntry {
    pub token_id: TokenId,
    pub protocol: TokenProtocol,
    pub utxo_count: usize,
    pub total_atoms: u128,
    /// Lowest confirmed height carrying this token; `-1` when only seen in
    /// the mempool.
    pub first_seen_height: i32,
}

/// Aggregates token holdings per token id, ordered by token id.
pub fn inventory(utxos: &[Utxo]) -> Vec<TokenInventoryEntry> {
    let mut entries: HashMap<TokenId, TokenInventoryEntry> = HashMap::new();
    for utxo in utxos {
        let Some(token) = &utxo.token else { continue };
        let entry = entries
            .entry(token.token_id)
            .or_insert_with(|| TokenInventoryEntry {
                token_id: token.token_id,
                protocol: token.protocol,
                utxo_count: 0,
                total_atoms: 0,
                first_seen_height: i32::MAX,
            });
        entry.utxo_count += 1;
        entry.total_atoms += token.atoms;
        if utxo.is_confirmed() && utxo.block_height < entry.first_seen_height {
            entry.first_seen_height = utxo.block_height;
        }
    }
    let mut list: Vec<TokenInventoryEntry> = entries
        .into_values()
        .map(|mut entry| {
            if entry.first_seen_height == i32::MAX {
                entry.first_seen_height = -1;
            }
            entry
        })
        .collect();
    list.sort_by_key(|entry| entry.token_id);
    list
}
