use crate::errors::{WalletError, WalletResult};
use crate::model::TokenId;
use crate::script::{OP_RESERVED, OP_RETURN, push_slice};

/// Lokad prefix of the SLP carrier ("SLP" followed by a NUL byte).
pub const SLP_LOKAD_ID: [u8; 4] = *b"SLP\0";
/// Lokad prefix of the ALP carrier.
pub const ALP_LOKAD_ID: [u8; 4] = *b"SLP2";

pub const SLP_FUNGIBLE: u8 = 1;
pub const ALP_STANDARD: u8 = 0;

/// ALP atom amounts are 48-bit little-endian fields.
pub const MAX_ALP_ATOMS: u128 = (1 << 48) - 1;

/// SLP SEND carrier: one 8-byte big-endian atom amount per output in the
/// order of outputs 1..k (recipients first, change last).
pub fn slp_send(token_type: u8, token_id: &TokenId, atoms: &[u64]) -> WalletResult<Vec<u8>> {
    if atoms.is_empty() {
        return Err(WalletError::InvalidUtxoStructure(
            "SLP SEND carrier needs at least one amount".to_string(),
        ));
    }
    let mut script = Vec::with_capacity(10 + 6 + 34 + atoms.len() * 9);
    script.push(OP_RETURN);
    push_slice(&mut script, &SLP_LOKAD_ID)?;
    push_slice(&mut script, &[token_type])?;
    push_slice(&mut script, b"SEND")?;
    push_slice(&mut script, token_id.as_bytes())?;
    for &amount in atoms {
        push_slice(&mut script, &amount.to_be_bytes())?;
    }
    Ok(script)
}

/// SLP BURN carrier naming the exact atom amount taken out of circulation.
pub fn slp_burn(token_type: u8, token_id: &TokenId, atoms: u64) -> WalletResult<Vec<u8>> {
    let mut script = Vec::with_capacity(50);
    script.push(OP_RETURN);
    push_slice(&mut script, &SLP_LOKAD_ID)?;
    push_slice(&mut script, &[token_type])?;
    push_slice(&mut script, b"BURN")?;
    push_slice(&mut script, token_id.as_bytes())?;
    push_slice(&mut script, &atoms.to_be_bytes())?;
    Ok(script)
}

fn alp_amount(payload: &mut Vec<u8>, atoms: u128) -> WalletResult<()> {
    if atoms > MAX_ALP_ATOMS {
        return Err(WalletError::InvalidUtxoStructure(format!(
            "atom amount {atoms} exceeds the 48-bit ALP range"
        )));
    }
    payload.extend_from_slice(&(atoms as u64).to_le_bytes()[..6]);
    Ok(())
}

fn alp_header(payload: &mut Vec<u8>, token_type: u8, tx_type: &[u8], token_id: &TokenId) {
    payload.extend_from_slice(&ALP_LOKAD_ID);
    payload.push(token_type);
    payload.push(tx_type.len() as u8);
    payload.extend_from_slice(tx_type);
    // ALP serializes the token id in transaction byte order.
    payload.extend_from_slice(&token_id.to_wire_bytes());
}

/// ALP SEND section: amounts are ordered like the outputs (recipients then
/// change). Returns the raw eMPP payload, not yet wrapped in a script.
pub fn alp_send(token_type: u8, token_id: &TokenId, atoms: &[u128]) -> WalletResult<Vec<u8>> {
    if atoms.is_empty() {
        return Err(WalletError::InvalidUtxoStructure(
            "ALP SEND section needs at least one amount".to_string(),
        ));
    }
    let mut payload = Vec::with_capacity(42 + atoms.len() * 6);
    alp_header(&mut payload, token_type, b"SEND", token_id);
    payload.push(atoms.len() as u8);
    for &amount in atoms {
        alp_amount(&mut payload, amount)?;
    }
    Ok(payload)
}

/// ALP BURN section. Unlike SLP, ALP burns are always explicit.
pub fn alp_burn(token_type: u8, token_id: &TokenId, atoms: u128) -> WalletResult<Vec<u8>> {
    let mut payload = Vec::with_capacity(48);
    alp_header(&mut payload, token_type, b"BURN", token_id);
    alp_amount(&mut payload, atoms)?;
    Ok(payload)
}

/// Wraps eMPP payloads: `OP_RETURN OP_RESERVED <push(payload)>...`
pub fn empp_script(payloads: &[Vec<u8>]) -> WalletResult<Vec<u8>> {
    if payloads.is_empty() {
        return Err(WalletError::InvalidUtxoStructure(
            "eMPP script needs at least one payload".to_string(),
        ));
    }
    let mut script = Vec::with_capacity(2 + payloads.iter().map(|p| p.len() + 2).sum::<usize>());
    script.push(OP_RETURN);
    script.push(OP_RESERVED);
    for payload in payloads {
        push_slice(&mut script, payload)?;
    }
    Ok(script)
}
