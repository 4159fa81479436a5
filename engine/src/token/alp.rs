use super::{ChangePolicy, TokenRecipient, fund_fee, select_token_inputs, split_fee_candidates};
use crate::builder::{BuiltTransaction, TransactionBuilder};
use crate::config::{DUST_LIMIT, EMPP_FEE_SURCHARGE};
use crate::indexer::TokenInfo;
use crate::protocol::TokenFilterResult;
use common::errors::{WalletError, WalletResult};
use common::model::Utxo;
use common::token_payload::{alp_burn, alp_send, empp_script};
use common::tx::TxOutput;

fn require_positive(atoms: u128) -> WalletResult<()> {
    if atoms == 0 {
        return Err(WalletError::InvalidUtxoStructure(
            "token amount must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Fee candidates for ALP: plain coins first, then other tokens' dust.
fn fee_candidates(other_utxos: &[Utxo]) -> Vec<Utxo> {
    let (plain, other_token) = split_fee_candidates(other_utxos);
    plain.into_iter().chain(other_token).collect()
}

/// ALP SEND: an eMPP carrier whose amounts mirror outputs 1..k.
pub(super) fn build_send(
    builder: &TransactionBuilder,
    info: &TokenInfo,
    filtered: &TokenFilterResult,
    recipients: &[TokenRecipient],
    fee_rate: f64,
) -> WalletResult<BuiltTransaction> {
    let mut required: u128 = 0;
    for recipient in recipients {
        require_positive(recipient.atoms)?;
        required += recipient.atoms;
    }
    let (token_inputs, change_atoms) = select_token_inputs(filtered, required, info)?;

    let mut carrier_atoms: Vec<u128> = recipients.iter().map(|r| r.atoms).collect();
    if change_atoms > 0 {
        carrier_atoms.push(change_atoms);
    }
    let carrier = empp_script(&[alp_send(info.token_type, &info.token_id, &carrier_atoms)?])?;

    let n_dust_outputs = recipients.len() + usize::from(change_atoms > 0);
    let (fee_inputs, _fee, plain_change) = fund_fee(
        token_inputs.len(),
        n_dust_outputs,
        &fee_candidates(&filtered.other_utxos),
        fee_rate,
        EMPP_FEE_SURCHARGE,
        ChangePolicy::EmitIfPositive,
    )?;

    let mut outputs = vec![TxOutput::new(0, carrier)];
    for recipient in recipients {
        outputs.push(TxOutput::new(DUST_LIMIT, recipient.address.to_script()));
    }
    if change_atoms > 0 {
        outputs.push(TxOutput::new(
            DUST_LIMIT,
            builder.keys().address().to_script(),
        ));
    }
    if plain_change > 0 {
        outputs.push(TxOutput::new(
            plain_change,
            builder.keys().address().to_script(),
        ));
    }

    let inputs: Vec<Utxo> = token_inputs.into_iter().chain(fee_inputs).collect();
    builder.assemble(&inputs, outputs)
}

/// ALP burn is always explicit: the carrier names `burn_atoms`, and any
/// change atoms ride in an accompanying SEND section.
pub(super) fn build_burn(
    builder: &TransactionBuilder,
    info: &TokenInfo,
    filtered: &TokenFilterResult,
    burn_atoms: u128,
    fee_rate: f64,
) -> WalletResult<BuiltTransaction> {
    require_positive(burn_atoms)?;
    let (token_inputs, change_atoms) = select_token_inputs(filtered, burn_atoms, info)?;

    let mut payloads = vec![alp_burn(info.token_type, &info.token_id, burn_atoms)?];
    if change_atoms > 0 {
        payloads.push(alp_send(info.token_type, &info.token_id, &[change_atoms])?);
    }
    let carrier = empp_script(&payloads)?;

    let n_dust_outputs = usize::from(change_atoms > 0);
    let (fee_inputs, _fee, plain_change) = fund_fee(
        token_inputs.len(),
        n_dust_outputs,
        &fee_candidates(&filtered.other_utxos),
        fee_rate,
        EMPP_FEE_SURCHARGE,
        ChangePolicy::EmitIfPositive,
    )?;

    let mut outputs = vec![TxOutput::new(0, carrier)];
    if change_atoms > 0 {
        outputs.push(TxOutput::new(
            DUST_LIMIT,
            builder.keys().address().to_script(),
        ));
    }
    if plain_change > 0 {
        outputs.push(TxOutput::new(
            plain_change,
            builder.keys().address().to_script(),
        ));
    }

    let inputs: Vec<Utxo> = token_inputs.into_iter().chain(fee_inputs).collect();
    builder.assemble(&inputs, outputs)
}
