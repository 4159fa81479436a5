use super::{ChangePolicy, TokenRecipient, fund_fee, select_token_inputs, split_fee_candidates};
use crate::builder::{BuiltTransaction, TransactionBuilder};
use crate::config::DUST_LIMIT;
use crate::indexer::TokenInfo;
use crate::protocol::TokenFilterResult;
use common::errors::{WalletError, WalletResult};
use common::model::Utxo;
use common::token_payload::{slp_burn, slp_send};
use common::tx::TxOutput;

fn atoms_as_u64(atoms: u128) -> WalletResult<u64> {
    u64::try_from(atoms).map_err(|_| {
        WalletError::InvalidUtxoStructure(format!(
            "atom amount {atoms} exceeds the 64-bit SLP range"
        ))
    })
}

fn require_positive(atoms: u128) -> WalletResult<()> {
    if atoms == 0 {
        return Err(WalletError::InvalidUtxoStructure(
            "token amount must be positive".to_string(),
        ));
    }
    Ok(())
}

/// SLP SEND: carrier amounts list every recipient in output order followed
/// by the change amount. Fee funding never touches other tokens' dust.
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

    let mut carrier_atoms: Vec<u64> = Vec::with_capacity(recipients.len() + 1);
    for recipient in recipients {
        carrier_atoms.push(atoms_as_u64(recipient.atoms)?);
    }
    if change_atoms > 0 {
        carrier_atoms.push(atoms_as_u64(change_atoms)?);
    }
    let carrier = slp_send(info.token_type, &info.token_id, &carrier_atoms)?;

    let n_dust_outputs = recipients.len() + usize::from(change_atoms > 0);
    let (plain_candidates, _other_token) = split_fee_candidates(&filtered.other_utxos);
    let (fee_inputs, _fee, plain_change) = fund_fee(
        token_inputs.len(),
        n_dust_outputs,
        &plain_candidates,
        fee_rate,
        carrier.len(),
        ChangePolicy::SuppressBelowDust,
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

/// SLP burn. A complete burn emits an explicit BURN carrier; a partial
/// burn is a SEND whose only listed amount is the change (burn by
/// omission).
pub(super) fn build_burn(
    builder: &TransactionBuilder,
    info: &TokenInfo,
    filtered: &TokenFilterResult,
    burn_atoms: u128,
    fee_rate: f64,
) -> WalletResult<BuiltTransaction> {
    require_positive(burn_atoms)?;
    let (token_inputs, change_atoms) = select_token_inputs(filtered, burn_atoms, info)?;

    let (carrier, n_dust_outputs) = if change_atoms == 0 {
        let carrier = slp_burn(info.token_type, &info.token_id, atoms_as_u64(burn_atoms)?)?;
        (carrier, 0)
    } else {
        let carrier = slp_send(info.token_type, &info.token_id, &[atoms_as_u64(change_atoms)?])?;
        (carrier, 1)
    };

    let (plain_candidates, _other_token) = split_fee_candidates(&filtered.other_utxos);
    let (fee_inputs, _fee, plain_change) = fund_fee(
        token_inputs.len(),
        n_dust_outputs,
        &plain_candidates,
        fee_rate,
        carrier.len(),
        ChangePolicy::SuppressBelowDust,
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

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{TokenManager, TokenRecipient};
    use super::*;
    use crate::config::MAX_TOKEN_RECIPIENTS;
    use common::address::Address;
    use common::model::TokenProtocol;
    use common::token_payload::{SLP_FUNGIBLE, SLP_LOKAD_ID};
    use std::sync::Arc;

    fn recipient_address() -> Address {
        Address::p2pkh("ecash", [0x44; 20])
    }

    fn manager_with_info(decimals: u8) -> TokenManager<StaticIndexer> {
        TokenManager::new(Arc::new(StaticIndexer {
            info: Some(test_info(txid(500), TokenProtocol::Slp, decimals)),
        }))
    }

    fn parse_slp_send_amounts(script: &[u8]) -> Vec<u64> {
        // OP_RETURN, lokad(4), type(1), "SEND"(4), token id(32), amounts...
        assert_eq!(script[0], 0x6a);
        assert_eq!(&script[2..6], &SLP_LOKAD_ID);
        let mut offset = 1 + 5 + 2 + 5 + 33;
        let mut amounts = Vec::new();
        while offset < script.len() {
            assert_eq!(script[offset], 0x08);
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&script[offset + 1..offset + 9]);
            amounts.push(u64::from_be_bytes(bytes));
            offset += 9;
        }
        amounts
    }

    #[tokio::test]
    async fn partial_burn_is_send_by_omission() {
        // Inputs of [3, 5, 10] atoms, burn 8 => select [10, 5],
        // change 7, carrier is a SEND listing only 7.
        let builder = test_builder();
        let id = txid(500);
        let utxos = vec![
            token_utxo(&builder, 1, id, TokenProtocol::Slp, 3),
            token_utxo(&builder, 2, id, TokenProtocol::Slp, 5),
            token_utxo(&builder, 3, id, TokenProtocol::Slp, 10),
            plain_utxo(&builder, 4, 50_000),
        ];
        let manager = manager_with_info(0);
        let built = manager.burn(&builder, &utxos, &id, 8, 1.2).await.unwrap();

        // Two token inputs (10 and 5); their dust covers the fee, so the
        // plain coin stays untouched.
        assert_eq!(built.tx.inputs.len(), 2);
        let outputs = &built.tx.outputs;
        assert_eq!(outputs[0].sats, 0);
        assert_eq!(parse_slp_send_amounts(&outputs[0].script), vec![7]);
        // Token change at dust; no plain change output.
        assert_eq!(outputs[1].sats, DUST_LIMIT);
        assert_eq!(outputs.len(), 2);
        assert_eq!(
            common::script::extract_p2pkh_hash(&outputs[1].script).unwrap(),
            *builder.keys().address().hash()
        );
    }

    #[tokio::test]
    async fn complete_burn_uses_explicit_burn_carrier() {
        let builder = test_builder();
        let id = txid(500);
        let utxos = vec![
            token_utxo(&builder, 1, id, TokenProtocol::Slp, 8),
            plain_utxo(&builder, 2, 50_000),
        ];
        let manager = manager_with_info(0);
        let built = manager.burn(&builder, &utxos, &id, 8, 1.2).await.unwrap();

        let carrier = &built.tx.outputs[0].script;
        assert_eq!(&carrier[8..13], &[0x04, b'B', b'U', b'R', b'N']);
        // No token change output, and the token input's own dust covers
        // the fee, so the carrier is the only output.
        assert_eq!(built.tx.inputs.len(), 1);
        assert_eq!(built.tx.outputs.len(), 1);
        assert_eq!(&carrier[carrier.len() - 8..], &8u64.to_be_bytes());
    }

    #[tokio::test]
    async fn send_orders_carrier_amounts_like_outputs() {
        let builder = test_builder();
        let id = txid(500);
        let utxos = vec![
            token_utxo(&builder, 1, id, TokenProtocol::Slp, 100),
            plain_utxo(&builder, 2, 50_000),
        ];
        let manager = manager_with_info(0);
        let recipients = vec![
            TokenRecipient::new(recipient_address(), 60),
            TokenRecipient::new(Address::p2pkh("ecash", [0x55; 20]), 15),
        ];
        let built = manager
            .send(&builder, &utxos, &id, &recipients, 1.2)
            .await
            .unwrap();

        let outputs = &built.tx.outputs;
        assert_eq!(parse_slp_send_amounts(&outputs[0].script), vec![60, 15, 25]);
        // Recipient dust outputs in order, then token change, then plain change.
        assert_eq!(outputs[1].sats, DUST_LIMIT);
        assert_eq!(
            common::script::extract_p2pkh_hash(&outputs[1].script).unwrap(),
            [0x44; 20]
        );
        assert_eq!(outputs[2].sats, DUST_LIMIT);
        assert_eq!(
            common::script::extract_p2pkh_hash(&outputs[2].script).unwrap(),
            [0x55; 20]
        );
        assert_eq!(outputs[3].sats, DUST_LIMIT);
        assert_eq!(
            common::script::extract_p2pkh_hash(&outputs[3].script).unwrap(),
            *builder.keys().address().hash()
        );
        // Atom conservation: sent + change == selected.
        assert_eq!(60 + 15 + 25, 100);
    }

    #[tokio::test]
    async fn slp_fee_funding_never_spends_other_tokens() {
        let builder = test_builder();
        let id = txid(500);
        let other_id = txid(600);
        // Only an other-token UTXO could fund the fee; SLP must refuse.
        let utxos = vec![
            token_utxo(&builder, 1, id, TokenProtocol::Slp, 10),
            token_utxo(&builder, 2, other_id, TokenProtocol::Slp, 99),
        ];
        let manager = manager_with_info(0);
        let recipients = vec![TokenRecipient::new(recipient_address(), 10)];
        let err = manager
            .send(&builder, &utxos, &id, &recipients, 1.2)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_XEC");
    }

    #[tokio::test]
    async fn insufficient_token_balance_is_rejected() {
        let builder = test_builder();
        let id = txid(500);
        let utxos = vec![
            token_utxo(&builder, 1, id, TokenProtocol::Slp, 5),
            plain_utxo(&builder, 2, 50_000),
        ];
        let manager = manager_with_info(2);
        let recipients = vec![TokenRecipient::new(recipient_address(), 600)];
        let err = manager
            .send(&builder, &utxos, &id, &recipients, 1.2)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_TOKEN");
        assert!(err.to_string().contains("FLEX"));
    }

    #[tokio::test]
    async fn recipient_cap_applies_to_slp_sends() {
        let builder = test_builder();
        let id = txid(500);
        let utxos = vec![token_utxo(&builder, 1, id, TokenProtocol::Slp, 1_000)];
        let manager = manager_with_info(0);
        let recipients: Vec<TokenRecipient> = (0..MAX_TOKEN_RECIPIENTS + 1)
            .map(|_| TokenRecipient::new(recipient_address(), 1))
            .collect();
        let err = manager
            .send(&builder, &utxos, &id, &recipients, 1.2)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TOO_MANY_RECIPIENTS");
    }

    #[tokio::test]
    async fn atom_conservation_across_send() {
        let builder = test_builder();
        let id = txid(500);
        let utxos = vec![
            token_utxo(&builder, 1, id, TokenProtocol::Slp, 40),
            token_utxo(&builder, 2, id, TokenProtocol::Slp, 25),
            plain_utxo(&builder, 3, 50_000),
        ];
        let manager = manager_with_info(0);
        let recipients = vec![TokenRecipient::new(recipient_address(), 50)];
        let built = manager
            .send(&builder, &utxos, &id, &recipients, 1.2)
            .await
            .unwrap();
        let amounts = parse_slp_send_amounts(&built.tx.outputs[0].script);
        // Selected 40 + 25 = 65; carrier lists 50 to the recipient and 15 change.
        assert_eq!(amounts, vec![50, 15]);
        assert_eq!(amounts.iter().sum::<u64>(), 65);
        assert_eq!(
            built.tx.outputs[0].script[6..8],
            [0x01, SLP_FUNGIBLE]
        );
    }
}
