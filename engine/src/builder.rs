use crate::coin_selection::{SelectionPlan, estimate_fee};
use crate::config::{DUST_LIMIT, MAX_OP_RETURN_PAYLOAD, OP_RETURN_PREFIX};
use common::address::Address;
use common::errors::{WalletError, WalletResult};
use common::keys::WalletKeys;
use common::model::{TxId, Utxo};
use common::script::{is_p2pkh, op_return_script};
use common::tx::{Tx, TxInput, TxOutput, p2pkh_script_sig};
use log::debug;

/// A fully signed transaction ready for broadcast.
#[derive(Clone, Debug)]
pub struct BuiltTransaction {
    pub tx: Tx,
    pub hex: String,
    pub txid: TxId,
    pub fee: u64,
    pub size: usize,
}

#[derive(Clone, Debug)]
pub struct Recipient {
    pub address: Address,
    pub sats: u64,
}

impl Recipient {
    pub fn new(address: Address, sats: u64) -> Self {
        Self { address, sats }
    }
}

/// Opaque payload carried by an OP_RETURN output: `prefix ++ message`.
#[derive(Clone, Debug)]
pub struct OpReturnPayload {
    pub prefix: Vec<u8>,
    pub message: Vec<u8>,
}

impl OpReturnPayload {
    pub fn with_default_prefix(message: Vec<u8>) -> Self {
        Self {
            prefix: OP_RETURN_PREFIX.to_vec(),
            message,
        }
    }

    fn combined(&self) -> Vec<u8> {
        let mut combined = Vec::with_capacity(self.prefix.len() + self.message.len());
        combined.extend_from_slice(&self.prefix);
        combined.extend_from_slice(&self.message);
        combined
    }
}

/// Builds and signs P2PKH transactions for one keypair. Holds nothing but
/// the signing material.
pub struct TransactionBuilder {
    keys: WalletKeys,
}

impl TransactionBuilder {
    pub fn new(keys: WalletKeys) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &WalletKeys {
        &self.keys
    }

    /// Plain value transfer: recipients in order, then optional change back
    /// to the wallet address.
    pub fn build_plain(
        &self,
        plan: &SelectionPlan,
        recipients: &[Recipient],
    ) -> WalletResult<BuiltTransaction> {
        self.validate_recipients(recipients)?;
        let outputs = self.payment_outputs(recipients, plan.change);
        self.assemble(&plan.inputs, outputs)
    }

    /// Same as `build_plain` with a zero-value OP_RETURN data carrier as
    /// the first output.
    pub fn build_op_return(
        &self,
        plan: &SelectionPlan,
        recipients: &[Recipient],
        payload: &OpReturnPayload,
    ) -> WalletResult<BuiltTransaction> {
        self.validate_recipients(recipients)?;
        let combined = payload.combined();
        if combined.len() > MAX_OP_RETURN_PAYLOAD {
            return Err(WalletError::PayloadTooLarge {
                len: combined.len(),
                max: MAX_OP_RETURN_PAYLOAD,
            });
        }
        let mut outputs = vec![TxOutput::new(0, op_return_script(&combined)?)];
        outputs.extend(self.payment_outputs(recipients, plan.change));
        self.assemble(&plan.inputs, outputs)
    }

    /// Sweeps every plain candidate to a single destination; the sole
    /// output carries `total - fee`.
    pub fn build_send_all(
        &self,
        candidates: &[Utxo],
        to: &Address,
        fee_rate: f64,
    ) -> WalletResult<BuiltTransaction> {
        let inputs: Vec<Utxo> = candidates
            .iter()
            .filter(|utxo| !utxo.has_token())
            .cloned()
            .collect();
        let total: u64 = inputs.iter().map(|u| u.sats).sum();
        if inputs.is_empty() {
            return Err(WalletError::InsufficientFunds {
                required: DUST_LIMIT,
                available: 0,
            });
        }
        let fee = estimate_fee(inputs.len(), 1, fee_rate, 0);
        let swept = total.saturating_sub(fee);
        if swept < DUST_LIMIT {
            return Err(WalletError::DustOutput {
                sats: swept,
                limit: DUST_LIMIT,
            });
        }
        let outputs = vec![TxOutput::new(swept, to.to_script())];
        self.assemble(&inputs, outputs)
    }

    fn validate_recipients(&self, recipients: &[Recipient]) -> WalletResult<()> {
        if recipients.is_empty() {
            return Err(WalletError::InvalidAddress(
                "at least one recipient required".to_string(),
            ));
        }
        for recipient in recipients {
            if recipient.sats < DUST_LIMIT {
                return Err(WalletError::DustOutput {
                    sats: recipient.sats,
                    limit: DUST_LIMIT,
                });
            }
        }
        Ok(())
    }

    fn payment_outputs(&self, recipients: &[Recipient], change: u64) -> Vec<TxOutput> {
        let mut outputs: Vec<TxOutput> = recipients
            .iter()
            .map(|r| TxOutput::new(r.sats, r.address.to_script()))
            .collect();
        if change > 0 {
            outputs.push(TxOutput::new(change, self.keys.address().to_script()));
        }
        outputs
    }

    /// Assembles inputs and outputs, signs every input and serializes.
    pub(crate) fn assemble(
        &self,
        selected: &[Utxo],
        outputs: Vec<TxOutput>,
    ) -> WalletResult<BuiltTransaction> {
        let inputs: Vec<TxInput> = selected
            .iter()
            .map(|utxo| TxInput::unsigned(utxo.outpoint))
            .collect();
        let mut tx = Tx::new(inputs, outputs);

        for (index, utxo) in selected.iter().enumerate() {
            if !is_p2pkh(&utxo.script) {
                return Err(WalletError::UnsupportedScript);
            }
            let script_sig = p2pkh_script_sig(
                &tx,
                index,
                &utxo.script,
                utxo.sats,
                self.keys.secret_key(),
                self.keys.public_key(),
            )?;
            tx.inputs[index].script_sig = script_sig;
        }

        let total_in: u64 = selected.iter().map(|u| u.sats).sum();
        let total_out = tx.total_output_sats();
        if total_out > total_in {
            return Err(WalletError::InsufficientFunds {
                required: total_out,
                available: total_in,
            });
        }

        let raw = tx.serialize();
        let built = BuiltTransaction {
            txid: tx.txid(),
            hex: hex::encode(&raw),
            fee: total_in - total_out,
            size: raw.len(),
            tx,
        };
        debug!(
            "built tx {} ({} bytes, fee {} sats)",
            built.txid, built.size, built.fee
        );
        Ok(built)
    }
}
