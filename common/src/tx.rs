use crate::errors::{WalletError, WalletResult};
use crate::hashes::sha256d;
use crate::model::{Outpoint, TxId};
use secp256k1::{Message, Secp256k1, SecretKey};

pub const TX_VERSION: u32 = 2;
pub const DEFAULT_SEQUENCE: u32 = 0xffff_ffff;

/// SIGHASH_ALL with the replay-protection fork bit.
pub const SIGHASH_ALL_FORKID: u32 = 0x41;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxInput {
    pub prev_out: Outpoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxInput {
    pub fn unsigned(prev_out: Outpoint) -> Self {
        Self {
            prev_out,
            script_sig: Vec::new(),
            sequence: DEFAULT_SEQUENCE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOutput {
    pub sats: u64,
    pub script: Vec<u8>,
}

impl TxOutput {
    pub fn new(sats: u64, script: Vec<u8>) -> Self {
        Self { sats, script }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tx {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub locktime: u32,
}

impl Tx {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            version: TX_VERSION,
            inputs,
            outputs,
            locktime: 0,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size_hint());
        buf.extend_from_slice(&self.version.to_le_bytes());
        write_varint(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            buf.extend_from_slice(&input.prev_out.txid.to_wire_bytes());
            buf.extend_from_slice(&input.prev_out.index.to_le_bytes());
            write_varint(&mut buf, input.script_sig.len() as u64);
            buf.extend_from_slice(&input.script_sig);
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_varint(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            buf.extend_from_slice(&output.sats.to_le_bytes());
            write_varint(&mut buf, output.script.len() as u64);
            buf.extend_from_slice(&output.script);
        }
        buf.extend_from_slice(&self.locktime.to_le_bytes());
        buf
    }

    pub fn parse(bytes: &[u8]) -> WalletResult<Self> {
        let mut reader = Reader::new(bytes);
        let version = reader.read_u32()?;
        let input_count = reader.read_varint()?;
        let mut inputs = Vec::with_capacity(input_count as usize);
        for _ in 0..input_count {
            let txid = TxId::from_wire_bytes(reader.read_array::<32>()?);
            let index = reader.read_u32()?;
            let script_len = reader.read_varint()? as usize;
            let script_sig = reader.read_bytes(script_len)?.to_vec();
            let sequence = reader.read_u32()?;
            inputs.push(TxInput {
                prev_out: Outpoint::new(txid, index),
                script_sig,
                sequence,
            });
        }
        let output_count = reader.read_varint()?;
        let mut outputs = Vec::with_capacity(output_count as usize);
        for _ in 0..output_count {
            let sats = reader.read_u64()?;
            let script_len = reader.read_varint()? as usize;
            let script = reader.read_bytes(script_len)?.to_vec();
            outputs.push(TxOutput { sats, script });
        }
        let locktime = reader.read_u32()?;
        if !reader.is_empty() {
            return Err(WalletError::InvalidUtxoStructure(
                "trailing bytes after transaction".to_string(),
            ));
        }
        Ok(Tx {
            version,
            inputs,
            outputs,
            locktime,
        })
    }

    pub fn txid(&self) -> TxId {
        TxId::from_wire_bytes(sha256d(&self.serialize()))
    }

    pub fn size(&self) -> usize {
        self.serialize().len()
    }

    fn size_hint(&self) -> usize {
        10 + self.inputs.len() * 150 + self.outputs.len() * 34
    }

    pub fn total_output_sats(&self) -> u64 {
        self.outputs.iter().map(|o| o.sats).sum()
    }
}

fn write_varint(buf: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => buf.push(n as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x10000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&n.to_le_bytes());
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos == self.bytes.len()
    }

    fn read_bytes(&mut self, len: usize) -> WalletResult<&'a [u8]> {
        if self.pos + len > self.bytes.len() {
            return Err(WalletError::InvalidUtxoStructure(
                "truncated transaction".to_string(),
            ));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> WalletResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_u32(&mut self) -> WalletResult<u32> {
        Ok(u32::from_le_bytes(self.read_array::<4>()?))
    }

    fn read_u64(&mut self) -> WalletResult<u64> {
        Ok(u64::from_le_bytes(self.read_array::<8>()?))
    }

    fn read_varint(&mut self) -> WalletResult<u64> {
        let tag = self.read_bytes(1)?[0];
        Ok(match tag {
            0xfd => u16::from_le_bytes(self.read_array::<2>()?) as u64,
            0xfe => u32::from_le_bytes(self.read_array::<4>()?) as u64,
            0xff => u64::from_le_bytes(self.read_array::<8>()?),
            n => n as u64,
        })
    }
}

/// BIP143-style signature hash used by the eCash network. `script_code` is
/// the locking script of the input being spent; `value` its sats.
pub fn signature_hash(tx: &Tx, input_index: usize, script_code: &[u8], value: u64) -> [u8; 32] {
    let mut prevouts = Vec::with_capacity(tx.inputs.len() * 36);
    let mut sequences = Vec::with_capacity(tx.inputs.len() * 4);
    for input in &tx.inputs {
        prevouts.extend_from_slice(&input.prev_out.txid.to_wire_bytes());
        prevouts.extend_from_slice(&input.prev_out.index.to_le_bytes());
        sequences.extend_from_slice(&input.sequence.to_le_bytes());
    }
    let mut outputs = Vec::new();
    for output in &tx.outputs {
        outputs.extend_from_slice(&output.sats.to_le_bytes());
        write_varint(&mut outputs, output.script.len() as u64);
        outputs.extend_from_slice(&output.script);
    }

    let input = &tx.inputs[input_index];
    let mut preimage = Vec::with_capacity(156 + script_code.len());
    preimage.extend_from_slice(&tx.version.to_le_bytes());
    preimage.extend_from_slice(&sha256d(&prevouts));
    preimage.extend_from_slice(&sha256d(&sequences));
    preimage.extend_from_slice(&input.prev_out.txid.to_wire_bytes());
    preimage.extend_from_slice(&input.prev_out.index.to_le_bytes());
    write_varint(&mut preimage, script_code.len() as u64);
    preimage.extend_from_slice(script_code);
    preimage.extend_from_slice(&value.to_le_bytes());
    preimage.extend_from_slice(&input.sequence.to_le_bytes());
    preimage.extend_from_slice(&sha256d(&outputs));
    preimage.extend_from_slice(&tx.locktime.to_le_bytes());
    preimage.extend_from_slice(&SIGHASH_ALL_FORKID.to_le_bytes());
    sha256d(&preimage)
}

/// Builds the unlocking script for a P2PKH input: `<sig ++ hashtype> <pubkey>`.
pub fn p2pkh_script_sig(
    tx: &Tx,
    input_index: usize,
    script_code: &[u8],
    value: u64,
    secret_key: &SecretKey,
    public_key: &[u8; 33],
) -> WalletResult<Vec<u8>> {
    let digest = signature_hash(tx, input_index, script_code, value);
    let secp = Secp256k1::signing_only();
    let message = Message::from_digest(digest);
    let signature = secp.sign_ecdsa(&message, secret_key);
    let mut sig_bytes = signature.serialize_der().to_vec();
    sig_bytes.push(SIGHASH_ALL_FORKID as u8);

    let mut script_sig = Vec::with_capacity(sig_bytes.len() + 35);
    crate::script::push_slice(&mut script_sig, &sig_bytes)?;
    crate::script::push_slice(&mut script_sig, public_key)?;
    Ok(script_sig)
}
