use crate::errors::{WalletError, WalletResult};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// 32-byte transaction identifier, stored in display order (as printed by
/// explorers and the indexer). The wire format uses the reversed byte order.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TxId([u8; 32]);

/// A token is identified by the transaction id of its genesis.
pub type TokenId = TxId;

impl TxId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> WalletResult<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            WalletError::InvalidUtxoStructure(format!(
                "transaction id must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Little-endian byte order as serialized inside transactions.
    pub fn to_wire_bytes(&self) -> [u8; 32] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }

    pub fn from_wire_bytes(mut bytes: [u8; 32]) -> Self {
        bytes.reverse();
        Self(bytes)
    }
}

impl Display for TxId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for TxId {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| {
            WalletError::InvalidUtxoStructure(format!("transaction id is not hex: {e}"))
        })?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for TxId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TxId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Outpoint {
    pub txid: TxId,
    pub index: u32,
}

impl Outpoint {
    pub fn new(txid: TxId, index: u32) -> Self {
        Self { txid, index }
    }
}

impl Display for Outpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("({},{})", self.txid, self.index))
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenProtocol {
    Slp,
    Alp,
}

impl TokenProtocol {
    pub fn parse(tag: &str) -> WalletResult<Self> {
        match tag {
            "SLP" => Ok(TokenProtocol::Slp),
            "ALP" => Ok(TokenProtocol::Alp),
            other => Err(WalletError::UnknownProtocol(other.to_string())),
        }
    }
}

impl Display for TokenProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TokenProtocol::Slp => "SLP",
            TokenProtocol::Alp => "ALP",
        })
    }
}

/// Token payload of a UTXO. The economic value of a token UTXO lives in
/// `atoms`; its sats only carry the dust needed to make it a valid output.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct TokenData {
    pub token_id: TokenId,
    pub atoms: u128,
    pub protocol: TokenProtocol,
    pub token_type: u8,
}

impl TokenData {
    pub fn new(token_id: TokenId, atoms: u128, protocol: TokenProtocol, token_type: u8) -> Self {
        Self {
            token_id,
            atoms,
            protocol,
            token_type,
        }
    }
}

/// An unspent transaction output as observed from the indexer. Immutable
/// once constructed; all engine state is keyed by `outpoint`.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Utxo {
    pub outpoint: Outpoint,
    pub sats: u64,
    /// Confirmed block height; `-1` while the output sits in the mempool.
    pub block_height: i32,
    pub script: Vec<u8>,
    pub is_coinbase: bool,
    pub token: Option<TokenData>,
}

impl Utxo {
    pub fn new(
        outpoint: Outpoint,
        sats: u64,
        block_height: i32,
        script: Vec<u8>,
        is_coinbase: bool,
        token: Option<TokenData>,
    ) -> Self {
        Self {
            outpoint,
            sats,
            block_height,
            script,
            is_coinbase,
            token,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.block_height >= 0
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Structural validation applied before a UTXO is admitted anywhere.
    pub fn validate(&self) -> WalletResult<()> {
        if self.script.is_empty() {
            return Err(WalletError::InvalidUtxoStructure(format!(
                "UTXO {} has an empty locking script",
                self.outpoint
            )));
        }
        if self.sats == 0 {
            return Err(WalletError::InvalidUtxoStructure(format!(
                "UTXO {} carries zero sats",
                self.outpoint
            )));
        }
        if self.block_height < -1 {
            return Err(WalletError::InvalidUtxoStructure(format!(
                "UTXO {} has invalid block height {}",
                self.outpoint, self.block_height
            )));
        }
        if let Some(token) = &self.token {
            if token.atoms == 0 {
                return Err(WalletError::InvalidUtxoStructure(format!(
                    "token UTXO {} carries zero atoms",
                    self.outpoint
                )));
            }
        }
        Ok(())
    }
}

/// Serde adapters for amount fields the indexer may encode as JSON number
/// or string. Everything is normalized to an exact integer; values that
/// cannot be represented exactly are rejected.
pub mod serde_sats {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(sats: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&sats.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        struct SatsVisitor;

        impl Visitor<'_> for SatsVisitor {
            type Value = u64;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a non-negative integer or a decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
                Ok(v)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
                u64::try_from(v).map_err(|_| E::custom("amount must be non-negative"))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<u64, E> {
                // Floats are only accepted when they are exact integers.
                if v.fract() != 0.0 || v < 0.0 || v >= u64::MAX as f64 {
                    return Err(E::custom(format!("amount {v} is not an exact integer")));
                }
                Ok(v as u64)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
                v.parse::<u64>()
                    .map_err(|_| E::custom(format!("amount {v:?} is not an exact integer")))
            }
        }

        deserializer.deserialize_any(SatsVisitor)
    }
}

pub mod serde_atoms {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(atoms: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&atoms.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        struct AtomsVisitor;

        impl Visitor<'_> for AtomsVisitor {
            type Value = u128;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a non-negative integer or a decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
                Ok(v as u128)
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> Result<u128, E> {
                Ok(v)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
                u128::try_from(v).map_err(|_| E::custom("amount must be non-negative"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
                v.parse::<u128>()
                    .map_err(|_| E::custom(format!("amount {v:?} is not an exact integer")))
            }
        }

        deserializer.deserialize_any(AtomsVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    pub fn txid(i: u32) -> TxId {
        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&i.to_le_bytes());
        TxId::new(bytes)
    }

    #[test]
    fn txid_hex_round_trip() {
        let id = txid(7);
        let parsed: TxId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn txid_wire_order_is_reversed() {
        let id = txid(1);
        let wire = id.to_wire_bytes();
        assert_eq!(wire[31], 1);
        assert_eq!(TxId::from_wire_bytes(wire), id);
    }

    #[test]
    fn txid_rejects_wrong_length() {
        assert!("abcd".parse::<TxId>().is_err());
        assert!(TxId::from_slice(&[0u8; 31]).is_err());
    }

    #[test]
    fn validate_rejects_empty_script_and_zero_sats() {
        let good = Utxo::new(
            Outpoint::new(txid(1), 0),
            1000,
            10,
            vec![0x76; 25],
            false,
            None,
        );
        assert!(good.validate().is_ok());

        let mut bad = good.clone();
        bad.script.clear();
        assert!(bad.validate().is_err());

        let mut bad = good.clone();
        bad.sats = 0;
        assert!(bad.validate().is_err());

        let mut bad = good;
        bad.block_height = -2;
        assert!(bad.validate().is_err());
    }

    #[derive(Deserialize)]
    struct AmountProbe {
        #[serde(with = "serde_sats")]
        sats: u64,
    }

    #[test]
    fn sats_accept_number_and_string_forms() {
        let n: AmountProbe = serde_json::from_str(r#"{"sats": 546}"#).unwrap();
        assert_eq!(n.sats, 546);
        let s: AmountProbe = serde_json::from_str(r#"{"sats": "9007199254740993"}"#).unwrap();
        assert_eq!(s.sats, 9_007_199_254_740_993); // exact beyond 2^53
    }

    #[test]
    fn sats_reject_inexact_values() {
        assert!(serde_json::from_str::<AmountProbe>(r#"{"sats": 1.5}"#).is_err());
        assert!(serde_json::from_str::<AmountProbe>(r#"{"sats": "12.0"}"#).is_err());
        assert!(serde_json::from_str::<AmountProbe>(r#"{"sats": -3}"#).is_err());
    }

    #[test]
    fn unknown_protocol_tag_is_rejected() {
        assert!(TokenProtocol::parse("SLP").is_ok());
        assert!(TokenProtocol::parse("ALP").is_ok());
        let err = TokenProtocol::parse("MINT").unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_PROTOCOL");
    }
}
