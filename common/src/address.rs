use crate::errors::{WalletError, WalletResult};
use crate::script;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

pub const MAINNET_PREFIX: &str = "ecash";
pub const TESTNET_PREFIX: &str = "ectest";

/// Version byte for a P2PKH hash of 160 bits: type 0 in bits 6..3 and size
/// code 0 in bits 2..0. Any other version byte is rejected.
const P2PKH_VERSION: u8 = 0x00;

const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// A cashaddr-encoded P2PKH address: `prefix:base32(payload ++ checksum)`.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Address {
    prefix: String,
    hash: [u8; 20],
}

impl Address {
    pub fn p2pkh(prefix: &str, hash: [u8; 20]) -> Self {
        Self {
            prefix: prefix.to_string(),
            hash,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn hash(&self) -> &[u8; 20] {
        &self.hash
    }

    /// The 25-byte locking script paying to this address.
    pub fn to_script(&self) -> Vec<u8> {
        script::p2pkh_script(&self.hash)
    }

    /// Recovers the address of a P2PKH locking script.
    pub fn from_script(prefix: &str, locking_script: &[u8]) -> WalletResult<Self> {
        let hash = script::extract_p2pkh_hash(locking_script)?;
        Ok(Self::p2pkh(prefix, hash))
    }

    fn encode(&self) -> String {
        let mut payload = Vec::with_capacity(21);
        payload.push(P2PKH_VERSION);
        payload.extend_from_slice(&self.hash);
        let payload5 = convert_bits(&payload, 8, 5, true);

        let mut checksum_input = expand_prefix(&self.prefix);
        checksum_input.extend_from_slice(&payload5);
        checksum_input.extend_from_slice(&[0u8; 8]);
        let checksum = polymod(&checksum_input);

        let mut encoded = String::with_capacity(self.prefix.len() + 1 + payload5.len() + 8);
        encoded.push_str(&self.prefix);
        encoded.push(':');
        for d in &payload5 {
            encoded.push(CHARSET[*d as usize] as char);
        }
        for i in 0..8 {
            let d = ((checksum >> (5 * (7 - i))) & 0x1f) as usize;
            encoded.push(CHARSET[d] as char);
        }
        encoded
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Address {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.chars().any(|c| c.is_ascii_uppercase()) && s.chars().any(|c| c.is_ascii_lowercase()) {
            return Err(WalletError::InvalidAddress(
                "mixed-case address".to_string(),
            ));
        }
        let lower = s.to_ascii_lowercase();

        // A bare payload is interpreted against the mainnet prefix.
        let (prefix, payload) = match lower.split_once(':') {
            Some((prefix, payload)) => (prefix.to_string(), payload),
            None => (MAINNET_PREFIX.to_string(), lower.as_str()),
        };
        if prefix.is_empty() || payload.len() < 8 {
            return Err(WalletError::InvalidAddress(format!("malformed address {s:?}")));
        }

        let mut data = Vec::with_capacity(payload.len());
        for c in payload.bytes() {
            let d = CHARSET.iter().position(|&x| x == c).ok_or_else(|| {
                WalletError::InvalidAddress(format!("invalid base32 character {:?}", c as char))
            })?;
            data.push(d as u8);
        }

        let mut checksum_input = expand_prefix(&prefix);
        checksum_input.extend_from_slice(&data);
        if polymod(&checksum_input) != 0 {
            return Err(WalletError::InvalidAddress(format!(
                "checksum mismatch in {s:?}"
            )));
        }

        let payload5 = &data[..data.len() - 8];
        let payload8 = convert_bits(payload5, 5, 8, false);
        if payload8.is_empty() {
            return Err(WalletError::InvalidAddress("empty payload".to_string()));
        }
        if payload8[0] != P2PKH_VERSION {
            return Err(WalletError::InvalidAddress(format!(
                "unsupported address type byte {:#04x}",
                payload8[0]
            )));
        }
        let hash: [u8; 20] = payload8[1..].try_into().map_err(|_| {
            WalletError::InvalidAddress(format!(
                "hash must be 20 bytes, got {}",
                payload8.len() - 1
            ))
        })?;

        Ok(Address { prefix, hash })
    }
}

/// 40-bit BCH checksum over 5-bit symbols.
fn polymod(values: &[u8]) -> u64 {
    let mut c: u64 = 1;
    for &d in values {
        let c0 = (c >> 35) as u8;
        c = ((c & 0x0007_ffff_ffff) << 5) ^ d as u64;
        if c0 & 0x01 != 0 {
            c ^= 0x98_f2bc_8e61;
        }
        if c0 & 0x02 != 0 {
            c ^= 0x79_b76d_99e2;
        }
        if c0 & 0x04 != 0 {
            c ^= 0xf3_3e5f_b3c4;
        }
        if c0 & 0x08 != 0 {
            c ^= 0xae_2eab_e2a8;
        }
        if c0 & 0x10 != 0 {
            c ^= 0x1e_4f43_e470;
        }
    }
    c ^ 1
}

fn expand_prefix(prefix: &str) -> Vec<u8> {
    let mut out: Vec<u8> = prefix.bytes().map(|b| b & 0x1f).collect();
    out.push(0);
    out
}

fn convert_bits(data: &[u8], from: u32, to: u32, pad: bool) -> Vec<u8> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut out = Vec::new();
    let max: u32 = (1 << to) - 1;
    for &value in data {
        acc = (acc << from) | value as u32;
        bits += from;
        while bits >= to {
            bits -= to;
            out.push(((acc >> bits) & max) as u8);
        }
    }
    if pad && bits > 0 {
        out.push(((acc << (to - bits)) & max) as u8);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(i: u8) -> [u8; 20] {
        let mut h = [0u8; 20];
        h[0] = i;
        h[19] = i.wrapping_mul(3);
        h
    }

    #[test]
    fn encode_decode_round_trip() {
        for i in [0u8, 1, 17, 255] {
            let address = Address::p2pkh(MAINNET_PREFIX, hash(i));
            let encoded = address.to_string();
            assert!(encoded.starts_with("ecash:"));
            let decoded: Address = encoded.parse().unwrap();
            assert_eq!(decoded, address);
        }
    }

    #[test]
    fn bare_payload_assumes_mainnet_prefix() {
        let address = Address::p2pkh(MAINNET_PREFIX, hash(9));
        let encoded = address.to_string();
        let bare = encoded.split_once(':').unwrap().1;
        let decoded: Address = bare.parse().unwrap();
        assert_eq!(decoded, address);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let encoded = Address::p2pkh(MAINNET_PREFIX, hash(4)).to_string();
        let mut chars: Vec<char> = encoded.chars().collect();
        let last = *chars.last().unwrap();
        let replacement = if last == 'q' { 'p' } else { 'q' };
        *chars.last_mut().unwrap() = replacement;
        let corrupted: String = chars.into_iter().collect();
        let err = corrupted.parse::<Address>().unwrap_err();
        assert_eq!(err.code(), "INVALID_ADDRESS");
    }

    #[test]
    fn wrong_prefix_fails_checksum() {
        let encoded = Address::p2pkh(MAINNET_PREFIX, hash(4)).to_string();
        let payload = encoded.split_once(':').unwrap().1;
        let relabeled = format!("ectest:{payload}");
        assert!(relabeled.parse::<Address>().is_err());
    }

    #[test]
    fn mixed_case_is_rejected() {
        let encoded = Address::p2pkh(MAINNET_PREFIX, hash(4)).to_string();
        let mut mixed = encoded.clone();
        mixed.replace_range(0..1, "E");
        assert!(mixed.parse::<Address>().is_err());
    }

    #[test]
    fn script_round_trip() {
        let address = Address::p2pkh(MAINNET_PREFIX, hash(7));
        let locking_script = address.to_script();
        assert_eq!(locking_script.len(), 25);
        let recovered = Address::from_script(MAINNET_PREFIX, &locking_script).unwrap();
        assert_eq!(recovered, address);
    }

    #[test]
    fn non_p2pkh_version_byte_is_rejected() {
        // Re-encode with a P2SH-style type byte (1 << 3) and a valid checksum.
        let mut payload = vec![0x08u8];
        payload.extend_from_slice(&hash(2));
        let payload5 = convert_bits(&payload, 8, 5, true);
        let mut checksum_input = expand_prefix(MAINNET_PREFIX);
        checksum_input.extend_from_slice(&payload5);
        checksum_input.extend_from_slice(&[0u8; 8]);
        let checksum = polymod(&checksum_input);
        let mut encoded = format!("{MAINNET_PREFIX}:");
        for d in &payload5 {
            encoded.push(CHARSET[*d as usize] as char);
        }
        for i in 0..8 {
            encoded.push(CHARSET[((checksum >> (5 * (7 - i))) & 0x1f) as usize] as char);
        }
        let err = encoded.parse::<Address>().unwrap_err();
        assert!(err.to_string().contains("type byte"));
    }
}
