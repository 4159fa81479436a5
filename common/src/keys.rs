use crate::address::{Address, MAINNET_PREFIX};
use crate::errors::{WalletError, WalletResult};
use crate::hashes::hash160;
use bip39::Mnemonic;
use hmac::{Hmac, Mac};
use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey};
use sha2::Sha512;

/// BIP44 path for the XEC coin type.
pub const DEFAULT_DERIVATION_PATH: &str = "m/44'/899'/0'/0/0";

const WIF_MAINNET: u8 = 0x80;
const WIF_TESTNET: u8 = 0xEF;
const HARDENED: u32 = 0x8000_0000;

/// Secret material a wallet can be constructed from. Mnemonic is preferred;
/// WIF (or a raw 64-hex secret) is the fallback.
#[derive(Clone, Debug, Default)]
pub struct WalletSecret {
    pub mnemonic: Option<String>,
    pub hd_path: Option<String>,
    pub wif: Option<String>,
}

#[derive(Clone, Debug)]
pub struct WalletKeys {
    secret_key: SecretKey,
    public_key: [u8; 33],
    address: Address,
}

impl WalletKeys {
    pub fn from_secret(secret: &WalletSecret, prefix: &str) -> WalletResult<Self> {
        if let Some(mnemonic) = &secret.mnemonic {
            let path = secret.hd_path.as_deref().unwrap_or(DEFAULT_DERIVATION_PATH);
            return Self::from_mnemonic(mnemonic, path, prefix);
        }
        if let Some(wif) = &secret.wif {
            return Self::from_wif(wif, prefix);
        }
        Err(WalletError::InvalidKey(
            "neither mnemonic nor WIF provided".to_string(),
        ))
    }

    pub fn from_mnemonic(phrase: &str, path: &str, prefix: &str) -> WalletResult<Self> {
        let mnemonic = Mnemonic::parse(phrase)
            .map_err(|e| WalletError::InvalidKey(format!("invalid mnemonic: {e}")))?;
        let seed = mnemonic.to_seed("");
        let mut key = master_from_seed(&seed)?;
        for index in parse_path(path)? {
            key = derive_child(&key, index)?;
        }
        Self::from_secret_key(key.secret_key, prefix)
    }

    /// Accepts base58-check WIF (network byte 0x80 mainnet / 0xEF testnet,
    /// optional 0x01 compression flag) or a raw 64-hex secret key.
    pub fn from_wif(wif: &str, prefix: &str) -> WalletResult<Self> {
        if wif.len() == 64 {
            if let Ok(raw) = hex::decode(wif) {
                let secret_key = SecretKey::from_slice(&raw)
                    .map_err(|e| WalletError::InvalidKey(format!("invalid secret key: {e}")))?;
                return Self::from_secret_key(secret_key, prefix);
            }
        }

        let payload = bs58::decode(wif)
            .with_check(None)
            .into_vec()
            .map_err(|e| WalletError::InvalidKey(format!("invalid WIF encoding: {e}")))?;
        match payload.first() {
            Some(&WIF_MAINNET) | Some(&WIF_TESTNET) => {}
            Some(&other) => {
                return Err(WalletError::InvalidKey(format!(
                    "unexpected WIF network byte {other:#04x}"
                )));
            }
            None => return Err(WalletError::InvalidKey("empty WIF payload".to_string())),
        }
        let key_bytes = match payload.len() {
            33 => &payload[1..33],
            34 if payload[33] == 0x01 => &payload[1..33],
            _ => {
                return Err(WalletError::InvalidKey(format!(
                    "unexpected WIF payload length {}",
                    payload.len()
                )));
            }
        };
        let secret_key = SecretKey::from_slice(key_bytes)
            .map_err(|e| WalletError::InvalidKey(format!("invalid secret key: {e}")))?;
        Self::from_secret_key(secret_key, prefix)
    }

    pub fn from_secret_key(secret_key: SecretKey, prefix: &str) -> WalletResult<Self> {
        let secp = Secp256k1::signing_only();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key).serialize();
        let address = Address::p2pkh(prefix, hash160(&public_key));
        Ok(Self {
            secret_key,
            public_key,
            address,
        })
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    pub fn public_key(&self) -> &[u8; 33] {
        &self.public_key
    }

    pub fn address(&self) -> &Address {
        &self.address
    }
}

struct ExtendedKey {
    secret_key: SecretKey,
    chain_code: [u8; 32],
}

fn hmac_sha512(key: &[u8], data: &[u8]) -> [u8; 64] {
    let mut mac = Hmac::<Sha512>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    let mut out = [0u8; 64];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

fn master_from_seed(seed: &[u8]) -> WalletResult<ExtendedKey> {
    let digest = hmac_sha512(b"Bitcoin seed", seed);
    let secret_key = SecretKey::from_slice(&digest[..32])
        .map_err(|e| WalletError::InvalidKey(format!("unusable master key: {e}")))?;
    let mut chain_code = [0u8; 32];
    chain_code.copy_from_slice(&digest[32..]);
    Ok(ExtendedKey {
        secret_key,
        chain_code,
    })
}

fn derive_child(parent: &ExtendedKey, index: u32) -> WalletResult<ExtendedKey> {
    let mut data = Vec::with_capacity(37);
    if index >= HARDENED {
        data.push(0);
        data.extend_from_slice(&parent.secret_key.secret_bytes());
    } else {
        let secp = Secp256k1::signing_only();
        data.extend_from_slice(&PublicKey::from_secret_key(&secp, &parent.secret_key).serialize());
    }
    data.extend_from_slice(&index.to_be_bytes());

    let digest = hmac_sha512(&parent.chain_code, &data);
    let tweak: [u8; 32] = digest[..32].try_into().expect("fixed split");
    let tweak = Scalar::from_be_bytes(tweak)
        .map_err(|_| WalletError::InvalidKey("child key tweak out of range".to_string()))?;
    let secret_key = parent
        .secret_key
        .add_tweak(&tweak)
        .map_err(|e| WalletError::InvalidKey(format!("unusable child key: {e}")))?;
    let mut chain_code = [0u8; 32];
    chain_code.copy_from_slice(&digest[32..]);
    Ok(ExtendedKey {
        secret_key,
        chain_code,
    })
}

fn parse_path(path: &str) -> WalletResult<Vec<u32>> {
    let mut segments = path.split('/');
    match segments.next() {
        Some("m") | Some("M") => {}
        _ => {
            return Err(WalletError::InvalidKey(format!(
                "derivation path must start with m/: {path:?}"
            )));
        }
    }
    let mut indices = Vec::new();
    for segment in segments {
        let (digits, hardened) = match segment.strip_suffix('\'').or(segment.strip_suffix('h')) {
            Some(digits) => (digits, true),
            None => (segment, false),
        };
        let index: u32 = digits.parse().map_err(|_| {
            WalletError::InvalidKey(format!("invalid path segment {segment:?} in {path:?}"))
        })?;
        if index >= HARDENED {
            return Err(WalletError::InvalidKey(format!(
                "path index {index} out of range"
            )));
        }
        indices.push(if hardened { index | HARDENED } else { index });
    }
    Ok(indices)
}

/// Default prefix convenience used by callers that only deal with mainnet.
pub fn mainnet_keys(secret: &WalletSecret) -> WalletResult<WalletKeys> {
    WalletKeys::from_secret(secret, MAINNET_PREFIX)
}
