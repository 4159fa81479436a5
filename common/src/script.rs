use crate::errors::{WalletError, WalletResult};

pub const OP_DUP: u8 = 0x76;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_RESERVED: u8 = 0x50;
pub const OP_PUSHDATA1: u8 = 0x4c;

pub const P2PKH_SCRIPT_LEN: usize = 25;

/// `OP_DUP OP_HASH160 <push-20> <hash160> OP_EQUALVERIFY OP_CHECKSIG`
pub fn p2pkh_script(hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(P2PKH_SCRIPT_LEN);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    script.push(20);
    script.extend_from_slice(hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

pub fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == P2PKH_SCRIPT_LEN
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 20
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

pub fn extract_p2pkh_hash(script: &[u8]) -> WalletResult<[u8; 20]> {
    if !is_p2pkh(script) {
        return Err(WalletError::UnsupportedScript);
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&script[3..23]);
    Ok(hash)
}

/// Appends the minimal push for `data`: a single-byte opcode for lengths up
/// to 75, OP_PUSHDATA1 for lengths up to 255. Longer pushes are not needed
/// anywhere in this wallet and are rejected.
pub fn push_slice(script: &mut Vec<u8>, data: &[u8]) -> WalletResult<()> {
    match data.len() {
        0..=75 => script.push(data.len() as u8),
        76..=255 => {
            script.push(OP_PUSHDATA1);
            script.push(data.len() as u8);
        }
        len => {
            return Err(WalletError::PayloadTooLarge { len, max: 255 });
        }
    }
    script.extend_from_slice(data);
    Ok(())
}

/// `OP_RETURN <push> <payload>`
pub fn op_return_script(payload: &[u8]) -> WalletResult<Vec<u8>> {
    let mut script = Vec::with_capacity(payload.len() + 3);
    script.push(OP_RETURN);
    push_slice(&mut script, payload)?;
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p2pkh_script_layout() {
        let hash = [0xabu8; 20];
        let script = p2pkh_script(&hash);
        assert_eq!(script.len(), 25);
        assert_eq!(script[0], OP_DUP);
        assert_eq!(script[1], OP_HASH160);
        assert_eq!(script[2], 20);
        assert_eq!(&script[3..23], &hash);
        assert_eq!(script[23], OP_EQUALVERIFY);
        assert_eq!(script[24], OP_CHECKSIG);
        assert_eq!(extract_p2pkh_hash(&script).unwrap(), hash);
    }

    #[test]
    fn non_p2pkh_scripts_are_unsupported() {
        assert!(extract_p2pkh_hash(&[]).is_err());
        assert!(extract_p2pkh_hash(&[OP_RETURN, 0x01, 0xff]).is_err());
        let mut truncated = p2pkh_script(&[0u8; 20]);
        truncated.pop();
        assert!(extract_p2pkh_hash(&truncated).is_err());
    }

    #[test]
    fn short_payload_uses_single_byte_push() {
        // prefix 6d02 plus "Hi" => total length 4
        let script = op_return_script(&[0x6d, 0x02, 0x48, 0x69]).unwrap();
        assert_eq!(script, vec![0x6a, 0x04, 0x6d, 0x02, 0x48, 0x69]);
    }

    #[test]
    fn payload_of_76_bytes_uses_pushdata1() {
        let payload = vec![0x11u8; 76];
        let script = op_return_script(&payload).unwrap();
        assert_eq!(script[0], OP_RETURN);
        assert_eq!(script[1], OP_PUSHDATA1);
        assert_eq!(script[2], 76);
        assert_eq!(&script[3..], payload.as_slice());
    }

    #[test]
    fn boundary_payload_of_75_bytes_stays_direct() {
        let payload = vec![0x22u8; 75];
        let script = op_return_script(&payload).unwrap();
        assert_eq!(script[1], 75);
        assert_eq!(script.len(), 2 + 75);
    }

    #[test]
    fn oversized_push_is_rejected() {
        let payload = vec![0u8; 256];
        let err = op_return_script(&payload).unwrap_err();
        assert_eq!(err.code(), "PAYLOAD_TOO_LARGE");
    }
}
