//! SS58 address encoding for destination-chain public keys.
//!
//! `base58(prefix || key || blake2b_512("SS58PRE" || prefix || key)[..2])`

use blake2::{Blake2b512, Digest};

use crate::constants::{PUBLIC_KEY_LEN, SS58_MAX_PREFIX};
use crate::error::LockdropError;
use crate::types::PublicKey;

const SS58_CONTEXT: &[u8] = b"SS58PRE";
const CHECKSUM_LEN: usize = 2;

fn prefix_bytes(prefix: u16) -> Result<Vec<u8>, String> {
    match prefix {
        0..=63 => Ok(vec![prefix as u8]),
        64..=SS58_MAX_PREFIX => {
            let first = ((prefix & 0b0000_0000_1111_1100) as u8 >> 2) | 0b0100_0000;
            let second = (prefix >> 8) as u8 | ((prefix & 0b0000_0000_0000_0011) as u8) << 6;
            Ok(vec![first, second])
        }
        _ => Err(format!("prefix {prefix} exceeds {SS58_MAX_PREFIX}")),
    }
}

fn checksum(body: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut hasher = Blake2b512::new();
    hasher.update(SS58_CONTEXT);
    hasher.update(body);
    let digest = hasher.finalize();
    [digest[0], digest[1]]
}

/// Encode raw key bytes under `prefix`. Only 32-byte keys are accepted.
pub fn encode_bytes(key: &[u8], prefix: u16) -> Result<String, LockdropError> {
    let fail = |reason: String| LockdropError::KeyEncoding {
        key: format!("0x{}", hex::encode(key)),
        reason,
    };
    if key.len() != PUBLIC_KEY_LEN {
        return Err(fail(format!("expected {PUBLIC_KEY_LEN} bytes, got {}", key.len())));
    }
    let mut body = prefix_bytes(prefix).map_err(fail)?;
    body.extend_from_slice(key);
    let sum = checksum(&body);
    body.extend_from_slice(&sum);
    Ok(bs58::encode(body).into_string())
}

pub fn encode(key: &PublicKey, prefix: u16) -> Result<String, LockdropError> {
    encode_bytes(key.as_bytes(), prefix)
}

/// Decode an SS58 string into its prefix and public key, verifying the
/// checksum.
pub fn decode(address: &str) -> Result<(u16, PublicKey), LockdropError> {
    let invalid = |reason: &str| LockdropError::InvalidKey(format!("{address}: {reason}"));
    let data = bs58::decode(address)
        .into_vec()
        .map_err(|e| invalid(&e.to_string()))?;
    let first = *data.first().ok_or_else(|| invalid("empty address"))?;

    let (prefix, prefix_len) = match first {
        0..=63 => (first as u16, 1),
        64..=127 => {
            let second = *data.get(1).ok_or_else(|| invalid("truncated prefix"))?;
            let lower = (first << 2) | (second >> 6);
            let upper = second & 0b0011_1111;
            (lower as u16 | ((upper as u16) << 8), 2)
        }
        _ => return Err(invalid("reserved prefix")),
    };

    if data.len() != prefix_len + PUBLIC_KEY_LEN + CHECKSUM_LEN {
        return Err(invalid("unexpected length"));
    }
    let (body, sum) = data.split_at(prefix_len + PUBLIC_KEY_LEN);
    if checksum(body) != sum {
        return Err(invalid("checksum mismatch"));
    }
    Ok((prefix, PublicKey::from_slice(&body[prefix_len..])?))
}
