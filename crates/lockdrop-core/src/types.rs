use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::constants::{KEY_TRIPLE_LEN, PUBLIC_KEY_LEN};
use crate::error::LockdropError;

/// Amount in the smallest currency unit (wei, or token base units after
/// apportionment). 256 bits holds supply × effective value without overflow.
pub type Balance = alloy_primitives::U256;

/// Ethereum account or contract address.
pub type EthAddress = alloy_primitives::Address;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = u64;

/// Ethereum block height.
pub type BlockNumber = u64;

fn decode_hex(s: &str) -> Result<Vec<u8>, LockdropError> {
    let stripped = s.trim().trim_start_matches("0x");
    hex::decode(stripped).map_err(|e| LockdropError::InvalidKey(format!("{s}: {e}")))
}

// ── PublicKey ────────────────────────────────────────────────────────────────

/// 32-byte public key on the destination chain. The canonical key of a
/// destination is always one of these.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(b: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(b)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, LockdropError> {
        let arr: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| {
            LockdropError::InvalidKey(format!(
                "expected {PUBLIC_KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// The all-zero key. Burned allocations are parked here.
    pub fn null() -> Self {
        Self([0u8; PUBLIC_KEY_LEN])
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// 0x-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, LockdropError> {
        Self::from_slice(&decode_hex(s)?)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}…)", &self.to_hex()[..18])
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(D::Error::custom)
    }
}

// ── KeyTriple ────────────────────────────────────────────────────────────────

/// Validator identity submitted as one concatenated destination key.
/// Ordered field by field, stash first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyTriple {
    pub stash: PublicKey,
    pub controller: PublicKey,
    pub session: PublicKey,
}

// ── DestinationKey ───────────────────────────────────────────────────────────

/// Raw key material exactly as emitted by the escrow contract. Usually one
/// 32-byte key; validators submit three concatenated keys.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct DestinationKey(pub Vec<u8>);

/// A destination key split into its canonical key and, when the raw bytes
/// hold exactly three keys, the validator triple.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedKey {
    pub canonical: PublicKey,
    pub triple: Option<KeyTriple>,
}

impl DestinationKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, LockdropError> {
        Ok(Self(decode_hex(s)?))
    }

    /// Returns `None` when the material is shorter than one public key.
    ///
    /// Trailing bytes that do not form a whole key are ignored for the
    /// canonical key but disqualify the triple.
    pub fn resolve(&self) -> Option<ResolvedKey> {
        if self.0.len() < PUBLIC_KEY_LEN {
            return None;
        }
        let mut chunks = self.0.chunks_exact(PUBLIC_KEY_LEN);
        let canonical = PublicKey::from_slice(chunks.next()?).ok()?;

        let triple = if self.0.len() == KEY_TRIPLE_LEN {
            let controller = PublicKey::from_slice(chunks.next()?).ok()?;
            let session = PublicKey::from_slice(chunks.next()?).ok()?;
            Some(KeyTriple {
                stash: canonical,
                controller,
                session,
            })
        } else {
            None
        };

        Some(ResolvedKey { canonical, triple })
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DestinationKey({}b)", self.0.len())
    }
}

impl Serialize for DestinationKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for DestinationKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(D::Error::custom)
    }
}
