//! Decimal-string serde for `Balance`.
//!
//! alloy's own serde impl writes `U256` as a 0x-prefixed hex quantity. Every
//! amount this workspace reads or writes is a base-10 string instead, so
//! values near 1e27 survive JSON tooling that would otherwise coerce them to
//! floats.

use std::collections::BTreeMap;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::LockdropError;
use crate::types::Balance;

/// Parse a base-10 integer string. Hex and signs are rejected.
pub fn parse_balance(s: &str) -> Result<Balance, LockdropError> {
    let trimmed = s.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(LockdropError::InvalidAmount(s.to_string()));
    }
    Balance::from_str_radix(trimmed, 10).map_err(|e| LockdropError::InvalidAmount(format!("{s}: {e}")))
}

pub fn serialize<S: Serializer>(value: &Balance, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Balance, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse_balance(&s).map_err(D::Error::custom)
}

/// `BTreeMap<K, Balance>` with decimal-string values.
pub mod map {
    use super::*;

    pub fn serialize<K, S>(value: &BTreeMap<K, Balance>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize + Ord,
        S: Serializer,
    {
        let as_strings: BTreeMap<&K, String> =
            value.iter().map(|(k, v)| (k, v.to_string())).collect();
        as_strings.serialize(serializer)
    }

    pub fn deserialize<'de, K, D>(deserializer: D) -> Result<BTreeMap<K, Balance>, D::Error>
    where
        K: DeserializeOwned + Ord,
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<K, String>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(k, v)| parse_balance(&v).map(|b| (k, b)).map_err(D::Error::custom))
            .collect()
    }
}
