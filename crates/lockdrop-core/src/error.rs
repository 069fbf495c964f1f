use thiserror::Error;

use crate::types::{Balance, EthAddress};

#[derive(Debug, Error)]
pub enum LockdropError {
    // ── Fatal / precondition ─────────────────────────────────────────────────
    #[error("grand total effective value is zero; refusing to apportion")]
    ZeroEffectiveValue,

    #[error("no balance snapshot for signaling contract {0}")]
    MissingSignalBalance(EthAddress),

    #[error("allocated total {allocated} exceeds configured supply {supply}")]
    SupplyExceeded { supply: Balance, allocated: Balance },

    #[error("arithmetic overflow while computing {0}")]
    ArithmeticOverflow(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Per-record ───────────────────────────────────────────────────────────
    #[error("malformed destination key from {source_address}: {len} bytes, need at least {min}")]
    MalformedKey {
        source_address: EthAddress,
        len: usize,
        min: usize,
    },

    #[error("cannot encode key {key}: {reason}")]
    KeyEncoding { key: String, reason: String },

    // ── Parsing / serialization ──────────────────────────────────────────────
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid decimal amount: {0}")]
    InvalidAmount(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl LockdropError {
    /// Errors that only disqualify a single record. The engine logs and
    /// skips these; everything else aborts the run.
    pub fn is_per_record(&self) -> bool {
        matches!(
            self,
            LockdropError::MalformedKey { .. } | LockdropError::KeyEncoding { .. }
        )
    }
}

impl From<serde_json::Error> for LockdropError {
    fn from(e: serde_json::Error) -> Self {
        LockdropError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_record_classification() {
        let malformed = LockdropError::MalformedKey {
            source_address: EthAddress::ZERO,
            len: 4,
            min: 32,
        };
        assert!(malformed.is_per_record());
        assert!(!LockdropError::ZeroEffectiveValue.is_per_record());
        assert!(!LockdropError::MissingSignalBalance(EthAddress::ZERO).is_per_record());
    }
}
