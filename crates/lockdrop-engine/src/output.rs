//! The allocation document handed to genesis construction tooling.
//!
//! Lists are JSON arrays of tuples and every amount is a decimal string:
//!
//!   balances:   [[key, "amount"]]
//!   vesting:    [[key, total_blocks, starting_block, "liquid_at_launch"]]
//!   validators: [[stash, controller, session, "stake"]]

use lockdrop_core::error::LockdropError;
use lockdrop_core::ss58;
use lockdrop_core::types::PublicKey;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::aggregate::SnapshotTotals;
use crate::combine::Reconciliation;
use crate::config::KeyEncoding;
use crate::AllocationSnapshot;

impl KeyEncoding {
    pub fn encode(&self, key: &PublicKey) -> Result<String, LockdropError> {
        match self {
            KeyEncoding::Ss58 { prefix } => ss58::encode(key, *prefix),
            KeyEncoding::Hex => Ok(key.to_hex()),
        }
    }
}

/// Run metadata carried alongside the lists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSummary {
    pub bonus_policy: String,
    pub key_encoding: KeyEncoding,
    #[serde(default)]
    pub snapshot_block: Option<u64>,
    pub totals: SnapshotTotals,
    pub reconciliation: Reconciliation,
    pub unresolved_contributions: usize,
    pub duplicate_signals: usize,
    /// Entries dropped because their key could not be encoded.
    pub skipped_records: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAllocation {
    pub balances: Vec<(String, String)>,
    pub vesting: Vec<(String, u64, u64, String)>,
    pub validators: Vec<(String, String, String, String)>,
    pub summary: AllocationSummary,
}

impl GenesisAllocation {
    /// Render `snapshot` with keys in `encoding`. Validator keys are bare
    /// hex. A key that fails to encode is logged and left out.
    pub fn from_snapshot(snapshot: &AllocationSnapshot, encoding: &KeyEncoding) -> Self {
        let mut skipped = 0usize;
        let mut encode = |key: &PublicKey| match encoding.encode(key) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(%key, error = %e, "record skipped");
                skipped += 1;
                None
            }
        };

        let balances = snapshot
            .balances
            .iter()
            .filter_map(|b| Some((encode(&b.key)?, b.amount.to_string())))
            .collect();
        let vesting = snapshot
            .vesting
            .iter()
            .filter_map(|v| {
                Some((
                    encode(&v.key)?,
                    v.total_blocks,
                    v.starting_block,
                    v.liquid_at_launch.to_string(),
                ))
            })
            .collect();
        let validators = snapshot
            .validators
            .iter()
            .map(|c| {
                (
                    hex::encode(c.keys.stash.as_bytes()),
                    hex::encode(c.keys.controller.as_bytes()),
                    hex::encode(c.keys.session.as_bytes()),
                    c.stake.to_string(),
                )
            })
            .collect();

        GenesisAllocation {
            balances,
            vesting,
            validators,
            summary: AllocationSummary {
                bonus_policy: snapshot.bonus_policy.to_string(),
                key_encoding: *encoding,
                snapshot_block: snapshot.snapshot_block,
                totals: snapshot.totals.clone(),
                reconciliation: snapshot.reconciliation.clone(),
                unresolved_contributions: snapshot.unresolved.len(),
                duplicate_signals: snapshot.duplicate_signals,
                skipped_records: skipped,
            },
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, LockdropError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Balance allocated to `key`, if any.
    pub fn balance_of(&self, key: &PublicKey) -> Result<Option<&str>, LockdropError> {
        let encoded = self.summary.key_encoding.encode(key)?;
        Ok(self
            .balances
            .iter()
            .find(|(k, _)| *k == encoded)
            .map(|(_, amount)| amount.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_and_ss58_encodings() {
        let key = PublicKey::from_hex(
            "0x3c547c5e55d74825c32b36b2126e98ab4863761781e60404f029bd3553b77218",
        )
        .unwrap();
        assert_eq!(
            KeyEncoding::default().encode(&key).unwrap(),
            "5DRopxst3rkVSoD4kZ1ZCerh7dEweEpMaRNWPADNiwFLfQqQ"
        );
        assert_eq!(KeyEncoding::Hex.encode(&key).unwrap(), key.to_hex());
    }

    fn two_lock_snapshot() -> AllocationSnapshot {
        use alloy_primitives::{Address, U256};
        use lockdrop_core::event::{ParticipationEvent, SnapshotInput, Term};
        use lockdrop_core::types::DestinationKey;

        let lock = |n: u8, term| {
            ParticipationEvent::lock(
                Address::repeat_byte(0xEE),
                Address::repeat_byte(n),
                DestinationKey::new(vec![n; 32]),
                U256::from(1_000u64 * u64::from(n)),
                term,
                1_559_347_200,
                false,
            )
        };
        let input = SnapshotInput {
            schedule_start: 1_559_347_200,
            snapshot_block: Some(10),
            events: vec![lock(1, Term::ShortTerm), lock(2, Term::LongTerm)],
            ..SnapshotInput::default()
        };
        let engine = crate::AllocationEngine::new(crate::EngineConfig {
            total_allocation: U256::from(1_000_000u64),
            ..crate::EngineConfig::default()
        })
        .unwrap();
        engine.run(&input).unwrap()
    }

    #[test]
    fn unencodable_keys_are_skipped_and_counted() {
        let snapshot = two_lock_snapshot();
        let records = snapshot.balances.len() + snapshot.vesting.len();
        assert!(records >= 2);

        let doc = GenesisAllocation::from_snapshot(&snapshot, &KeyEncoding::Ss58 { prefix: u16::MAX });
        assert!(doc.balances.is_empty());
        assert!(doc.vesting.is_empty());
        assert_eq!(doc.summary.skipped_records, records);
        assert_eq!(doc.validators.len(), snapshot.validators.len());

        let doc = GenesisAllocation::from_snapshot(&snapshot, &KeyEncoding::Hex);
        assert_eq!(doc.balances.len(), snapshot.balances.len());
        assert_eq!(doc.summary.skipped_records, 0);
    }

    #[test]
    fn bad_prefix_is_a_per_record_error() {
        let err = KeyEncoding::Ss58 { prefix: u16::MAX }
            .encode(&PublicKey::null())
            .unwrap_err();
        assert!(err.is_per_record());
    }
}
