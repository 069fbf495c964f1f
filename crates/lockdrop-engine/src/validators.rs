use std::cmp::Ordering;

use lockdrop_core::error::LockdropError;
use lockdrop_core::serde_decimal;
use lockdrop_core::types::{Balance, KeyTriple};
use serde::Serialize;
use tracing::{debug, info};

use crate::aggregate::AggregateBook;
use crate::apportion::mul_by_allocation_fraction;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidatorCandidate {
    pub keys: KeyTriple,
    #[serde(with = "serde_decimal")]
    pub stake: Balance,
}

/// Largest stake first; equal stakes ordered by stash key so the list is a
/// pure function of the book.
fn by_stake_desc(a: &ValidatorCandidate, b: &ValidatorCandidate) -> Ordering {
    b.stake
        .cmp(&a.stake)
        .then_with(|| a.keys.stash.cmp(&b.keys.stash))
}

/// Rank validator-flagged aggregates by stake.
///
/// stake = apportioned balance − `reserve`. Candidates without a full key
/// triple, or with nothing left to stake, keep their balance but are not
/// listed.
pub fn select_validators(
    book: &AggregateBook,
    supply: Balance,
    grand_total: Balance,
    max_count: Option<usize>,
    reserve: Balance,
) -> Result<Vec<ValidatorCandidate>, LockdropError> {
    let mut candidates = Vec::new();
    for record in book.validator_candidates() {
        let Some(keys) = record.triple else {
            debug!(key = %record.key, "validator candidate without key triple skipped");
            continue;
        };
        let balance = mul_by_allocation_fraction(record.total_effective_value(), supply, grand_total)?;
        let stake = balance.saturating_sub(reserve);
        if stake.is_zero() {
            debug!(key = %record.key, %balance, "validator candidate below reserve skipped");
            continue;
        }
        candidates.push(ValidatorCandidate { keys, stake });
    }

    candidates.sort_by(by_stake_desc);
    let eligible = candidates.len();
    if let Some(max) = max_count {
        candidates.truncate(max);
    }

    info!(eligible, selected = candidates.len(), "validator selection complete");
    Ok(candidates)
}
