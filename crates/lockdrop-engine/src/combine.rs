//! Merge independently produced entries into one record per key, and
//! reconcile the result against the configured supply.

use std::collections::BTreeMap;

use alloy_primitives::U256;
use lockdrop_core::error::LockdropError;
use lockdrop_core::serde_decimal;
use lockdrop_core::types::{Balance, PublicKey};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::apportion::{BalanceEntry, VestingEntry};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Combined {
    pub balances: Vec<BalanceEntry>,
    pub vesting: Vec<VestingEntry>,
    pub total: Balance,
}

/// Group balances and vesting by key.
///
/// A key's vesting entry keeps the summed vested amount and its liquid
/// amount is recomputed against the combined balance. When the liquid
/// amount equals the whole balance nothing vests and the entry is dropped.
pub fn combine(balances: Vec<BalanceEntry>, vesting: Vec<VestingEntry>) -> Combined {
    let mut balance_map: BTreeMap<PublicKey, Balance> = BTreeMap::new();
    for entry in balances {
        *balance_map.entry(entry.key).or_default() += entry.amount;
    }

    let mut vesting_map: BTreeMap<PublicKey, VestingEntry> = BTreeMap::new();
    for entry in vesting {
        vesting_map
            .entry(entry.key)
            .and_modify(|v| v.vested_amount += entry.vested_amount)
            .or_insert(entry);
    }

    let vesting = vesting_map
        .into_values()
        .filter_map(|mut v| {
            let balance = balance_map.get(&v.key).copied().unwrap_or_default();
            v.vested_amount = v.vested_amount.min(balance);
            v.liquid_at_launch = balance - v.vested_amount;
            (v.liquid_at_launch != balance).then_some(v)
        })
        .collect();

    let total = balance_map.values().fold(U256::ZERO, |acc, b| acc + *b);
    let balances = balance_map
        .into_iter()
        .map(|(key, amount)| BalanceEntry { key, amount })
        .collect();

    Combined {
        balances,
        vesting,
        total,
    }
}

/// Allocated total measured against the configured supply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    #[serde(with = "serde_decimal")]
    pub configured_supply: Balance,
    #[serde(with = "serde_decimal")]
    pub allocated_total: Balance,
    #[serde(with = "serde_decimal")]
    pub shortfall: Balance,
    /// Largest shortfall explained by floor rounding and dropped
    /// contributions.
    #[serde(with = "serde_decimal")]
    pub tolerance: Balance,
    pub needs_review: bool,
}

/// Compare `allocated` with `supply`.
///
/// Each apportioned entry loses strictly less than one token to flooring;
/// `dropped_tokens` is the share of contributions that were never minted.
/// Allocating more than the supply is fatal.
pub fn reconcile(
    allocated: Balance,
    supply: Balance,
    apportioned_entries: usize,
    dropped_tokens: Balance,
) -> Result<Reconciliation, LockdropError> {
    if allocated > supply {
        return Err(LockdropError::SupplyExceeded { supply, allocated });
    }
    let shortfall = supply - allocated;
    let tolerance = U256::from(apportioned_entries) + dropped_tokens + U256::from(1u64);
    let needs_review = shortfall > tolerance;

    if needs_review {
        error!(%supply, %allocated, %shortfall, %tolerance, "allocation total outside tolerance; flagged for review");
    } else {
        info!(%supply, %allocated, %shortfall, "allocation reconciled");
    }

    Ok(Reconciliation {
        configured_supply: supply,
        allocated_total: allocated,
        shortfall,
        tolerance,
        needs_review,
    })
}
