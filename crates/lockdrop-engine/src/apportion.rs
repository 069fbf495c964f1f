//! Pro-rata apportionment of the genesis supply.
//!
//! Every key receives `floor(effective × supply / grand_total)`. Floor
//! rounding means the sum of all balances never exceeds the supply; the
//! remainder is reported, not minted.

use alloy_primitives::U256;
use lockdrop_core::error::LockdropError;
use lockdrop_core::serde_decimal;
use lockdrop_core::types::{Balance, PublicKey};
use serde::Serialize;
use tracing::{debug, info};

use crate::aggregate::{AggregateBook, AggregateRecord};
use crate::config::{LockedFundsVesting, ValidatorConfig, VestingConfig};

/// `floor(amount × supply / grand_total)`.
pub fn mul_by_allocation_fraction(
    amount: Balance,
    supply: Balance,
    grand_total: Balance,
) -> Result<Balance, LockdropError> {
    if grand_total.is_zero() {
        return Err(LockdropError::ZeroEffectiveValue);
    }
    let scaled = amount
        .checked_mul(supply)
        .ok_or(LockdropError::ArithmeticOverflow("allocation fraction"))?;
    Ok(scaled / grand_total)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BalanceEntry {
    pub key: PublicKey,
    #[serde(with = "serde_decimal")]
    pub amount: Balance,
}

/// Linear unlock of `vested_amount` over `total_blocks` from
/// `starting_block`. `liquid_at_launch` is the rest of the key's balance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VestingEntry {
    pub key: PublicKey,
    pub total_blocks: u64,
    pub starting_block: u64,
    #[serde(with = "serde_decimal")]
    pub vested_amount: Balance,
    #[serde(with = "serde_decimal")]
    pub liquid_at_launch: Balance,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Apportionment {
    pub balances: Vec<BalanceEntry>,
    pub vesting: Vec<VestingEntry>,
}

/// Policy knobs the apportioner reads from the engine configuration.
#[derive(Clone, Copy, Debug)]
pub struct ApportionPolicy<'a> {
    pub vesting: &'a VestingConfig,
    pub validators: &'a ValidatorConfig,
}

/// Split every aggregate into balance (and, where funds vest, vesting)
/// entries. Keys come out in canonical key order.
pub fn apportion(
    book: &AggregateBook,
    supply: Balance,
    grand_total: Balance,
    policy: &ApportionPolicy<'_>,
) -> Result<Apportionment, LockdropError> {
    if grand_total.is_zero() {
        return Err(LockdropError::ZeroEffectiveValue);
    }

    let mut out = Apportionment::default();
    let mut endowed = 0usize;
    for record in book.iter() {
        if apportion_record(record, supply, grand_total, policy, &mut out)? {
            endowed += 1;
        }
    }

    info!(
        balances = out.balances.len(),
        vesting = out.vesting.len(),
        endowed_controllers = endowed,
        "apportionment complete"
    );
    Ok(out)
}

/// Returns whether a controller key was endowed.
fn apportion_record(
    record: &AggregateRecord,
    supply: Balance,
    grand_total: Balance,
    policy: &ApportionPolicy<'_>,
    out: &mut Apportionment,
) -> Result<bool, LockdropError> {
    let token_balance = mul_by_allocation_fraction(record.total_effective_value(), supply, grand_total)?;
    let signal_tokens =
        mul_by_allocation_fraction(record.signaled_effective_value, supply, grand_total)?;
    // floor(a+b) >= floor(a) so this never underflows.
    let locked_tokens = token_balance - signal_tokens;

    let mut vested = policy.vesting.vested_portion(signal_tokens);
    if policy.vesting.locked_funds == LockedFundsVesting::Vested {
        vested += policy.vesting.vested_portion(locked_tokens);
    }

    let reserve = policy.validators.existential_reserve;
    let liquid = token_balance - vested;
    let controller = record.triple.map(|t| t.controller).filter(|_| {
        policy.validators.endow_controllers
            && !record.locked_amount.is_zero()
            && !reserve.is_zero()
            && liquid >= reserve
    });

    let stash_balance = match controller {
        Some(controller) => {
            debug!(stash = %record.key, %controller, %reserve, "controller endowed");
            out.balances.push(BalanceEntry {
                key: controller,
                amount: reserve,
            });
            token_balance - reserve
        }
        None => token_balance,
    };

    out.balances.push(BalanceEntry {
        key: record.key,
        amount: stash_balance,
    });
    if !vested.is_zero() {
        out.vesting.push(VestingEntry {
            key: record.key,
            total_blocks: policy.vesting.total_blocks,
            starting_block: policy.vesting.starting_block,
            vested_amount: vested,
            liquid_at_launch: stash_balance - vested,
        });
    }
    Ok(controller.is_some())
}

/// Token-equivalent of contributions that could not be resolved to a key.
pub fn unresolved_tokens(
    unresolved_effective: Balance,
    supply: Balance,
    grand_total: Balance,
) -> Result<Balance, LockdropError> {
    if unresolved_effective.is_zero() {
        return Ok(U256::ZERO);
    }
    mul_by_allocation_fraction(unresolved_effective, supply, grand_total)
}

/// Balance entry crediting unresolved contributions to the null key.
pub fn burn_entry(tokens: Balance) -> Option<BalanceEntry> {
    (!tokens.is_zero()).then(|| BalanceEntry {
        key: PublicKey::null(),
        amount: tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Contribution;
    use lockdrop_core::types::{DestinationKey, EthAddress, KeyTriple};

    fn key(n: u8) -> PublicKey {
        PublicKey([n; 32])
    }

    fn contribution(raw: u64, effective: u64, is_signal: bool) -> Contribution {
        Contribution {
            source: EthAddress::repeat_byte(1),
            raw: U256::from(raw),
            effective: U256::from(effective),
            is_signal,
            is_validator: false,
        }
    }

    fn book(entries: &[(u8, u64, u64, bool)]) -> AggregateBook {
        let mut book = AggregateBook::new();
        for &(k, raw, eff, signal) in entries {
            let resolved = DestinationKey::new(vec![k; 32]).resolve().unwrap();
            book.upsert(resolved, &contribution(raw, eff, signal));
        }
        book
    }

    fn run(book: &AggregateBook, supply: u64, grand: u64, vesting: &VestingConfig, validators: &ValidatorConfig) -> Apportionment {
        let policy = ApportionPolicy { vesting, validators };
        apportion(book, U256::from(supply), U256::from(grand), &policy).unwrap()
    }

    #[test]
    fn zero_grand_total_is_fatal() {
        let b = book(&[(1, 0, 0, false)]);
        let policy = ApportionPolicy {
            vesting: &VestingConfig::default(),
            validators: &ValidatorConfig::default(),
        };
        let err = apportion(&b, U256::from(100u64), U256::ZERO, &policy).unwrap_err();
        assert!(matches!(err, LockdropError::ZeroEffectiveValue));
        assert!(matches!(
            mul_by_allocation_fraction(U256::from(1u64), U256::from(1u64), U256::ZERO),
            Err(LockdropError::ZeroEffectiveValue)
        ));
    }

    #[test]
    fn balances_are_floored_and_never_exceed_supply() {
        let b = book(&[(1, 1, 1, false), (2, 1, 1, false), (3, 1, 1, false)]);
        let out = run(&b, 100, 3, &VestingConfig::default(), &ValidatorConfig::default());
        let amounts: Vec<_> = out.balances.iter().map(|e| e.amount).collect();
        assert_eq!(amounts, vec![U256::from(33u64); 3]);
        assert!(out.vesting.is_empty(), "locked funds are liquid by default");
    }

    #[test]
    fn signal_tokens_vest_with_quarter_liquid() {
        let b = book(&[(1, 10, 40, true), (1, 10, 60, false)]);
        let out = run(&b, 1_000, 100, &VestingConfig::default(), &ValidatorConfig::default());
        assert_eq!(out.balances, vec![BalanceEntry { key: key(1), amount: U256::from(1_000u64) }]);
        let v = &out.vesting[0];
        // 400 signal tokens: 100 liquid, 300 vested; 600 locked tokens liquid.
        assert_eq!(v.vested_amount, U256::from(300u64));
        assert_eq!(v.liquid_at_launch, U256::from(700u64));
        assert_eq!(v.total_blocks, 5_256_000);
        assert_eq!(v.starting_block, 0);
    }

    #[test]
    fn locked_funds_can_vest_too() {
        let b = book(&[(1, 10, 100, false)]);
        let vesting = VestingConfig {
            locked_funds: LockedFundsVesting::Vested,
            ..VestingConfig::default()
        };
        let out = run(&b, 1_000, 100, &vesting, &ValidatorConfig::default());
        assert_eq!(out.vesting[0].vested_amount, U256::from(750u64));
        assert_eq!(out.vesting[0].liquid_at_launch, U256::from(250u64));
    }

    #[test]
    fn controller_endowment_splits_the_balance() {
        let mut raw = vec![1u8; 32];
        raw.extend_from_slice(&[2u8; 32]);
        raw.extend_from_slice(&[3u8; 32]);
        let resolved = DestinationKey::new(raw).resolve().unwrap();
        let mut b = AggregateBook::new();
        b.upsert(resolved, &contribution(10, 100, false));
        assert_eq!(
            b.get(&key(1)).unwrap().triple,
            Some(KeyTriple { stash: key(1), controller: key(2), session: key(3) })
        );

        let validators = ValidatorConfig {
            existential_reserve: U256::from(10u64),
            endow_controllers: true,
            ..ValidatorConfig::default()
        };
        let out = run(&b, 1_000, 100, &VestingConfig::default(), &validators);
        assert_eq!(
            out.balances,
            vec![
                BalanceEntry { key: key(2), amount: U256::from(10u64) },
                BalanceEntry { key: key(1), amount: U256::from(990u64) },
            ]
        );

        // Disabled: stash keeps everything.
        let out = run(&b, 1_000, 100, &VestingConfig::default(), &ValidatorConfig::default());
        assert_eq!(out.balances.len(), 1);
    }

    #[test]
    fn burn_entry_targets_null_key() {
        let tokens = unresolved_tokens(U256::from(5u64), U256::from(100u64), U256::from(10u64)).unwrap();
        assert_eq!(tokens, U256::from(50u64));
        assert_eq!(burn_entry(tokens).unwrap().key, PublicKey::null());
        assert!(burn_entry(U256::ZERO).is_none());
    }
}
