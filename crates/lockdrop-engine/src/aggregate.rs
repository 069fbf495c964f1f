//! Single-pass fold of participation events into per-key aggregates.

use std::collections::{BTreeMap, HashSet};

use lockdrop_core::constants::PUBLIC_KEY_LEN;
use lockdrop_core::error::LockdropError;
use lockdrop_core::event::{ParticipationEvent, SignalBalances};
use lockdrop_core::serde_decimal;
use lockdrop_core::types::{Balance, DestinationKey, EthAddress, KeyTriple, PublicKey, ResolvedKey, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bonus::{BonusPolicy, LockTiming, TermBonuses};
use crate::config::SignalOverlap;
use crate::effective::effective_value;

/// Merged contribution of every event resolving to one canonical key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AggregateRecord {
    pub key: PublicKey,
    /// Validator identity. When events disagree, the smallest triple wins
    /// so the choice does not depend on event order.
    pub triple: Option<KeyTriple>,
    #[serde(with = "serde_decimal")]
    pub locked_amount: Balance,
    #[serde(with = "serde_decimal")]
    pub signaled_amount: Balance,
    #[serde(with = "serde_decimal")]
    pub locked_effective_value: Balance,
    #[serde(with = "serde_decimal")]
    pub signaled_effective_value: Balance,
    /// Discovery order.
    pub contributing_source_addresses: Vec<EthAddress>,
    pub is_validator_candidate: bool,
}

impl AggregateRecord {
    fn new(key: PublicKey) -> Self {
        Self {
            key,
            triple: None,
            locked_amount: Balance::ZERO,
            signaled_amount: Balance::ZERO,
            locked_effective_value: Balance::ZERO,
            signaled_effective_value: Balance::ZERO,
            contributing_source_addresses: Vec::new(),
            is_validator_candidate: false,
        }
    }

    pub fn total_raw_amount(&self) -> Balance {
        self.locked_amount + self.signaled_amount
    }

    pub fn total_effective_value(&self) -> Balance {
        self.locked_effective_value + self.signaled_effective_value
    }

    fn absorb(&mut self, c: &Contribution) {
        if c.is_signal {
            self.signaled_amount += c.raw;
            self.signaled_effective_value += c.effective;
        } else {
            self.locked_amount += c.raw;
            self.locked_effective_value += c.effective;
        }
        self.contributing_source_addresses.push(c.source);
        self.is_validator_candidate |= c.is_validator;
    }
}

/// One event's valued contribution, ready to merge.
#[derive(Clone, Copy, Debug)]
pub struct Contribution {
    pub source: EthAddress,
    pub raw: Balance,
    pub effective: Balance,
    pub is_signal: bool,
    pub is_validator: bool,
}

/// Canonical key → aggregate. Iteration is in key order, so everything
/// derived from the book is independent of event order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregateBook {
    records: BTreeMap<PublicKey, AggregateRecord>,
}

impl AggregateBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookup-or-insert, then merge.
    pub fn upsert(&mut self, resolved: ResolvedKey, contribution: &Contribution) {
        let record = self
            .records
            .entry(resolved.canonical)
            .or_insert_with(|| AggregateRecord::new(resolved.canonical));

        match (record.triple, resolved.triple) {
            (None, Some(triple)) => record.triple = Some(triple),
            (Some(existing), Some(triple)) if existing != triple => {
                let kept = existing.min(triple);
                warn!(
                    key = %resolved.canonical,
                    controller = %kept.controller,
                    "conflicting key triples for one stash; smallest kept"
                );
                record.triple = Some(kept);
            }
            _ => {}
        }
        record.absorb(contribution);
    }

    pub fn get(&self, key: &PublicKey) -> Option<&AggregateRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AggregateRecord> {
        self.records.values()
    }

    pub fn validator_candidates(&self) -> impl Iterator<Item = &AggregateRecord> {
        self.records.values().filter(|r| r.is_validator_candidate)
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut AggregateRecord> {
        self.records.values_mut()
    }
}

/// Running totals across every event, resolved or not.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotTotals {
    #[serde(with = "serde_decimal")]
    pub total_eth_locked: Balance,
    #[serde(with = "serde_decimal")]
    pub total_eth_signaled: Balance,
    #[serde(with = "serde_decimal")]
    pub total_effective_locked: Balance,
    #[serde(with = "serde_decimal")]
    pub total_effective_signaled: Balance,
}

impl SnapshotTotals {
    pub fn grand_total_effective(&self) -> Balance {
        self.total_effective_locked + self.total_effective_signaled
    }
}

/// A contribution whose destination key is too short to resolve. Its value
/// stays in the grand total so other participants are not inflated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UnresolvedContribution {
    pub source_address: EthAddress,
    pub destination_key: DestinationKey,
    #[serde(with = "serde_decimal")]
    pub raw_amount: Balance,
    #[serde(with = "serde_decimal")]
    pub effective_value: Balance,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregationOutcome {
    pub book: AggregateBook,
    pub totals: SnapshotTotals,
    pub unresolved: Vec<UnresolvedContribution>,
    /// Signals ignored because their contract had already signaled.
    pub duplicate_signals: usize,
}

impl AggregationOutcome {
    pub fn grand_total_effective(&self) -> Balance {
        self.totals.grand_total_effective()
    }

    pub fn unresolved_effective_value(&self) -> Balance {
        self.unresolved
            .iter()
            .fold(Balance::ZERO, |acc, u| acc + u.effective_value)
    }
}

/// Valuation policy threaded through the fold.
#[derive(Clone, Copy, Debug)]
pub struct AggregationContext<'a> {
    pub policy: &'a dyn BonusPolicy,
    pub bonuses: &'a TermBonuses,
    pub overlap: SignalOverlap,
}

/// Fold `events` (chain order) into per-key aggregates.
///
/// Signals are valued at `balances[contract]`; only the first signal per
/// contract counts. A signal whose contract has no snapshot balance is a
/// fatal error: substituting zero would silently shift everyone's share.
pub fn aggregate(
    events: &[ParticipationEvent],
    schedule_start: Timestamp,
    balances: &SignalBalances,
    ctx: &AggregationContext<'_>,
) -> Result<AggregationOutcome, LockdropError> {
    let mut outcome = AggregationOutcome::default();
    let mut seen_contracts: HashSet<EthAddress> = HashSet::new();

    for event in events {
        let is_signal = event.is_signal();
        let (raw, timing) = if is_signal {
            let contract = event.signal_contract();
            if !seen_contracts.insert(contract) {
                outcome.duplicate_signals += 1;
                debug!(%contract, "duplicate signal ignored");
                continue;
            }
            let balance = balances
                .get(&contract)
                .copied()
                .ok_or(LockdropError::MissingSignalBalance(contract))?;
            (balance, None)
        } else {
            let timing = event.timestamp.map(|lock_time| LockTiming {
                lock_time,
                schedule_start,
                locked_before: outcome.totals.total_eth_locked,
            });
            (event.amount, timing)
        };

        let effective = effective_value(raw, event.term, timing.as_ref(), ctx.policy, ctx.bonuses)?;

        if is_signal {
            outcome.totals.total_eth_signaled += raw;
            outcome.totals.total_effective_signaled += effective;
        } else {
            outcome.totals.total_eth_locked += raw;
            outcome.totals.total_effective_locked += effective;
        }

        match event.destination_key.resolve() {
            Some(resolved) => outcome.book.upsert(
                resolved,
                &Contribution {
                    source: event.source_address,
                    raw,
                    effective,
                    is_signal,
                    is_validator: event.is_validator_candidate,
                },
            ),
            None => {
                let err = LockdropError::MalformedKey {
                    source_address: event.source_address,
                    len: event.destination_key.len(),
                    min: PUBLIC_KEY_LEN,
                };
                warn!(error = %err, key = %event.destination_key, "contribution kept in totals only");
                outcome.unresolved.push(UnresolvedContribution {
                    source_address: event.source_address,
                    destination_key: event.destination_key.clone(),
                    raw_amount: raw,
                    effective_value: effective,
                });
            }
        }
    }

    if ctx.overlap == SignalOverlap::ExcludeWhenLocked {
        exclude_overlapping_signals(&mut outcome);
    }

    info!(
        keys = outcome.book.len(),
        unresolved = outcome.unresolved.len(),
        duplicate_signals = outcome.duplicate_signals,
        total_eth_locked = %outcome.totals.total_eth_locked,
        total_eth_signaled = %outcome.totals.total_eth_signaled,
        grand_total_effective = %outcome.grand_total_effective(),
        "aggregation complete"
    );
    Ok(outcome)
}

/// Drop the signal side of keys that also locked, from both the record and
/// the grand totals.
fn exclude_overlapping_signals(outcome: &mut AggregationOutcome) {
    let mut excluded = 0usize;
    for record in outcome.book.iter_mut() {
        if record.locked_amount.is_zero() || record.signaled_amount.is_zero() {
            continue;
        }
        let totals = &mut outcome.totals;
        totals.total_eth_signaled = totals.total_eth_signaled.saturating_sub(record.signaled_amount);
        totals.total_effective_signaled = totals
            .total_effective_signaled
            .saturating_sub(record.signaled_effective_value);
        record.signaled_amount = Balance::ZERO;
        record.signaled_effective_value = Balance::ZERO;
        excluded += 1;
    }
    if excluded > 0 {
        info!(keys = excluded, "signal contributions excluded for keys that also locked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bonus::NoEarlyBonus;
    use lockdrop_core::constants::WEI_PER_ETH;
    use lockdrop_core::event::Term;

    fn eth(n: u128) -> Balance {
        Balance::from(n * WEI_PER_ETH)
    }

    fn addr(n: u8) -> EthAddress {
        EthAddress::repeat_byte(n)
    }

    fn dest(n: u8) -> DestinationKey {
        DestinationKey::new(vec![n; PUBLIC_KEY_LEN])
    }

    fn lock(source: u8, key: u8, amount: Balance, term: Term) -> ParticipationEvent {
        ParticipationEvent::lock(addr(0xEE), addr(source), dest(key), amount, term, 100, false)
    }

    fn run(events: &[ParticipationEvent], balances: &SignalBalances, overlap: SignalOverlap) -> AggregationOutcome {
        let bonuses = TermBonuses::default();
        let ctx = AggregationContext {
            policy: &NoEarlyBonus,
            bonuses: &bonuses,
            overlap,
        };
        aggregate(events, 0, balances, &ctx).unwrap()
    }

    #[test]
    fn two_locks_same_key_merge() {
        let events = [
            lock(1, 9, eth(1), Term::ShortTerm),
            lock(2, 9, eth(2), Term::ShortTerm),
        ];
        let out = run(&events, &SignalBalances::new(), SignalOverlap::Add);
        let rec = out.book.get(&PublicKey([9; 32])).unwrap();
        assert_eq!(rec.total_effective_value(), eth(3));
        assert_eq!(rec.total_raw_amount(), eth(3));
        assert_eq!(rec.contributing_source_addresses, vec![addr(1), addr(2)]);
        assert_eq!(out.grand_total_effective(), eth(3));
    }

    #[test]
    fn validator_flag_is_sticky() {
        let mut flagged = lock(2, 9, eth(1), Term::ShortTerm);
        flagged.is_validator_candidate = true;
        let events = [lock(1, 9, eth(1), Term::ShortTerm), flagged, lock(3, 9, eth(1), Term::ShortTerm)];
        let out = run(&events, &SignalBalances::new(), SignalOverlap::Add);
        assert!(out.book.get(&PublicKey([9; 32])).unwrap().is_validator_candidate);
        assert_eq!(out.book.validator_candidates().count(), 1);
    }

    #[test]
    fn signals_use_snapshot_balance_and_dedupe_by_contract() {
        let mut first = ParticipationEvent::signal(addr(5), dest(1), None);
        first.amount = eth(999);
        let second = ParticipationEvent::signal(addr(5), dest(2), None);
        let balances = SignalBalances::from([(addr(5), eth(10))]);

        let out = run(&[first, second], &balances, SignalOverlap::Add);
        assert_eq!(out.duplicate_signals, 1);
        assert_eq!(out.totals.total_eth_signaled, eth(10));
        assert_eq!(out.totals.total_effective_signaled, eth(2));
        assert!(out.book.get(&PublicKey([2; 32])).is_none());
        let rec = out.book.get(&PublicKey([1; 32])).unwrap();
        assert_eq!(rec.signaled_effective_value, eth(2));
    }

    #[test]
    fn missing_signal_balance_is_fatal() {
        let bonuses = TermBonuses::default();
        let ctx = AggregationContext {
            policy: &NoEarlyBonus,
            bonuses: &bonuses,
            overlap: SignalOverlap::Add,
        };
        let events = [ParticipationEvent::signal(addr(5), dest(1), None)];
        let err = aggregate(&events, 0, &SignalBalances::new(), &ctx).unwrap_err();
        assert!(matches!(err, LockdropError::MissingSignalBalance(a) if a == addr(5)));
    }

    #[test]
    fn short_keys_stay_in_totals_but_not_in_book() {
        let mut bad = lock(1, 0, eth(4), Term::ShortTerm);
        bad.destination_key = DestinationKey::new(vec![1u8; 20]);
        let events = [bad, lock(2, 7, eth(1), Term::ShortTerm)];
        let out = run(&events, &SignalBalances::new(), SignalOverlap::Add);
        assert_eq!(out.book.len(), 1);
        assert_eq!(out.unresolved.len(), 1);
        assert_eq!(out.unresolved_effective_value(), eth(4));
        assert_eq!(out.grand_total_effective(), eth(5));
    }

    #[test]
    fn overlap_policy_controls_signal_of_lockers() {
        let events = [
            lock(1, 9, eth(1), Term::ShortTerm),
            ParticipationEvent::signal(addr(5), dest(9), None),
            ParticipationEvent::signal(addr(6), dest(8), None),
        ];
        let balances = SignalBalances::from([(addr(5), eth(10)), (addr(6), eth(10))]);

        let added = run(&events, &balances, SignalOverlap::Add);
        assert_eq!(added.book.get(&PublicKey([9; 32])).unwrap().total_effective_value(), eth(3));
        assert_eq!(added.grand_total_effective(), eth(5));

        let excluded = run(&events, &balances, SignalOverlap::ExcludeWhenLocked);
        let rec = excluded.book.get(&PublicKey([9; 32])).unwrap();
        assert_eq!(rec.total_effective_value(), eth(1));
        assert_eq!(rec.signaled_amount, Balance::ZERO);
        // Pure signaler is untouched.
        assert_eq!(excluded.book.get(&PublicKey([8; 32])).unwrap().signaled_effective_value, eth(2));
        assert_eq!(excluded.grand_total_effective(), eth(3));
        assert_eq!(excluded.totals.total_eth_signaled, eth(10));
    }

    fn triple_dest(stash: u8, controller: u8, session: u8) -> DestinationKey {
        let mut raw = vec![stash; PUBLIC_KEY_LEN];
        raw.extend_from_slice(&[controller; PUBLIC_KEY_LEN]);
        raw.extend_from_slice(&[session; PUBLIC_KEY_LEN]);
        DestinationKey::new(raw)
    }

    #[test]
    fn conflicting_triples_resolve_the_same_in_any_order() {
        let a = ParticipationEvent::lock(addr(0xEE), addr(1), triple_dest(1, 9, 9), eth(1), Term::ShortTerm, 100, true);
        let b = ParticipationEvent::lock(addr(0xEE), addr(2), triple_dest(1, 2, 3), eth(1), Term::ShortTerm, 100, true);

        let ab = run(&[a.clone(), b.clone()], &SignalBalances::new(), SignalOverlap::Add);
        let ba = run(&[b, a], &SignalBalances::new(), SignalOverlap::Add);
        let triple_ab = ab.book.get(&PublicKey([1; 32])).unwrap().triple.unwrap();
        let triple_ba = ba.book.get(&PublicKey([1; 32])).unwrap().triple.unwrap();
        assert_eq!(triple_ab, triple_ba);
        assert_eq!(triple_ab.controller, PublicKey([2; 32]));
        assert_eq!(triple_ab.session, PublicKey([3; 32]));
    }

    #[test]
    fn unrecognized_term_counts_raw_but_no_value() {
        let events = [lock(1, 9, eth(1), Term::Unrecognized(4)), lock(2, 9, eth(1), Term::ShortTerm)];
        let out = run(&events, &SignalBalances::new(), SignalOverlap::Add);
        assert_eq!(out.totals.total_eth_locked, eth(2));
        assert_eq!(out.grand_total_effective(), eth(1));
    }
}
