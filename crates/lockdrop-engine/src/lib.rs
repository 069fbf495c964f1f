//! lockdrop-engine
//!
//! The allocation engine: turns a fully fetched lockdrop snapshot into the
//! genesis balance, vesting and validator lists.
//!
//!   events ─▶ aggregate ─▶ apportion ─▶ combine ─▶ balances / vesting
//!                 │
//!                 └──────▶ select_validators ─▶ validators
//!
//! A run is a pure function of `SnapshotInput` and `EngineConfig`: no I/O,
//! no clocks, no shared state between runs.

pub mod aggregate;
pub mod apportion;
pub mod bonus;
pub mod combine;
pub mod config;
pub mod effective;
pub mod output;
pub mod validators;

pub use aggregate::{AggregateBook, AggregateRecord, SnapshotTotals, UnresolvedContribution};
pub use apportion::{BalanceEntry, VestingEntry};
pub use combine::Reconciliation;
pub use config::EngineConfig;
pub use output::GenesisAllocation;
pub use validators::ValidatorCandidate;

use alloy_primitives::U256;
use lockdrop_core::error::LockdropError;
use lockdrop_core::event::SnapshotInput;
use lockdrop_core::types::{BlockNumber, PublicKey};
use tracing::{info, warn};

use aggregate::{aggregate, AggregationContext};
use apportion::{apportion, burn_entry, unresolved_tokens, ApportionPolicy};
use bonus::BonusPolicy;
use combine::{combine, reconcile};
use config::UnresolvedKeyPolicy;
use validators::select_validators;

/// Everything one engine run produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationSnapshot {
    pub bonus_policy: &'static str,
    pub snapshot_block: Option<BlockNumber>,
    pub aggregates: AggregateBook,
    pub totals: SnapshotTotals,
    pub unresolved: Vec<UnresolvedContribution>,
    pub duplicate_signals: usize,
    /// One entry per key, in key order.
    pub balances: Vec<BalanceEntry>,
    pub vesting: Vec<VestingEntry>,
    pub validators: Vec<ValidatorCandidate>,
    pub reconciliation: Reconciliation,
    /// A participant's own key is the null key, so their allocation and the
    /// burned tokens share one balance entry.
    pub null_key_collision: bool,
}

#[derive(Debug)]
pub struct AllocationEngine {
    config: EngineConfig,
    policy: Box<dyn BonusPolicy>,
}

impl AllocationEngine {
    pub fn new(config: EngineConfig) -> Result<Self, LockdropError> {
        config.validate()?;
        let policy = config.bonus_policy.build();
        info!(
            bonus_policy = policy.name(),
            total_allocation = %config.total_allocation,
            "allocation engine configured"
        );
        Ok(Self { config, policy })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Run the full pipeline over `input`.
    ///
    /// Fails without partial output on a zero grand total, a missing signal
    /// balance, arithmetic overflow, or an allocated total above supply.
    pub fn run(&self, input: &SnapshotInput) -> Result<AllocationSnapshot, LockdropError> {
        info!(
            events = input.events.len(),
            signal_balances = input.signal_balances.len(),
            schedule_start = input.schedule_start,
            "running allocation"
        );

        // ── 1. Aggregate ─────────────────────────────────────────────────────
        let ctx = AggregationContext {
            policy: self.policy.as_ref(),
            bonuses: &self.config.term_bonuses,
            overlap: self.config.signal_overlap,
        };
        let outcome = aggregate(&input.events, input.schedule_start, &input.signal_balances, &ctx)?;
        let grand_total = outcome.grand_total_effective();
        if grand_total.is_zero() {
            return Err(LockdropError::ZeroEffectiveValue);
        }
        let supply = self.config.total_allocation;

        // ── 2. Apportion ─────────────────────────────────────────────────────
        let apportionment = apportion(
            &outcome.book,
            supply,
            grand_total,
            &ApportionPolicy {
                vesting: &self.config.vesting,
                validators: &self.config.validators,
            },
        )?;
        let mut balances = apportionment.balances;

        // ── 3. Unresolved contributions ──────────────────────────────────────
        let unresolved = unresolved_tokens(outcome.unresolved_effective_value(), supply, grand_total)?;
        let mut null_key_collision = false;
        let dropped = match self.config.unresolved_keys {
            UnresolvedKeyPolicy::Burn => {
                if let Some(entry) = burn_entry(unresolved) {
                    warn!(tokens = %entry.amount, "unresolved contributions credited to the null key");
                    if let Some(record) = outcome.book.get(&PublicKey::null()) {
                        null_key_collision = true;
                        warn!(
                            effective = %record.total_effective_value(),
                            burned = %entry.amount,
                            "participant locked to the null key; their allocation merges with burned tokens"
                        );
                    }
                    balances.push(entry);
                }
                U256::ZERO
            }
            UnresolvedKeyPolicy::Drop => {
                if !unresolved.is_zero() {
                    warn!(tokens = %unresolved, "unresolved contributions dropped from the output");
                }
                unresolved
            }
        };
        let apportioned_entries = balances.len();

        // ── 4. Combine ───────────────────────────────────────────────────────
        let combined = combine(balances, apportionment.vesting);

        // ── 5. Validators ────────────────────────────────────────────────────
        let validators = select_validators(
            &outcome.book,
            supply,
            grand_total,
            self.config.validators.max_count,
            self.config.validators.existential_reserve,
        )?;

        // ── 6. Reconcile ─────────────────────────────────────────────────────
        let reconciliation = reconcile(combined.total, supply, apportioned_entries, dropped)?;

        info!(
            keys = combined.balances.len(),
            vesting = combined.vesting.len(),
            validators = validators.len(),
            allocated = %combined.total,
            "allocation complete"
        );

        Ok(AllocationSnapshot {
            bonus_policy: self.policy.name(),
            snapshot_block: input.snapshot_block,
            aggregates: outcome.book,
            totals: outcome.totals,
            unresolved: outcome.unresolved,
            duplicate_signals: outcome.duplicate_signals,
            balances: combined.balances,
            vesting: combined.vesting,
            validators,
            reconciliation,
            null_key_collision,
        })
    }

    /// Run and render in the configured key encoding.
    pub fn allocate(&self, input: &SnapshotInput) -> Result<GenesisAllocation, LockdropError> {
        let snapshot = self.run(input)?;
        Ok(GenesisAllocation::from_snapshot(&snapshot, &self.config.key_encoding))
    }
}
