//! Term and early-participation bonuses.
//!
//! Every participation is valued at `raw × factor / 100`, where
//!
//!   lock:   factor = 100 + term_bonus + early_bonus
//!   signal: factor = 100 − signal_deduction
//!   other:  factor = 0
//!
//! The early bonus is supplied by a swappable [`BonusPolicy`] so historical
//! runs stay reproducible under the policy they were computed with.

use std::fmt;

use alloy_primitives::U256;
use lockdrop_core::constants::{
    LONG_TERM_BONUS_PERCENT, MEDIUM_TERM_BONUS_PERCENT, PERCENT_DENOMINATOR,
    SHORT_TERM_BONUS_PERCENT, SIGNAL_DEDUCTION_PERCENT,
};
use lockdrop_core::error::LockdropError;
use lockdrop_core::event::Term;
use lockdrop_core::serde_decimal;
use lockdrop_core::types::{Balance, Timestamp};
use serde::{Deserialize, Serialize};

/// Baseline percentage points per term class.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TermBonuses {
    pub short_term: u64,
    pub medium_term: u64,
    pub long_term: u64,
    /// Deducted from signaled balances.
    pub signal_deduction: u64,
}

impl Default for TermBonuses {
    fn default() -> Self {
        Self {
            short_term: SHORT_TERM_BONUS_PERCENT,
            medium_term: MEDIUM_TERM_BONUS_PERCENT,
            long_term: LONG_TERM_BONUS_PERCENT,
            signal_deduction: SIGNAL_DEDUCTION_PERCENT,
        }
    }
}

/// Rational multiplier `percent / 100`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct BonusFactor {
    pub percent: u64,
}

impl BonusFactor {
    pub const ZERO: Self = Self { percent: 0 };
    pub const UNIT: Self = Self {
        percent: PERCENT_DENOMINATOR,
    };

    /// `floor(raw × percent / 100)`.
    pub fn apply(&self, raw: Balance) -> Result<Balance, LockdropError> {
        let scaled = raw
            .checked_mul(U256::from(self.percent))
            .ok_or(LockdropError::ArithmeticOverflow("bonus factor"))?;
        Ok(scaled / U256::from(PERCENT_DENOMINATOR))
    }
}

/// Timing context of a single lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockTiming {
    pub lock_time: Timestamp,
    pub schedule_start: Timestamp,
    /// Total wei locked by all earlier locks, in chain order.
    pub locked_before: Balance,
}

/// Additive early-participation bonus.
pub trait BonusPolicy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Percentage points added to a lock's term bonus.
    fn early_bonus(&self, timing: &LockTiming) -> u64;
}

/// Baseline: term bonuses only.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoEarlyBonus;

impl BonusPolicy for NoEarlyBonus {
    fn name(&self) -> &'static str {
        "none"
    }

    fn early_bonus(&self, _timing: &LockTiming) -> u64 {
        0
    }
}

/// Step function of time since the schedule start.
///
/// Window `i` covers `(start + i×w, start + (i+1)×w]`; the first window also
/// includes everything at or before the start. Past the last tier the bonus
/// is zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeTieredBonus {
    pub window_secs: u64,
    pub tiers: Vec<u64>,
}

impl TimeTieredBonus {
    pub fn window_index(&self, timing: &LockTiming) -> usize {
        let elapsed = timing.lock_time.saturating_sub(timing.schedule_start);
        if elapsed == 0 || self.window_secs == 0 {
            return 0;
        }
        usize::try_from((elapsed - 1) / self.window_secs).unwrap_or(usize::MAX)
    }
}

impl BonusPolicy for TimeTieredBonus {
    fn name(&self) -> &'static str {
        "fixed_schedule"
    }

    fn early_bonus(&self, timing: &LockTiming) -> u64 {
        self.tiers
            .get(self.window_index(timing))
            .copied()
            .unwrap_or(0)
    }
}

/// Cumulative-volume cap: applies while fewer than `below` wei were locked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeTier {
    #[serde(with = "serde_decimal")]
    pub below: Balance,
    pub bonus: u64,
}

/// Time tier capped by the volume tier: `min(time_bonus, volume_bonus)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HybridBonus {
    pub time: TimeTieredBonus,
    pub volume_tiers: Vec<VolumeTier>,
}

impl HybridBonus {
    pub fn volume_cap(&self, locked_before: Balance) -> u64 {
        self.volume_tiers
            .iter()
            .find(|tier| locked_before < tier.below)
            .map(|tier| tier.bonus)
            .unwrap_or(0)
    }
}

impl BonusPolicy for HybridBonus {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn early_bonus(&self, timing: &LockTiming) -> u64 {
        self.time
            .early_bonus(timing)
            .min(self.volume_cap(timing.locked_before))
    }
}

/// Multiplier for one participation.
///
/// The early bonus is only consulted for lock terms with timing; signals and
/// unrecognized terms never receive it.
pub fn bonus_factor(
    term: Term,
    timing: Option<&LockTiming>,
    policy: &dyn BonusPolicy,
    bonuses: &TermBonuses,
) -> BonusFactor {
    let early = || timing.map(|t| policy.early_bonus(t)).unwrap_or(0);
    match term {
        Term::ShortTerm => BonusFactor {
            percent: PERCENT_DENOMINATOR + bonuses.short_term + early(),
        },
        Term::MediumTerm => BonusFactor {
            percent: PERCENT_DENOMINATOR + bonuses.medium_term + early(),
        },
        Term::LongTerm => BonusFactor {
            percent: PERCENT_DENOMINATOR + bonuses.long_term + early(),
        },
        Term::Signaled => BonusFactor {
            percent: PERCENT_DENOMINATOR.saturating_sub(bonuses.signal_deduction),
        },
        Term::Unrecognized(_) => BonusFactor::ZERO,
    }
}
