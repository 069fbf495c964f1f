use lockdrop_core::error::LockdropError;
use lockdrop_core::event::Term;
use lockdrop_core::types::Balance;

use crate::bonus::{bonus_factor, BonusPolicy, LockTiming, TermBonuses};

/// Weighted value of one participation: `floor(raw × bonus_factor)`.
///
/// Pure; an unrecognized term yields zero rather than an error.
pub fn effective_value(
    raw: Balance,
    term: Term,
    timing: Option<&LockTiming>,
    policy: &dyn BonusPolicy,
    bonuses: &TermBonuses,
) -> Result<Balance, LockdropError> {
    bonus_factor(term, timing, policy, bonuses).apply(raw)
}
