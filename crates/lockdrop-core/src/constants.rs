/// ─── Lockdrop Allocation Constants ──────────────────────────────────────────
///
/// Participants either locked ETH in escrow for a fixed term or signaled an
/// existing balance. Both are converted to "effective ETH" and the genesis
/// supply is apportioned pro rata over total effective ETH.
///
/// Base unit: wei (1 ETH = 10^18 wei). Genesis tokens use 18 decimals too.

// ── Units ────────────────────────────────────────────────────────────────────

/// 1 ETH expressed in wei.
pub const WEI_PER_ETH: u128 = 1_000_000_000_000_000_000;

/// Default genesis supply apportioned across participants: 4.5 billion
/// tokens at 18 decimals.
pub const DEFAULT_TOTAL_ALLOCATION: u128 = 4_500_000_000_000_000_000_000_000_000;

// ── Destination keys ─────────────────────────────────────────────────────────

/// Length of one public key inside a destination key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// A validator identity is stash || controller || session.
pub const KEY_TRIPLE_LEN: usize = PUBLIC_KEY_LEN * 3;

/// Default SS58 network prefix (generic Substrate).
pub const SS58_DEFAULT_PREFIX: u16 = 42;

/// Highest SS58 prefix representable in the two-byte form.
pub const SS58_MAX_PREFIX: u16 = 16_383;

// ── Term bonuses (percentage points) ─────────────────────────────────────────

/// All percentages below are over this denominator.
pub const PERCENT_DENOMINATOR: u64 = 100;

/// 3 month lock: no bonus.
pub const SHORT_TERM_BONUS_PERCENT: u64 = 0;

/// 6 month lock: +30%.
pub const MEDIUM_TERM_BONUS_PERCENT: u64 = 30;

/// 12 month lock: +120%.
pub const LONG_TERM_BONUS_PERCENT: u64 = 120;

/// Signaled balances were never escrowed: -80%.
pub const SIGNAL_DEDUCTION_PERCENT: u64 = 80;

// ── Early participation bonus ────────────────────────────────────────────────

/// Width of each early-bonus window measured from the lock period start.
pub const EARLY_BONUS_WINDOW_SECS: u64 = 15 * 24 * 3600;

/// Bonus for the 1st, 2nd, ... window. Locks after the last window get 0.
pub const EARLY_BONUS_TIERS: [u64; 5] = [50, 40, 30, 20, 10];

/// Cumulative ETH locked (exclusive upper bound, whole ETH) → bonus cap.
/// Past the last threshold the cap is 0.
pub const VOLUME_BONUS_TIERS: [(u128, u64); 5] = [
    (200_000, 50),
    (400_000, 40),
    (700_000, 30),
    (1_100_000, 20),
    (1_600_000, 10),
];

// ── Vesting ──────────────────────────────────────────────────────────────────

/// Share of a signaler's allocation that is liquid at launch.
pub const SIGNAL_LIQUID_PERCENT: u64 = 25;

/// Blocks over which the vested remainder unlocks linearly.
pub const VESTING_TOTAL_BLOCKS: u64 = 5_256_000;

/// Block at which vesting begins.
pub const VESTING_STARTING_BLOCK: u64 = 0;

// ── Validators ───────────────────────────────────────────────────────────────

/// Tokens held back from a validator's stake (and, when controller
/// endowment is enabled, given to the controller key).
pub const EXISTENTIAL_RESERVE: u128 = 100_000_000_000_000;
