use alloy_primitives::U256;
use lockdrop_core::constants::{
    DEFAULT_TOTAL_ALLOCATION, EARLY_BONUS_TIERS, EARLY_BONUS_WINDOW_SECS, EXISTENTIAL_RESERVE,
    PERCENT_DENOMINATOR, SIGNAL_LIQUID_PERCENT, SS58_DEFAULT_PREFIX, SS58_MAX_PREFIX,
    VESTING_STARTING_BLOCK, VESTING_TOTAL_BLOCKS, VOLUME_BONUS_TIERS, WEI_PER_ETH,
};
use lockdrop_core::error::LockdropError;
use lockdrop_core::serde_decimal;
use lockdrop_core::types::Balance;
use serde::{Deserialize, Serialize};

use crate::bonus::{BonusPolicy, HybridBonus, NoEarlyBonus, TermBonuses, TimeTieredBonus, VolumeTier};

/// Allocation policy for one run.
///
/// Loaded from JSON; every field falls back to the launch defaults so an
/// empty object `{}` is a complete configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Token supply apportioned across all effective value.
    #[serde(with = "serde_decimal")]
    pub total_allocation: Balance,
    pub bonus_policy: BonusPolicyConfig,
    pub term_bonuses: TermBonuses,
    pub signal_overlap: SignalOverlap,
    pub vesting: VestingConfig,
    pub validators: ValidatorConfig,
    pub key_encoding: KeyEncoding,
    pub unresolved_keys: UnresolvedKeyPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            total_allocation: U256::from(DEFAULT_TOTAL_ALLOCATION),
            bonus_policy: BonusPolicyConfig::default(),
            term_bonuses: TermBonuses::default(),
            signal_overlap: SignalOverlap::default(),
            vesting: VestingConfig::default(),
            validators: ValidatorConfig::default(),
            key_encoding: KeyEncoding::default(),
            unresolved_keys: UnresolvedKeyPolicy::default(),
        }
    }
}

fn default_window_secs() -> u64 {
    EARLY_BONUS_WINDOW_SECS
}

fn default_tiers() -> Vec<u64> {
    EARLY_BONUS_TIERS.to_vec()
}

fn default_volume_tiers() -> Vec<VolumeTier> {
    VOLUME_BONUS_TIERS
        .iter()
        .map(|&(eth, bonus)| VolumeTier {
            below: U256::from(eth * WEI_PER_ETH),
            bonus,
        })
        .collect()
}

/// Which early-participation bonus applies to locks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BonusPolicyConfig {
    /// Term bonuses only.
    None,
    /// Purely time-tiered.
    FixedSchedule {
        #[serde(default = "default_window_secs")]
        window_secs: u64,
        #[serde(default = "default_tiers")]
        tiers: Vec<u64>,
    },
    /// Time tier capped by cumulative locked volume.
    Hybrid {
        #[serde(default = "default_window_secs")]
        window_secs: u64,
        #[serde(default = "default_tiers")]
        tiers: Vec<u64>,
        #[serde(default = "default_volume_tiers")]
        volume_tiers: Vec<VolumeTier>,
    },
}

impl Default for BonusPolicyConfig {
    fn default() -> Self {
        BonusPolicyConfig::FixedSchedule {
            window_secs: default_window_secs(),
            tiers: default_tiers(),
        }
    }
}

impl BonusPolicyConfig {
    pub fn build(&self) -> Box<dyn BonusPolicy> {
        match self {
            BonusPolicyConfig::None => Box::new(NoEarlyBonus),
            BonusPolicyConfig::FixedSchedule { window_secs, tiers } => Box::new(TimeTieredBonus {
                window_secs: *window_secs,
                tiers: tiers.clone(),
            }),
            BonusPolicyConfig::Hybrid {
                window_secs,
                tiers,
                volume_tiers,
            } => Box::new(HybridBonus {
                time: TimeTieredBonus {
                    window_secs: *window_secs,
                    tiers: tiers.clone(),
                },
                volume_tiers: volume_tiers.clone(),
            }),
        }
    }

    fn validate(&self) -> Result<(), LockdropError> {
        let (window_secs, tiers) = match self {
            BonusPolicyConfig::None => return Ok(()),
            BonusPolicyConfig::FixedSchedule { window_secs, tiers } => (window_secs, tiers),
            BonusPolicyConfig::Hybrid {
                window_secs,
                tiers,
                volume_tiers,
            } => {
                if volume_tiers.windows(2).any(|w| w[1].below <= w[0].below) {
                    return Err(invalid("volume tier thresholds must be strictly increasing"));
                }
                if volume_tiers.windows(2).any(|w| w[1].bonus > w[0].bonus) {
                    return Err(invalid("volume tier bonuses must not increase"));
                }
                (window_secs, tiers)
            }
        };
        if *window_secs == 0 {
            return Err(invalid("bonus window length must be positive"));
        }
        if tiers.windows(2).any(|w| w[1] > w[0]) {
            return Err(invalid("time tier bonuses must not increase"));
        }
        Ok(())
    }
}

/// What happens to the signal contribution of a key that also locked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOverlap {
    /// Signal and lock contributions add up.
    #[default]
    Add,
    /// The signal is ignored entirely (and removed from the grand total).
    ExcludeWhenLocked,
}

/// How locked (escrowed) funds are treated at launch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockedFundsVesting {
    /// Fully liquid.
    #[default]
    Liquid,
    /// Same liquid fraction and linear schedule as signals.
    Vested,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VestingConfig {
    /// Percent of a vested allocation that is liquid at launch.
    pub liquid_percent: u64,
    pub total_blocks: u64,
    pub starting_block: u64,
    pub locked_funds: LockedFundsVesting,
}

impl Default for VestingConfig {
    fn default() -> Self {
        Self {
            liquid_percent: SIGNAL_LIQUID_PERCENT,
            total_blocks: VESTING_TOTAL_BLOCKS,
            starting_block: VESTING_STARTING_BLOCK,
            locked_funds: LockedFundsVesting::default(),
        }
    }
}

impl VestingConfig {
    /// Portion of `tokens` that vests: `tokens − floor(tokens × liquid / 100)`.
    pub fn vested_portion(&self, tokens: Balance) -> Balance {
        let liquid = tokens * U256::from(self.liquid_percent) / U256::from(PERCENT_DENOMINATOR);
        tokens - liquid
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Keep at most this many candidates. `None` keeps all.
    pub max_count: Option<usize>,
    /// Tokens held back from every validator's stake.
    #[serde(with = "serde_decimal")]
    pub existential_reserve: Balance,
    /// Give the reserve to the controller key of a validator triple.
    pub endow_controllers: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_count: None,
            existential_reserve: U256::from(EXISTENTIAL_RESERVE),
            endow_controllers: false,
        }
    }
}

/// Textual form of destination keys in the output document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeyEncoding {
    Ss58 { prefix: u16 },
    Hex,
}

impl Default for KeyEncoding {
    fn default() -> Self {
        KeyEncoding::Ss58 {
            prefix: SS58_DEFAULT_PREFIX,
        }
    }
}

/// Fate of contributions whose destination key cannot be resolved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedKeyPolicy {
    /// Omitted from the output; their share is never minted.
    #[default]
    Drop,
    /// Credited to the all-zero key so the burned share is visible.
    Burn,
}

fn invalid(msg: &str) -> LockdropError {
    LockdropError::InvalidConfig(msg.to_string())
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, LockdropError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LockdropError> {
        if self.total_allocation.is_zero() {
            return Err(invalid("total_allocation must be positive"));
        }
        if self.term_bonuses.signal_deduction > PERCENT_DENOMINATOR {
            return Err(invalid("signal_deduction cannot exceed 100"));
        }
        if self.vesting.liquid_percent > PERCENT_DENOMINATOR {
            return Err(invalid("vesting.liquid_percent cannot exceed 100"));
        }
        if self.vesting.total_blocks == 0 && self.vesting.liquid_percent < PERCENT_DENOMINATOR {
            return Err(invalid("vesting.total_blocks must be positive when anything vests"));
        }
        if let KeyEncoding::Ss58 { prefix } = self.key_encoding {
            if prefix > SS58_MAX_PREFIX {
                return Err(LockdropError::InvalidConfig(format!(
                    "ss58 prefix {prefix} exceeds {SS58_MAX_PREFIX}"
                )));
            }
        }
        self.bonus_policy.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_the_default_policy() {
        let cfg = EngineConfig::from_json("{}").unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(
            cfg.total_allocation.to_string(),
            "4500000000000000000000000000"
        );
        assert_eq!(cfg.bonus_policy.build().name(), "fixed_schedule");
    }

    #[test]
    fn hybrid_policy_fills_default_tiers() {
        let cfg = EngineConfig::from_json(r#"{"bonus_policy":{"kind":"hybrid"}}"#).unwrap();
        match &cfg.bonus_policy {
            BonusPolicyConfig::Hybrid { volume_tiers, tiers, .. } => {
                assert_eq!(volume_tiers.len(), 5);
                assert_eq!(tiers, &vec![50, 40, 30, 20, 10]);
            }
            other => panic!("unexpected policy {other:?}"),
        }
    }

    #[test]
    fn increasing_tiers_are_rejected() {
        let err = EngineConfig::from_json(
            r#"{"bonus_policy":{"kind":"fixed_schedule","window_secs":10,"tiers":[10,20]}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, LockdropError::InvalidConfig(_)));
    }

    #[test]
    fn nonsense_percentages_are_rejected() {
        assert!(EngineConfig::from_json(r#"{"vesting":{"liquid_percent":101}}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"term_bonuses":{"signal_deduction":150}}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"total_allocation":"0"}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"key_encoding":{"kind":"ss58","prefix":20000}}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"unknown_field":1}"#).is_err());
    }

    #[test]
    fn vested_portion_rounds_in_favour_of_vesting() {
        let v = VestingConfig::default();
        assert_eq!(v.vested_portion(U256::from(100u64)), U256::from(75u64));
        assert_eq!(v.vested_portion(U256::from(3u64)), U256::from(3u64));
        assert_eq!(v.vested_portion(U256::from(4u64)), U256::from(3u64));
    }
}
