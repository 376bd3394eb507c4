//! # Pool Configuration & Constants
//!
//! Every fee ceiling, scale factor and default cadence used by the vault and
//! its strategy lives here. Runtime knobs are grouped into explicit structs
//! ([`VaultConfig`], [`FeeConfig`], [`StrategyConfig`]) that are injected at
//! construction and validated before use, so nothing downstream has to
//! re-check a basis-point value against its ceiling.
//!
//! All rates are basis points (1 bp = 0.01%) against [`PERCENT_DIVISOR`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::AccountId;

// ---------------------------------------------------------------------------
// Scales
// ---------------------------------------------------------------------------

/// Denominator for every basis-point rate. 10_000 bps = 100%.
pub const PERCENT_DIVISOR: u64 = 10_000;

/// Fixed-point scale for price-per-share. One full share is worth exactly
/// `SHARE_PRICE_SCALE` when the pool is empty (price 1.0).
pub const SHARE_PRICE_SCALE: u128 = 1_000_000_000_000_000_000;

/// 365 days. Leap years are ignored, as they are by every APR display.
pub const SECONDS_PER_YEAR: u64 = 31_536_000;

// ---------------------------------------------------------------------------
// Fee ceilings
// ---------------------------------------------------------------------------

/// Maximum share of harvested profit that may be taken as fees (10%).
pub const MAX_TOTAL_FEE_BPS: u64 = 1_000;

/// Maximum strategist cut of the treasury portion (50%).
pub const MAX_STRATEGIST_FEE_BPS: u64 = 5_000;

/// Maximum withdrawal fee (1%). Anything higher is a trap, not a fee.
pub const MAX_WITHDRAW_FEE_BPS: u64 = 100;

/// Maximum deposit fee (10%).
pub const MAX_DEPOSIT_FEE_BPS: u64 = 1_000;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default withdrawal fee: 0.1%, retained by the pool.
pub const DEFAULT_WITHDRAW_FEE_BPS: u64 = 10;

/// Default deposit fee. Off.
pub const DEFAULT_DEPOSIT_FEE_BPS: u64 = 0;

/// Default total fee on harvested profit: 4.5%.
pub const DEFAULT_TOTAL_FEE_BPS: u64 = 450;

/// Default harvest caller share of the total fee: 10%.
pub const DEFAULT_CALL_FEE_BPS: u64 = 1_000;

/// Default treasury share of the total fee: 90%.
pub const DEFAULT_TREASURY_FEE_BPS: u64 = 9_000;

/// Default strategist cut, taken out of the treasury share: 25%.
pub const DEFAULT_STRATEGIST_FEE_BPS: u64 = 2_500;

/// Minimum spacing between two harvest log entries: 12 hours.
pub const DEFAULT_HARVEST_LOG_CADENCE_SECS: u64 = 43_200;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A basis-point value exceeds its ceiling.
    #[error("{field} is {value} bps, maximum is {max} bps")]
    FeeTooHigh {
        /// Name of the offending field.
        field: &'static str,
        /// The configured value.
        value: u64,
        /// The permitted ceiling.
        max: u64,
    },

    /// Call and treasury shares must split the total fee exactly.
    #[error("call fee {call} bps + treasury fee {treasury} bps must equal 10000")]
    FeeSplitMismatch {
        /// Configured caller share.
        call: u64,
        /// Configured treasury share.
        treasury: u64,
    },

    /// A fee recipient was left empty.
    #[error("fee recipient `{0}` must not be empty")]
    MissingRecipient(&'static str),

    /// The configuration document could not be parsed.
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

fn check_ceiling(field: &'static str, value: u64, max: u64) -> Result<(), ConfigError> {
    if value > max {
        return Err(ConfigError::FeeTooHigh { field, value, max });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// VaultConfig
// ---------------------------------------------------------------------------

/// What the vault does when its strategy cannot return the full shortfall
/// of a withdrawal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartialWithdrawPolicy {
    /// Pay out what could be sourced and give the holder back the shares
    /// that correspond to the unsourced value.
    #[default]
    BestEffort,
    /// Reject the withdrawal and restore every burned share.
    Revert,
}

/// Vault-side configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Human-readable vault name.
    pub name: String,
    /// Share token symbol.
    pub symbol: String,
    /// Fee taken from deposits before shares are computed.
    pub deposit_fee_bps: u64,
    /// Fee taken from withdrawals; stays in the pool.
    pub withdraw_fee_bps: u64,
    /// Ceiling on total assets. `None` means uncapped.
    pub tvl_cap: Option<u64>,
    /// Behavior when the strategy returns less than requested.
    pub partial_withdraw: PartialWithdrawPolicy,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            name: "Granary Vault".into(),
            symbol: "gVAULT".into(),
            deposit_fee_bps: DEFAULT_DEPOSIT_FEE_BPS,
            withdraw_fee_bps: DEFAULT_WITHDRAW_FEE_BPS,
            tvl_cap: None,
            partial_withdraw: PartialWithdrawPolicy::default(),
        }
    }
}

impl VaultConfig {
    /// Parses and validates a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every fee against its ceiling.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_ceiling("deposit_fee_bps", self.deposit_fee_bps, MAX_DEPOSIT_FEE_BPS)?;
        check_ceiling("withdraw_fee_bps", self.withdraw_fee_bps, MAX_WITHDRAW_FEE_BPS)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FeeConfig
// ---------------------------------------------------------------------------

/// How harvested profit is split.
///
/// `total_fee_bps` of the profit is taken as fees. That fee is divided
/// between the harvest caller (`call_fee_bps`) and the treasury
/// (`treasury_fee_bps`); the strategist's cut (`strategist_fee_bps`) comes
/// out of the treasury portion. Everything else is reinvested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Share of profit taken as fees.
    pub total_fee_bps: u64,
    /// Caller share of the total fee.
    pub call_fee_bps: u64,
    /// Treasury share of the total fee.
    pub treasury_fee_bps: u64,
    /// Strategist share of the treasury portion.
    pub strategist_fee_bps: u64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            total_fee_bps: DEFAULT_TOTAL_FEE_BPS,
            call_fee_bps: DEFAULT_CALL_FEE_BPS,
            treasury_fee_bps: DEFAULT_TREASURY_FEE_BPS,
            strategist_fee_bps: DEFAULT_STRATEGIST_FEE_BPS,
        }
    }
}

impl FeeConfig {
    /// A fee-free split. Useful for pools that pass all yield through.
    pub fn zero() -> Self {
        Self {
            total_fee_bps: 0,
            ..Self::default()
        }
    }

    /// Checks ceilings and that the call/treasury split is exact.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_ceiling("total_fee_bps", self.total_fee_bps, MAX_TOTAL_FEE_BPS)?;
        check_ceiling(
            "strategist_fee_bps",
            self.strategist_fee_bps,
            MAX_STRATEGIST_FEE_BPS,
        )?;
        if self.call_fee_bps + self.treasury_fee_bps != PERCENT_DIVISOR {
            return Err(ConfigError::FeeSplitMismatch {
                call: self.call_fee_bps,
                treasury: self.treasury_fee_bps,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StrategyConfig
// ---------------------------------------------------------------------------

/// Strategy-side configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Profit split applied on every harvest.
    pub fees: FeeConfig,
    /// Receives the treasury portion.
    pub treasury: AccountId,
    /// Receives the strategist portion.
    pub strategist: AccountId,
    /// Minimum seconds between two harvest log entries.
    pub harvest_log_cadence_secs: u64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            fees: FeeConfig::default(),
            treasury: "treasury".into(),
            strategist: "strategist".into(),
            harvest_log_cadence_secs: DEFAULT_HARVEST_LOG_CADENCE_SECS,
        }
    }
}

impl StrategyConfig {
    /// Parses and validates a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the fee split and recipients.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fees.validate()?;
        if self.treasury.is_empty() {
            return Err(ConfigError::MissingRecipient("treasury"));
        }
        if self.strategist.is_empty() {
            return Err(ConfigError::MissingRecipient("strategist"));
        }
        Ok(())
    }
}
