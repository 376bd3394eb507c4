//! # Yield Strategy
//!
//! The strategy owns the deployed position and the harvest cycle. The vault
//! forwards idle want to it, pulls want back on withdrawals and otherwise
//! only reads [`VaultStrategy::balance_of`]. Anyone may call
//! [`Strategy::harvest`]; the caller is paid a slice of the profit for doing
//! so.
//!
//! ## Harvest ordering
//!
//! 1. Claim pending yield onto the strategy's own want balance.
//! 2. Split the profit and pay the caller, treasury and strategist.
//! 3. Record the harvest in the log.
//! 4. Stake everything the strategy holds back into the farm.
//!
//! The log is written before reinvestment, so a failed re-stake never
//! loses the record of realized profit. Unstaked want still counts toward
//! [`VaultStrategy::balance_of`] and is picked up by the next deposit or
//! harvest.
//!
//! Deployed principal is read from the yield source, so a loss inside the
//! farm shows up in [`VaultStrategy::balance_of`] (and the vault's share
//! price) right away. The strategy's own figure stands in while the source
//! is unreachable.
//!
//! ## Lifecycle
//!
//! ```text
//!   Active <──unpause── Paused
//!     │ ──pause──────────> │
//!     │                    │
//!     ├──panic──> Panicked <┤
//!     │              │      │
//!     └──retire──> Retired <┘
//! ```
//!
//! `panic` and `retire` sweep the whole position back to the vault. Both are
//! no-ops when repeated on an already swept strategy.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use granary_protocol::clock::Clock;
use granary_protocol::config::{ConfigError, FeeConfig, StrategyConfig};
use granary_protocol::ledger::{AccountId, AssetLedger, LedgerError};
use granary_protocol::math::{checked_add, MathError};
use granary_protocol::yield_source::{YieldSource, YieldSourceError};

use crate::events::{EventJournal, HarvestFailed, Harvested, PoolEvent, StrategyStateChanged};
use crate::harvest_log::{HarvestLog, HarvestLogEntry, HarvestLogError, HarvestSplit};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during strategy operations.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// The yield source had nothing to claim.
    #[error("nothing to harvest")]
    NothingToHarvest,

    /// APR was requested from an empty log (or over zero entries).
    #[error("insufficient harvest history")]
    InsufficientHistory,

    /// A log index range was empty or out of bounds.
    #[error("invalid harvest log range {start}..={end} (log length {len})")]
    InvalidLogRange {
        /// First index requested.
        start: usize,
        /// Last index requested.
        end: usize,
        /// Current log length.
        len: usize,
    },

    /// The yield source failed. Retryable.
    #[error("yield source unavailable: {0}")]
    YieldSourceUnavailable(#[from] YieldSourceError),

    /// The operation is not allowed in the current lifecycle state.
    #[error("cannot {action} a strategy that is {from}")]
    InvalidStateTransition {
        /// State at the time of the call.
        from: StrategyState,
        /// What was attempted.
        action: &'static str,
    },

    /// A want movement failed.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Checked arithmetic failed.
    #[error("math error: {0}")]
    Math(#[from] MathError),

    /// Rejected configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl From<HarvestLogError> for StrategyError {
    fn from(err: HarvestLogError) -> Self {
        match err {
            HarvestLogError::InsufficientHistory => StrategyError::InsufficientHistory,
            HarvestLogError::InvalidRange { start, end, len } => {
                StrategyError::InvalidLogRange { start, end, len }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// StrategyState
// ---------------------------------------------------------------------------

/// Lifecycle state of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyState {
    /// Deploying deposits and harvesting.
    Active,
    /// Position stays deployed; no new deposits, no harvests.
    Paused,
    /// Position swept back to the vault. Only retirement may follow.
    Panicked,
    /// Terminal. Position swept back to the vault.
    Retired,
}

impl StrategyState {
    /// Whether the vault should forward idle want.
    pub fn accepts_deposits(self) -> bool {
        self == StrategyState::Active
    }
}

impl std::fmt::Display for StrategyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyState::Active => write!(f, "Active"),
            StrategyState::Paused => write!(f, "Paused"),
            StrategyState::Panicked => write!(f, "Panicked"),
            StrategyState::Retired => write!(f, "Retired"),
        }
    }
}

// ---------------------------------------------------------------------------
// VaultStrategy
// ---------------------------------------------------------------------------

/// What the vault may do with its strategy.
///
/// Every method takes the want ledger explicitly: the strategy never holds
/// a reference to shared state between calls.
pub trait VaultStrategy: Send {
    /// The strategy's own want account.
    fn account(&self) -> &str;

    /// The vault this strategy reports to.
    fn vault(&self) -> &str;

    /// Current lifecycle state.
    fn state(&self) -> StrategyState;

    /// Want under management: held by the strategy plus deployed principal.
    /// Unclaimed yield is excluded.
    fn balance_of(&self, want: &AssetLedger) -> u64;

    /// Deploys whatever want the strategy holds. Returns the amount staked,
    /// which is 0 unless the strategy is [`StrategyState::Active`].
    fn deposit(&mut self, want: &mut AssetLedger) -> Result<u64, StrategyError>;

    /// Sends up to `amount` of want to the vault, unstaking as needed.
    /// Returns what was actually sent, which may be less than requested.
    fn withdraw(&mut self, want: &mut AssetLedger, amount: u64) -> Result<u64, StrategyError>;

    /// `Active → Paused`.
    fn pause(&mut self) -> Result<StrategyStateChanged, StrategyError>;

    /// `Paused → Active`, redeploying anything the strategy holds.
    fn unpause(&mut self, want: &mut AssetLedger) -> Result<StrategyStateChanged, StrategyError>;

    /// Sweeps everything to the vault and stops deploying. `None` if the
    /// strategy was already panicked and swept.
    fn panic(
        &mut self,
        want: &mut AssetLedger,
    ) -> Result<Option<StrategyStateChanged>, StrategyError>;

    /// Sweeps everything to the vault for good. `None` if the strategy was
    /// already retired and swept.
    fn retire(
        &mut self,
        want: &mut AssetLedger,
    ) -> Result<Option<StrategyStateChanged>, StrategyError>;
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Read-only projection of the next harvest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestEstimate {
    /// Yield that would be claimed, before fees.
    pub profit: u64,
    /// What the caller would be paid.
    pub call_fee: u64,
}

/// Everything that must survive replacing a strategy's implementation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategySnapshot {
    /// Strategy want account.
    pub account: AccountId,
    /// Bound vault.
    pub vault: AccountId,
    /// Fee split, recipients and cadence.
    pub config: StrategyConfig,
    /// Lifecycle state.
    pub state: StrategyState,
    /// Principal staked in the farm.
    pub deployed: u64,
    /// Full harvest history, including the open cadence window.
    pub harvest_log: HarvestLog,
    /// Harvest failures in a row.
    pub consecutive_harvest_failures: u32,
}

/// A compounding strategy over one yield source.
pub struct Strategy<Y: YieldSource> {
    account: AccountId,
    vault: AccountId,
    config: StrategyConfig,
    state: StrategyState,
    deployed: u64,
    harvest_log: HarvestLog,
    consecutive_harvest_failures: u32,
    source: Y,
    clock: Arc<dyn Clock>,
    journal: EventJournal,
}

impl<Y: YieldSource> Strategy<Y> {
    /// Creates an active strategy with an empty harvest log.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::Config`] if `config` fails validation.
    pub fn new(
        account: impl Into<AccountId>,
        vault: impl Into<AccountId>,
        config: StrategyConfig,
        source: Y,
        clock: Arc<dyn Clock>,
        journal: EventJournal,
    ) -> Result<Self, StrategyError> {
        config.validate()?;
        let harvest_log = HarvestLog::new(config.harvest_log_cadence_secs, clock.now());
        Ok(Self {
            account: account.into(),
            vault: vault.into(),
            config,
            state: StrategyState::Active,
            deployed: 0,
            harvest_log,
            consecutive_harvest_failures: 0,
            source,
            clock,
            journal,
        })
    }

    /// Rebuilds a strategy from a snapshot, attached to fresh handles.
    pub fn restore(
        snapshot: StrategySnapshot,
        source: Y,
        clock: Arc<dyn Clock>,
        journal: EventJournal,
    ) -> Result<Self, StrategyError> {
        snapshot.config.validate()?;
        info!(
            strategy = %snapshot.account,
            state = %snapshot.state,
            entries = snapshot.harvest_log.len(),
            "strategy restored from snapshot"
        );
        Ok(Self {
            account: snapshot.account,
            vault: snapshot.vault,
            config: snapshot.config,
            state: snapshot.state,
            deployed: snapshot.deployed,
            harvest_log: snapshot.harvest_log,
            consecutive_harvest_failures: snapshot.consecutive_harvest_failures,
            source,
            clock,
            journal,
        })
    }

    /// Captures everything [`restore`](Self::restore) needs.
    pub fn snapshot(&self) -> StrategySnapshot {
        StrategySnapshot {
            account: self.account.clone(),
            vault: self.vault.clone(),
            config: self.config.clone(),
            state: self.state,
            deployed: self.deployed,
            harvest_log: self.harvest_log.clone(),
            consecutive_harvest_failures: self.consecutive_harvest_failures,
        }
    }

    // ---- Harvest ----

    /// Claims yield, pays fees to `caller` and the configured recipients,
    /// logs the harvest and reinvests the rest.
    ///
    /// # Errors
    ///
    /// - [`StrategyError::InvalidStateTransition`] unless `Active`.
    /// - [`StrategyError::YieldSourceUnavailable`] if the claim fails. The
    ///   failure is counted and journaled; nothing else changes.
    /// - [`StrategyError::NothingToHarvest`] if there was no yield. Nothing
    ///   is logged.
    pub fn harvest(
        &mut self,
        want: &mut AssetLedger,
        caller: &str,
    ) -> Result<Harvested, StrategyError> {
        if self.state != StrategyState::Active {
            return Err(StrategyError::InvalidStateTransition {
                from: self.state,
                action: "harvest",
            });
        }

        self.sync_deployed();
        let balance_before = self.balance_of(want);
        let profit = match self.source.claim(want, &self.account) {
            Ok(profit) => profit,
            Err(err) => {
                self.consecutive_harvest_failures =
                    self.consecutive_harvest_failures.saturating_add(1);
                warn!(
                    strategy = %self.account,
                    caller,
                    failures = self.consecutive_harvest_failures,
                    error = %err,
                    "harvest failed"
                );
                self.journal.record(PoolEvent::HarvestFailed(HarvestFailed {
                    caller: caller.to_string(),
                    reason: err.to_string(),
                    consecutive_failures: self.consecutive_harvest_failures,
                }));
                return Err(err.into());
            }
        };
        self.consecutive_harvest_failures = 0;
        if profit == 0 {
            return Err(StrategyError::NothingToHarvest);
        }

        let split = HarvestSplit::compute(profit, &self.config.fees)?;
        want.transfer(&self.account, caller, split.call_fee)?;
        want.transfer(&self.account, &self.config.treasury, split.treasury_fee)?;
        want.transfer(&self.account, &self.config.strategist, split.strategist_fee)?;

        let logged = self
            .harvest_log
            .record(self.clock.now(), balance_before, split)
            .is_some();

        if let Err(err) = self.deploy_held(want) {
            warn!(
                strategy = %self.account,
                error = %err,
                "reinvest failed, profit left undeployed"
            );
        }

        let receipt = Harvested {
            caller: caller.to_string(),
            split,
            reinvested: split.reinvested(),
            strategy_balance: self.balance_of(want),
            logged,
        };
        info!(
            strategy = %self.account,
            caller,
            profit,
            call_fee = split.call_fee,
            reinvested = receipt.reinvested,
            balance = receipt.strategy_balance,
            logged,
            "harvested"
        );
        self.journal.record(PoolEvent::Harvested(receipt.clone()));
        Ok(receipt)
    }

    /// What [`harvest`](Self::harvest) would yield right now, without
    /// touching any state.
    pub fn estimate_harvest(&self) -> Result<HarvestEstimate, StrategyError> {
        let profit = self.source.pending_yield()?;
        let split = HarvestSplit::compute(profit, &self.config.fees)?;
        Ok(HarvestEstimate {
            profit,
            call_fee: split.call_fee,
        })
    }

    // ---- Configuration ----

    /// Changes the minimum spacing between harvest log entries.
    pub fn update_harvest_log_cadence(&mut self, cadence_secs: u64) {
        info!(strategy = %self.account, cadence_secs, "harvest log cadence updated");
        self.config.harvest_log_cadence_secs = cadence_secs;
        self.harvest_log.set_cadence(cadence_secs);
    }

    /// Replaces the profit split after validating it.
    pub fn update_fees(&mut self, fees: FeeConfig) -> Result<(), StrategyError> {
        fees.validate()?;
        info!(
            strategy = %self.account,
            total_fee_bps = fees.total_fee_bps,
            call_fee_bps = fees.call_fee_bps,
            strategist_fee_bps = fees.strategist_fee_bps,
            "fees updated"
        );
        self.config.fees = fees;
        Ok(())
    }

    // ---- Queries ----

    /// Current configuration.
    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// The underlying yield source.
    pub fn source(&self) -> &Y {
        &self.source
    }

    /// Principal staked in the farm, per the strategy's own books.
    pub fn deployed(&self) -> u64 {
        self.deployed
    }

    /// Harvest failures since the last successful claim.
    pub fn consecutive_harvest_failures(&self) -> u32 {
        self.consecutive_harvest_failures
    }

    /// The harvest log.
    pub fn harvest_log(&self) -> &HarvestLog {
        &self.harvest_log
    }

    /// Number of log entries.
    pub fn harvest_log_len(&self) -> usize {
        self.harvest_log.len()
    }

    /// The newest `min(n, len)` log entries, oldest first.
    pub fn latest_harvest_log_slice(&self, n: usize) -> &[HarvestLogEntry] {
        self.harvest_log.latest_slice(n)
    }

    /// Mean APR in bps over the newest `min(n, len)` entries.
    pub fn average_apr_across_last_n_harvests(&self, n: usize) -> Result<u64, StrategyError> {
        Ok(self.harvest_log.average_apr(n)?)
    }

    /// Mean APR in bps over log entries `start..=end`.
    pub fn calculate_apr_using_logs(&self, start: usize, end: usize) -> Result<u64, StrategyError> {
        Ok(self.harvest_log.apr_between(start, end)?)
    }

    // ---- Internals ----

    fn held(&self, want: &AssetLedger) -> u64 {
        want.balance_of(&self.account)
    }

    /// Principal in the farm as the source reports it, or the strategy's
    /// own figure while the source is unreachable.
    fn deployed_value(&self) -> u64 {
        self.source.deployed_value().unwrap_or(self.deployed)
    }

    /// Adopts the source's figure for the principal. A drop is a loss the
    /// farm has already realized.
    fn sync_deployed(&mut self) {
        let Ok(value) = self.source.deployed_value() else {
            return;
        };
        if value < self.deployed {
            warn!(
                strategy = %self.account,
                recorded = self.deployed,
                reported = value,
                lost = self.deployed - value,
                "deployed principal marked down"
            );
        }
        self.deployed = value;
    }

    /// Stakes everything the strategy holds.
    fn deploy_held(&mut self, want: &mut AssetLedger) -> Result<u64, StrategyError> {
        let held = self.held(want);
        if held == 0 {
            return Ok(0);
        }
        self.sync_deployed();
        let opens_position = self.deployed == 0;
        let deployed = checked_add(self.deployed, held)?;
        self.source.stake(want, &self.account, held)?;
        self.deployed = deployed;
        if opens_position {
            self.harvest_log.restart_window(self.clock.now());
        }
        debug!(strategy = %self.account, staked = held, deployed, "deployed");
        Ok(held)
    }

    /// Unstakes the whole position and sends everything held to the vault.
    /// Returns the amount sent.
    fn sweep_to_vault(&mut self, want: &mut AssetLedger) -> Result<u64, StrategyError> {
        self.sync_deployed();
        while self.deployed > 0 {
            let released = self.source.unstake(want, &self.account, self.deployed)?;
            if released == 0 {
                break;
            }
            self.deployed = self.deployed.saturating_sub(released);
        }
        if self.deployed > 0 {
            warn!(
                strategy = %self.account,
                stranded = self.deployed,
                "yield source stopped releasing principal"
            );
        }
        let held = self.held(want);
        want.transfer(&self.account, &self.vault, held)?;
        Ok(held)
    }

    fn is_swept(&self, want: &AssetLedger) -> bool {
        self.deployed_value() == 0 && self.held(want) == 0
    }

    fn transition(&mut self, to: StrategyState, swept_to_vault: u64) -> StrategyStateChanged {
        let change = StrategyStateChanged {
            from: self.state,
            to,
            swept_to_vault,
        };
        self.state = to;
        info!(
            strategy = %self.account,
            from = %change.from,
            to = %change.to,
            swept = swept_to_vault,
            "strategy state changed"
        );
        self.journal
            .record(PoolEvent::StrategyStateChanged(change.clone()));
        change
    }
}

impl<Y: YieldSource> VaultStrategy for Strategy<Y> {
    fn account(&self) -> &str {
        &self.account
    }

    fn vault(&self) -> &str {
        &self.vault
    }

    fn state(&self) -> StrategyState {
        self.state
    }

    fn balance_of(&self, want: &AssetLedger) -> u64 {
        self.held(want).saturating_add(self.deployed_value())
    }

    fn deposit(&mut self, want: &mut AssetLedger) -> Result<u64, StrategyError> {
        if !self.state.accepts_deposits() {
            return Ok(0);
        }
        self.deploy_held(want)
    }

    fn withdraw(&mut self, want: &mut AssetLedger, amount: u64) -> Result<u64, StrategyError> {
        self.sync_deployed();
        let held = self.held(want);
        if held < amount && self.deployed > 0 {
            let shortfall = (amount - held).min(self.deployed);
            match self.source.unstake(want, &self.account, shortfall) {
                Ok(released) => {
                    self.deployed = self.deployed.saturating_sub(released);
                    if released < shortfall {
                        warn!(
                            strategy = %self.account,
                            requested = shortfall,
                            released,
                            "partial unstake"
                        );
                    }
                }
                Err(err) => {
                    warn!(strategy = %self.account, error = %err, "unstake failed");
                }
            }
        }

        let sent = amount.min(self.held(want));
        want.transfer(&self.account, &self.vault, sent)?;
        debug!(strategy = %self.account, requested = amount, sent, "returned to vault");
        Ok(sent)
    }

    fn pause(&mut self) -> Result<StrategyStateChanged, StrategyError> {
        if self.state != StrategyState::Active {
            return Err(StrategyError::InvalidStateTransition {
                from: self.state,
                action: "pause",
            });
        }
        Ok(self.transition(StrategyState::Paused, 0))
    }

    fn unpause(&mut self, want: &mut AssetLedger) -> Result<StrategyStateChanged, StrategyError> {
        if self.state != StrategyState::Paused {
            return Err(StrategyError::InvalidStateTransition {
                from: self.state,
                action: "unpause",
            });
        }
        let change = self.transition(StrategyState::Active, 0);
        if let Err(err) = self.deploy_held(want) {
            warn!(strategy = %self.account, error = %err, "redeploy after unpause failed");
        }
        Ok(change)
    }

    fn panic(
        &mut self,
        want: &mut AssetLedger,
    ) -> Result<Option<StrategyStateChanged>, StrategyError> {
        match self.state {
            StrategyState::Retired => Err(StrategyError::InvalidStateTransition {
                from: self.state,
                action: "panic",
            }),
            StrategyState::Panicked if self.is_swept(want) => Ok(None),
            _ => {
                let swept = self.sweep_to_vault(want)?;
                Ok(Some(self.transition(StrategyState::Panicked, swept)))
            }
        }
    }

    fn retire(
        &mut self,
        want: &mut AssetLedger,
    ) -> Result<Option<StrategyStateChanged>, StrategyError> {
        if self.state == StrategyState::Retired && self.is_swept(want) {
            return Ok(None);
        }
        let swept = self.sweep_to_vault(want)?;
        Ok(Some(self.transition(StrategyState::Retired, swept)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
