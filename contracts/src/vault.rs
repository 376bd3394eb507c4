//! # Vault
//!
//! Share accounting for a single want-asset pool. Depositors hand want to
//! the vault and receive shares; each share is a pro-rata claim on
//!
//! ```text
//! balance = idle want held by the vault + strategy.balance_of()
//! ```
//!
//! Idle want is forwarded to the strategy after every deposit. Harvests
//! raise `balance` without minting shares, which is how yield reaches
//! holders.
//!
//! ## Rounding
//!
//! Shares minted and want redeemed both round down, so rounding dust always
//! stays in the pool and price-per-share never drops on a deposit. The
//! withdrawal fee also stays in the pool.
//!
//! ## Withdrawal ordering
//!
//! Shares are burned before any want moves. When the strategy cannot return
//! the full shortfall, [`PartialWithdrawPolicy`] decides between paying out
//! what was sourced (and handing back the shares that were not honored) and
//! rejecting the withdrawal outright.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use granary_protocol::config::{
    ConfigError, PartialWithdrawPolicy, VaultConfig, SHARE_PRICE_SCALE,
};
use granary_protocol::ledger::{AccountId, AssetLedger, LedgerError};
use granary_protocol::math::{bps_of, checked_sub, mul_div, mul_div_ceil, MathError};

use crate::events::{
    Deposited, EventEnvelope, EventJournal, PoolEvent, StrategyBound, StrategyStateChanged,
    Withdrawn,
};
use crate::strategy::{StrategyError, VaultStrategy};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Deposits and withdrawals must move a non-zero amount.
    #[error("amount must be greater than zero")]
    ZeroAmount,

    /// The deposit is too small to be worth a single share.
    #[error("deposit would mint zero shares")]
    ZeroShares,

    /// The deposit would push total assets past the TVL cap.
    #[error("tvl cap {cap} exceeded: pool holds {total_assets}, deposit {amount}")]
    CapExceeded {
        /// Configured cap.
        cap: u64,
        /// Pool balance before the deposit.
        total_assets: u64,
        /// Rejected deposit amount.
        amount: u64,
    },

    /// The holder does not own enough shares.
    #[error("insufficient shares: {holder} holds {held}, requested {requested}")]
    InsufficientShares {
        /// Who tried to withdraw.
        holder: AccountId,
        /// Shares held.
        held: u64,
        /// Shares requested.
        requested: u64,
    },

    /// The strategy could not source enough want to honor the withdrawal.
    #[error("insufficient liquidity: requested {requested}, available {available}")]
    InsufficientLiquidity {
        /// Want value of the shares.
        requested: u64,
        /// Want the vault could actually source.
        available: u64,
    },

    /// A strategy is already bound.
    #[error("vault already initialized")]
    AlreadyInitialized,

    /// No strategy is bound yet.
    #[error("vault has no strategy")]
    NotInitialized,

    /// The strategy reports to a different vault.
    #[error("strategy reports to {actual}, expected {expected}")]
    StrategyVaultMismatch {
        /// This vault.
        expected: AccountId,
        /// The strategy's vault.
        actual: AccountId,
    },

    /// An upgrade must keep the strategy's account.
    #[error("replacement strategy is {actual}, expected {expected}")]
    StrategyAccountMismatch {
        /// The bound strategy's account.
        expected: AccountId,
        /// The replacement's account.
        actual: AccountId,
    },

    /// A ledger movement failed.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The strategy rejected the call.
    #[error("strategy error: {0}")]
    Strategy(#[from] StrategyError),

    /// Checked arithmetic failed.
    #[error("math error: {0}")]
    Math(#[from] MathError),

    /// Rejected configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Lifetime want flows for one holder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderTotals {
    /// Want deposited, fees included.
    pub deposited: u128,
    /// Want received, net of fees.
    pub withdrawn: u128,
}

/// A single-strategy yield vault.
pub struct Vault<S: VaultStrategy> {
    account: AccountId,
    config: VaultConfig,
    shares: AssetLedger,
    strategy: Option<S>,
    totals: BTreeMap<AccountId, HolderTotals>,
    journal: EventJournal,
}

impl<S: VaultStrategy> Vault<S> {
    /// Creates an empty vault. `account` is the vault's want-ledger account.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Config`] if `config` fails validation.
    pub fn new(
        account: impl Into<AccountId>,
        config: VaultConfig,
        journal: EventJournal,
    ) -> Result<Self, VaultError> {
        config.validate()?;
        Ok(Self {
            account: account.into(),
            shares: AssetLedger::new(config.symbol.clone()),
            config,
            strategy: None,
            totals: BTreeMap::new(),
            journal,
        })
    }

    /// Binds the strategy. Allowed exactly once.
    pub fn initialize(&mut self, strategy: S) -> Result<StrategyBound, VaultError> {
        if self.strategy.is_some() {
            return Err(VaultError::AlreadyInitialized);
        }
        if strategy.vault() != self.account {
            return Err(VaultError::StrategyVaultMismatch {
                expected: self.account.clone(),
                actual: strategy.vault().to_string(),
            });
        }
        let bound = StrategyBound {
            vault: self.account.clone(),
            strategy: strategy.account().to_string(),
        };
        info!(vault = %self.account, strategy = %bound.strategy, "strategy bound");
        self.strategy = Some(strategy);
        self.journal.record(PoolEvent::StrategyBound(bound.clone()));
        Ok(bound)
    }

    /// Swaps the strategy implementation in place and returns the old one.
    ///
    /// The replacement must live at the same account and report to this
    /// vault, typically a [`Strategy::restore`](crate::strategy::Strategy::restore)
    /// of the old one's snapshot, so balances and harvest history carry over.
    pub fn upgrade_strategy(&mut self, replacement: S) -> Result<S, VaultError> {
        let current = self.strategy.as_ref().ok_or(VaultError::NotInitialized)?;
        if replacement.account() != current.account() {
            return Err(VaultError::StrategyAccountMismatch {
                expected: current.account().to_string(),
                actual: replacement.account().to_string(),
            });
        }
        if replacement.vault() != self.account {
            return Err(VaultError::StrategyVaultMismatch {
                expected: self.account.clone(),
                actual: replacement.vault().to_string(),
            });
        }
        info!(
            vault = %self.account,
            strategy = %replacement.account(),
            state = %replacement.state(),
            "strategy upgraded"
        );
        self.strategy
            .replace(replacement)
            .ok_or(VaultError::NotInitialized)
    }

    // ---- Queries ----

    /// The vault's want-ledger account.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Current configuration.
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// The share ledger.
    pub fn shares(&self) -> &AssetLedger {
        &self.shares
    }

    /// Shares outstanding.
    pub fn total_supply(&self) -> u64 {
        self.shares.total_supply()
    }

    /// Shares held by `holder`.
    pub fn balance_of(&self, holder: &str) -> u64 {
        self.shares.balance_of(holder)
    }

    /// Lifetime deposits and withdrawals of `holder`.
    pub fn holder_totals(&self, holder: &str) -> HolderTotals {
        self.totals.get(holder).copied().unwrap_or_default()
    }

    /// The bound strategy, if any.
    pub fn strategy(&self) -> Option<&S> {
        self.strategy.as_ref()
    }

    /// Mutable access to the bound strategy, for harvests and admin calls.
    pub fn strategy_mut(&mut self) -> Option<&mut S> {
        self.strategy.as_mut()
    }

    /// Idle want held by the vault.
    pub fn available(&self, want: &AssetLedger) -> u64 {
        want.balance_of(&self.account)
    }

    /// Total want under management: idle plus the strategy's balance.
    pub fn balance(&self, want: &AssetLedger) -> u64 {
        let deployed = self
            .strategy
            .as_ref()
            .map(|s| s.balance_of(want))
            .unwrap_or(0);
        self.available(want).saturating_add(deployed)
    }

    /// Want value of one full share, scaled by [`SHARE_PRICE_SCALE`].
    /// Exactly the scale (1.0) while no shares exist.
    pub fn get_price_per_full_share(&self, want: &AssetLedger) -> u128 {
        let supply = self.shares.total_supply();
        if supply == 0 {
            return SHARE_PRICE_SCALE;
        }
        // u64 * 1e18 fits comfortably in u128.
        self.balance(want) as u128 * SHARE_PRICE_SCALE / supply as u128
    }

    /// Removes and returns undelivered audit events.
    pub fn drain_events(&self) -> Vec<EventEnvelope> {
        self.journal.drain()
    }

    // ---- Deposits ----

    /// Deposits `amount` of `holder`'s want and mints shares for it.
    ///
    /// # Errors
    ///
    /// - [`VaultError::ZeroAmount`] for `amount == 0`.
    /// - [`VaultError::NotInitialized`] before a strategy is bound.
    /// - [`VaultError::CapExceeded`] past the TVL cap.
    /// - [`VaultError::ZeroShares`] if the deposit is worth less than a share.
    /// - [`VaultError::Ledger`] if `holder` cannot cover `amount`.
    ///
    /// Nothing changes on error.
    pub fn deposit(
        &mut self,
        want: &mut AssetLedger,
        holder: &str,
        amount: u64,
    ) -> Result<Deposited, VaultError> {
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        if self.strategy.is_none() {
            return Err(VaultError::NotInitialized);
        }

        let pool = self.balance(want);
        if let Some(cap) = self.config.tvl_cap {
            if pool.checked_add(amount).map_or(true, |total| total > cap) {
                return Err(VaultError::CapExceeded {
                    cap,
                    total_assets: pool,
                    amount,
                });
            }
        }

        let fee = bps_of(amount, self.config.deposit_fee_bps)?;
        let net = checked_sub(amount, fee)?;
        let supply = self.shares.total_supply();
        let minted = if supply == 0 {
            net
        } else {
            mul_div(net, supply, pool)?
        };
        if minted == 0 {
            return Err(VaultError::ZeroShares);
        }
        supply.checked_add(minted).ok_or(MathError::Overflow)?;

        want.transfer(holder, &self.account, amount)?;
        self.shares.mint(holder, minted)?;
        let totals = self.totals.entry(holder.to_string()).or_default();
        totals.deposited = totals.deposited.saturating_add(amount as u128);

        self.earn(want)?;

        let receipt = Deposited {
            holder: holder.to_string(),
            amount,
            fee,
            shares_minted: minted,
            total_shares: self.shares.total_supply(),
            price_per_share: self.get_price_per_full_share(want),
        };
        info!(
            vault = %self.account,
            holder,
            amount,
            fee,
            shares = minted,
            total_shares = receipt.total_shares,
            price_per_share = %receipt.price_per_share,
            "deposit"
        );
        self.journal.record(PoolEvent::Deposited(receipt.clone()));
        Ok(receipt)
    }

    /// Deposits `holder`'s entire want balance.
    pub fn deposit_all(
        &mut self,
        want: &mut AssetLedger,
        holder: &str,
    ) -> Result<Deposited, VaultError> {
        let amount = want.balance_of(holder);
        self.deposit(want, holder, amount)
    }

    /// Forwards idle want to the strategy if it is taking deposits. Returns
    /// the amount forwarded.
    ///
    /// A strategy that fails to stake keeps the want on its own balance,
    /// where it still counts toward [`balance`](Self::balance).
    pub fn earn(&mut self, want: &mut AssetLedger) -> Result<u64, VaultError> {
        let idle = self.available(want);
        let Some(strategy) = self.strategy.as_mut() else {
            return Ok(0);
        };
        if idle == 0 || !strategy.state().accepts_deposits() {
            return Ok(0);
        }
        want.transfer(&self.account, strategy.account(), idle)?;
        if let Err(err) = strategy.deposit(want) {
            warn!(
                vault = %self.account,
                strategy = %strategy.account(),
                error = %err,
                "strategy could not deploy forwarded want"
            );
        }
        debug!(vault = %self.account, forwarded = idle, "earn");
        Ok(idle)
    }

    // ---- Withdrawals ----

    /// Redeems `shares` of `holder`'s shares for want, net of the
    /// withdrawal fee.
    ///
    /// # Errors
    ///
    /// - [`VaultError::ZeroAmount`] for `shares == 0`.
    /// - [`VaultError::InsufficientShares`] if `holder` holds fewer.
    /// - [`VaultError::InsufficientLiquidity`] if the strategy returned
    ///   nothing, or returned less than needed under
    ///   [`PartialWithdrawPolicy::Revert`]. Shares are restored in both
    ///   cases; want already pulled from the strategy stays idle.
    pub fn withdraw(
        &mut self,
        want: &mut AssetLedger,
        holder: &str,
        shares: u64,
    ) -> Result<Withdrawn, VaultError> {
        if shares == 0 {
            return Err(VaultError::ZeroAmount);
        }
        let held = self.shares.balance_of(holder);
        if held < shares {
            return Err(VaultError::InsufficientShares {
                holder: holder.to_string(),
                held,
                requested: shares,
            });
        }

        let pool = self.balance(want);
        let supply = self.shares.total_supply();
        let owed = mul_div(shares, pool, supply)?;

        self.shares.burn(holder, shares)?;

        let idle = self.available(want);
        if idle < owed {
            if let Err(err) = self.pull_from_strategy(want, owed - idle) {
                self.shares.mint(holder, shares)?;
                return Err(err);
            }
        }

        let sourced = self.available(want);
        let (gross, burned) = if sourced >= owed {
            (owed, shares)
        } else {
            let honored = match self.config.partial_withdraw {
                PartialWithdrawPolicy::BestEffort if sourced > 0 => {
                    mul_div_ceil(sourced, supply, pool)?.min(shares)
                }
                _ => 0,
            };
            self.shares.mint(holder, shares - honored)?;
            if honored == 0 {
                warn!(
                    vault = %self.account,
                    holder,
                    requested = owed,
                    available = sourced,
                    "withdrawal rejected for lack of liquidity"
                );
                return Err(VaultError::InsufficientLiquidity {
                    requested: owed,
                    available: sourced,
                });
            }
            warn!(
                vault = %self.account,
                holder,
                requested = owed,
                paid_out = sourced,
                shares_returned = shares - honored,
                "partial withdrawal"
            );
            (sourced, honored)
        };

        let fee = bps_of(gross, self.config.withdraw_fee_bps)?;
        let paid = checked_sub(gross, fee)?;
        want.transfer(&self.account, holder, paid)?;
        let totals = self.totals.entry(holder.to_string()).or_default();
        totals.withdrawn = totals.withdrawn.saturating_add(paid as u128);

        let receipt = Withdrawn {
            holder: holder.to_string(),
            shares_requested: shares,
            shares_burned: burned,
            gross_amount: gross,
            fee,
            paid,
            total_shares: self.shares.total_supply(),
            price_per_share: self.get_price_per_full_share(want),
        };
        info!(
            vault = %self.account,
            holder,
            shares = burned,
            gross,
            fee,
            paid,
            total_shares = receipt.total_shares,
            price_per_share = %receipt.price_per_share,
            "withdraw"
        );
        self.journal.record(PoolEvent::Withdrawn(receipt.clone()));
        Ok(receipt)
    }

    /// Redeems every share `holder` owns.
    pub fn withdraw_all(
        &mut self,
        want: &mut AssetLedger,
        holder: &str,
    ) -> Result<Withdrawn, VaultError> {
        let shares = self.shares.balance_of(holder);
        self.withdraw(want, holder, shares)
    }

    fn pull_from_strategy(
        &mut self,
        want: &mut AssetLedger,
        amount: u64,
    ) -> Result<u64, VaultError> {
        let strategy = self.strategy.as_mut().ok_or(VaultError::NotInitialized)?;
        let returned = strategy.withdraw(want, amount)?;
        debug!(vault = %self.account, requested = amount, returned, "pulled from strategy");
        Ok(returned)
    }

    // ---- Administration ----

    /// Sets the TVL cap.
    pub fn update_tvl_cap(&mut self, cap: u64) {
        info!(vault = %self.account, cap, "tvl cap updated");
        self.config.tvl_cap = Some(cap);
    }

    /// Lifts the TVL cap.
    pub fn remove_tvl_cap(&mut self) {
        info!(vault = %self.account, "tvl cap removed");
        self.config.tvl_cap = None;
    }

    /// Sets the deposit fee.
    pub fn update_deposit_fee(&mut self, bps: u64) -> Result<(), VaultError> {
        let config = VaultConfig {
            deposit_fee_bps: bps,
            ..self.config.clone()
        };
        config.validate()?;
        info!(vault = %self.account, bps, "deposit fee updated");
        self.config = config;
        Ok(())
    }

    /// Sets the withdrawal fee.
    pub fn update_withdraw_fee(&mut self, bps: u64) -> Result<(), VaultError> {
        let config = VaultConfig {
            withdraw_fee_bps: bps,
            ..self.config.clone()
        };
        config.validate()?;
        info!(vault = %self.account, bps, "withdraw fee updated");
        self.config = config;
        Ok(())
    }

    /// Changes how short strategy withdrawals are settled.
    pub fn update_partial_withdraw_policy(&mut self, policy: PartialWithdrawPolicy) {
        info!(vault = %self.account, ?policy, "partial withdraw policy updated");
        self.config.partial_withdraw = policy;
    }

    // ---- Strategy control ----

    fn bound_strategy(&mut self) -> Result<&mut S, VaultError> {
        self.strategy.as_mut().ok_or(VaultError::NotInitialized)
    }

    /// Stops the strategy from taking deposits and harvesting.
    pub fn pause_strategy(&mut self) -> Result<StrategyStateChanged, VaultError> {
        Ok(self.bound_strategy()?.pause()?)
    }

    /// Resumes the strategy and forwards whatever sat idle meanwhile.
    pub fn unpause_strategy(
        &mut self,
        want: &mut AssetLedger,
    ) -> Result<StrategyStateChanged, VaultError> {
        let change = self.bound_strategy()?.unpause(want)?;
        self.earn(want)?;
        Ok(change)
    }

    /// Panics the strategy: everything comes back to the vault and stays
    /// idle. `None` if it was already done.
    pub fn emergency_shutdown(
        &mut self,
        want: &mut AssetLedger,
    ) -> Result<Option<StrategyStateChanged>, VaultError> {
        let change = self.bound_strategy()?.panic(want)?;
        if change.is_some() {
            warn!(vault = %self.account, idle = self.available(want), "emergency shutdown");
        }
        Ok(change)
    }

    /// Retires the strategy, returning everything to the vault.
    pub fn retire_strategy(
        &mut self,
        want: &mut AssetLedger,
    ) -> Result<Option<StrategyStateChanged>, VaultError> {
        Ok(self.bound_strategy()?.retire(want)?)
    }
}
