//! In-memory farm.
//!
//! Behaves like a single-pool staking farm: principal sits in a custody
//! account, yield accrues when told to, and claims mint the accrued amount.
//! Handles are cheap clones over shared state so a test (or simulator) can
//! keep steering the farm after handing a clone to a strategy.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{YieldSource, YieldSourceError};
use crate::config::PERCENT_DIVISOR;
use crate::ledger::{AccountId, AssetLedger};
use crate::math::mul_div;

#[derive(Debug, Default)]
struct FarmState {
    staked: u64,
    pending: u64,
    withdraw_cap: Option<u64>,
    outage: Option<String>,
    outage_after_unstakes: Option<(u32, String)>,
    claims: u64,
}

/// A scriptable farm backed by the want ledger.
#[derive(Clone, Debug)]
pub struct InMemoryFarm {
    custody: AccountId,
    state: Arc<Mutex<FarmState>>,
}

impl InMemoryFarm {
    /// Creates a farm whose principal lives in `custody`.
    pub fn new(custody: impl Into<AccountId>) -> Self {
        Self {
            custody: custody.into(),
            state: Arc::new(Mutex::new(FarmState::default())),
        }
    }

    /// Adds `amount` of claimable yield.
    pub fn accrue(&self, amount: u64) {
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_add(amount);
    }

    /// Adds yield equal to `bps` of the staked principal.
    pub fn accrue_bps(&self, bps: u64) {
        let mut state = self.state.lock();
        let reward = mul_div(state.staked, bps, PERCENT_DIVISOR).unwrap_or(u64::MAX);
        state.pending = state.pending.saturating_add(reward);
    }

    /// Caps how much principal a single unstake may release. `None` lifts it.
    pub fn set_withdraw_cap(&self, cap: Option<u64>) {
        self.state.lock().withdraw_cap = cap;
    }

    /// Makes every call fail with [`YieldSourceError::Unavailable`].
    pub fn fail_with(&self, reason: impl Into<String>) {
        self.state.lock().outage = Some(reason.into());
    }

    /// Lets `unstakes` more unstake calls succeed, then fails like
    /// [`fail_with`](Self::fail_with).
    pub fn fail_after_unstakes(&self, unstakes: u32, reason: impl Into<String>) {
        let mut state = self.state.lock();
        if unstakes == 0 {
            state.outage = Some(reason.into());
        } else {
            state.outage_after_unstakes = Some((unstakes, reason.into()));
        }
    }

    /// Ends an outage started by [`fail_with`](Self::fail_with) or
    /// [`fail_after_unstakes`](Self::fail_after_unstakes).
    pub fn recover(&self) {
        let mut state = self.state.lock();
        state.outage = None;
        state.outage_after_unstakes = None;
    }

    /// Destroys up to `amount` of staked principal, as a hack or a bad
    /// swap would. Returns what was lost.
    pub fn realize_loss(
        &self,
        want: &mut AssetLedger,
        amount: u64,
    ) -> Result<u64, YieldSourceError> {
        let mut state = self.state.lock();
        let lost = amount.min(state.staked);
        want.burn(&self.custody, lost)?;
        state.staked -= lost;
        warn!(custody = %self.custody, lost, staked = state.staked, "farm principal lost");
        Ok(lost)
    }

    /// Principal currently staked, bypassing outage checks.
    pub fn staked(&self) -> u64 {
        self.state.lock().staked
    }

    /// Number of successful non-empty claims so far.
    pub fn claim_count(&self) -> u64 {
        self.state.lock().claims
    }

    fn check_outage(state: &FarmState) -> Result<(), YieldSourceError> {
        match &state.outage {
            Some(reason) => Err(YieldSourceError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

impl YieldSource for InMemoryFarm {
    fn custody_account(&self) -> &str {
        &self.custody
    }

    fn stake(
        &mut self,
        want: &mut AssetLedger,
        from: &str,
        amount: u64,
    ) -> Result<(), YieldSourceError> {
        let mut state = self.state.lock();
        Self::check_outage(&state)?;
        let staked = state
            .staked
            .checked_add(amount)
            .ok_or_else(|| YieldSourceError::Unavailable("stake overflow".into()))?;
        want.transfer(from, &self.custody, amount)?;
        state.staked = staked;
        debug!(from, amount, staked, "farm stake");
        Ok(())
    }

    fn unstake(
        &mut self,
        want: &mut AssetLedger,
        to: &str,
        amount: u64,
    ) -> Result<u64, YieldSourceError> {
        let mut state = self.state.lock();
        Self::check_outage(&state)?;
        let mut released = amount.min(state.staked);
        if let Some(cap) = state.withdraw_cap {
            released = released.min(cap);
        }
        want.transfer(&self.custody, to, released)?;
        state.staked -= released;
        debug!(to, requested = amount, released, "farm unstake");
        if let Some((remaining, reason)) = state.outage_after_unstakes.take() {
            if remaining <= 1 {
                state.outage = Some(reason);
            } else {
                state.outage_after_unstakes = Some((remaining - 1, reason));
            }
        }
        Ok(released)
    }

    fn pending_yield(&self) -> Result<u64, YieldSourceError> {
        let state = self.state.lock();
        Self::check_outage(&state)?;
        Ok(state.pending)
    }

    fn claim(&mut self, want: &mut AssetLedger, to: &str) -> Result<u64, YieldSourceError> {
        let mut state = self.state.lock();
        Self::check_outage(&state)?;
        let reward = state.pending;
        if reward == 0 {
            return Ok(0);
        }
        want.mint(to, reward)?;
        state.pending = 0;
        state.claims += 1;
        debug!(to, reward, "farm claim");
        Ok(reward)
    }

    fn deployed_value(&self) -> Result<u64, YieldSourceError> {
        let state = self.state.lock();
        Self::check_outage(&state)?;
        Ok(state.staked)
    }
}
