//! # Shared Pool
//!
//! The vault and strategy assume each operation runs to completion before
//! the next one starts. [`SharedPool`] provides that off-chain: one mutex
//! owns the want ledger and the vault (which owns the strategy), and every
//! operation runs inside a single critical section. Handles are cheap clones
//! and can be sent across threads.
//!
//! A failed operation leaves share balances, holder totals and the harvest
//! log unchanged, so a caller never observes a half-applied deposit,
//! withdrawal or harvest. Want may still have moved between the vault's
//! idle balance, the strategy and the farm: a rejected `Revert` withdrawal
//! keeps what it pulled idle, and an interrupted sweep leaves released
//! principal on the strategy until it is retried.

use std::sync::Arc;

use parking_lot::Mutex;

use granary_protocol::ledger::AssetLedger;
use granary_protocol::yield_source::YieldSource;

use crate::events::{Deposited, EventEnvelope, Harvested, Withdrawn};
use crate::strategy::{HarvestEstimate, Strategy, VaultStrategy};
use crate::vault::{Vault, VaultError};

struct PoolState<S: VaultStrategy> {
    want: AssetLedger,
    vault: Vault<S>,
}

/// A vault and its want ledger behind one lock.
pub struct SharedPool<S: VaultStrategy> {
    inner: Arc<Mutex<PoolState<S>>>,
}

impl<S: VaultStrategy> Clone for SharedPool<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: VaultStrategy> SharedPool<S> {
    /// Takes ownership of the want ledger and an initialized vault.
    pub fn new(want: AssetLedger, vault: Vault<S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolState { want, vault })),
        }
    }

    /// Runs `f` with exclusive access to the ledger and vault.
    pub fn transact<R>(&self, f: impl FnOnce(&mut AssetLedger, &mut Vault<S>) -> R) -> R {
        let mut guard = self.inner.lock();
        let PoolState { want, vault } = &mut *guard;
        f(want, vault)
    }

    /// See [`Vault::deposit`].
    pub fn deposit(&self, holder: &str, amount: u64) -> Result<Deposited, VaultError> {
        self.transact(|want, vault| vault.deposit(want, holder, amount))
    }

    /// See [`Vault::withdraw`].
    pub fn withdraw(&self, holder: &str, shares: u64) -> Result<Withdrawn, VaultError> {
        self.transact(|want, vault| vault.withdraw(want, holder, shares))
    }

    /// See [`Vault::withdraw_all`].
    pub fn withdraw_all(&self, holder: &str) -> Result<Withdrawn, VaultError> {
        self.transact(|want, vault| vault.withdraw_all(want, holder))
    }

    /// See [`Vault::balance`].
    pub fn balance(&self) -> u64 {
        self.transact(|want, vault| vault.balance(want))
    }

    /// See [`Vault::get_price_per_full_share`].
    pub fn price_per_full_share(&self) -> u128 {
        self.transact(|want, vault| vault.get_price_per_full_share(want))
    }

    /// Shares held by `holder`.
    pub fn share_balance(&self, holder: &str) -> u64 {
        self.transact(|_, vault| vault.balance_of(holder))
    }

    /// Want held by `account`.
    pub fn want_balance(&self, account: &str) -> u64 {
        self.transact(|want, _| want.balance_of(account))
    }

    /// See [`Vault::drain_events`].
    pub fn drain_events(&self) -> Vec<EventEnvelope> {
        self.transact(|_, vault| vault.drain_events())
    }
}

impl<Y: YieldSource> SharedPool<Strategy<Y>> {
    /// Harvests the bound strategy on behalf of `caller`.
    pub fn harvest(&self, caller: &str) -> Result<Harvested, VaultError> {
        self.transact(|want, vault| -> Result<Harvested, VaultError> {
            let strategy = vault.strategy_mut().ok_or(VaultError::NotInitialized)?;
            Ok(strategy.harvest(want, caller)?)
        })
    }

    /// See [`Strategy::estimate_harvest`].
    pub fn estimate_harvest(&self) -> Result<HarvestEstimate, VaultError> {
        self.transact(|_, vault| -> Result<HarvestEstimate, VaultError> {
            let strategy = vault.strategy().ok_or(VaultError::NotInitialized)?;
            Ok(strategy.estimate_harvest()?)
        })
    }
}
