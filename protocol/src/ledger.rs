//! # Asset Ledger
//!
//! A single-asset balance book. The vault keeps one ledger for the want
//! token (shared with depositors, the strategy, fee recipients and the
//! yield source) and one for its own shares.
//!
//! Every operation is all-or-nothing: balances are checked before anything
//! is written, so a rejected call leaves the ledger exactly as it found it.
//! Units are only created by [`mint`](AssetLedger::mint) and only destroyed
//! by [`burn`](AssetLedger::burn); `total_minted - total_burned` always
//! equals [`total_supply`](AssetLedger::total_supply), which always equals
//! the sum of all balances.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifies a balance holder: a depositor, the vault, the strategy, a
/// fee recipient or a yield source custody account.
pub type AccountId = String;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The source account holds less than the requested amount.
    #[error("insufficient balance: {account} holds {available}, requested {requested}")]
    InsufficientBalance {
        /// The account being debited.
        account: AccountId,
        /// Its current balance.
        available: u64,
        /// The amount that was requested.
        requested: u64,
    },

    /// Crediting would overflow a balance or the total supply.
    #[error("balance overflow: {account} holds {current}, credit {credit}")]
    Overflow {
        /// The account being credited (or `"<supply>"` for the total).
        account: AccountId,
        /// The value before the failed credit.
        current: u64,
        /// The amount that caused the overflow.
        credit: u64,
    },
}

// ---------------------------------------------------------------------------
// AssetLedger
// ---------------------------------------------------------------------------

/// Balances of one fungible asset.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AssetLedger {
    /// Ticker, for logs only.
    symbol: String,
    /// Non-zero balances. Ordered so that snapshots serialize stably.
    balances: BTreeMap<AccountId, u64>,
    /// Sum of all balances.
    total_supply: u64,
    /// Lifetime units created.
    total_minted: u128,
    /// Lifetime units destroyed.
    total_burned: u128,
}

impl AssetLedger {
    /// Creates an empty ledger for the given asset symbol.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Self::default()
        }
    }

    /// The asset symbol.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Balance of `account`, zero if it has never held anything.
    pub fn balance_of(&self, account: &str) -> u64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Sum of all balances.
    pub fn total_supply(&self) -> u64 {
        self.total_supply
    }

    /// Lifetime units minted.
    pub fn total_minted(&self) -> u128 {
        self.total_minted
    }

    /// Lifetime units burned.
    pub fn total_burned(&self) -> u128 {
        self.total_burned
    }

    /// Number of accounts with a non-zero balance.
    pub fn holder_count(&self) -> usize {
        self.balances.len()
    }

    /// Iterates over `(account, balance)` for all non-zero balances.
    pub fn holders(&self) -> impl Iterator<Item = (&AccountId, u64)> {
        self.balances.iter().map(|(account, amount)| (account, *amount))
    }

    /// Creates `amount` new units in `holder`'s balance.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Overflow`] if either the balance or the total
    /// supply would exceed `u64::MAX`. Nothing is written in that case.
    pub fn mint(&mut self, holder: &str, amount: u64) -> Result<u64, LedgerError> {
        let current = self.balance_of(holder);
        let new_balance = current.checked_add(amount).ok_or(LedgerError::Overflow {
            account: holder.to_string(),
            current,
            credit: amount,
        })?;
        let new_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(LedgerError::Overflow {
                account: "<supply>".into(),
                current: self.total_supply,
                credit: amount,
            })?;

        self.set_balance(holder, new_balance);
        self.total_supply = new_supply;
        self.total_minted += amount as u128;
        Ok(new_balance)
    }

    /// Destroys `amount` units from `holder`'s balance.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InsufficientBalance`] if `holder` holds less
    /// than `amount`.
    pub fn burn(&mut self, holder: &str, amount: u64) -> Result<u64, LedgerError> {
        let current = self.balance_of(holder);
        if current < amount {
            return Err(LedgerError::InsufficientBalance {
                account: holder.to_string(),
                available: current,
                requested: amount,
            });
        }

        let new_balance = current - amount;
        self.set_balance(holder, new_balance);
        // Supply >= any single balance, so this cannot underflow.
        self.total_supply -= amount;
        self.total_burned += amount as u128;
        Ok(new_balance)
    }

    /// Moves `amount` units from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InsufficientBalance`] if `from` is short, or
    /// [`LedgerError::Overflow`] if `to` would overflow. Nothing is written
    /// on error.
    pub fn transfer(&mut self, from: &str, to: &str, amount: u64) -> Result<(), LedgerError> {
        let from_balance = self.balance_of(from);
        if from_balance < amount {
            return Err(LedgerError::InsufficientBalance {
                account: from.to_string(),
                available: from_balance,
                requested: amount,
            });
        }
        if from == to || amount == 0 {
            return Ok(());
        }

        let to_balance = self.balance_of(to);
        let new_to = to_balance.checked_add(amount).ok_or(LedgerError::Overflow {
            account: to.to_string(),
            current: to_balance,
            credit: amount,
        })?;

        self.set_balance(from, from_balance - amount);
        self.set_balance(to, new_to);
        Ok(())
    }

    fn set_balance(&mut self, account: &str, amount: u64) {
        if amount == 0 {
            self.balances.remove(account);
        } else {
            self.balances.insert(account.to_string(), amount);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_conserved(ledger: &AssetLedger) {
        let sum: u64 = ledger.holders().map(|(_, b)| b).sum();
        assert_eq!(sum, ledger.total_supply());
        assert_eq!(
            ledger.total_minted() - ledger.total_burned(),
            ledger.total_supply() as u128
        );
    }

    #[test]
    fn mint_credits_holder_and_supply() {
        let mut ledger = AssetLedger::new("WANT");
        assert_eq!(ledger.mint("alice", 1_000).unwrap(), 1_000);
        assert_eq!(ledger.balance_of("alice"), 1_000);
        assert_eq!(ledger.total_supply(), 1_000);
        assert_conserved(&ledger);
    }

    #[test]
    fn burn_debits_holder_and_supply() {
        let mut ledger = AssetLedger::new("WANT");
        ledger.mint("alice", 1_000).unwrap();
        assert_eq!(ledger.burn("alice", 400).unwrap(), 600);
        assert_eq!(ledger.total_supply(), 600);
        assert_conserved(&ledger);
    }

    #[test]
    fn burn_more_than_balance_rejected_without_side_effects() {
        let mut ledger = AssetLedger::new("WANT");
        ledger.mint("alice", 100).unwrap();
        let err = ledger.burn("alice", 200).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                account: "alice".into(),
                available: 100,
                requested: 200,
            }
        );
        assert_eq!(ledger.balance_of("alice"), 100);
        assert_eq!(ledger.total_supply(), 100);
    }

    #[test]
    fn transfer_moves_units() {
        let mut ledger = AssetLedger::new("WANT");
        ledger.mint("alice", 500).unwrap();
        ledger.transfer("alice", "bob", 200).unwrap();
        assert_eq!(ledger.balance_of("alice"), 300);
        assert_eq!(ledger.balance_of("bob"), 200);
        assert_eq!(ledger.total_supply(), 500);
        assert_conserved(&ledger);
    }

    #[test]
    fn transfer_insufficient_rejected() {
        let mut ledger = AssetLedger::new("WANT");
        ledger.mint("alice", 50).unwrap();
        assert!(matches!(
            ledger.transfer("alice", "bob", 51),
            Err(LedgerError::InsufficientBalance { .. })
        ));
        assert_eq!(ledger.balance_of("alice"), 50);
        assert_eq!(ledger.balance_of("bob"), 0);
    }

    #[test]
    fn mint_supply_overflow_rejected() {
        let mut ledger = AssetLedger::new("WANT");
        ledger.mint("alice", u64::MAX).unwrap();
        let err = ledger.mint("bob", 1).unwrap_err();
        assert!(matches!(err, LedgerError::Overflow { .. }));
        assert_eq!(ledger.balance_of("bob"), 0);
    }

    #[test]
    fn zero_amount_operations_are_noops() {
        let mut ledger = AssetLedger::new("WANT");
        ledger.mint("alice", 0).unwrap();
        ledger.burn("alice", 0).unwrap();
        ledger.transfer("alice", "bob", 0).unwrap();
        assert_eq!(ledger.holder_count(), 0);
        assert_conserved(&ledger);
    }

    #[test]
    fn self_transfer_is_noop() {
        let mut ledger = AssetLedger::new("WANT");
        ledger.mint("alice", 10).unwrap();
        ledger.transfer("alice", "alice", 10).unwrap();
        assert_eq!(ledger.balance_of("alice"), 10);
    }

    #[test]
    fn emptied_accounts_are_pruned() {
        let mut ledger = AssetLedger::new("WANT");
        ledger.mint("alice", 10).unwrap();
        ledger.transfer("alice", "bob", 10).unwrap();
        assert_eq!(ledger.holder_count(), 1);
        assert_eq!(ledger.holders().next().map(|(a, _)| a.as_str()), Some("bob"));
    }

    #[test]
    fn ledger_serialization_roundtrip() {
        let mut ledger = AssetLedger::new("gVAULT");
        ledger.mint("alice", 42).unwrap();
        let json = serde_json::to_string(&ledger).expect("serialize");
        let recovered: AssetLedger = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(recovered.balance_of("alice"), 42);
        assert_eq!(recovered.symbol(), "gVAULT");
    }
}
