//! # Yield Source Capability
//!
//! The external farm a strategy stakes into and harvests from. The
//! accounting core only ever talks to this trait; each concrete integration
//! is one implementation of it.
//!
//! All amounts are denominated in the want asset. Integrations that pay
//! rewards in another token convert inside [`YieldSource::claim`] and report
//! the want-denominated result.
//!
//! Staked principal is held by the source's custody account on the want
//! ledger, so a source cannot create or destroy principal; only yield is
//! minted, and only on claim.

pub mod memory;

pub use memory::InMemoryFarm;

use thiserror::Error;

use crate::ledger::{AssetLedger, LedgerError};

/// Errors surfaced by a yield source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum YieldSourceError {
    /// The source cannot be reached or refuses service right now. Retryable.
    #[error("yield source unavailable: {0}")]
    Unavailable(String),

    /// A ledger movement inside the source failed.
    #[error("yield source ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// What a strategy needs from a farm.
pub trait YieldSource: Send {
    /// The want-ledger account that custodies staked principal.
    fn custody_account(&self) -> &str;

    /// Moves `amount` of want from `from` into the farm.
    fn stake(
        &mut self,
        want: &mut AssetLedger,
        from: &str,
        amount: u64,
    ) -> Result<(), YieldSourceError>;

    /// Pulls up to `amount` of principal back to `to`. Returns what was
    /// actually released, which may be less when the farm imposes caps or
    /// slippage.
    fn unstake(
        &mut self,
        want: &mut AssetLedger,
        to: &str,
        amount: u64,
    ) -> Result<u64, YieldSourceError>;

    /// Yield accrued but not yet claimed.
    fn pending_yield(&self) -> Result<u64, YieldSourceError>;

    /// Claims all pending yield to `to`. Returns the amount received.
    fn claim(&mut self, want: &mut AssetLedger, to: &str) -> Result<u64, YieldSourceError>;

    /// Principal currently staked.
    fn deployed_value(&self) -> Result<u64, YieldSourceError>;
}
