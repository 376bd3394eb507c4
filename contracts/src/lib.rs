//! # Granary Pool Contracts
//!
//! The accounting engine of a single-asset yield pool:
//!
//! - **Vault** — share issuance and redemption against the pool's total
//!   want balance, deposit/withdrawal fees, TVL cap, and the control surface
//!   over the bound strategy.
//! - **Strategy** — deploys want into a yield source, harvests and compounds
//!   profit, and keeps the harvest log that trailing APR is computed from.
//! - **Harvest Log** — append-only, cadence-gated record of realized yield.
//! - **Events** — structured audit events for every state change.
//! - **Pool** — a lock around ledger and vault so operations serialize.
//!
//! ## Design Principles
//!
//! 1. All money arithmetic is checked, and products go through `u128`.
//! 2. Rounding always favors the pool, never the caller.
//! 3. Every operation validates before it writes; a failed call changes
//!    nothing.
//! 4. Shares are burned before want leaves the vault, and harvested profit
//!    is logged before it is reinvested.

pub mod events;
pub mod harvest_log;
pub mod pool;
pub mod strategy;
pub mod vault;

pub use events::{EventEnvelope, EventJournal, PoolEvent};
pub use harvest_log::{HarvestLog, HarvestLogEntry, HarvestSplit};
pub use pool::SharedPool;
pub use strategy::{Strategy, StrategyError, StrategySnapshot, StrategyState, VaultStrategy};
pub use vault::{Vault, VaultError};
