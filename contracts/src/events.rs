//! # Audit Events
//!
//! Every deposit, withdrawal, harvest and strategy state change produces a
//! [`PoolEvent`]. The payload structs double as operation receipts: the
//! vault and strategy return them to the caller and append them, wrapped in
//! an [`EventEnvelope`], to a shared [`EventJournal`] that an indexer or
//! auditor can drain.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use granary_protocol::ledger::AccountId;

use crate::harvest_log::HarvestSplit;
use crate::strategy::StrategyState;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A deposit was accepted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposited {
    /// Who deposited.
    pub holder: AccountId,
    /// Want units taken from the holder.
    pub amount: u64,
    /// Deposit fee retained by the pool.
    pub fee: u64,
    /// Shares minted to the holder.
    pub shares_minted: u64,
    /// Share supply afterwards.
    pub total_shares: u64,
    /// Price per full share afterwards (scaled by 1e18).
    pub price_per_share: u128,
}

/// A withdrawal was paid out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawn {
    /// Who withdrew.
    pub holder: AccountId,
    /// Shares requested for redemption.
    pub shares_requested: u64,
    /// Shares actually burned. Lower than requested only when the strategy
    /// could not source the full amount.
    pub shares_burned: u64,
    /// Want value redeemed before the withdrawal fee.
    pub gross_amount: u64,
    /// Withdrawal fee retained by the pool.
    pub fee: u64,
    /// Want units transferred to the holder.
    pub paid: u64,
    /// Share supply afterwards.
    pub total_shares: u64,
    /// Price per full share afterwards (scaled by 1e18).
    pub price_per_share: u128,
}

/// A harvest realized profit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Harvested {
    /// Who triggered the harvest (and received the call fee).
    pub caller: AccountId,
    /// Profit and fee split.
    pub split: HarvestSplit,
    /// Profit staked back into the farm by this harvest.
    pub reinvested: u64,
    /// Strategy balance afterwards.
    pub strategy_balance: u64,
    /// Whether a harvest log entry was appended.
    pub logged: bool,
}

/// A harvest failed because the yield source was unavailable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestFailed {
    /// Who tried to harvest.
    pub caller: AccountId,
    /// Reported cause.
    pub reason: String,
    /// Failures in a row, including this one.
    pub consecutive_failures: u32,
}

/// The strategy moved between lifecycle states.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyStateChanged {
    /// State before.
    pub from: StrategyState,
    /// State after.
    pub to: StrategyState,
    /// Want units returned to the vault by the transition.
    pub swept_to_vault: u64,
}

/// The vault was bound to its strategy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyBound {
    /// The vault account.
    pub vault: AccountId,
    /// The strategy account.
    pub strategy: AccountId,
}

// ---------------------------------------------------------------------------
// PoolEvent
// ---------------------------------------------------------------------------

/// Any auditable event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PoolEvent {
    /// See [`Deposited`].
    Deposited(Deposited),
    /// See [`Withdrawn`].
    Withdrawn(Withdrawn),
    /// See [`Harvested`].
    Harvested(Harvested),
    /// See [`HarvestFailed`].
    HarvestFailed(HarvestFailed),
    /// See [`StrategyStateChanged`].
    StrategyStateChanged(StrategyStateChanged),
    /// See [`StrategyBound`].
    StrategyBound(StrategyBound),
}

impl PoolEvent {
    /// Short name for log lines and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            PoolEvent::Deposited(_) => "deposited",
            PoolEvent::Withdrawn(_) => "withdrawn",
            PoolEvent::Harvested(_) => "harvested",
            PoolEvent::HarvestFailed(_) => "harvest_failed",
            PoolEvent::StrategyStateChanged(_) => "strategy_state_changed",
            PoolEvent::StrategyBound(_) => "strategy_bound",
        }
    }
}

/// An event with identity and time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique per event.
    pub event_id: Uuid,
    /// Position in the journal, starting at 0.
    pub sequence: u64,
    /// When the event was recorded.
    pub emitted_at: DateTime<Utc>,
    /// The payload.
    pub event: PoolEvent,
}

// ---------------------------------------------------------------------------
// EventJournal
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct JournalInner {
    next_sequence: u64,
    pending: Vec<EventEnvelope>,
}

/// Shared, ordered buffer of undelivered events.
///
/// Cloning yields another handle to the same journal, which is how the vault
/// and its strategy append to one totally ordered stream.
#[derive(Clone, Debug, Default)]
pub struct EventJournal {
    inner: Arc<Mutex<JournalInner>>,
}

impl EventJournal {
    /// Creates an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event and returns its envelope.
    pub fn record(&self, event: PoolEvent) -> EventEnvelope {
        let mut inner = self.inner.lock();
        let envelope = EventEnvelope {
            event_id: Uuid::new_v4(),
            sequence: inner.next_sequence,
            emitted_at: Utc::now(),
            event,
        };
        inner.next_sequence += 1;
        debug!(
            sequence = envelope.sequence,
            kind = envelope.event.kind(),
            "event recorded"
        );
        inner.pending.push(envelope.clone());
        envelope
    }

    /// Removes and returns all undelivered events, oldest first.
    pub fn drain(&self) -> Vec<EventEnvelope> {
        std::mem::take(&mut self.inner.lock().pending)
    }

    /// Number of undelivered events.
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// `true` if there is nothing to deliver.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
