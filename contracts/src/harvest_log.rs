//! # Harvest Log
//!
//! Append-only record of realized yield, newest last. Entries are never
//! edited or removed; they exist so the strategy can report trailing APR.
//!
//! ## Cadence
//!
//! Harvests may run far more often than is useful for APR tracking. The log
//! only appends when at least `cadence_secs` have passed since the previous
//! entry. Harvests inside the window are folded into a pending accumulator
//! and land in the next entry, so no realized profit is dropped from the
//! record.
//!
//! ## APR
//!
//! Each entry annualizes the profit that accrued to depositors (profit
//! minus fees) against the strategy balance at the start of its window:
//!
//! ```text
//! apr_bps = reinvested * SECONDS_PER_YEAR * 10_000 / (balance_before * elapsed_secs)
//! ```
//!
//! Trailing APR is the arithmetic mean over the selected entries. Entries
//! with a zero balance or zero elapsed time carry no rate and are skipped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use granary_protocol::config::{FeeConfig, PERCENT_DIVISOR, SECONDS_PER_YEAR};
use granary_protocol::math::{bps_of, checked_sub, MathError};

/// Errors from log queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarvestLogError {
    /// No entries to aggregate.
    #[error("harvest log has no entries to aggregate")]
    InsufficientHistory,

    /// Index range is empty or out of bounds.
    #[error("invalid harvest log range {start}..={end} (log length {len})")]
    InvalidRange {
        /// First index requested.
        start: usize,
        /// Last index requested.
        end: usize,
        /// Current log length.
        len: usize,
    },
}

// ---------------------------------------------------------------------------
// HarvestSplit
// ---------------------------------------------------------------------------

/// How one unit of harvested profit was divided.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestSplit {
    /// Want-denominated yield claimed, before fees.
    pub profit: u64,
    /// Paid to the harvest caller.
    pub call_fee: u64,
    /// Paid to the treasury.
    pub treasury_fee: u64,
    /// Paid to the strategist.
    pub strategist_fee: u64,
}

impl HarvestSplit {
    /// Splits `profit` according to `fees`.
    ///
    /// Rounding dust stays with the reinvested remainder.
    pub fn compute(profit: u64, fees: &FeeConfig) -> Result<Self, MathError> {
        let total_fee = bps_of(profit, fees.total_fee_bps)?;
        let call_fee = bps_of(total_fee, fees.call_fee_bps)?;
        let treasury_gross = bps_of(total_fee, fees.treasury_fee_bps)?;
        let strategist_fee = bps_of(treasury_gross, fees.strategist_fee_bps)?;
        let treasury_fee = checked_sub(treasury_gross, strategist_fee)?;
        Ok(Self {
            profit,
            call_fee,
            treasury_fee,
            strategist_fee,
        })
    }

    /// Sum of all fees.
    pub fn total_fees(&self) -> u64 {
        self.call_fee
            .saturating_add(self.treasury_fee)
            .saturating_add(self.strategist_fee)
    }

    /// What stays in the pool.
    pub fn reinvested(&self) -> u64 {
        self.profit.saturating_sub(self.total_fees())
    }

    fn absorb(&mut self, other: &HarvestSplit) {
        self.profit = self.profit.saturating_add(other.profit);
        self.call_fee = self.call_fee.saturating_add(other.call_fee);
        self.treasury_fee = self.treasury_fee.saturating_add(other.treasury_fee);
        self.strategist_fee = self.strategist_fee.saturating_add(other.strategist_fee);
    }
}

// ---------------------------------------------------------------------------
// HarvestLogEntry
// ---------------------------------------------------------------------------

/// One immutable log record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestLogEntry {
    /// When the entry was appended.
    pub timestamp: DateTime<Utc>,
    /// Seconds since the previous entry, or since the position was opened.
    pub elapsed_secs: u64,
    /// Strategy balance at the start of the window, before reinvestment.
    pub balance_before: u64,
    /// Harvests folded into this entry.
    pub harvests: u32,
    /// Gross profit.
    pub profit: u64,
    /// Caller fees paid.
    pub call_fee: u64,
    /// Treasury fees paid.
    pub treasury_fee: u64,
    /// Strategist fees paid.
    pub strategist_fee: u64,
}

impl HarvestLogEntry {
    /// Profit minus fees.
    pub fn reinvested(&self) -> u64 {
        self.profit
            .saturating_sub(self.call_fee)
            .saturating_sub(self.treasury_fee)
            .saturating_sub(self.strategist_fee)
    }

    /// Annualized return of this window in basis points, or `None` when the
    /// window has no capital or no duration.
    pub fn apr_bps(&self) -> Option<u64> {
        if self.balance_before == 0 || self.elapsed_secs == 0 {
            return None;
        }
        let numerator = (self.reinvested() as u128)
            * (SECONDS_PER_YEAR as u128)
            * (PERCENT_DIVISOR as u128);
        let denominator = (self.balance_before as u128) * (self.elapsed_secs as u128);
        Some(u64::try_from(numerator / denominator).unwrap_or(u64::MAX))
    }
}

// ---------------------------------------------------------------------------
// HarvestLog
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct PendingWindow {
    balance_before: u64,
    harvests: u32,
    split: HarvestSplit,
}

/// The log itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestLog {
    entries: Vec<HarvestLogEntry>,
    cadence_secs: u64,
    last_logged_at: DateTime<Utc>,
    pending: Option<PendingWindow>,
}

impl HarvestLog {
    /// Starts an empty log. The first window opens at `started_at`.
    pub fn new(cadence_secs: u64, started_at: DateTime<Utc>) -> Self {
        Self {
            entries: Vec::new(),
            cadence_secs,
            last_logged_at: started_at,
            pending: None,
        }
    }

    /// Number of appended entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nothing has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> &[HarvestLogEntry] {
        &self.entries
    }

    /// Current cadence.
    pub fn cadence_secs(&self) -> u64 {
        self.cadence_secs
    }

    /// Changes the minimum spacing between entries. Takes effect from the
    /// next harvest; the open window is kept.
    pub fn set_cadence(&mut self, cadence_secs: u64) {
        self.cadence_secs = cadence_secs;
    }

    /// Starts the next window at `now` unless harvests are already
    /// pending in it. Called when a position opens from empty, so idle
    /// time before that does not dilute the first entry's rate.
    pub fn restart_window(&mut self, now: DateTime<Utc>) {
        if self.pending.is_none() && now > self.last_logged_at {
            self.last_logged_at = now;
        }
    }

    /// Harvests recorded since the last appended entry.
    pub fn pending_harvests(&self) -> u32 {
        self.pending.map(|p| p.harvests).unwrap_or(0)
    }

    /// Records a harvest. Returns the appended entry when the cadence
    /// window has elapsed, `None` if the harvest was folded into the open
    /// window.
    pub fn record(
        &mut self,
        now: DateTime<Utc>,
        balance_before: u64,
        split: HarvestSplit,
    ) -> Option<&HarvestLogEntry> {
        let window = self.pending.get_or_insert(PendingWindow {
            balance_before,
            harvests: 0,
            split: HarvestSplit::default(),
        });
        window.harvests = window.harvests.saturating_add(1);
        window.split.absorb(&split);

        let elapsed_secs = (now - self.last_logged_at).num_seconds().max(0) as u64;
        if elapsed_secs < self.cadence_secs {
            return None;
        }

        let window = self.pending.take()?;
        self.entries.push(HarvestLogEntry {
            timestamp: now,
            elapsed_secs,
            balance_before: window.balance_before,
            harvests: window.harvests,
            profit: window.split.profit,
            call_fee: window.split.call_fee,
            treasury_fee: window.split.treasury_fee,
            strategist_fee: window.split.strategist_fee,
        });
        self.last_logged_at = now;
        self.entries.last()
    }

    /// The newest `min(n, len)` entries, oldest first.
    pub fn latest_slice(&self, n: usize) -> &[HarvestLogEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    /// Mean APR (bps) over entries `start..=end`.
    pub fn apr_between(&self, start: usize, end: usize) -> Result<u64, HarvestLogError> {
        if self.entries.is_empty() {
            return Err(HarvestLogError::InsufficientHistory);
        }
        if start > end || end >= self.entries.len() {
            return Err(HarvestLogError::InvalidRange {
                start,
                end,
                len: self.entries.len(),
            });
        }
        Ok(mean_apr(&self.entries[start..=end]))
    }

    /// Mean APR (bps) over the newest `min(n, len)` entries.
    pub fn average_apr(&self, n: usize) -> Result<u64, HarvestLogError> {
        if n == 0 || self.entries.is_empty() {
            return Err(HarvestLogError::InsufficientHistory);
        }
        Ok(mean_apr(self.latest_slice(n)))
    }
}

fn mean_apr(entries: &[HarvestLogEntry]) -> u64 {
    let (sum, count) = entries
        .iter()
        .filter_map(HarvestLogEntry::apr_bps)
        .fold((0u128, 0u128), |(sum, count), apr| (sum + apr as u128, count + 1));
    if count == 0 {
        return 0;
    }
    (sum / count) as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
