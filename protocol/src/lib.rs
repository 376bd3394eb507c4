// Copyright (c) 2026 Granary Contributors. MIT License.
// See LICENSE for details.

//! # Granary Protocol — Core Primitives
//!
//! The building blocks the pool contracts are written against. Nothing in
//! this crate knows about shares or strategies; it provides balances,
//! arithmetic, time and the yield-source capability.
//!
//! ## Modules
//!
//! - **config** — Fee ceilings, scales, defaults and the injected config
//!   structs.
//! - **math** — Overflow-checked `mul_div` with `u128` intermediates.
//! - **ledger** — Single-asset balance book with mint/burn/transfer.
//! - **yield_source** — The farm capability, plus an in-memory farm.
//! - **clock** — Wall-clock and manual time sources.
//! - **logging** — `tracing` subscriber setup.
//!
//! ## Design Philosophy
//!
//! 1. Integer math only. Money never touches a float.
//! 2. Every operation is all-or-nothing.
//! 3. If it touches money, it has tests. Plural.

pub mod clock;
pub mod config;
pub mod ledger;
pub mod logging;
pub mod math;
pub mod yield_source;
