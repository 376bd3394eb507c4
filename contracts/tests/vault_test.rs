//! Integration tests for vault share accounting.
//!
//! These drive a real strategy over an in-memory farm and check the pool
//! from the outside: share supply, price-per-share, what holders receive,
//! and what is left behind when things go wrong.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use granary_contracts::strategy::{Strategy, StrategyState, VaultStrategy};
use granary_contracts::vault::{Vault, VaultError};
use granary_contracts::EventJournal;
use granary_protocol::clock::ManualClock;
use granary_protocol::config::{
    FeeConfig, PartialWithdrawPolicy, StrategyConfig, VaultConfig, SHARE_PRICE_SCALE,
};
use granary_protocol::ledger::AssetLedger;
use granary_protocol::math::bps_of;
use granary_protocol::yield_source::InMemoryFarm;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

struct Harness {
    want: AssetLedger,
    vault: Vault<Strategy<InMemoryFarm>>,
    farm: InMemoryFarm,
    clock: ManualClock,
}

impl Harness {
    fn new(vault_config: VaultConfig, fees: FeeConfig) -> Self {
        let journal = EventJournal::new();
        let farm = InMemoryFarm::new("farm");
        let clock = ManualClock::at_unix(1_700_000_000);
        let strategy = Strategy::new(
            "strategy",
            "vault",
            StrategyConfig {
                fees,
                ..StrategyConfig::default()
            },
            farm.clone(),
            Arc::new(clock.clone()),
            journal.clone(),
        )
        .unwrap();
        let mut vault = Vault::new("vault", vault_config, journal).unwrap();
        vault.initialize(strategy).unwrap();
        Self {
            want: AssetLedger::new("WANT"),
            vault,
            farm,
            clock,
        }
    }

    fn fund(&mut self, holder: &str, amount: u64) {
        self.want.mint(holder, amount).unwrap();
    }

    fn deposit(&mut self, holder: &str, amount: u64) -> u64 {
        self.vault
            .deposit(&mut self.want, holder, amount)
            .unwrap()
            .shares_minted
    }

    fn harvest(&mut self, profit: u64) {
        self.farm.accrue(profit);
        self.clock.advance_secs(3_600);
        let strategy = self.vault.strategy_mut().unwrap();
        strategy.harvest(&mut self.want, "keeper").unwrap();
    }

    fn pps(&self) -> u128 {
        self.vault.get_price_per_full_share(&self.want)
    }

    fn share_sum(&self) -> u64 {
        self.vault.shares().holders().map(|(_, b)| b).sum()
    }
}

fn zero_fee_harness() -> Harness {
    Harness::new(VaultConfig::default(), FeeConfig::zero())
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn scenario_a_empty_vault_is_priced_at_one() {
    let h = zero_fee_harness();
    assert_eq!(h.pps(), SHARE_PRICE_SCALE);
    assert_eq!(h.vault.total_supply(), 0);
}

#[test]
fn scenario_b_deposits_before_yield_mint_one_to_one() {
    let mut h = zero_fee_harness();
    h.fund("alice", 100);
    h.fund("bob", 50);

    assert_eq!(h.deposit("alice", 100), 100);
    assert_eq!(h.vault.balance(&h.want), 100);
    assert_eq!(h.deposit("bob", 50), 50);

    assert_eq!(h.vault.total_supply(), 150);
    assert_eq!(h.pps(), SHARE_PRICE_SCALE);
}

#[test]
fn scenario_c_harvest_raises_price_and_withdrawal_pays_fee() {
    let mut h = zero_fee_harness();
    h.fund("alice", 100);
    h.deposit("alice", 100);
    h.harvest(10);

    assert_eq!(h.vault.balance(&h.want), 110);
    assert_eq!(h.pps(), 11 * SHARE_PRICE_SCALE / 10);

    // 0.1% of 110 rounds to zero at this size.
    let receipt = h.vault.withdraw_all(&mut h.want, "alice").unwrap();
    assert_eq!(receipt.gross_amount, 110);
    assert_eq!(receipt.paid, 110);
    assert_eq!(h.want.balance_of("alice"), 110);
}

#[test]
fn scenario_c_at_scale_withdrawal_fee_is_exact() {
    let mut h = zero_fee_harness();
    h.fund("alice", 1_000_000);
    h.deposit("alice", 1_000_000);
    h.harvest(100_000);
    assert_eq!(h.pps(), 11 * SHARE_PRICE_SCALE / 10);

    let receipt = h.vault.withdraw_all(&mut h.want, "alice").unwrap();
    assert_eq!(receipt.gross_amount, 1_100_000);
    assert_eq!(receipt.fee, 1_100);
    assert_eq!(receipt.paid, 1_098_900);

    // The fee stays behind in the vault.
    assert_eq!(h.vault.total_supply(), 0);
    assert_eq!(h.vault.balance(&h.want), 1_100);
}

#[test]
fn scenario_e_best_effort_settles_for_what_the_strategy_returns() {
    let mut h = zero_fee_harness();
    h.fund("alice", 1_000_000);
    h.deposit("alice", 1_000_000);
    h.farm.set_withdraw_cap(Some(400_000));

    let receipt = h.vault.withdraw_all(&mut h.want, "alice").unwrap();
    assert_eq!(receipt.shares_requested, 1_000_000);
    assert_eq!(receipt.gross_amount, 400_000);
    assert_eq!(receipt.shares_burned, 400_000);
    assert_eq!(receipt.fee, 400);
    assert_eq!(receipt.paid, 399_600);

    // Unhonored shares are handed back; nobody else is diluted.
    assert_eq!(h.vault.balance_of("alice"), 600_000);
    assert_eq!(h.vault.total_supply(), 600_000);
    assert_eq!(h.vault.balance(&h.want), 600_400);
    assert!(h.pps() >= SHARE_PRICE_SCALE);
}

#[test]
fn scenario_e_best_effort_charges_shares_at_pool_price() {
    let mut h = zero_fee_harness();
    h.fund("alice", 1_000_000);
    h.fund("bob", 1_000_000);
    h.deposit("alice", 1_000_000);
    h.deposit("bob", 1_000_000);
    h.harvest(300_000);
    let pps_before = h.pps();

    h.farm.set_withdraw_cap(Some(500_000));
    let receipt = h.vault.withdraw_all(&mut h.want, "bob").unwrap();
    assert_eq!(receipt.gross_amount, 500_000);
    // 500_000 at 1.15 per share, rounded up against the withdrawer.
    assert_eq!(receipt.shares_burned, 434_783);
    assert_eq!(h.vault.balance_of("bob"), 1_000_000 - 434_783);
    assert!(h.pps() >= pps_before);
}

#[test]
fn scenario_e_revert_restores_shares_and_keeps_assets_in_pool() {
    let mut h = Harness::new(
        VaultConfig {
            partial_withdraw: PartialWithdrawPolicy::Revert,
            ..VaultConfig::default()
        },
        FeeConfig::zero(),
    );
    h.fund("alice", 1_000_000);
    h.deposit("alice", 1_000_000);
    h.farm.set_withdraw_cap(Some(400_000));

    let err = h.vault.withdraw_all(&mut h.want, "alice").unwrap_err();
    assert!(matches!(
        err,
        VaultError::InsufficientLiquidity {
            requested: 1_000_000,
            available: 400_000
        }
    ));
    assert_eq!(h.vault.balance_of("alice"), 1_000_000);
    assert_eq!(h.want.balance_of("alice"), 0);
    assert_eq!(h.vault.balance(&h.want), 1_000_000);
    assert_eq!(h.vault.available(&h.want), 400_000);

    // Once the farm releases the rest, the same withdrawal goes through.
    h.farm.set_withdraw_cap(None);
    let receipt = h.vault.withdraw_all(&mut h.want, "alice").unwrap();
    assert_eq!(receipt.shares_burned, 1_000_000);
    assert_eq!(receipt.paid, 999_000);
}

#[test]
fn partial_withdraw_policy_switches_at_runtime() {
    let mut h = zero_fee_harness();
    h.fund("alice", 1_000_000);
    h.deposit("alice", 1_000_000);
    h.farm.set_withdraw_cap(Some(250_000));

    h.vault
        .update_partial_withdraw_policy(PartialWithdrawPolicy::Revert);
    assert_eq!(
        h.vault.config().partial_withdraw,
        PartialWithdrawPolicy::Revert
    );
    assert!(matches!(
        h.vault.withdraw(&mut h.want, "alice", 500_000),
        Err(VaultError::InsufficientLiquidity {
            requested: 500_000,
            available: 250_000
        })
    ));
    assert_eq!(h.vault.balance_of("alice"), 1_000_000);

    // The 250_000 pulled by the rejected attempt is idle now, so the
    // next pull tops it up to 500_000.
    h.vault
        .update_partial_withdraw_policy(PartialWithdrawPolicy::BestEffort);
    let receipt = h.vault.withdraw(&mut h.want, "alice", 600_000).unwrap();
    assert_eq!(receipt.gross_amount, 500_000);
    assert_eq!(receipt.shares_burned, 500_000);
    assert_eq!(h.vault.balance_of("alice"), 500_000);
}

#[test]
fn farm_loss_lowers_price_per_share() {
    let mut h = zero_fee_harness();
    h.fund("alice", 1_000_000);
    h.deposit("alice", 1_000_000);

    let lost = h.farm.realize_loss(&mut h.want, 200_000).unwrap();
    assert_eq!(lost, 200_000);
    assert_eq!(h.vault.balance(&h.want), 800_000);
    assert_eq!(h.pps(), 8 * SHARE_PRICE_SCALE / 10);

    // New money buys in at the marked-down price.
    h.fund("bob", 400_000);
    assert_eq!(h.deposit("bob", 400_000), 500_000);

    let receipt = h.vault.withdraw_all(&mut h.want, "alice").unwrap();
    assert_eq!(receipt.gross_amount, 800_000);
    assert_eq!(h.vault.total_supply(), 500_000);
}

#[test]
fn withdrawal_with_no_liquidity_at_all_is_rejected() {
    let mut h = zero_fee_harness();
    h.fund("alice", 1_000);
    h.deposit("alice", 1_000);
    h.farm.fail_with("farm halted");

    assert!(matches!(
        h.vault.withdraw_all(&mut h.want, "alice"),
        Err(VaultError::InsufficientLiquidity { available: 0, .. })
    ));
    assert_eq!(h.vault.balance_of("alice"), 1_000);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[test]
fn deposits_and_withdrawals_conserve_shares_and_assets() {
    let mut h = zero_fee_harness();
    let holders = ["alice", "bob", "carol"];
    for holder in holders {
        h.fund(holder, 10_000_000);
    }
    let want_supply = h.want.total_supply();

    let mut deposited: u128 = 0;
    let mut paid: u128 = 0;
    let mut rng = StdRng::seed_from_u64(7);
    for step in 0..60 {
        let holder = holders[rng.gen_range(0..holders.len())];
        let amount: u64 = rng.gen_range(1_000..251_000);

        if step % 3 == 2 && h.vault.balance_of(holder) > 0 {
            let shares = (h.vault.balance_of(holder) / 2).max(1);
            paid += h.vault.withdraw(&mut h.want, holder, shares).unwrap().paid as u128;
        } else if h.want.balance_of(holder) >= amount {
            h.vault.deposit(&mut h.want, holder, amount).unwrap();
            deposited += amount as u128;
        }

        assert_eq!(h.share_sum(), h.vault.total_supply());
        assert_eq!(h.vault.balance(&h.want) as u128, deposited - paid);
        assert_eq!(h.want.total_supply(), want_supply);
    }

    for holder in holders {
        let totals = h.vault.holder_totals(holder);
        assert_eq!(
            totals.deposited - totals.withdrawn,
            10_000_000 - h.want.balance_of(holder) as u128
        );
    }
}

#[test]
fn price_never_falls_across_deposits_and_harvests() {
    let mut h = Harness::new(VaultConfig::default(), FeeConfig::default());
    for holder in ["alice", "bob"] {
        h.fund(holder, 200_000_000);
    }

    let mut last = h.pps();
    for round in 0..20u64 {
        let holder = if round % 2 == 0 { "alice" } else { "bob" };
        h.deposit(holder, 1_000_003 * (round + 1));
        assert!(h.pps() >= last, "deposit lowered price in round {round}");
        last = h.pps();

        h.harvest(12_345 + round * 1_000);
        assert!(h.pps() >= last, "harvest lowered price in round {round}");
        last = h.pps();
    }
    assert!(last > SHARE_PRICE_SCALE);
}

#[test]
fn round_trip_returns_amount_minus_fee() {
    let mut h = zero_fee_harness();
    h.fund("bob", 1_000_000);
    h.fund("alice", 500_000);
    h.deposit("bob", 1_000_000);
    h.harvest(37_000);

    h.deposit("alice", 500_000);
    let received = h.vault.withdraw_all(&mut h.want, "alice").unwrap().paid;
    let expected = 500_000 - bps_of(500_000, 10).unwrap();
    assert!(received <= expected);
    assert!(expected - received <= 2, "lost {} to rounding", expected - received);
}

// ---------------------------------------------------------------------------
// Boundaries
// ---------------------------------------------------------------------------

#[test]
fn tvl_cap_boundary() {
    let mut h = Harness::new(
        VaultConfig {
            tvl_cap: Some(1_000),
            ..VaultConfig::default()
        },
        FeeConfig::zero(),
    );
    h.fund("alice", 2_000);

    assert!(matches!(
        h.vault.deposit(&mut h.want, "alice", 1_001),
        Err(VaultError::CapExceeded {
            cap: 1_000,
            total_assets: 0,
            amount: 1_001
        })
    ));
    assert_eq!(h.deposit("alice", 1_000), 1_000);
    assert!(matches!(
        h.vault.deposit(&mut h.want, "alice", 1),
        Err(VaultError::CapExceeded { .. })
    ));
    assert_eq!(h.want.balance_of("alice"), 1_000);

    h.vault.update_tvl_cap(1_500);
    h.deposit("alice", 500);
    h.vault.remove_tvl_cap();
    h.deposit("alice", 500);
    assert_eq!(h.vault.balance(&h.want), 2_000);
}

#[test]
fn zero_amounts_always_rejected() {
    let mut h = zero_fee_harness();
    h.fund("alice", 100);
    h.deposit("alice", 100);
    assert!(matches!(
        h.vault.deposit(&mut h.want, "alice", 0),
        Err(VaultError::ZeroAmount)
    ));
    assert!(matches!(
        h.vault.withdraw(&mut h.want, "alice", 0),
        Err(VaultError::ZeroAmount)
    ));
    assert!(matches!(
        h.vault.withdraw_all(&mut h.want, "nobody"),
        Err(VaultError::ZeroAmount)
    ));
}

#[test]
fn dust_deposit_that_buys_no_share_is_rejected() {
    let mut h = zero_fee_harness();
    h.fund("bob", 100);
    h.fund("alice", 1);
    h.deposit("bob", 100);
    h.harvest(100);

    assert!(matches!(
        h.vault.deposit(&mut h.want, "alice", 1),
        Err(VaultError::ZeroShares)
    ));
    assert_eq!(h.want.balance_of("alice"), 1);
}

#[test]
fn deposit_all_and_withdraw_all() -> anyhow::Result<()> {
    let mut h = zero_fee_harness();
    h.fund("alice", 123_456);
    let receipt = h.vault.deposit_all(&mut h.want, "alice")?;
    assert_eq!(receipt.amount, 123_456);
    assert_eq!(h.want.balance_of("alice"), 0);

    let receipt = h.vault.withdraw_all(&mut h.want, "alice")?;
    assert_eq!(receipt.shares_burned, 123_456);
    assert_eq!(h.vault.balance_of("alice"), 0);
    Ok(())
}

// ---------------------------------------------------------------------------
// Strategy control through the vault
// ---------------------------------------------------------------------------

#[test]
fn withdrawals_keep_working_after_emergency_shutdown() -> anyhow::Result<()> {
    let mut h = zero_fee_harness();
    h.fund("alice", 10_000);
    h.deposit("alice", 10_000);

    h.vault.emergency_shutdown(&mut h.want)?;
    let strategy = h.vault.strategy().unwrap();
    assert_eq!(strategy.state(), StrategyState::Panicked);
    assert_eq!(h.vault.available(&h.want), 10_000);

    let receipt = h.vault.withdraw_all(&mut h.want, "alice")?;
    assert_eq!(receipt.paid, 9_990);
    Ok(())
}

#[test]
fn panic_and_retire_twice_match_once() -> anyhow::Result<()> {
    let mut once = zero_fee_harness();
    let mut twice = zero_fee_harness();
    for h in [&mut once, &mut twice] {
        h.fund("alice", 5_000);
        h.deposit("alice", 5_000);
    }

    once.vault.emergency_shutdown(&mut once.want)?;
    twice.vault.emergency_shutdown(&mut twice.want)?;
    assert!(twice.vault.emergency_shutdown(&mut twice.want)?.is_none());
    assert_eq!(once.vault.available(&once.want), twice.vault.available(&twice.want));
    assert_eq!(once.vault.balance(&once.want), twice.vault.balance(&twice.want));

    once.vault.retire_strategy(&mut once.want)?;
    twice.vault.retire_strategy(&mut twice.want)?;
    assert!(twice.vault.retire_strategy(&mut twice.want)?.is_none());
    assert_eq!(
        once.vault.strategy().unwrap().state(),
        twice.vault.strategy().unwrap().state()
    );
    assert_eq!(once.vault.balance(&once.want), twice.vault.balance(&twice.want));
    assert_eq!(once.vault.total_supply(), twice.vault.total_supply());
    Ok(())
}

#[test]
fn retire_from_active_sweeps_everything() -> anyhow::Result<()> {
    let mut h = zero_fee_harness();
    h.fund("alice", 2_000);
    h.deposit("alice", 2_000);
    h.harvest(200);

    let change = h.vault.retire_strategy(&mut h.want)?.unwrap();
    assert_eq!(change.from, StrategyState::Active);
    assert_eq!(change.swept_to_vault, 2_200);
    assert_eq!(h.farm.staked(), 0);
    assert_eq!(h.vault.available(&h.want), 2_200);
    assert_eq!(h.vault.balance(&h.want), 2_200);
    Ok(())
}
