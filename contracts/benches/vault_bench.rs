// Vault and strategy benchmarks.
//
// Covers a deposit/withdraw cycle against a populated pool, a full harvest
// with fee split and reinvestment, and trailing APR over logs of various
// lengths.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use granary_contracts::strategy::Strategy;
use granary_contracts::vault::Vault;
use granary_contracts::EventJournal;
use granary_protocol::clock::ManualClock;
use granary_protocol::config::{StrategyConfig, VaultConfig};
use granary_protocol::ledger::AssetLedger;
use granary_protocol::yield_source::InMemoryFarm;

struct Bench {
    want: AssetLedger,
    vault: Vault<Strategy<InMemoryFarm>>,
    farm: InMemoryFarm,
    clock: ManualClock,
    journal: EventJournal,
}

fn setup(holders: usize) -> Bench {
    let journal = EventJournal::new();
    let farm = InMemoryFarm::new("farm");
    let clock = ManualClock::at_unix(1_700_000_000);
    let strategy = Strategy::new(
        "strategy",
        "vault",
        StrategyConfig {
            harvest_log_cadence_secs: 0,
            ..StrategyConfig::default()
        },
        farm.clone(),
        Arc::new(clock.clone()),
        journal.clone(),
    )
    .unwrap();
    let mut vault = Vault::new("vault", VaultConfig::default(), journal.clone()).unwrap();
    vault.initialize(strategy).unwrap();

    let mut want = AssetLedger::new("WANT");
    for i in 0..holders {
        let holder = format!("holder-{i:04}");
        want.mint(&holder, 1_000_000_000).unwrap();
        vault.deposit(&mut want, &holder, 1_000_000).unwrap();
    }
    want.mint("bench", u64::MAX / 4).unwrap();
    journal.drain();
    Bench {
        want,
        vault,
        farm,
        clock,
        journal,
    }
}

fn bench_deposit_withdraw_cycle(c: &mut Criterion) {
    let mut bench = setup(100);

    c.bench_function("vault/deposit_withdraw_cycle", |b| {
        b.iter(|| {
            let minted = bench
                .vault
                .deposit(&mut bench.want, "bench", 250_000)
                .unwrap()
                .shares_minted;
            bench
                .vault
                .withdraw(&mut bench.want, "bench", minted)
                .unwrap();
            bench.journal.drain();
        });
    });
}

fn bench_harvest(c: &mut Criterion) {
    let mut bench = setup(100);

    c.bench_function("strategy/harvest", |b| {
        b.iter(|| {
            bench.farm.accrue(10_000);
            bench.clock.advance_secs(3_600);
            let strategy = bench.vault.strategy_mut().unwrap();
            strategy.harvest(&mut bench.want, "keeper").unwrap();
            bench.journal.drain();
        });
    });
}

fn bench_average_apr(c: &mut Criterion) {
    let mut group = c.benchmark_group("strategy/average_apr");

    for entries in [10usize, 100, 1_000] {
        let mut bench = setup(10);
        for _ in 0..entries {
            bench.farm.accrue(5_000);
            bench.clock.advance_secs(86_400);
            let strategy = bench.vault.strategy_mut().unwrap();
            strategy.harvest(&mut bench.want, "keeper").unwrap();
        }
        let strategy = bench.vault.strategy().unwrap();

        group.throughput(Throughput::Elements(entries as u64));
        group.bench_with_input(BenchmarkId::from_parameter(entries), &entries, |b, &n| {
            b.iter(|| strategy.average_apr_across_last_n_harvests(n).unwrap());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_deposit_withdraw_cycle,
    bench_harvest,
    bench_average_apr,
);
criterion_main!(benches);
