use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use wallet_ledger::{Cents, Engine, Operation};

/// Generates valid operation sequences for benchmarking.
///
/// Pattern per wallet (repeating):
/// 1. Fund 100.00
/// 2. Fund 50.00
/// 3. Charge 30.00
///
/// This ensures charges never exceed the available balance.
pub struct OpGenerator {
    num_wallets: u32,
    ops_per_wallet: u32,
    current_wallet: u32,
    current_step: u32,
}

impl OpGenerator {
    pub fn new(num_wallets: u32, ops_per_wallet: u32) -> Self {
        Self {
            num_wallets,
            ops_per_wallet,
            current_wallet: 1,
            current_step: 0,
        }
    }
}

impl Iterator for OpGenerator {
    type Item = Operation;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_wallet > self.num_wallets {
            return None;
        }

        let binding = format!("device-{}", self.current_wallet);
        let op = match self.current_step % 3 {
            0 => Operation::Fund {
                binding,
                amount: Cents::new(10_000),
                source: "card".to_string(),
            },
            1 => Operation::Fund {
                binding,
                amount: Cents::new(5_000),
                source: "card".to_string(),
            },
            _ => Operation::Charge {
                binding,
                amount: Cents::new(3_000),
                context: "bar".to_string(),
            },
        };

        self.current_step += 1;
        if self.current_step >= self.ops_per_wallet {
            self.current_step = 0;
            self.current_wallet += 1;
        }

        Some(op)
    }
}

fn bench_fund_only(c: &mut Criterion) {
    let mut group = c.benchmark_group("funds");

    for count in [10_000u32, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let engine = Engine::new();
                for i in 0..count {
                    let _ = black_box(engine.fund("device-1", Cents::new(100), "card"));
                    black_box(i);
                }
                engine
            });
        });
    }

    group.finish();
}

fn bench_mixed_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed");

    for (wallets, ops_per) in [(100, 1_000), (1_000, 100), (10, 10_000)] {
        let label = format!("{}w_{}op", wallets, ops_per);
        group.bench_with_input(
            BenchmarkId::from_parameter(&label),
            &(wallets, ops_per),
            |b, &(wallets, ops_per)| {
                b.iter(|| {
                    let engine = Engine::new();
                    engine.set_context_fee("bar", Cents::new(50));
                    for op in OpGenerator::new(wallets, ops_per) {
                        let _ = black_box(engine.apply(op));
                    }
                    engine
                });
            },
        );
    }

    group.finish();
}

fn bench_contended_wallet(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended");
    group.sample_size(10);

    // 4 workers hammering one wallet: measures the per-wallet serialization
    // point rather than raw apply throughput.
    group.bench_function("4threads_one_wallet", |b| {
        b.iter(|| {
            let engine = Arc::new(Engine::new());
            engine
                .fund("shared", Cents::new(10_000_000), "card")
                .unwrap();
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let engine = Arc::clone(&engine);
                    std::thread::spawn(move || {
                        for _ in 0..10_000 {
                            let _ = black_box(engine.charge("shared", Cents::new(10), "bar"));
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
            engine
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_fund_only,
    bench_mixed_operations,
    bench_contended_wallet
);

criterion_main!(benches);
