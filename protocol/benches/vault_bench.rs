// Vault benchmarks for Tessera.
//
// Covers deposit pricing, the 256-bit mul-div, rebalance advice across
// registry sizes, batch execution at various lengths, and signed-batch
// digest + verification.

use chrono::{Duration, Utc};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tessera_protocol::config::{VaultConfig, DEFAULT_BATCH_GAS_LIMIT, MAX_ASSETS, MAX_BATCH_SIZE};
use tessera_protocol::crypto::AgentKeypair;
use tessera_protocol::vault::math::mul_div;
use tessera_protocol::vault::{
    Address, AssetId, BatchCall, CallContext, InMemoryHost, Invocation, SignedBatch, TokenLedger,
    Vault, VaultCall,
};

fn funded_vault(assets: usize) -> (Vault<InMemoryHost>, Address) {
    let agent = Address::derive("agent");
    let mut vault = Vault::new(
        Address::derive("bench vault"),
        VaultConfig::default(),
        Address::derive("owner"),
        agent,
        InMemoryHost::new(),
        Utc::now(),
    )
    .unwrap();
    let ctx = CallContext::wall_clock(agent);
    let weight = 10_000 / assets as u32;
    let holder = Address::derive("whale");
    let vault_addr = vault.address();
    for i in 0..assets {
        let asset = AssetId::derive(&format!("ASSET{i}"));
        vault.add_asset(&ctx, asset, weight).unwrap();
        let host = vault.host_mut();
        host.mint(asset, holder, u128::MAX / 4).unwrap();
        host.approve(asset, holder, vault_addr, u128::MAX / 4).unwrap();
        let amount = 1_000_000 * (i as u128 + 1);
        vault
            .deposit(&CallContext::wall_clock(holder), asset, amount)
            .unwrap();
    }
    (vault, holder)
}

fn bench_mul_div(c: &mut Criterion) {
    c.bench_function("math/mul_div_wide", |b| {
        b.iter(|| mul_div(u128::MAX / 3, 7_919, 1_000_000_000_000_000_000).unwrap());
    });
}

fn bench_deposit(c: &mut Criterion) {
    let (vault, holder) = funded_vault(4);
    let asset = AssetId::derive("ASSET0");
    let ctx = CallContext::wall_clock(holder);

    c.bench_function("vault/preview_deposit", |b| {
        b.iter(|| vault.preview_deposit(&asset, 123_456).unwrap());
    });
    c.bench_function("vault/deposit", |b| {
        b.iter_batched(
            || vault.clone(),
            |mut v| v.deposit(&ctx, asset, 123_456).unwrap(),
            criterion::BatchSize::SmallInput,
        );
    });
}

fn bench_rebalance_report(c: &mut Criterion) {
    let mut group = c.benchmark_group("vault/rebalance_report");
    for size in [1usize, 4, MAX_ASSETS] {
        let (vault, _) = funded_vault(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &vault, |b, vault| {
            b.iter(|| vault.rebalance_report().unwrap());
        });
    }
    group.finish();
}

fn bench_execute_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("vault/execute_batch");
    let (vault, _) = funded_vault(2);
    let agent = CallContext::wall_clock(Address::derive("agent"));
    let asset = AssetId::derive("ASSET0");

    for size in [1usize, 5, MAX_BATCH_SIZE] {
        let calls: Vec<BatchCall> = (0..size)
            .map(|_| {
                BatchCall::required(
                    Invocation::Vault(VaultCall::RefreshBalance { asset }),
                    100_000,
                )
            })
            .collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &calls, |b, calls| {
            b.iter_batched(
                || vault.clone(),
                |mut v| v.execute_batch(&agent, calls, DEFAULT_BATCH_GAS_LIMIT).unwrap(),
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_signed_batch(c: &mut Criterion) {
    let keypair = AgentKeypair::generate();
    let vault = Address::derive("bench vault");
    let calls: Vec<BatchCall> = (0..MAX_BATCH_SIZE)
        .map(|i| {
            BatchCall::optional(
                Invocation::Transfer {
                    asset: AssetId::derive("USDC"),
                    to: Address::derive(&format!("payee {i}")),
                    amount: 1_000,
                },
                50_000,
            )
        })
        .collect();
    let deadline = Utc::now() + Duration::hours(1);

    c.bench_function("signed_batch/sign", |b| {
        b.iter(|| {
            SignedBatch::sign(&keypair, vault, calls.clone(), 0, deadline, DEFAULT_BATCH_GAS_LIMIT)
                .unwrap()
        });
    });

    let signed =
        SignedBatch::sign(&keypair, vault, calls, 0, deadline, DEFAULT_BATCH_GAS_LIMIT).unwrap();
    c.bench_function("signed_batch/verify", |b| {
        b.iter(|| signed.verify(&vault).unwrap());
    });
}

criterion_group!(
    benches,
    bench_mul_div,
    bench_deposit,
    bench_rebalance_report,
    bench_execute_batch,
    bench_signed_batch,
);
criterion_main!(benches);
