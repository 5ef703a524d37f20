//! End-to-end tests for the Tessera vault.
//!
//! These drive a full `Vault<InMemoryHost>` through its public entry points:
//! deposits and withdrawals priced at NAV, fee accrual, rebalancing through
//! the router, delegated and signed batches, protocol callbacks and
//! persistence through `VaultStore`.
//!
//! Each test builds its own world. No shared state, no ordering
//! dependencies.

use chrono::{DateTime, Duration, TimeZone, Utc};

use tessera_protocol::config::{
    VaultConfig, BPS_DENOMINATOR, CALL_OVERHEAD_GAS, DEFAULT_BATCH_GAS_LIMIT, MAX_BATCH_SIZE, SCALE,
    TRANSFER_CALL_GAS,
};
use tessera_protocol::crypto::AgentKeypair;
use tessera_protocol::storage::VaultStore;
use tessera_protocol::vault::{
    escrow_address, Address, AssetId, BatchCall, CallContext, CallOutcome, InMemoryHost,
    Invocation, ProtocolEndpoint, Reentry, SignedBatch, TokenLedger, Vault, VaultCall, VaultError,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const CALL_GAS: u64 = 200_000;

struct World {
    vault: Vault<InMemoryHost>,
    owner: Address,
    agent: Address,
    x: AssetId,
    y: AssetId,
    now: DateTime<Utc>,
}

impl World {
    fn new() -> Self {
        Self::with_agent(Address::derive("agent"))
    }

    fn with_agent(agent: Address) -> Self {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let owner = Address::derive("owner");
        let vault = Vault::new(
            Address::derive("tessera vault"),
            VaultConfig::default(),
            owner,
            agent,
            InMemoryHost::new(),
            now,
        )
        .expect("vault");
        Self {
            vault,
            owner,
            agent,
            x: AssetId::derive("X"),
            y: AssetId::derive("Y"),
            now,
        }
    }

    fn ctx(&self, who: Address) -> CallContext {
        CallContext::new(who, self.now)
    }

    fn as_owner(&self) -> CallContext {
        self.ctx(self.owner)
    }

    fn as_agent(&self) -> CallContext {
        self.ctx(self.agent)
    }

    /// Mint `amount` of `asset` to `who` and approve the vault to pull it.
    fn fund(&mut self, who: Address, asset: AssetId, amount: u128) {
        let vault = self.vault.address();
        let host = self.vault.host_mut();
        host.mint(asset, who, amount).expect("mint");
        let allowance = host.allowance(asset, who, vault);
        host.approve(asset, who, vault, allowance + amount)
            .expect("approve");
    }

    /// Tokens arriving at the vault outside a deposit (yield), picked up by
    /// a balance refresh.
    fn accrue_yield(&mut self, asset: AssetId, amount: u128) {
        let vault = self.vault.address();
        self.vault.host_mut().mint(asset, vault, amount).expect("mint");
        let agent = self.as_agent();
        self.vault.refresh_balance(&agent, asset).expect("refresh");
    }

    fn advance(&mut self, secs: i64) {
        self.now += Duration::seconds(secs);
    }
}

fn holder(name: &str) -> Address {
    Address::derive(name)
}

// ---------------------------------------------------------------------------
// Concrete Scenarios
// ---------------------------------------------------------------------------

/// A: empty vault, X at 4000 bps, deposit 1000 → 1000 shares at par.
#[test]
fn scenario_a_first_deposit_mints_at_par() {
    let mut w = World::new();
    let agent = w.as_agent();
    w.vault.add_asset(&agent, w.x, 4_000).unwrap();

    let alice = holder("alice");
    w.fund(alice, w.x, 1_000);
    let shares = w.vault.deposit(&w.ctx(alice), w.x, 1_000).unwrap();

    assert_eq!(shares, 1_000);
    assert_eq!(w.vault.total_value().unwrap(), 1_000);
    assert_eq!(w.vault.nav_per_share().unwrap(), SCALE);
}

/// B: a second depositor of 500 gets 500 * 1000 / 1000 shares.
#[test]
fn scenario_b_second_deposit_priced_at_nav() {
    let mut w = World::new();
    let agent = w.as_agent();
    w.vault.add_asset(&agent, w.x, 4_000).unwrap();
    let (alice, bob) = (holder("alice"), holder("bob"));
    w.fund(alice, w.x, 1_000);
    w.fund(bob, w.x, 500);
    w.vault.deposit(&w.ctx(alice), w.x, 1_000).unwrap();

    let shares = w.vault.deposit(&w.ctx(bob), w.x, 500).unwrap();

    assert_eq!(shares, 500);
    assert_eq!(w.vault.total_supply(), 1_500);
}

/// C: withdrawing 500 of 1500 shares against a 1500-unit X bucket pays 500.
#[test]
fn scenario_c_withdraw_pays_proportional_amount() {
    let mut w = World::new();
    let agent = w.as_agent();
    w.vault.add_asset(&agent, w.x, 4_000).unwrap();
    let (alice, bob) = (holder("alice"), holder("bob"));
    w.fund(alice, w.x, 1_000);
    w.fund(bob, w.x, 500);
    w.vault.deposit(&w.ctx(alice), w.x, 1_000).unwrap();
    w.vault.deposit(&w.ctx(bob), w.x, 500).unwrap();

    let out = w.vault.withdraw(&w.ctx(bob), 500, w.x, 0).unwrap();

    assert_eq!(out, 500);
    assert_eq!(w.vault.share_balance(&bob), 0);
    assert_eq!(w.vault.total_supply(), 1_000);
    assert_eq!(w.vault.host().balance_of(w.x, bob), 500);
    assert_eq!(w.vault.asset(&w.x).unwrap().cached_balance, 1_000);
}

#[test]
fn withdraw_below_min_out_is_refused() {
    let mut w = World::new();
    let agent = w.as_agent();
    w.vault.add_asset(&agent, w.x, 4_000).unwrap();
    let alice = holder("alice");
    w.fund(alice, w.x, 1_000);
    w.vault.deposit(&w.ctx(alice), w.x, 1_000).unwrap();

    assert_eq!(
        w.vault.withdraw(&w.ctx(alice), 400, w.x, 401),
        Err(VaultError::SlippageExceeded {
            amount_out: 400,
            min_out: 401
        })
    );
    assert_eq!(w.vault.share_balance(&alice), 1_000);
    assert_eq!(w.vault.host().balance_of(w.x, alice), 0);
    assert_eq!(w.vault.withdraw(&w.ctx(alice), 400, w.x, 400), Ok(400));
}

/// D: 6000/4000 against 5000/5000 needs a rebalance; 5200/4800 does not.
#[test]
fn scenario_d_rebalance_advice_follows_threshold() {
    let mut w = World::new();
    let agent = w.as_agent();
    w.vault.add_asset(&agent, w.x, 5_000).unwrap();
    w.vault.add_asset(&agent, w.y, 5_000).unwrap();
    let alice = holder("alice");
    w.fund(alice, w.x, 6_000);
    w.fund(alice, w.y, 4_000);
    w.vault.deposit(&w.ctx(alice), w.x, 6_000).unwrap();
    w.vault.deposit(&w.ctx(alice), w.y, 4_000).unwrap();

    assert!(w.vault.needs_rebalancing().unwrap());
    let report = w.vault.rebalance_report().unwrap();
    assert_eq!(report.assets[0].deviation_bps, 1_000);

    // Swap 800 X for 800 Y through the router.
    let router = InMemoryHost::router_address();
    w.vault.host_mut().mint(w.y, router, 10_000).unwrap();
    w.vault.host_mut().set_rate(w.x, w.y, 1, 1);
    let deadline = w.now + Duration::minutes(5);
    let out = w
        .vault
        .rebalance(&agent, w.x, w.y, 800, 800, deadline)
        .unwrap();

    assert_eq!(out, 800);
    assert_eq!(w.vault.asset(&w.x).unwrap().cached_balance, 5_200);
    assert_eq!(w.vault.asset(&w.y).unwrap().cached_balance, 4_800);
    assert!(!w.vault.needs_rebalancing().unwrap());
    assert_eq!(
        w.vault.rebalance(&agent, w.x, w.y, 100, 0, deadline),
        Err(VaultError::RebalanceThresholdNotMet)
    );
}

/// E: required success followed by a required failure aborts everything.
#[test]
fn scenario_e_required_failure_aborts_whole_batch() {
    let mut w = World::new();
    let agent = w.as_agent();
    w.vault.add_asset(&agent, w.x, 4_000).unwrap();
    w.fund(w.agent, w.x, 1_000);

    let before_state = w.vault.state().clone();
    let before_host = w.vault.host().clone();

    let calls = vec![
        BatchCall::required(
            Invocation::Vault(VaultCall::Deposit {
                asset: w.x,
                amount: 1_000,
            }),
            CALL_GAS,
        ),
        BatchCall::required(
            Invocation::Transfer {
                asset: w.x,
                to: holder("mallory"),
                amount: 5_000,
            },
            CALL_GAS,
        ),
    ];
    let err = w
        .vault
        .execute_batch(&agent, &calls, DEFAULT_BATCH_GAS_LIMIT)
        .unwrap_err();

    assert!(matches!(err, VaultError::CallFailed { index: 1, .. }));
    assert_eq!(w.vault.nonce(&w.agent), 0);
    assert_eq!(w.vault.total_supply(), 0);
    assert_eq!(w.vault.asset(&w.x).unwrap().cached_balance, 0);
    assert_eq!(w.vault.state(), &before_state);
    assert_eq!(w.vault.host(), &before_host);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[test]
fn shares_are_positive_for_every_valid_deposit() {
    let mut w = World::new();
    let agent = w.as_agent();
    w.vault.add_asset(&agent, w.x, 4_000).unwrap();
    let seed = holder("seed");
    w.fund(seed, w.x, 1_000);
    assert_eq!(w.vault.deposit(&w.ctx(seed), w.x, 1_000).unwrap(), 1_000);
    w.accrue_yield(w.x, 337);

    let depositor = holder("depositor");
    for amount in [100u128, 101, 257, 999, 1_000, 12_345, 1_000_003] {
        w.fund(depositor, w.x, amount);
        let shares = w.vault.deposit(&w.ctx(depositor), w.x, amount).unwrap();
        assert!(shares > 0, "deposit of {amount} minted no shares");
    }
}

#[test]
fn round_trip_never_returns_more_than_deposited() {
    for (seed_amount, gain, amount) in [
        (1_000u128, 0u128, 500u128),
        (1_000, 1, 777),
        (3_333, 1_111, 250),
        (10_000, 7_919, 12_345),
        (101, 99_900, 1_000_000),
    ] {
        let mut w = World::new();
        let agent = w.as_agent();
        w.vault.add_asset(&agent, w.x, 4_000).unwrap();
        let seed = holder("seed");
        w.fund(seed, w.x, seed_amount);
        w.vault.deposit(&w.ctx(seed), w.x, seed_amount).unwrap();
        if gain > 0 {
            w.accrue_yield(w.x, gain);
        }
        let value = w.vault.total_value().unwrap();
        let supply = w.vault.total_supply();
        let nav_ceiling = value.div_ceil(supply);

        let bob = holder("bob");
        w.fund(bob, w.x, amount);
        let shares = w.vault.deposit(&w.ctx(bob), w.x, amount).unwrap();
        let out = w.vault.withdraw(&w.ctx(bob), shares, w.x, 0).unwrap();

        assert!(out <= amount, "{out} out for {amount} in");
        assert!(
            amount - out <= nav_ceiling + 1,
            "lost {} on {amount}, more than rounding",
            amount - out
        );
    }
}

#[test]
fn target_weight_sum_never_exceeds_full_allocation() {
    let mut w = World::new();
    let agent = w.as_agent();
    let owner = w.as_owner();
    let assets: Vec<AssetId> = (0..6).map(|i| AssetId::derive(&format!("A{i}"))).collect();

    for (asset, weight) in assets.iter().zip([3_000u32, 4_000, 2_500, 1_000, 500, 9_000]) {
        let _ = w.vault.add_asset(&agent, *asset, weight);
        assert!(w.vault.active_weight_sum() <= BPS_DENOMINATOR);
    }

    let active: Vec<AssetId> = w.vault.state().assets.active().map(|r| r.asset_id).collect();
    let attempts: [Vec<u32>; 3] = [
        vec![5_000; active.len()],
        vec![0; active.len()],
        {
            let mut exact = vec![0; active.len()];
            exact[0] = BPS_DENOMINATOR;
            exact
        },
    ];
    for weights in &attempts {
        let _ = w.vault.set_all_weights(&owner, &active, weights);
        assert!(w.vault.active_weight_sum() <= BPS_DENOMINATOR);
    }
    assert_eq!(w.vault.active_weight_sum(), BPS_DENOMINATOR);
}

#[test]
fn high_water_mark_never_decreases() {
    let mut w = World::new();
    let agent = w.as_agent();
    w.vault.add_asset(&agent, w.x, 4_000).unwrap();
    let alice = holder("alice");
    w.fund(alice, w.x, 100_000);
    w.vault.deposit(&w.ctx(alice), w.x, 100_000).unwrap();

    let mut last_hwm = w.vault.state().fees.high_water_mark_nav;
    // Alternate gains and losses between collections.
    for (step, delta) in [20_000i128, -15_000, 5_000, -30_000, 40_000, 0]
        .into_iter()
        .enumerate()
    {
        w.advance(86_400 * 30);
        if delta > 0 {
            w.accrue_yield(w.x, delta as u128);
        } else if delta < 0 {
            let out = vec![BatchCall::required(
                Invocation::Transfer {
                    asset: w.x,
                    to: holder("loss"),
                    amount: delta.unsigned_abs(),
                },
                CALL_GAS,
            )];
            w.vault
                .execute_batch(&w.as_agent(), &out, DEFAULT_BATCH_GAS_LIMIT)
                .unwrap();
        }
        w.vault.collect_fees(&w.as_agent()).unwrap();
        let hwm = w.vault.state().fees.high_water_mark_nav;
        assert!(hwm >= last_hwm, "step {step}: hwm fell from {last_hwm} to {hwm}");
        last_hwm = hwm;
    }
    assert!(last_hwm > SCALE);
}

#[test]
fn required_failure_leaves_ledgers_untouched() {
    let mut w = World::new();
    let agent = w.as_agent();
    w.vault.add_asset(&agent, w.x, 5_000).unwrap();
    w.vault.add_asset(&agent, w.y, 5_000).unwrap();
    let alice = holder("alice");
    w.fund(alice, w.x, 2_000);
    w.vault.deposit(&w.ctx(alice), w.x, 2_000).unwrap();
    w.fund(w.agent, w.y, 1_000);

    let shares_before = w.vault.state().shares.clone();
    let assets_before = w.vault.state().assets.clone();

    let calls = vec![
        BatchCall::required(
            Invocation::Vault(VaultCall::Deposit {
                asset: w.y,
                amount: 1_000,
            }),
            CALL_GAS,
        ),
        BatchCall::required(
            Invocation::Vault(VaultCall::SetTargetWeight {
                asset: w.x,
                weight_bps: 2_000,
            }),
            CALL_GAS,
        ),
        // The agent only holds the 1000 shares minted above.
        BatchCall::required(
            Invocation::Vault(VaultCall::Withdraw {
                shares: 10_000,
                asset_out: w.x,
                min_out: 0,
            }),
            CALL_GAS,
        ),
    ];
    // Not enough gas for even the first call.
    let err = w.vault.execute_batch(&agent, &calls, 1).unwrap_err();
    assert!(matches!(err, VaultError::CallFailed { index: 0, .. }));

    let err = w
        .vault
        .execute_batch(&agent, &calls, DEFAULT_BATCH_GAS_LIMIT)
        .unwrap_err();
    match err {
        VaultError::CallFailed { index, source } => {
            assert_eq!(index, 2);
            assert!(matches!(*source, VaultError::InsufficientShares { .. }));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(w.vault.state().shares, shares_before);
    assert_eq!(w.vault.state().assets, assets_before);
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

#[test]
fn optional_failure_is_recorded_and_rolled_back() {
    let mut w = World::new();
    let agent = w.as_agent();
    w.vault.add_asset(&agent, w.x, 4_000).unwrap();
    let alice = holder("alice");
    w.fund(alice, w.x, 1_000);
    w.vault.deposit(&w.ctx(alice), w.x, 1_000).unwrap();

    let bob = holder("bob");
    let calls = vec![
        BatchCall::required(
            Invocation::Transfer {
                asset: w.x,
                to: bob,
                amount: 100,
            },
            CALL_GAS,
        ),
        // Exceeds what is left in the vault.
        BatchCall::optional(
            Invocation::Transfer {
                asset: w.x,
                to: bob,
                amount: 5_000,
            },
            CALL_GAS,
        ),
        BatchCall::optional(Invocation::Vault(VaultCall::RefreshBalance { asset: w.x }), CALL_GAS),
    ];
    let receipt = w
        .vault
        .execute_batch(&agent, &calls, DEFAULT_BATCH_GAS_LIMIT)
        .unwrap();

    assert_eq!(receipt.nonce, 0);
    assert_eq!(receipt.call_count, 3);
    assert_eq!(receipt.success_count, 2);
    assert!(matches!(receipt.outcomes[1], CallOutcome::Failed { .. }));
    assert_eq!(w.vault.host().balance_of(w.x, bob), 100);
    assert_eq!(w.vault.asset(&w.x).unwrap().cached_balance, 900);
    assert_eq!(w.vault.nonce(&w.agent), 1);
}

#[test]
fn optional_call_without_gas_is_skipped() {
    let mut w = World::new();
    let agent = w.as_agent();
    w.vault.add_asset(&agent, w.x, 4_000).unwrap();

    let calls = vec![
        BatchCall::required(Invocation::Vault(VaultCall::RefreshBalance { asset: w.x }), CALL_GAS),
        BatchCall::optional(Invocation::Vault(VaultCall::RefreshBalance { asset: w.x }), CALL_GAS),
    ];
    let receipt = w.vault.execute_batch(&agent, &calls, 250_000).unwrap();

    assert_eq!(receipt.success_count, 1);
    assert!(matches!(receipt.outcomes[1], CallOutcome::Skipped { .. }));
}

#[test]
fn oversized_batch_is_refused_before_any_call_runs() {
    let mut w = World::new();
    let agent = w.as_agent();
    w.vault.add_asset(&agent, w.x, 4_000).unwrap();

    let calls = vec![
        BatchCall::required(Invocation::Vault(VaultCall::RefreshBalance { asset: w.x }), CALL_GAS);
        MAX_BATCH_SIZE + 1
    ];
    assert_eq!(
        w.vault.execute_batch(&agent, &calls, DEFAULT_BATCH_GAS_LIMIT),
        Err(VaultError::ExceedsMaxBatch {
            size: MAX_BATCH_SIZE + 1,
            max: MAX_BATCH_SIZE
        })
    );
    assert_eq!(w.vault.nonce(&w.agent), 0);
}

#[test]
fn required_call_short_of_gas_aborts_with_the_shortfall() {
    let mut w = World::new();
    let agent = w.as_agent();
    w.vault.add_asset(&agent, w.x, 4_000).unwrap();
    let seq = w.vault.state().events.last_sequence();

    let calls = vec![
        BatchCall::required(Invocation::Vault(VaultCall::RefreshBalance { asset: w.x }), CALL_GAS),
        BatchCall::required(Invocation::Vault(VaultCall::RefreshBalance { asset: w.x }), CALL_GAS),
    ];
    let err = w.vault.execute_batch(&agent, &calls, 250_000).unwrap_err();
    match err {
        VaultError::CallFailed { index, source } => {
            assert_eq!(index, 1);
            assert!(matches!(
                *source,
                VaultError::InsufficientGas {
                    required,
                    remaining,
                } if required == CALL_GAS + CALL_OVERHEAD_GAS && remaining < required
            ));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(w.vault.nonce(&w.agent), 0);
    assert_eq!(w.vault.state().events.last_sequence(), seq);
}

#[test]
fn call_costing_more_than_its_ceiling_runs_out_of_gas() {
    let mut w = World::new();
    let agent = w.as_agent();
    w.vault.add_asset(&agent, w.x, 4_000).unwrap();
    let alice = holder("alice");
    w.fund(alice, w.x, 1_000);
    w.vault.deposit(&w.ctx(alice), w.x, 1_000).unwrap();

    let bob = holder("bob");
    let transfer = Invocation::Transfer {
        asset: w.x,
        to: bob,
        amount: 100,
    };
    let ceiling = TRANSFER_CALL_GAS - 1;

    // Optional: recorded as failed, charged the ceiling, nothing moves.
    let calls = vec![BatchCall::optional(transfer.clone(), ceiling)];
    let receipt = w
        .vault
        .execute_batch(&agent, &calls, DEFAULT_BATCH_GAS_LIMIT)
        .unwrap();
    assert_eq!(receipt.success_count, 0);
    assert_eq!(receipt.gas_used, ceiling + CALL_OVERHEAD_GAS);
    assert!(matches!(receipt.outcomes[0], CallOutcome::Failed { .. }));
    assert_eq!(w.vault.host().balance_of(w.x, bob), 0);

    // Required: the whole batch aborts.
    let calls = vec![BatchCall::required(transfer, ceiling)];
    let err = w
        .vault
        .execute_batch(&agent, &calls, DEFAULT_BATCH_GAS_LIMIT)
        .unwrap_err();
    match err {
        VaultError::CallFailed { index: 0, source } => assert_eq!(
            *source,
            VaultError::OutOfGas {
                cost: TRANSFER_CALL_GAS,
                limit: ceiling
            }
        ),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(w.vault.host().balance_of(w.x, bob), 0);
    assert_eq!(w.vault.nonce(&w.agent), 1);
}

#[test]
fn signed_batch_is_relayed_once() {
    let key = AgentKeypair::from_seed(&[7u8; 32]);
    let signer = Address::from_public_key(&key.public_key());
    let mut w = World::with_agent(signer);
    let agent = w.as_agent();
    w.vault.add_asset(&agent, w.x, 4_000).unwrap();
    let alice = holder("alice");
    w.fund(alice, w.x, 1_000);
    w.vault.deposit(&w.ctx(alice), w.x, 1_000).unwrap();

    let calls = vec![BatchCall::required(
        Invocation::Transfer {
            asset: w.x,
            to: holder("payee"),
            amount: 250,
        },
        CALL_GAS,
    )];
    let deadline = w.now + Duration::minutes(10);
    let signed = SignedBatch::sign(
        &key,
        w.vault.address(),
        calls,
        0,
        deadline,
        DEFAULT_BATCH_GAS_LIMIT,
    )
    .unwrap();

    let relayer = w.ctx(holder("relayer"));
    let receipt = w.vault.execute_signed_batch(&relayer, &signed).unwrap();
    assert_eq!(receipt.nonce, 0);
    assert_eq!(w.vault.nonce(&signer), 1);
    assert_eq!(w.vault.host().balance_of(w.x, holder("payee")), 250);

    assert_eq!(
        w.vault.execute_signed_batch(&relayer, &signed),
        Err(VaultError::NonceMismatch {
            expected: 1,
            got: 0
        })
    );

    let mut tampered = SignedBatch::sign(
        &key,
        w.vault.address(),
        signed.calls.clone(),
        1,
        deadline,
        DEFAULT_BATCH_GAS_LIMIT,
    )
    .unwrap();
    tampered.gas_limit += 1;
    assert_eq!(
        w.vault.execute_signed_batch(&relayer, &tampered),
        Err(VaultError::InvalidSignature)
    );

    let late = CallContext::new(holder("relayer"), deadline + Duration::seconds(1));
    let fresh = SignedBatch::sign(
        &key,
        w.vault.address(),
        signed.calls.clone(),
        1,
        deadline,
        DEFAULT_BATCH_GAS_LIMIT,
    )
    .unwrap();
    assert!(matches!(
        w.vault.execute_signed_batch(&late, &fresh),
        Err(VaultError::DeadlineExpired { .. })
    ));
    assert_eq!(w.vault.nonce(&signer), 1);
}

#[test]
fn signature_from_non_agent_is_refused() {
    let mut w = World::new();
    let stranger = AgentKeypair::from_seed(&[9u8; 32]);
    let signed = SignedBatch::sign(
        &stranger,
        w.vault.address(),
        vec![BatchCall::required(
            Invocation::Vault(VaultCall::CollectFees),
            CALL_GAS,
        )],
        0,
        w.now + Duration::minutes(1),
        DEFAULT_BATCH_GAS_LIMIT,
    )
    .unwrap();
    let relayer = w.ctx(holder("relayer"));
    assert!(matches!(
        w.vault.execute_signed_batch(&relayer, &signed),
        Err(VaultError::NotAgent(_))
    ));
}

// ---------------------------------------------------------------------------
// Protocols and Reentrancy
// ---------------------------------------------------------------------------

#[test]
fn protocol_callback_into_batch_is_refused() {
    let mut w = World::new();
    let agent = w.as_agent();
    let owner = w.as_owner();
    w.vault.add_asset(&agent, w.x, 4_000).unwrap();
    let alice = holder("alice");
    w.fund(alice, w.x, 1_000);
    w.vault.deposit(&w.ctx(alice), w.x, 1_000).unwrap();

    let lender = holder("lender");
    let reentry = Reentry::Batch {
        calls: vec![BatchCall::required(
            Invocation::Transfer {
                asset: w.x,
                to: lender,
                amount: 1_000,
            },
            CALL_GAS,
        )],
        gas_limit: DEFAULT_BATCH_GAS_LIMIT,
    };
    w.vault
        .host_mut()
        .register_endpoint(lender, ProtocolEndpoint::accepting().with_callback(reentry));
    w.vault.approve_protocol(&owner, lender).unwrap();

    let calls = vec![BatchCall::required(
        Invocation::Protocol {
            target: lender,
            payload: b"supply".to_vec(),
        },
        CALL_GAS,
    )];
    let err = w
        .vault
        .execute_batch(&agent, &calls, DEFAULT_BATCH_GAS_LIMIT)
        .unwrap_err();

    match err {
        VaultError::CallFailed { source, .. } => assert_eq!(*source, VaultError::ReentrantCall),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(w.vault.host().balance_of(w.x, lender), 0);
    assert_eq!(w.vault.asset(&w.x).unwrap().cached_balance, 1_000);
    assert!(w.vault.host().call_log().is_empty());
}

#[test]
fn deploy_moves_funds_to_approved_protocol() {
    let mut w = World::new();
    let agent = w.as_agent();
    let owner = w.as_owner();
    w.vault.add_asset(&agent, w.x, 4_000).unwrap();
    let alice = holder("alice");
    w.fund(alice, w.x, 1_000);
    w.vault.deposit(&w.ctx(alice), w.x, 1_000).unwrap();

    let staking = holder("staking");
    let mut endpoint = ProtocolEndpoint::accepting();
    endpoint.return_data = vec![0xAB];
    w.vault.host_mut().register_endpoint(staking, endpoint);

    assert_eq!(
        w.vault.deploy_to_protocol(&agent, w.x, staking, 400, b"stake"),
        Err(VaultError::ProtocolNotApproved(staking))
    );
    w.vault.approve_protocol(&owner, staking).unwrap();
    let data = w
        .vault
        .deploy_to_protocol(&agent, w.x, staking, 400, b"stake")
        .unwrap();

    assert_eq!(data, vec![0xAB]);
    assert_eq!(w.vault.host().balance_of(w.x, staking), 400);
    assert_eq!(w.vault.asset(&w.x).unwrap().cached_balance, 600);
    assert_eq!(w.vault.host().call_log().len(), 1);
}

// ---------------------------------------------------------------------------
// Cross-Chain, Fees, Emergency
// ---------------------------------------------------------------------------

#[test]
fn cross_chain_operation_lifecycle() {
    let mut w = World::new();
    let agent = w.as_agent();
    let owner = w.as_owner();
    w.vault.add_asset(&agent, w.x, 4_000).unwrap();
    let alice = holder("alice");
    w.fund(alice, w.x, 1_000);
    w.vault.deposit(&w.ctx(alice), w.x, 1_000).unwrap();

    let remote = holder("remote vault");
    assert_eq!(
        w.vault.initiate_cross_chain(&agent, 10, remote, w.x, 100),
        Err(VaultError::UnknownDomain(10))
    );
    w.vault.register_domain(&owner, 10, remote).unwrap();
    let first = w.vault.initiate_cross_chain(&agent, 10, remote, w.x, 100).unwrap();
    let second = w.vault.initiate_cross_chain(&agent, 10, remote, w.x, 100).unwrap();
    assert_ne!(first, second);
    assert_eq!(w.vault.asset(&w.x).unwrap().cached_balance, 800);

    w.vault.execute_cross_chain(&agent, first).unwrap();
    assert!(w.vault.operation(&first).unwrap().executed);
    assert!(!w.vault.operation(&second).unwrap().executed);
    assert_eq!(
        w.vault.execute_cross_chain(&agent, first),
        Err(VaultError::OperationAlreadyExecuted(first))
    );
}

#[test]
fn committed_cross_chain_value_is_not_recounted_on_refresh() {
    let mut w = World::new();
    let agent = w.as_agent();
    let owner = w.as_owner();
    w.vault.add_asset(&agent, w.x, 4_000).unwrap();
    let alice = holder("alice");
    w.fund(alice, w.x, 1_000);
    w.vault.deposit(&w.ctx(alice), w.x, 1_000).unwrap();

    let remote = holder("remote vault");
    w.vault.register_domain(&owner, 10, remote).unwrap();
    w.vault.initiate_cross_chain(&agent, 10, remote, w.x, 400).unwrap();
    assert_eq!(w.vault.total_value().unwrap(), 600);

    let vault = w.vault.address();
    assert_eq!(w.vault.host().balance_of(w.x, vault), 600);
    assert_eq!(w.vault.host().balance_of(w.x, escrow_address(&vault)), 400);

    assert_eq!(w.vault.refresh_balance(&agent, w.x).unwrap(), 600);
    assert_eq!(w.vault.total_value().unwrap(), 600);

    // A batch transfer resyncs from the ledger too.
    let calls = vec![BatchCall::required(
        Invocation::Transfer {
            asset: w.x,
            to: holder("payee"),
            amount: 100,
        },
        CALL_GAS,
    )];
    w.vault
        .execute_batch(&agent, &calls, DEFAULT_BATCH_GAS_LIMIT)
        .unwrap();
    assert_eq!(w.vault.total_value().unwrap(), 500);
}

#[test]
fn management_fee_dilutes_holders_to_agent() {
    let mut w = World::new();
    let agent = w.as_agent();
    w.vault.add_asset(&agent, w.x, 4_000).unwrap();
    let alice = holder("alice");
    w.fund(alice, w.x, 1_000_000);
    w.vault.deposit(&w.ctx(alice), w.x, 1_000_000).unwrap();

    w.advance(31_536_000);
    let preview = w.vault.preview_fees(w.now).unwrap();
    let fees = w.vault.collect_fees(&w.as_agent()).unwrap();

    assert_eq!(fees, preview);
    // 2% of 1_000_000 over one year.
    assert_eq!(fees.management_fee, 20_000);
    assert_eq!(fees.performance_fee, 0);
    assert_eq!(w.vault.share_balance(&w.agent), fees.fee_shares);
    assert_eq!(w.vault.total_value().unwrap(), 1_000_000);
    assert!(w.vault.nav_per_share().unwrap() < SCALE);
}

#[test]
fn paused_vault_only_allows_emergency_tier() {
    let mut w = World::new();
    let agent = w.as_agent();
    let owner = w.as_owner();
    w.vault.add_asset(&agent, w.x, 4_000).unwrap();
    let alice = holder("alice");
    w.fund(alice, w.x, 2_000);
    w.vault.deposit(&w.ctx(alice), w.x, 1_000).unwrap();

    assert_eq!(
        w.vault.emergency_withdraw(&owner, w.x, w.owner),
        Err(VaultError::NotPaused)
    );
    w.vault.pause(&owner).unwrap();
    assert_eq!(
        w.vault.deposit(&w.ctx(alice), w.x, 1_000),
        Err(VaultError::Paused)
    );

    let safe = holder("cold storage");
    let rescued = w.vault.emergency_withdraw(&owner, w.x, safe).unwrap();
    assert_eq!(rescued, 1_000);
    assert_eq!(w.vault.host().balance_of(w.x, safe), 1_000);
    assert_eq!(w.vault.asset(&w.x).unwrap().cached_balance, 0);

    w.vault.unpause(&owner).unwrap();
    assert!(!w.vault.state().access.is_paused());
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn persisted_vault_resumes_where_it_stopped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut w = World::new();
    let agent = w.as_agent();
    w.vault.add_asset(&agent, w.x, 5_000).unwrap();
    w.vault.add_asset(&agent, w.y, 5_000).unwrap();
    let alice = holder("alice");
    w.fund(alice, w.x, 3_000);
    w.vault.deposit(&w.ctx(alice), w.x, 3_000).unwrap();
    let batch = vec![BatchCall::required(
        Invocation::Vault(VaultCall::RefreshBalance { asset: w.y }),
        CALL_GAS,
    )];
    w.vault
        .execute_batch(&agent, &batch, DEFAULT_BATCH_GAS_LIMIT)
        .unwrap();

    {
        let store = VaultStore::open(dir.path()).unwrap();
        store.save(&w.vault).unwrap();
    }

    let store = VaultStore::open(dir.path()).unwrap();
    let mut restored: Vault<InMemoryHost> = store.load().unwrap().expect("saved vault");
    assert_eq!(restored.state(), w.vault.state());
    assert_eq!(restored.nonce(&w.agent), 1);

    // The restored vault keeps working.
    let bob = holder("bob");
    restored.host_mut().mint(w.x, bob, 500).unwrap();
    let vault_addr = restored.address();
    restored.host_mut().approve(w.x, bob, vault_addr, 500).unwrap();
    let shares = restored.deposit(&w.ctx(bob), w.x, 500).unwrap();
    assert_eq!(shares, 500);
    assert_eq!(
        restored.events_since(0).len(),
        w.vault.events_since(0).len() + 1
    );
}
