//! Interactive CLI walkthrough of a Tessera vault.
//!
//! Creates a two-asset vault, takes deposits from two holders, accrues yield
//! and fees, rebalances through the router, runs a relayed signed batch,
//! opens a cross-chain operation and finally persists and reloads the whole
//! thing. Output is ANSI-colored, storytelling style.
//!
//! Run with:
//!   cargo run --example demo --release

use std::error::Error;
use std::time::Instant;

use chrono::{Duration, TimeZone, Utc};

use tessera_protocol::config::{VaultConfig, DEFAULT_BATCH_GAS_LIMIT, SCALE};
use tessera_protocol::crypto::AgentKeypair;
use tessera_protocol::storage::VaultStore;
use tessera_protocol::vault::{
    Address, AssetId, BatchCall, CallContext, CallOutcome, InMemoryHost, Invocation, SignedBatch,
    TokenLedger, Vault, VaultCall,
};

// ---------------------------------------------------------------------------
// ANSI color constants
// ---------------------------------------------------------------------------

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const MAGENTA: &str = "\x1b[35m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";
const RED: &str = "\x1b[31m";

const BG_BLUE: &str = "\x1b[44m";

// ---------------------------------------------------------------------------
// Display helpers
// ---------------------------------------------------------------------------

fn banner() {
    println!();
    println!("{BG_BLUE}{BOLD}{WHITE}                                                                    {RESET}");
    println!("{BG_BLUE}{BOLD}{WHITE}    TESSERA  --  Multi-Asset Vault Walkthrough                      {RESET}");
    println!("{BG_BLUE}{BOLD}{WHITE}    Version 0.1.0  |  NAV shares + delegated batches + BLAKE3       {RESET}");
    println!("{BG_BLUE}{BOLD}{WHITE}                                                                    {RESET}");
    println!();
}

fn section(num: u32, title: &str) {
    println!();
    println!(
        "{BOLD}{CYAN}===[{YELLOW} Step {num} {CYAN}]=============================================================={RESET}"
    );
    println!("{BOLD}{WHITE}  {title}{RESET}");
    println!("{CYAN}------------------------------------------------------------------------{RESET}");
}

fn success(text: &str) {
    println!("{GREEN}  [OK] {text}{RESET}");
}

fn refused(text: &str) {
    println!("{RED}  [REFUSED] {text}{RESET}");
}

fn info(label: &str, value: impl std::fmt::Display) {
    println!("{WHITE}  {BOLD}{label}:{RESET} {YELLOW}{value}{RESET}");
}

fn timing(label: &str, elapsed: std::time::Duration) {
    let ms = elapsed.as_secs_f64() * 1000.0;
    println!("{DIM}{MAGENTA}  [{label}: {ms:.2} ms]{RESET}");
}

/// NAV per share as a decimal with six places.
fn nav(raw: u128) -> String {
    let micro = raw / (SCALE / 1_000_000);
    format!("{}.{:06}", micro / 1_000_000, micro % 1_000_000)
}

fn holdings(vault: &Vault<InMemoryHost>) {
    for record in vault.assets() {
        let status = if record.active { "" } else { " (inactive)" };
        println!(
            "  {CYAN}{BOLD}{:<10}{RESET} {WHITE}{:>12}{RESET} {DIM}target {} bps{status}{RESET}",
            &record.asset_id.to_hex()[..8],
            record.cached_balance,
            record.target_weight_bps,
        );
    }
}

// ---------------------------------------------------------------------------
// Walkthrough
// ---------------------------------------------------------------------------

fn main() -> Result<(), Box<dyn Error>> {
    banner();

    let mut now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().ok_or("bad date")?;
    let owner = Address::derive("owner");
    let agent_key = AgentKeypair::generate();
    let agent = Address::from_public_key(&agent_key.public_key());
    let (alice, bob) = (Address::derive("alice"), Address::derive("bob"));
    let (usdc, weth) = (AssetId::derive("USDC"), AssetId::derive("WETH"));

    // -- 1 ------------------------------------------------------------------
    section(1, "Create the vault");
    let mut vault = Vault::new(
        Address::derive("tessera demo vault"),
        VaultConfig {
            name: "Demo Balanced Fund".into(),
            ..VaultConfig::default()
        },
        owner,
        agent,
        InMemoryHost::new(),
        now,
    )?;
    let as_agent = |now| CallContext::new(agent, now);
    vault.add_asset(&as_agent(now), usdc, 5_000)?;
    vault.add_asset(&as_agent(now), weth, 5_000)?;
    info("vault", vault.address());
    info("agent", agent);
    holdings(&vault);
    success("two assets registered at 50/50");

    // -- 2 ------------------------------------------------------------------
    section(2, "Holders deposit");
    let vault_addr = vault.address();
    for (who, asset, amount) in [(alice, usdc, 60_000u128), (bob, weth, 40_000)] {
        let host = vault.host_mut();
        host.mint(asset, who, amount)?;
        host.approve(asset, who, vault_addr, amount)?;
    }
    let shares = vault.deposit(&CallContext::new(alice, now), usdc, 60_000)?;
    info("alice shares", shares);
    let shares = vault.deposit(&CallContext::new(bob, now), weth, 40_000)?;
    info("bob shares", shares);
    info("total value", vault.total_value()?);
    info("NAV / share", nav(vault.nav_per_share()?));
    holdings(&vault);

    // -- 3 ------------------------------------------------------------------
    section(3, "Yield arrives, fees are collected");
    vault.host_mut().mint(usdc, vault_addr, 5_000)?;
    vault.refresh_balance(&as_agent(now), usdc)?;
    now += Duration::days(90);
    let fees = vault.collect_fees(&as_agent(now))?;
    info("management fee", fees.management_fee);
    info("performance fee", fees.performance_fee);
    info("fee shares to agent", fees.fee_shares);
    info("high-water mark", nav(fees.high_water_mark_nav));
    success("fees levied by share dilution");

    // -- 4 ------------------------------------------------------------------
    section(4, "Rebalance through the router");
    let report = vault.rebalance_report()?;
    for a in &report.assets {
        println!(
            "  {CYAN}{:<10}{RESET} current {:>5} bps  target {:>5} bps  deviation {:>5}{}",
            &a.asset_id.to_hex()[..8],
            a.current_weight_bps,
            a.target_weight_bps,
            a.deviation_bps,
            if a.exceeds_threshold { "  <-" } else { "" }
        );
    }
    let router = InMemoryHost::router_address();
    vault.host_mut().mint(weth, router, 1_000_000)?;
    vault.host_mut().set_rate(usdc, weth, 1, 1);
    let start = Instant::now();
    let out = vault.rebalance(&as_agent(now), usdc, weth, 12_000, 11_900, now + Duration::minutes(5))?;
    timing("rebalance", start.elapsed());
    info("WETH received", out);
    info("still off target", vault.needs_rebalancing()?);
    holdings(&vault);

    // -- 5 ------------------------------------------------------------------
    section(5, "Relayed signed batch");
    let payee = Address::derive("payroll");
    let calls = vec![
        BatchCall::required(
            Invocation::Transfer {
                asset: usdc,
                to: payee,
                amount: 1_500,
            },
            50_000,
        ),
        BatchCall::optional(
            Invocation::Transfer {
                asset: weth,
                to: payee,
                amount: 10_000_000,
            },
            50_000,
        ),
        BatchCall::required(Invocation::Vault(VaultCall::CollectFees), 150_000),
    ];
    let signed = SignedBatch::sign(
        &agent_key,
        vault_addr,
        calls,
        vault.nonce(&agent),
        now + Duration::minutes(10),
        DEFAULT_BATCH_GAS_LIMIT,
    )?;
    let relayer = CallContext::new(Address::derive("relayer"), now);
    let start = Instant::now();
    let receipt = vault.execute_signed_batch(&relayer, &signed)?;
    timing("signed batch", start.elapsed());
    for (i, outcome) in receipt.outcomes.iter().enumerate() {
        match outcome {
            CallOutcome::Succeeded { gas_used, .. } => success(&format!("call {i} used {gas_used} gas")),
            CallOutcome::Failed { reason, .. } => refused(&format!("call {i}: {reason}")),
            CallOutcome::Skipped { reason } => refused(&format!("call {i} skipped: {reason}")),
        }
    }
    info("gas used", receipt.gas_used);
    match vault.execute_signed_batch(&relayer, &signed) {
        Err(e) => refused(&format!("replay: {e}")),
        Ok(_) => println!("{RED}  replay was accepted?!{RESET}"),
    }

    // -- 6 ------------------------------------------------------------------
    section(6, "Cross-chain operation");
    let remote = Address::derive("remote vault on domain 10");
    vault.register_domain(&CallContext::new(owner, now), 10, remote)?;
    let key = vault.initiate_cross_chain(&as_agent(now), 10, remote, usdc, 2_000)?;
    info("operation", key);
    vault.execute_cross_chain(&as_agent(now), key)?;
    success("operation marked executed");

    // -- 7 ------------------------------------------------------------------
    section(7, "Persist and reload");
    let dir = std::env::temp_dir().join(format!("tessera-demo-{}", std::process::id()));
    let store = VaultStore::open(&dir)?;
    store.save(&vault)?;
    let reloaded: Vault<InMemoryHost> = store.load()?.ok_or("nothing saved")?;
    info("events journaled", reloaded.events_since(0).len());
    info("matches in-memory vault", reloaded.state() == vault.state());
    drop(store);
    std::fs::remove_dir_all(&dir)?;

    println!();
    println!("{BOLD}{GREEN}  Walkthrough complete.{RESET}");
    println!();
    Ok(())
}
