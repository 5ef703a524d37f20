//! # Vault Engine
//!
//! [`Vault`] owns one [`VaultState`] and the [`Host`] it talks to, and
//! exposes every entry point. Each public mutating method follows the same
//! shape:
//!
//! 1. Checkpoint state and host ([`Vault::transact`]).
//! 2. Take the reentrance lock if the operation moves value.
//! 3. Authorize, validate, compute every delta.
//! 4. Perform the external call.
//! 5. Commit the deltas and append an event.
//!
//! Any error between 1 and 5 restores the checkpoint, so a failed call
//! leaves neither the vault nor the host changed.
//!
//! Callbacks returned by a protocol are dispatched while the lock is still
//! held. They go through these same public methods, so a guarded operation
//! reached that way fails with `ReentrantCall`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::assets::AssetRecord;
use super::batch::CallOutput;
use super::cross_chain::{escrow_address, CrossChainRecord};
use super::error::VaultError;
use super::events::{EventKind, VaultEvent};
use super::fees::FeeBreakdown;
use super::host::{Host, ProtocolGateway, SwapRequest, SwapRouter, TokenLedger};
use super::ids::{Address, AssetId, OperationKey};
use super::invocation::{Reentry, VaultCall};
use super::rebalance::{self, RebalanceReport};
use super::state::VaultState;
use super::valuation::{self, WithdrawQuote};
use crate::config::{MAX_PROTOCOL_PAYLOAD_BYTES, VaultConfig};

/// Who is calling, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    pub caller: Address,
    pub now: DateTime<Utc>,
}

impl CallContext {
    pub fn new(caller: Address, now: DateTime<Utc>) -> Self {
        Self { caller, now }
    }

    /// Context stamped with the wall clock.
    pub fn wall_clock(caller: Address) -> Self {
        Self::new(caller, Utc::now())
    }
}

/// A vault instance bound to its collaborators.
#[derive(Debug, Clone)]
pub struct Vault<H: Host> {
    pub(crate) state: VaultState,
    pub(crate) host: H,
}

impl<H: Host> Vault<H> {
    pub fn new(
        address: Address,
        config: VaultConfig,
        owner: Address,
        primary_agent: Address,
        host: H,
        now: DateTime<Utc>,
    ) -> Result<Self, VaultError> {
        let state = VaultState::new(address, config, owner, primary_agent, now)?;
        info!(
            vault = %address,
            name = %state.config.name,
            owner = %owner,
            agent = %primary_agent,
            "vault created"
        );
        Ok(Self { state, host })
    }

    pub fn from_parts(state: VaultState, host: H) -> Self {
        Self { state, host }
    }

    pub fn into_parts(self) -> (VaultState, H) {
        (self.state, self.host)
    }

    pub fn state(&self) -> &VaultState {
        &self.state
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Direct host access, for funding accounts and scripting endpoints.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn address(&self) -> Address {
        self.state.address
    }

    // -----------------------------------------------------------------------
    // Transaction plumbing
    // -----------------------------------------------------------------------

    /// Run `f` against a checkpoint; restore it if `f` fails.
    ///
    /// The event journal is append-only, so it is kept out of the state
    /// copy and cut back to its old length on revert.
    pub(crate) fn transact<T>(
        &mut self,
        operation: &'static str,
        f: impl FnOnce(&mut Self) -> Result<T, VaultError>,
    ) -> Result<T, VaultError> {
        let journal_len = self.state.events.len();
        let journal = std::mem::take(&mut self.state.events);
        let state = self.state.clone();
        self.state.events = journal;
        let host = self.host.checkpoint();
        match f(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                let mut journal = std::mem::take(&mut self.state.events);
                journal.truncate(journal_len);
                self.state = state;
                self.state.events = journal;
                self.host.restore(host);
                debug!(operation, error = %err, "call reverted");
                Err(err)
            }
        }
    }

    /// Hold the vault lock for the duration of `f`.
    pub(crate) fn with_vault_lock<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, VaultError>,
    ) -> Result<T, VaultError> {
        if self.state.locks.vault {
            warn!("reentrant call rejected");
            return Err(VaultError::ReentrantCall);
        }
        self.state.locks.vault = true;
        let result = f(self);
        self.state.locks.vault = false;
        result
    }

    pub(crate) fn emit(&mut self, now: DateTime<Utc>, kind: EventKind) {
        self.state.events.record(now, kind);
    }

    /// Agent-gated operations also accept the vault's own identity, which
    /// is how a self-submitted batch reaches them.
    fn require_agent(&self, who: &Address) -> Result<(), VaultError> {
        if *who == self.state.address {
            return Ok(());
        }
        self.state.access.ensure_agent(who)
    }

    fn require_owner(&self, who: &Address) -> Result<(), VaultError> {
        self.state.access.ensure_owner(who)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn total_value(&self) -> Result<u128, VaultError> {
        self.state.total_value()
    }

    pub fn total_supply(&self) -> u128 {
        self.state.shares.total_supply()
    }

    pub fn nav_per_share(&self) -> Result<u128, VaultError> {
        self.state.nav_per_share()
    }

    pub fn share_balance(&self, holder: &Address) -> u128 {
        self.state.shares.balance_of(holder)
    }

    pub fn asset(&self, asset: &AssetId) -> Option<&AssetRecord> {
        self.state.assets.get(asset)
    }

    pub fn asset_at(&self, index: usize) -> Option<&AssetRecord> {
        self.state.assets.at(index)
    }

    pub fn assets(&self) -> &[AssetRecord] {
        self.state.assets.records()
    }

    pub fn active_assets(&self) -> impl Iterator<Item = &AssetRecord> {
        self.state.assets.active()
    }

    pub fn is_owner(&self, who: &Address) -> bool {
        self.state.access.is_owner(who)
    }

    pub fn is_agent(&self, who: &Address) -> bool {
        self.state.access.is_agent(who)
    }

    /// True for the vault's own delegated identity.
    pub fn is_self(&self, who: &Address) -> bool {
        *who == self.state.address
    }

    pub fn active_weight_sum(&self) -> u32 {
        self.state.assets.active_weight_sum()
    }

    pub fn needs_rebalancing(&self) -> Result<bool, VaultError> {
        rebalance::needs_rebalancing(&self.state.assets)
    }

    pub fn rebalance_report(&self) -> Result<RebalanceReport, VaultError> {
        rebalance::report(&self.state.assets)
    }

    pub fn operation(&self, key: &OperationKey) -> Option<&CrossChainRecord> {
        self.state.cross_chain.get(key)
    }

    pub fn nonce(&self, who: &Address) -> u64 {
        self.state.nonces.current(who)
    }

    pub fn events_since(&self, sequence: u64) -> &[VaultEvent] {
        self.state.events.since(sequence)
    }

    /// Shares a deposit would mint right now.
    pub fn preview_deposit(&self, asset: &AssetId, amount: u128) -> Result<u128, VaultError> {
        self.state.assets.require_active(asset)?;
        valuation::shares_for_deposit(
            amount,
            self.state.shares.total_supply(),
            self.state.total_value()?,
        )
    }

    /// What redeeming `shares` into `asset_out` would pay right now.
    pub fn preview_withdraw(&self, shares: u128, asset_out: &AssetId) -> Result<WithdrawQuote, VaultError> {
        let record = self.state.assets.require_active(asset_out)?;
        valuation::quote_withdrawal(
            shares,
            self.state.shares.total_supply(),
            self.state.total_value()?,
            record.cached_balance,
        )
    }

    pub fn preview_fees(&self, now: DateTime<Utc>) -> Result<FeeBreakdown, VaultError> {
        self.state.fees.assess(
            self.state.total_value()?,
            self.state.shares.total_supply(),
            now,
        )
    }

    // -----------------------------------------------------------------------
    // Holder operations
    // -----------------------------------------------------------------------

    /// Deposit `amount` of `asset` and mint shares to the caller. The caller
    /// must have approved the vault's address on the token ledger.
    pub fn deposit(&mut self, ctx: &CallContext, asset: AssetId, amount: u128) -> Result<u128, VaultError> {
        self.transact("deposit", |v| v.with_vault_lock(|v| v.deposit_locked(ctx, asset, amount)))
    }

    fn deposit_locked(&mut self, ctx: &CallContext, asset: AssetId, amount: u128) -> Result<u128, VaultError> {
        self.state.access.ensure_not_paused()?;
        if ctx.caller.is_zero() || ctx.caller == self.state.address {
            return Err(VaultError::InvalidAddress);
        }
        self.state.assets.require_active(&asset)?;
        let minimum = self.state.config.min_deposit;
        if amount < minimum {
            return Err(VaultError::BelowMinimumDeposit { amount, minimum });
        }
        let shares = valuation::shares_for_deposit(
            amount,
            self.state.shares.total_supply(),
            self.state.total_value()?,
        )?;

        let vault = self.state.address;
        self.host.transfer_from(asset, vault, ctx.caller, vault, amount)?;

        self.state.assets.credit(&asset, amount)?;
        self.state.shares.mint(ctx.caller, shares)?;
        self.emit(
            ctx.now,
            EventKind::Deposited {
                depositor: ctx.caller,
                asset,
                amount,
                shares,
            },
        );
        info!(depositor = %ctx.caller, asset = %asset, amount = %amount, shares = %shares, "deposit");
        Ok(shares)
    }

    /// Burn `shares` and pay the caller out of one asset bucket.
    pub fn withdraw(
        &mut self,
        ctx: &CallContext,
        shares: u128,
        asset_out: AssetId,
        min_out: u128,
    ) -> Result<u128, VaultError> {
        self.transact("withdraw", |v| {
            v.with_vault_lock(|v| v.withdraw_locked(ctx, shares, asset_out, min_out))
        })
    }

    fn withdraw_locked(
        &mut self,
        ctx: &CallContext,
        shares: u128,
        asset_out: AssetId,
        min_out: u128,
    ) -> Result<u128, VaultError> {
        self.state.access.ensure_not_paused()?;
        if shares == 0 {
            return Err(VaultError::InvalidAmount("cannot withdraw zero shares"));
        }
        let held = self.state.shares.balance_of(&ctx.caller);
        if shares > held {
            return Err(VaultError::InsufficientShares {
                available: held,
                requested: shares,
            });
        }
        let bucket = self.state.assets.require_active(&asset_out)?.cached_balance;
        let quote = valuation::quote_withdrawal(
            shares,
            self.state.shares.total_supply(),
            self.state.total_value()?,
            bucket,
        )?;
        let amount_out = quote.amount_out;
        if amount_out < min_out {
            return Err(VaultError::SlippageExceeded { amount_out, min_out });
        }
        if amount_out > bucket {
            return Err(VaultError::InsufficientBalance {
                available: bucket,
                requested: amount_out,
            });
        }
        if amount_out == 0 {
            return Err(VaultError::InvalidAmount("withdrawal rounds to zero"));
        }

        let vault = self.state.address;
        self.host.transfer(asset_out, vault, ctx.caller, amount_out)?;

        self.state.shares.burn(&ctx.caller, shares)?;
        self.state.assets.debit(&asset_out, amount_out)?;
        self.emit(
            ctx.now,
            EventKind::Withdrawn {
                holder: ctx.caller,
                asset: asset_out,
                shares,
                amount_out,
            },
        );
        info!(holder = %ctx.caller, asset = %asset_out, shares = %shares, amount_out = %amount_out, "withdraw");
        Ok(amount_out)
    }

    pub fn transfer_shares(&mut self, ctx: &CallContext, to: Address, amount: u128) -> Result<(), VaultError> {
        self.transact("transfer_shares", |v| {
            if amount == 0 {
                return Err(VaultError::InvalidAmount("cannot transfer zero shares"));
            }
            v.state.shares.transfer(&ctx.caller, to, amount)?;
            v.emit(
                ctx.now,
                EventKind::SharesTransferred {
                    from: ctx.caller,
                    to,
                    amount,
                },
            );
            debug!(from = %ctx.caller, to = %to, amount = %amount, "shares transferred");
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Agent operations
    // -----------------------------------------------------------------------

    pub fn add_asset(&mut self, ctx: &CallContext, asset: AssetId, weight_bps: u32) -> Result<usize, VaultError> {
        self.transact("add_asset", |v| {
            v.require_agent(&ctx.caller)?;
            let index = v.state.assets.add(asset, weight_bps)?;
            v.emit(
                ctx.now,
                EventKind::AssetAdded {
                    asset,
                    index,
                    weight_bps,
                },
            );
            info!(asset = %asset, index, weight_bps, "asset added");
            Ok(index)
        })
    }

    pub fn remove_asset(&mut self, ctx: &CallContext, asset: AssetId) -> Result<usize, VaultError> {
        self.transact("remove_asset", |v| {
            v.require_agent(&ctx.caller)?;
            let index = v.state.assets.remove(&asset)?;
            v.emit(ctx.now, EventKind::AssetRemoved { asset, index });
            info!(asset = %asset, index, "asset removed");
            Ok(index)
        })
    }

    pub fn set_target_weight(&mut self, ctx: &CallContext, asset: AssetId, weight_bps: u32) -> Result<(), VaultError> {
        self.transact("set_target_weight", |v| {
            v.require_agent(&ctx.caller)?;
            v.state.assets.set_target_weight(&asset, weight_bps)?;
            v.emit(
                ctx.now,
                EventKind::WeightsUpdated {
                    weights: vec![(asset, weight_bps)],
                },
            );
            Ok(())
        })
    }

    /// Resynchronise an asset's cached balance with the token ledger.
    pub fn refresh_balance(&mut self, ctx: &CallContext, asset: AssetId) -> Result<u128, VaultError> {
        self.transact("refresh_balance", |v| {
            v.require_agent(&ctx.caller)?;
            v.state.assets.require_active(&asset)?;
            let balance = v.host.balance_of(asset, v.state.address);
            v.state.assets.set_cached_balance(&asset, balance)?;
            v.emit(ctx.now, EventKind::BalanceRefreshed { asset, balance });
            debug!(asset = %asset, balance = %balance, "balance refreshed");
            Ok(balance)
        })
    }

    /// Accrue management and performance fees up to `ctx.now`.
    pub fn collect_fees(&mut self, ctx: &CallContext) -> Result<FeeBreakdown, VaultError> {
        self.transact("collect_fees", |v| {
            v.require_agent(&ctx.caller)?;
            v.accrue_fees(ctx.now)
        })
    }

    fn accrue_fees(&mut self, now: DateTime<Utc>) -> Result<FeeBreakdown, VaultError> {
        let breakdown = self.state.fees.assess(
            self.state.total_value()?,
            self.state.shares.total_supply(),
            now,
        )?;
        if breakdown.elapsed_secs == 0 {
            return Ok(breakdown);
        }
        let recipient = self.state.access.primary_agent();
        self.state.shares.mint(recipient, breakdown.fee_shares)?;
        self.state.fees.apply(&breakdown, now)?;
        if !breakdown.is_empty() {
            self.emit(
                now,
                EventKind::FeesCollected {
                    management_fee: breakdown.management_fee,
                    performance_fee: breakdown.performance_fee,
                    fee_shares: breakdown.fee_shares,
                    recipient,
                },
            );
            info!(
                management = %breakdown.management_fee,
                performance = %breakdown.performance_fee,
                fee_shares = %breakdown.fee_shares,
                recipient = %recipient,
                "fees collected"
            );
        }
        Ok(breakdown)
    }

    /// Swap between two active assets while the allocation is off target.
    pub fn rebalance(
        &mut self,
        ctx: &CallContext,
        asset_in: AssetId,
        asset_out: AssetId,
        amount_in: u128,
        min_out: u128,
        deadline: DateTime<Utc>,
    ) -> Result<u128, VaultError> {
        self.transact("rebalance", |v| {
            v.with_vault_lock(|v| {
                v.state.access.ensure_not_paused()?;
                v.require_agent(&ctx.caller)?;
                if deadline < ctx.now {
                    return Err(VaultError::DeadlineExpired {
                        deadline,
                        now: ctx.now,
                    });
                }
                if !rebalance::needs_rebalancing(&v.state.assets)? {
                    return Err(VaultError::RebalanceThresholdNotMet);
                }
                if amount_in == 0 {
                    return Err(VaultError::InvalidAmount("rebalance amount is zero"));
                }
                let available = v.state.assets.require_active(&asset_in)?.cached_balance;
                v.state.assets.require_active(&asset_out)?;
                if amount_in > available {
                    return Err(VaultError::InsufficientBalance {
                        available,
                        requested: amount_in,
                    });
                }

                let vault = v.state.address;
                let amount_out = v.host.swap(&SwapRequest {
                    trader: vault,
                    asset_in,
                    asset_out,
                    amount_in,
                    min_out,
                    deadline,
                    now: ctx.now,
                })?;
                if amount_out < min_out {
                    return Err(VaultError::SlippageExceeded { amount_out, min_out });
                }

                for asset in [asset_in, asset_out] {
                    let live = v.host.balance_of(asset, vault);
                    v.state.assets.set_cached_balance(&asset, live)?;
                }
                v.emit(
                    ctx.now,
                    EventKind::Rebalanced {
                        asset_in,
                        asset_out,
                        amount_in,
                        amount_out,
                    },
                );
                info!(
                    asset_in = %asset_in,
                    asset_out = %asset_out,
                    amount_in = %amount_in,
                    amount_out = %amount_out,
                    "rebalanced"
                );
                Ok(amount_out)
            })
        })
    }

    /// Move `amount` of a vault asset into an approved protocol and invoke
    /// it with `payload`. Returns the protocol's return data.
    pub fn deploy_to_protocol(
        &mut self,
        ctx: &CallContext,
        asset: AssetId,
        protocol: Address,
        amount: u128,
        payload: &[u8],
    ) -> Result<Vec<u8>, VaultError> {
        self.transact("deploy_to_protocol", |v| {
            v.with_vault_lock(|v| {
                v.state.access.ensure_not_paused()?;
                v.require_agent(&ctx.caller)?;
                if !v.state.is_protocol_approved(&protocol) {
                    return Err(VaultError::ProtocolNotApproved(protocol));
                }
                if amount == 0 {
                    return Err(VaultError::InvalidAmount("deploy amount is zero"));
                }
                let available = v.state.assets.require_active(&asset)?.cached_balance;
                if amount > available {
                    return Err(VaultError::InsufficientBalance {
                        available,
                        requested: amount,
                    });
                }

                let vault = v.state.address;
                v.host.transfer(asset, vault, protocol, amount)?;
                let return_data = v.call_protocol(protocol, payload, 0, ctx.now)?;

                v.state.assets.debit(&asset, amount)?;
                v.emit(
                    ctx.now,
                    EventKind::DeployedToProtocol {
                        asset,
                        protocol,
                        amount,
                    },
                );
                info!(asset = %asset, protocol = %protocol, amount = %amount, "deployed to protocol");
                Ok(return_data)
            })
        })
    }

    /// Call an approved protocol and run its callbacks. The caller holds
    /// the vault lock.
    pub(crate) fn call_protocol(
        &mut self,
        target: Address,
        payload: &[u8],
        value: u128,
        now: DateTime<Utc>,
    ) -> Result<Vec<u8>, VaultError> {
        if !self.state.is_protocol_approved(&target) {
            return Err(VaultError::ProtocolNotApproved(target));
        }
        if payload.len() > MAX_PROTOCOL_PAYLOAD_BYTES {
            return Err(VaultError::InvalidInvocation {
                index: 0,
                reason: format!("payload of {} bytes is too large", payload.len()),
            });
        }
        let response = self.host.call(self.state.address, target, payload, value)?;
        for callback in &response.callbacks {
            self.dispatch_reentry(target, now, callback)?;
        }
        Ok(response.return_data)
    }

    fn dispatch_reentry(
        &mut self,
        from: Address,
        now: DateTime<Utc>,
        reentry: &Reentry,
    ) -> Result<(), VaultError> {
        let ctx = CallContext::new(from, now);
        debug!(protocol = %from, "dispatching protocol callback");
        match reentry {
            Reentry::Vault(call) => self.call(&ctx, call).map(|_| ()),
            Reentry::Batch { calls, gas_limit } => {
                self.execute_batch(&ctx, calls, *gas_limit).map(|_| ())
            }
        }
    }

    // -- cross-chain --------------------------------------------------------

    /// Debit the vault and record an outbound operation.
    pub fn initiate_cross_chain(
        &mut self,
        ctx: &CallContext,
        domain: u64,
        remote_vault: Address,
        asset: AssetId,
        amount: u128,
    ) -> Result<OperationKey, VaultError> {
        self.transact("initiate_cross_chain", |v| {
            v.state.access.ensure_not_paused()?;
            v.require_agent(&ctx.caller)?;
            v.state.cross_chain.check_route(domain, &remote_vault)?;
            v.state.assets.require_active(&asset)?;
            if amount == 0 {
                return Err(VaultError::InvalidAmount("cross-chain amount is zero"));
            }
            v.state.assets.debit(&asset, amount)?;
            let vault = v.state.address;
            v.host.transfer(asset, vault, escrow_address(&vault), amount)?;
            let key = v
                .state
                .cross_chain
                .record(domain, remote_vault, asset, amount, ctx.caller, ctx.now)?;
            v.emit(
                ctx.now,
                EventKind::CrossChainInitiated {
                    key,
                    domain,
                    asset,
                    amount,
                    initiator: ctx.caller,
                },
            );
            info!(key = %key, domain, asset = %asset, amount = %amount, "cross-chain operation initiated");
            Ok(key)
        })
    }

    pub fn execute_cross_chain(&mut self, ctx: &CallContext, key: OperationKey) -> Result<(), VaultError> {
        self.transact("execute_cross_chain", |v| {
            v.require_agent(&ctx.caller)?;
            v.state.cross_chain.execute(&key)?;
            v.emit(ctx.now, EventKind::CrossChainExecuted { key });
            info!(key = %key, "cross-chain operation executed");
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Owner operations
    // -----------------------------------------------------------------------

    pub fn set_primary_agent(&mut self, ctx: &CallContext, agent: Address) -> Result<(), VaultError> {
        self.transact("set_primary_agent", |v| {
            v.require_owner(&ctx.caller)?;
            let previous = v.state.access.set_primary_agent(agent)?;
            v.emit(
                ctx.now,
                EventKind::PrimaryAgentChanged {
                    previous,
                    current: agent,
                },
            );
            info!(previous = %previous, current = %agent, "primary agent changed");
            Ok(())
        })
    }

    pub fn authorize_agent(&mut self, ctx: &CallContext, agent: Address) -> Result<(), VaultError> {
        self.transact("authorize_agent", |v| {
            v.require_owner(&ctx.caller)?;
            v.state.access.authorize(agent)?;
            v.emit(ctx.now, EventKind::AgentAuthorized { agent });
            info!(agent = %agent, "agent authorized");
            Ok(())
        })
    }

    pub fn revoke_agent(&mut self, ctx: &CallContext, agent: Address) -> Result<(), VaultError> {
        self.transact("revoke_agent", |v| {
            v.require_owner(&ctx.caller)?;
            v.state.access.revoke(&agent)?;
            v.emit(ctx.now, EventKind::AgentRevoked { agent });
            info!(agent = %agent, "agent revoked");
            Ok(())
        })
    }

    pub fn transfer_ownership(&mut self, ctx: &CallContext, new_owner: Address) -> Result<(), VaultError> {
        self.transact("transfer_ownership", |v| {
            v.require_owner(&ctx.caller)?;
            let previous = v.state.access.transfer_ownership(new_owner)?;
            v.emit(
                ctx.now,
                EventKind::OwnershipTransferred {
                    previous,
                    current: new_owner,
                },
            );
            warn!(previous = %previous, current = %new_owner, "ownership transferred");
            Ok(())
        })
    }

    pub fn pause(&mut self, ctx: &CallContext) -> Result<(), VaultError> {
        self.transact("pause", |v| {
            v.require_owner(&ctx.caller)?;
            v.state.access.pause()?;
            v.emit(ctx.now, EventKind::Paused { by: ctx.caller });
            warn!(by = %ctx.caller, "vault paused");
            Ok(())
        })
    }

    pub fn unpause(&mut self, ctx: &CallContext) -> Result<(), VaultError> {
        self.transact("unpause", |v| {
            v.require_owner(&ctx.caller)?;
            v.state.access.unpause()?;
            v.emit(ctx.now, EventKind::Unpaused { by: ctx.caller });
            info!(by = %ctx.caller, "vault unpaused");
            Ok(())
        })
    }

    /// Sweep the vault's entire live balance of `asset` to `to`. Only while
    /// paused.
    pub fn emergency_withdraw(&mut self, ctx: &CallContext, asset: AssetId, to: Address) -> Result<u128, VaultError> {
        self.transact("emergency_withdraw", |v| {
            v.with_vault_lock(|v| {
                v.require_owner(&ctx.caller)?;
                if !v.state.access.is_paused() {
                    return Err(VaultError::NotPaused);
                }
                if to.is_zero() {
                    return Err(VaultError::InvalidAddress);
                }
                let vault = v.state.address;
                let amount = v.host.balance_of(asset, vault);
                if amount > 0 {
                    v.host.transfer(asset, vault, to, amount)?;
                }
                v.state.assets.clear_balance(&asset);
                v.emit(ctx.now, EventKind::EmergencyWithdrawal { asset, to, amount });
                warn!(asset = %asset, to = %to, amount = %amount, "emergency withdrawal");
                Ok(amount)
            })
        })
    }

    /// Overwrite target weights; the active total must come to exactly
    /// 10000 bps.
    pub fn set_all_weights(&mut self, ctx: &CallContext, assets: &[AssetId], weights: &[u32]) -> Result<(), VaultError> {
        self.transact("set_all_weights", |v| {
            v.require_owner(&ctx.caller)?;
            v.state.assets.set_all_weights(assets, weights)?;
            v.emit(
                ctx.now,
                EventKind::WeightsUpdated {
                    weights: assets.iter().copied().zip(weights.iter().copied()).collect(),
                },
            );
            info!(count = assets.len(), "weights overwritten");
            Ok(())
        })
    }

    /// Change fee rates. Fees accrued under the old rates are collected
    /// first; if they have grown past the vault's value they are forgiven
    /// instead, so the owner is never locked out of repricing.
    pub fn set_fee_rates(
        &mut self,
        ctx: &CallContext,
        management_fee_bps: u32,
        performance_fee_bps: u32,
    ) -> Result<(), VaultError> {
        self.transact("set_fee_rates", |v| {
            v.require_owner(&ctx.caller)?;
            match v.accrue_fees(ctx.now) {
                Ok(_) => {}
                Err(VaultError::FeeExceedsValue { fees, total_value }) => {
                    warn!(
                        fees = %fees,
                        total_value = %total_value,
                        "accrued fees exceed vault value, forgiving them"
                    );
                    v.state.fees.restart_accrual(ctx.now);
                }
                Err(err) => return Err(err),
            }
            v.state
                .fees
                .set_rates(management_fee_bps, performance_fee_bps)?;
            v.emit(
                ctx.now,
                EventKind::FeeRatesUpdated {
                    management_fee_bps,
                    performance_fee_bps,
                },
            );
            info!(management_fee_bps, performance_fee_bps, "fee rates updated");
            Ok(())
        })
    }

    pub fn register_domain(&mut self, ctx: &CallContext, domain: u64, remote_vault: Address) -> Result<(), VaultError> {
        self.transact("register_domain", |v| {
            v.require_owner(&ctx.caller)?;
            v.state.cross_chain.register_domain(domain, remote_vault)?;
            v.emit(
                ctx.now,
                EventKind::DomainRegistered {
                    domain,
                    remote_vault,
                },
            );
            info!(domain, remote_vault = %remote_vault, "domain registered");
            Ok(())
        })
    }

    pub fn approve_protocol(&mut self, ctx: &CallContext, protocol: Address) -> Result<(), VaultError> {
        self.transact("approve_protocol", |v| {
            v.require_owner(&ctx.caller)?;
            if protocol.is_zero() {
                return Err(VaultError::InvalidAddress);
            }
            v.state.approved_protocols.insert(protocol);
            v.emit(ctx.now, EventKind::ProtocolApproved { protocol });
            info!(protocol = %protocol, "protocol approved");
            Ok(())
        })
    }

    pub fn revoke_protocol(&mut self, ctx: &CallContext, protocol: Address) -> Result<(), VaultError> {
        self.transact("revoke_protocol", |v| {
            v.require_owner(&ctx.caller)?;
            if !v.state.approved_protocols.remove(&protocol) {
                return Err(VaultError::ProtocolNotApproved(protocol));
            }
            v.emit(ctx.now, EventKind::ProtocolRevoked { protocol });
            info!(protocol = %protocol, "protocol revoked");
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Run one [`VaultCall`] as `ctx.caller`.
    pub fn call(&mut self, ctx: &CallContext, call: &VaultCall) -> Result<CallOutput, VaultError> {
        match call {
            VaultCall::Deposit { asset, amount } => {
                self.deposit(ctx, *asset, *amount).map(CallOutput::Shares)
            }
            VaultCall::Withdraw {
                shares,
                asset_out,
                min_out,
            } => self
                .withdraw(ctx, *shares, *asset_out, *min_out)
                .map(CallOutput::Amount),
            VaultCall::AddAsset { asset, weight_bps } => {
                self.add_asset(ctx, *asset, *weight_bps).map(CallOutput::Index)
            }
            VaultCall::RemoveAsset { asset } => {
                self.remove_asset(ctx, *asset).map(CallOutput::Index)
            }
            VaultCall::SetTargetWeight { asset, weight_bps } => self
                .set_target_weight(ctx, *asset, *weight_bps)
                .map(|_| CallOutput::Unit),
            VaultCall::RefreshBalance { asset } => {
                self.refresh_balance(ctx, *asset).map(CallOutput::Amount)
            }
            VaultCall::CollectFees => self.collect_fees(ctx).map(CallOutput::Fees),
            VaultCall::Rebalance {
                asset_in,
                asset_out,
                amount_in,
                min_out,
                deadline,
            } => self
                .rebalance(ctx, *asset_in, *asset_out, *amount_in, *min_out, *deadline)
                .map(CallOutput::Amount),
            VaultCall::DeployToProtocol {
                asset,
                protocol,
                amount,
                payload,
            } => self
                .deploy_to_protocol(ctx, *asset, *protocol, *amount, payload)
                .map(CallOutput::ReturnData),
            VaultCall::InitiateCrossChain {
                domain,
                remote_vault,
                asset,
                amount,
            } => self
                .initiate_cross_chain(ctx, *domain, *remote_vault, *asset, *amount)
                .map(CallOutput::Operation),
            VaultCall::ExecuteCrossChain { key } => self
                .execute_cross_chain(ctx, *key)
                .map(|_| CallOutput::Unit),
            VaultCall::TransferShares { to, amount } => self
                .transfer_shares(ctx, *to, *amount)
                .map(|_| CallOutput::Unit),
        }
    }
}
