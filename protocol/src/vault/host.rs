//! # External Collaborators
//!
//! The vault never moves value itself. Token movements, swaps and protocol
//! calls are delegated to a host that implements three traits:
//!
//! - [`TokenLedger`]: balances, allowances, transfers.
//! - [`SwapRouter`]: quotes and swaps with a minimum output and a deadline.
//! - [`ProtocolGateway`]: opaque calls into external protocols, which may
//!   answer with callbacks into the vault.
//!
//! [`Host`] bundles them and adds a checkpoint/restore pair, taken at every
//! entry point alongside the vault state. The ledgers are copied; anything
//! append-only is only measured.
//!
//! [`InMemoryHost`] is the simulation shipped with the crate. Tests and the
//! node both run against it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::{Address, AssetId};
use super::invocation::{hex_bytes, Reentry};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures reported by a collaborator. Always aborts the calling entry
/// point.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("insufficient funds: {holder} holds {available} of {asset}, needs {requested}")]
    InsufficientFunds {
        asset: AssetId,
        holder: Address,
        available: u128,
        requested: u128,
    },

    #[error("insufficient allowance: {spender} may move {available} of {asset}, needs {requested}")]
    InsufficientAllowance {
        asset: AssetId,
        spender: Address,
        available: u128,
        requested: u128,
    },

    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("no route from {asset_in} to {asset_out}")]
    NoRoute { asset_in: AssetId, asset_out: AssetId },

    #[error("router output {amount_out} below minimum {min_out}")]
    RouterSlippage { amount_out: u128, min_out: u128 },

    #[error("swap deadline passed")]
    SwapDeadlineExpired,

    #[error("protocol {0} is not reachable")]
    UnknownProtocol(Address),

    #[error("protocol {target} rejected the call: {reason}")]
    ProtocolRejected { target: Address, reason: String },

    #[error("host arithmetic overflow")]
    Overflow,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// The token-transfer primitive.
pub trait TokenLedger {
    fn balance_of(&self, asset: AssetId, holder: Address) -> u128;

    fn allowance(&self, asset: AssetId, owner: Address, spender: Address) -> u128;

    /// Move `amount` from `from` to `to` on behalf of `spender`. Consumes
    /// allowance unless `spender == from`.
    fn transfer_from(
        &mut self,
        asset: AssetId,
        spender: Address,
        from: Address,
        to: Address,
        amount: u128,
    ) -> Result<(), HostError>;

    fn transfer(
        &mut self,
        asset: AssetId,
        from: Address,
        to: Address,
        amount: u128,
    ) -> Result<(), HostError>;

    fn approve(
        &mut self,
        asset: AssetId,
        owner: Address,
        spender: Address,
        amount: u128,
    ) -> Result<(), HostError>;
}

/// A single swap request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapRequest {
    pub trader: Address,
    pub asset_in: AssetId,
    pub asset_out: AssetId,
    pub amount_in: u128,
    pub min_out: u128,
    pub deadline: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

/// The swap router.
pub trait SwapRouter {
    fn quote(&self, asset_in: AssetId, asset_out: AssetId, amount_in: u128)
        -> Result<u128, HostError>;

    /// Execute a swap and return the output amount.
    fn swap(&mut self, request: &SwapRequest) -> Result<u128, HostError>;
}

/// What a protocol answered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolResponse {
    pub return_data: Vec<u8>,
    /// Calls the protocol makes back into the vault before returning.
    pub callbacks: Vec<Reentry>,
}

/// Opaque calls into external protocols.
pub trait ProtocolGateway {
    fn call(
        &mut self,
        caller: Address,
        target: Address,
        payload: &[u8],
        value: u128,
    ) -> Result<ProtocolResponse, HostError>;
}

/// Everything the vault engine needs from the outside world.
///
/// The engine takes a [`Host::checkpoint`] before every entry point and
/// batch entry and hands it back to [`Host::restore`] when the call reverts.
/// Append-only history (call logs and the like) belongs outside the
/// checkpoint; restore trims it back to the recorded length instead.
pub trait Host: TokenLedger + SwapRouter + ProtocolGateway + Clone {
    type Checkpoint;

    fn checkpoint(&self) -> Self::Checkpoint;

    fn restore(&mut self, checkpoint: Self::Checkpoint);
}

// ---------------------------------------------------------------------------
// InMemoryHost
// ---------------------------------------------------------------------------

/// Fixed exchange rate `amount_out = amount_in * numerator / denominator`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRate {
    pub asset_in: AssetId,
    pub asset_out: AssetId,
    pub numerator: u128,
    pub denominator: u128,
}

/// How a scripted endpoint answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointBehavior {
    Accept,
    Reject(String),
}

/// A scripted external protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolEndpoint {
    pub behavior: EndpointBehavior,
    #[serde(with = "hex_bytes")]
    pub return_data: Vec<u8>,
    pub callbacks: Vec<Reentry>,
}

impl ProtocolEndpoint {
    pub fn accepting() -> Self {
        Self {
            behavior: EndpointBehavior::Accept,
            return_data: Vec::new(),
            callbacks: Vec::new(),
        }
    }

    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self {
            behavior: EndpointBehavior::Reject(reason.into()),
            ..Self::accepting()
        }
    }

    pub fn with_callback(mut self, callback: Reentry) -> Self {
        self.callbacks.push(callback);
        self
    }
}

/// One entry of the protocol call log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolCallRecord {
    pub caller: Address,
    pub target: Address,
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    pub value: u128,
}

/// Revert point for [`InMemoryHost`]: the ledgers by value, the call log by
/// length.
#[derive(Debug, Clone)]
pub struct InMemoryCheckpoint {
    balances: BTreeMap<AssetId, BTreeMap<Address, u128>>,
    allowances: BTreeMap<AssetId, BTreeMap<Address, BTreeMap<Address, u128>>>,
    call_log_len: usize,
}

/// A self-contained simulation of every collaborator.
///
/// The router holds its own reserves under [`InMemoryHost::router_address`];
/// a swap fails once those run out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InMemoryHost {
    balances: BTreeMap<AssetId, BTreeMap<Address, u128>>,
    allowances: BTreeMap<AssetId, BTreeMap<Address, BTreeMap<Address, u128>>>,
    rates: Vec<RouteRate>,
    endpoints: BTreeMap<Address, ProtocolEndpoint>,
    call_log: Vec<ProtocolCallRecord>,
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity that holds the router's reserves.
    pub fn router_address() -> Address {
        Address::derive("tessera.router")
    }

    /// Create `amount` units of `asset` out of thin air for `holder`.
    pub fn mint(&mut self, asset: AssetId, holder: Address, amount: u128) -> Result<(), HostError> {
        let balance = self
            .balances
            .entry(asset)
            .or_default()
            .entry(holder)
            .or_default();
        *balance = balance.checked_add(amount).ok_or(HostError::Overflow)?;
        Ok(())
    }

    /// Install (or replace) a fixed rate for `asset_in -> asset_out`.
    pub fn set_rate(&mut self, asset_in: AssetId, asset_out: AssetId, numerator: u128, denominator: u128) {
        self.rates
            .retain(|r| !(r.asset_in == asset_in && r.asset_out == asset_out));
        self.rates.push(RouteRate {
            asset_in,
            asset_out,
            numerator,
            denominator,
        });
    }

    pub fn register_endpoint(&mut self, target: Address, endpoint: ProtocolEndpoint) {
        self.endpoints.insert(target, endpoint);
    }

    pub fn call_log(&self) -> &[ProtocolCallRecord] {
        &self.call_log
    }

    /// All non-zero balances of one asset.
    pub fn holders(&self, asset: AssetId) -> impl Iterator<Item = (&Address, &u128)> {
        self.balances
            .get(&asset)
            .into_iter()
            .flat_map(|m| m.iter())
            .filter(|(_, b)| **b > 0)
    }

    fn rate(&self, asset_in: AssetId, asset_out: AssetId) -> Result<&RouteRate, HostError> {
        self.rates
            .iter()
            .find(|r| r.asset_in == asset_in && r.asset_out == asset_out && r.denominator > 0)
            .ok_or(HostError::NoRoute {
                asset_in,
                asset_out,
            })
    }

    fn move_balance(
        &mut self,
        asset: AssetId,
        from: Address,
        to: Address,
        amount: u128,
    ) -> Result<(), HostError> {
        let available = self.balance_of(asset, from);
        if available < amount {
            return Err(HostError::InsufficientFunds {
                asset,
                holder: from,
                available,
                requested: amount,
            });
        }
        if from == to || amount == 0 {
            return Ok(());
        }
        let received = self
            .balance_of(asset, to)
            .checked_add(amount)
            .ok_or(HostError::Overflow)?;
        let ledger = self.balances.entry(asset).or_default();
        ledger.insert(from, available - amount);
        ledger.insert(to, received);
        Ok(())
    }
}

impl TokenLedger for InMemoryHost {
    fn balance_of(&self, asset: AssetId, holder: Address) -> u128 {
        self.balances
            .get(&asset)
            .and_then(|m| m.get(&holder))
            .copied()
            .unwrap_or(0)
    }

    fn allowance(&self, asset: AssetId, owner: Address, spender: Address) -> u128 {
        self.allowances
            .get(&asset)
            .and_then(|m| m.get(&owner))
            .and_then(|m| m.get(&spender))
            .copied()
            .unwrap_or(0)
    }

    fn transfer_from(
        &mut self,
        asset: AssetId,
        spender: Address,
        from: Address,
        to: Address,
        amount: u128,
    ) -> Result<(), HostError> {
        if spender != from {
            let available = self.allowance(asset, from, spender);
            if available < amount {
                return Err(HostError::InsufficientAllowance {
                    asset,
                    spender,
                    available,
                    requested: amount,
                });
            }
            self.move_balance(asset, from, to, amount)?;
            self.allowances
                .entry(asset)
                .or_default()
                .entry(from)
                .or_default()
                .insert(spender, available - amount);
            return Ok(());
        }
        self.move_balance(asset, from, to, amount)
    }

    fn transfer(
        &mut self,
        asset: AssetId,
        from: Address,
        to: Address,
        amount: u128,
    ) -> Result<(), HostError> {
        if to.is_zero() {
            return Err(HostError::TransferFailed("recipient is the null address".into()));
        }
        self.move_balance(asset, from, to, amount)
    }

    fn approve(
        &mut self,
        asset: AssetId,
        owner: Address,
        spender: Address,
        amount: u128,
    ) -> Result<(), HostError> {
        self.allowances
            .entry(asset)
            .or_default()
            .entry(owner)
            .or_default()
            .insert(spender, amount);
        Ok(())
    }
}

impl SwapRouter for InMemoryHost {
    fn quote(
        &self,
        asset_in: AssetId,
        asset_out: AssetId,
        amount_in: u128,
    ) -> Result<u128, HostError> {
        let rate = self.rate(asset_in, asset_out)?;
        amount_in
            .checked_mul(rate.numerator)
            .map(|p| p / rate.denominator)
            .ok_or(HostError::Overflow)
    }

    fn swap(&mut self, request: &SwapRequest) -> Result<u128, HostError> {
        if request.now > request.deadline {
            return Err(HostError::SwapDeadlineExpired);
        }
        let amount_out = self.quote(request.asset_in, request.asset_out, request.amount_in)?;
        if amount_out < request.min_out {
            return Err(HostError::RouterSlippage {
                amount_out,
                min_out: request.min_out,
            });
        }
        let router = Self::router_address();
        self.move_balance(request.asset_in, request.trader, router, request.amount_in)?;
        self.move_balance(request.asset_out, router, request.trader, amount_out)?;
        Ok(amount_out)
    }
}

impl Host for InMemoryHost {
    type Checkpoint = InMemoryCheckpoint;

    fn checkpoint(&self) -> InMemoryCheckpoint {
        InMemoryCheckpoint {
            balances: self.balances.clone(),
            allowances: self.allowances.clone(),
            call_log_len: self.call_log.len(),
        }
    }

    fn restore(&mut self, checkpoint: InMemoryCheckpoint) {
        self.balances = checkpoint.balances;
        self.allowances = checkpoint.allowances;
        self.call_log.truncate(checkpoint.call_log_len);
    }
}

impl ProtocolGateway for InMemoryHost {
    fn call(
        &mut self,
        caller: Address,
        target: Address,
        payload: &[u8],
        value: u128,
    ) -> Result<ProtocolResponse, HostError> {
        let endpoint = self
            .endpoints
            .get(&target)
            .cloned()
            .ok_or(HostError::UnknownProtocol(target))?;
        if let EndpointBehavior::Reject(reason) = endpoint.behavior {
            return Err(HostError::ProtocolRejected { target, reason });
        }
        if value > 0 {
            self.move_balance(AssetId::NATIVE, caller, target, value)?;
        }
        self.call_log.push(ProtocolCallRecord {
            caller,
            target,
            payload: payload.to_vec(),
            value,
        });
        Ok(ProtocolResponse {
            return_data: endpoint.return_data,
            callbacks: endpoint.callbacks,
        })
    }
}
