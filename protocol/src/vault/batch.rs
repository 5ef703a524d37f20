//! # Delegated Batch Executor
//!
//! An agent (or the vault's own identity) composes up to
//! [`MAX_BATCH_SIZE`] invocations into one call. Each entry carries its own
//! gas ceiling and a `require_success` flag:
//!
//! ```text
//! for each call, in order:
//!   remaining < ceiling + overhead ?  required -> InsufficientGas (abort)
//!                                     optional -> Skipped
//!   cost > ceiling ?                  OutOfGas
//!   run under its own checkpoint
//!   failed ?                          required -> abort whole batch
//!                                     optional -> roll back this call only
//! ```
//!
//! The batch is one transaction. An aborted batch leaves no trace: earlier
//! successes are rolled back and the authorizer's nonce does not move. A
//! completed batch advances the nonce by one.
//!
//! A batch can also be relayed: the agent signs a [`SignedBatch`] and anyone
//! submits it. The signature binds the vault address, the signer, the nonce,
//! a deadline, the gas limit and every call, so a relayer can neither alter
//! nor replay it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::engine::{CallContext, Vault};
use super::error::{ErrorCategory, VaultError};
use super::events::EventKind;
use super::fees::FeeBreakdown;
use super::host::{Host, TokenLedger};
use super::ids::{Address, OperationKey};
use super::invocation::{hex_bytes, Invocation};
use crate::config::{CALL_OVERHEAD_GAS, MAX_BATCH_SIZE, SIGNED_BATCH_DOMAIN};
use crate::crypto;
use crate::crypto::hash::hash_fields;
use crate::crypto::keys::{AgentKeypair, PublicKey, Signature};

// ---------------------------------------------------------------------------
// Descriptors and receipts
// ---------------------------------------------------------------------------

/// One entry of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCall {
    pub invocation: Invocation,
    /// Native value forwarded with a protocol call.
    #[serde(default)]
    pub value: u128,
    /// Gas ceiling for this entry.
    pub gas_limit: u64,
    pub require_success: bool,
}

impl BatchCall {
    pub fn required(invocation: Invocation, gas_limit: u64) -> Self {
        Self {
            invocation,
            value: 0,
            gas_limit,
            require_success: true,
        }
    }

    pub fn optional(invocation: Invocation, gas_limit: u64) -> Self {
        Self {
            require_success: false,
            ..Self::required(invocation, gas_limit)
        }
    }

    pub fn with_value(mut self, value: u128) -> Self {
        self.value = value;
        self
    }
}

/// What a successful entry produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutput {
    Unit,
    Shares(u128),
    Amount(u128),
    Index(usize),
    Fees(FeeBreakdown),
    Operation(OperationKey),
    ReturnData(#[serde(with = "hex_bytes")] Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Succeeded {
        gas_used: u64,
        output: CallOutput,
    },
    Failed {
        gas_used: u64,
        category: ErrorCategory,
        reason: String,
    },
    Skipped {
        reason: String,
    },
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceipt {
    /// Nonce consumed by this batch.
    pub nonce: u64,
    pub call_count: usize,
    pub success_count: usize,
    pub gas_used: u64,
    pub outcomes: Vec<CallOutcome>,
}

// ---------------------------------------------------------------------------
// Nonces
// ---------------------------------------------------------------------------

/// Per-authorizer replay counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceRegistry {
    nonces: BTreeMap<Address, u64>,
}

impl NonceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(nonces: BTreeMap<Address, u64>) -> Self {
        Self { nonces }
    }

    /// The nonce the next batch from `who` must carry.
    pub fn current(&self, who: &Address) -> u64 {
        self.nonces.get(who).copied().unwrap_or(0)
    }

    pub fn advance(&mut self, who: Address) -> Result<u64, VaultError> {
        let next = self
            .current(&who)
            .checked_add(1)
            .ok_or(VaultError::ArithmeticOverflow)?;
        self.nonces.insert(who, next);
        Ok(next)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &u64)> {
        self.nonces.iter()
    }
}

// ---------------------------------------------------------------------------
// Signed batches
// ---------------------------------------------------------------------------

/// A batch authorized off-line by an agent key and submitted by a relayer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBatch {
    pub calls: Vec<BatchCall>,
    pub nonce: u64,
    pub deadline: DateTime<Utc>,
    pub gas_limit: u64,
    pub signer: PublicKey,
    pub signature: Signature,
}

/// The 32-byte message an agent signs for a relayed batch.
pub fn batch_digest(
    vault: &Address,
    signer: &Address,
    nonce: u64,
    deadline: DateTime<Utc>,
    gas_limit: u64,
    calls: &[BatchCall],
) -> Result<[u8; 32], VaultError> {
    let encoded = bincode::serialize(calls).map_err(|e| VaultError::Encoding(e.to_string()))?;
    Ok(hash_fields(
        SIGNED_BATCH_DOMAIN,
        &[
            vault.as_bytes(),
            signer.as_bytes(),
            &nonce.to_be_bytes(),
            &deadline.timestamp().to_be_bytes(),
            &deadline.timestamp_subsec_nanos().to_be_bytes(),
            &gas_limit.to_be_bytes(),
            &encoded,
        ],
    ))
}

impl SignedBatch {
    pub fn sign(
        keypair: &AgentKeypair,
        vault: Address,
        calls: Vec<BatchCall>,
        nonce: u64,
        deadline: DateTime<Utc>,
        gas_limit: u64,
    ) -> Result<Self, VaultError> {
        let signer = keypair.public_key();
        let digest = batch_digest(
            &vault,
            &Address::from_public_key(&signer),
            nonce,
            deadline,
            gas_limit,
            &calls,
        )?;
        Ok(Self {
            calls,
            nonce,
            deadline,
            gas_limit,
            signer,
            signature: crypto::sign(keypair, &digest),
        })
    }

    pub fn signer_address(&self) -> Address {
        Address::from_public_key(&self.signer)
    }

    /// Check the signature against `vault` and return the signer's address.
    pub fn verify(&self, vault: &Address) -> Result<Address, VaultError> {
        let signer = self.signer_address();
        let digest = batch_digest(
            vault,
            &signer,
            self.nonce,
            self.deadline,
            self.gas_limit,
            &self.calls,
        )?;
        crypto::verify_strict(&self.signer, &digest, &self.signature)
            .map_err(|_| VaultError::InvalidSignature)?;
        Ok(signer)
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

impl<H: Host> Vault<H> {
    /// Run a batch authorized by the caller.
    pub fn execute_batch(
        &mut self,
        ctx: &CallContext,
        calls: &[BatchCall],
        gas_limit: u64,
    ) -> Result<BatchReceipt, VaultError> {
        self.transact("execute_batch", |v| {
            if v.state.locks.batch {
                return Err(VaultError::ReentrantCall);
            }
            v.state
                .access
                .ensure_agent_or_self(&ctx.caller, &v.state.address)?;
            v.run_batch(ctx.caller, ctx.now, calls, gas_limit)
        })
    }

    /// Run a batch signed by an agent key; `ctx.caller` is only the relayer.
    pub fn execute_signed_batch(
        &mut self,
        ctx: &CallContext,
        batch: &SignedBatch,
    ) -> Result<BatchReceipt, VaultError> {
        self.transact("execute_signed_batch", |v| {
            if v.state.locks.batch {
                return Err(VaultError::ReentrantCall);
            }
            if batch.deadline < ctx.now {
                return Err(VaultError::DeadlineExpired {
                    deadline: batch.deadline,
                    now: ctx.now,
                });
            }
            let signer = batch.verify(&v.state.address)?;
            v.state.access.ensure_agent(&signer)?;
            let expected = v.state.nonces.current(&signer);
            if batch.nonce != expected {
                return Err(VaultError::NonceMismatch {
                    expected,
                    got: batch.nonce,
                });
            }
            debug!(relayer = %ctx.caller, signer = %signer, nonce = batch.nonce, "relayed batch accepted");
            v.run_batch(signer, ctx.now, &batch.calls, batch.gas_limit)
        })
    }

    fn run_batch(
        &mut self,
        authorizer: Address,
        now: DateTime<Utc>,
        calls: &[BatchCall],
        gas_limit: u64,
    ) -> Result<BatchReceipt, VaultError> {
        self.state.access.ensure_not_paused()?;
        if calls.is_empty() {
            return Err(VaultError::EmptyBatch);
        }
        if calls.len() > MAX_BATCH_SIZE {
            return Err(VaultError::ExceedsMaxBatch {
                size: calls.len(),
                max: MAX_BATCH_SIZE,
            });
        }
        for (index, call) in calls.iter().enumerate() {
            call.invocation.validate(index, call.value, &self.state)?;
        }

        self.state.locks.batch = true;
        let result = self.run_calls(authorizer, now, calls, gas_limit);
        self.state.locks.batch = false;
        let (outcomes, gas_used) = result?;

        let nonce = self.state.nonces.current(&authorizer);
        self.state.nonces.advance(authorizer)?;
        let success_count = outcomes.iter().filter(|o| o.is_success()).count();
        self.emit(
            now,
            EventKind::BatchExecuted {
                authorizer,
                nonce,
                call_count: calls.len(),
                success_count,
                gas_used,
            },
        );
        info!(
            authorizer = %authorizer,
            nonce,
            calls = calls.len(),
            succeeded = success_count,
            gas_used,
            "batch executed"
        );
        Ok(BatchReceipt {
            nonce,
            call_count: calls.len(),
            success_count,
            gas_used,
            outcomes,
        })
    }

    fn run_calls(
        &mut self,
        authorizer: Address,
        now: DateTime<Utc>,
        calls: &[BatchCall],
        gas_limit: u64,
    ) -> Result<(Vec<CallOutcome>, u64), VaultError> {
        let ctx = CallContext::new(authorizer, now);
        let mut outcomes = Vec::with_capacity(calls.len());
        let mut gas_used: u64 = 0;

        for (index, call) in calls.iter().enumerate() {
            let remaining = gas_limit.saturating_sub(gas_used);
            let required = call.gas_limit.saturating_add(CALL_OVERHEAD_GAS);
            if remaining < required {
                if call.require_success {
                    return Err(VaultError::CallFailed {
                        index,
                        source: Box::new(VaultError::InsufficientGas {
                            required,
                            remaining,
                        }),
                    });
                }
                debug!(index, required, remaining, "optional call skipped");
                outcomes.push(CallOutcome::Skipped {
                    reason: format!("needs {required} gas, {remaining} remaining"),
                });
                continue;
            }

            let cost = call.invocation.gas_cost();
            let charged = cost.min(call.gas_limit) + CALL_OVERHEAD_GAS;
            gas_used = gas_used.saturating_add(charged);

            let result = if cost > call.gas_limit {
                Err(VaultError::OutOfGas {
                    cost,
                    limit: call.gas_limit,
                })
            } else {
                self.transact(call.invocation.name(), |v| {
                    v.invoke(&ctx, &call.invocation, call.value)
                })
            };

            match result {
                Ok(output) => outcomes.push(CallOutcome::Succeeded {
                    gas_used: charged,
                    output,
                }),
                Err(err) if call.require_success => {
                    warn!(index, call = call.invocation.name(), error = %err, "required call failed, aborting batch");
                    return Err(VaultError::CallFailed {
                        index,
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    debug!(index, call = call.invocation.name(), error = %err, "optional call failed");
                    outcomes.push(CallOutcome::Failed {
                        gas_used: charged,
                        category: err.category(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        Ok((outcomes, gas_used))
    }

    fn invoke(
        &mut self,
        ctx: &CallContext,
        invocation: &Invocation,
        value: u128,
    ) -> Result<CallOutput, VaultError> {
        let vault = self.state.address;
        match invocation {
            Invocation::Transfer { asset, to, amount } => {
                self.host.transfer(*asset, vault, *to, *amount)?;
                if self.state.assets.is_active(asset) {
                    let live = self.host.balance_of(*asset, vault);
                    self.state.assets.set_cached_balance(asset, live)?;
                }
                Ok(CallOutput::Unit)
            }
            Invocation::Approval {
                asset,
                spender,
                amount,
            } => {
                self.host.approve(*asset, vault, *spender, *amount)?;
                Ok(CallOutput::Unit)
            }
            Invocation::Protocol { target, payload } => self
                .with_vault_lock(|v| v.call_protocol(*target, payload, value, ctx.now))
                .map(CallOutput::ReturnData),
            Invocation::Vault(call) => self.call(ctx, call),
        }
    }
}
