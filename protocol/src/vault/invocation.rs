//! # Typed Invocations
//!
//! A batch entry or a protocol callback does not carry raw calldata. It
//! carries an [`Invocation`]: a closed set of variants, each with its own
//! validation step that runs before anything executes.
//!
//! ```text
//! Invocation::Transfer  — move a vault-held asset to an address
//! Invocation::Approval  — set the vault's allowance for a spender
//! Invocation::Protocol  — opaque payload to an owner-approved protocol
//! Invocation::Vault     — any ordinary agent entry point (VaultCall)
//! ```
//!
//! Gas is a deterministic per-variant table from [`crate::config`]; the
//! batch executor charges it against each call's ceiling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::batch::BatchCall;
use super::error::VaultError;
use super::ids::{Address, AssetId, OperationKey};
use super::state::VaultState;
use crate::config::{
    APPROVAL_CALL_GAS, BPS_DENOMINATOR, MAX_PROTOCOL_PAYLOAD_BYTES, PAYLOAD_BYTE_GAS,
    PROTOCOL_CALL_GAS, TRANSFER_CALL_GAS, VAULT_HEAVY_CALL_GAS, VAULT_LIGHT_CALL_GAS,
};

/// Serde adapter: `Vec<u8>` as a lowercase hex string.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}

/// One unit of work inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Invocation {
    Transfer {
        asset: AssetId,
        to: Address,
        amount: u128,
    },
    Approval {
        asset: AssetId,
        spender: Address,
        amount: u128,
    },
    Protocol {
        target: Address,
        #[serde(with = "hex_bytes")]
        payload: Vec<u8>,
    },
    Vault(VaultCall),
}

/// The ordinary vault entry points, callable from a batch or a callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultCall {
    Deposit {
        asset: AssetId,
        amount: u128,
    },
    Withdraw {
        shares: u128,
        asset_out: AssetId,
        min_out: u128,
    },
    AddAsset {
        asset: AssetId,
        weight_bps: u32,
    },
    RemoveAsset {
        asset: AssetId,
    },
    SetTargetWeight {
        asset: AssetId,
        weight_bps: u32,
    },
    RefreshBalance {
        asset: AssetId,
    },
    CollectFees,
    Rebalance {
        asset_in: AssetId,
        asset_out: AssetId,
        amount_in: u128,
        min_out: u128,
        deadline: DateTime<Utc>,
    },
    DeployToProtocol {
        asset: AssetId,
        protocol: Address,
        amount: u128,
        #[serde(with = "hex_bytes")]
        payload: Vec<u8>,
    },
    InitiateCrossChain {
        domain: u64,
        remote_vault: Address,
        asset: AssetId,
        amount: u128,
    },
    ExecuteCrossChain {
        key: OperationKey,
    },
    TransferShares {
        to: Address,
        amount: u128,
    },
}

/// Work an external protocol asks the vault to perform while its call is
/// still in flight. Dispatched through the normal entry points, so any
/// guarded operation sees the held lock and refuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reentry {
    Vault(VaultCall),
    Batch { calls: Vec<BatchCall>, gas_limit: u64 },
}

fn invalid(index: usize, reason: impl Into<String>) -> VaultError {
    VaultError::InvalidInvocation {
        index,
        reason: reason.into(),
    }
}

fn check_payload(
    index: usize,
    target: Address,
    payload: &[u8],
    state: &VaultState,
) -> Result<(), VaultError> {
    if payload.len() > MAX_PROTOCOL_PAYLOAD_BYTES {
        return Err(invalid(
            index,
            format!(
                "payload of {} bytes exceeds {MAX_PROTOCOL_PAYLOAD_BYTES}",
                payload.len()
            ),
        ));
    }
    if !state.is_protocol_approved(&target) {
        return Err(VaultError::ProtocolNotApproved(target));
    }
    Ok(())
}

impl Invocation {
    /// Static checks that need no external state. Runs for every entry of a
    /// batch before the first one executes.
    pub fn validate(&self, index: usize, value: u128, state: &VaultState) -> Result<(), VaultError> {
        if value > 0 && !matches!(self, Invocation::Protocol { .. }) {
            return Err(invalid(index, "native value only accompanies protocol calls"));
        }
        match self {
            Invocation::Transfer { asset, to, amount } => {
                if asset.is_zero() || to.is_zero() {
                    return Err(invalid(index, "transfer needs an asset and a recipient"));
                }
                if *amount == 0 {
                    return Err(invalid(index, "transfer amount is zero"));
                }
                Ok(())
            }
            Invocation::Approval { asset, spender, .. } => {
                if asset.is_zero() || spender.is_zero() {
                    return Err(invalid(index, "approval needs an asset and a spender"));
                }
                Ok(())
            }
            Invocation::Protocol { target, payload } => {
                check_payload(index, *target, payload, state)
            }
            Invocation::Vault(call) => call.validate(index, state),
        }
    }

    /// Gas charged for executing this invocation (overhead excluded).
    pub fn gas_cost(&self) -> u64 {
        match self {
            Invocation::Transfer { .. } => TRANSFER_CALL_GAS,
            Invocation::Approval { .. } => APPROVAL_CALL_GAS,
            Invocation::Protocol { payload, .. } => {
                PROTOCOL_CALL_GAS + payload.len() as u64 * PAYLOAD_BYTE_GAS
            }
            Invocation::Vault(call) => call.gas_cost(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Invocation::Transfer { .. } => "transfer",
            Invocation::Approval { .. } => "approval",
            Invocation::Protocol { .. } => "protocol",
            Invocation::Vault(call) => call.name(),
        }
    }
}

impl VaultCall {
    pub fn validate(&self, index: usize, state: &VaultState) -> Result<(), VaultError> {
        match self {
            VaultCall::Deposit { amount: 0, .. } => Err(invalid(index, "deposit amount is zero")),
            VaultCall::Withdraw { shares: 0, .. } => Err(invalid(index, "withdraw of zero shares")),
            VaultCall::AddAsset { weight_bps, .. }
            | VaultCall::SetTargetWeight { weight_bps, .. }
                if *weight_bps > BPS_DENOMINATOR =>
            {
                Err(invalid(index, "weight above 10000 bps"))
            }
            VaultCall::Rebalance {
                asset_in,
                asset_out,
                amount_in,
                ..
            } => {
                if asset_in == asset_out {
                    return Err(invalid(index, "rebalance needs two distinct assets"));
                }
                if *amount_in == 0 {
                    return Err(invalid(index, "rebalance amount is zero"));
                }
                Ok(())
            }
            VaultCall::DeployToProtocol {
                protocol,
                amount,
                payload,
                ..
            } => {
                if *amount == 0 {
                    return Err(invalid(index, "deploy amount is zero"));
                }
                check_payload(index, *protocol, payload, state)
            }
            VaultCall::InitiateCrossChain { amount: 0, .. } => {
                Err(invalid(index, "cross-chain amount is zero"))
            }
            VaultCall::TransferShares { to, amount } => {
                if to.is_zero() || *amount == 0 {
                    return Err(invalid(index, "share transfer needs a recipient and an amount"));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn gas_cost(&self) -> u64 {
        match self {
            VaultCall::Deposit { .. }
            | VaultCall::Withdraw { .. }
            | VaultCall::CollectFees
            | VaultCall::Rebalance { .. }
            | VaultCall::InitiateCrossChain { .. } => VAULT_HEAVY_CALL_GAS,
            VaultCall::DeployToProtocol { payload, .. } => {
                VAULT_HEAVY_CALL_GAS + payload.len() as u64 * PAYLOAD_BYTE_GAS
            }
            _ => VAULT_LIGHT_CALL_GAS,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VaultCall::Deposit { .. } => "deposit",
            VaultCall::Withdraw { .. } => "withdraw",
            VaultCall::AddAsset { .. } => "add_asset",
            VaultCall::RemoveAsset { .. } => "remove_asset",
            VaultCall::SetTargetWeight { .. } => "set_target_weight",
            VaultCall::RefreshBalance { .. } => "refresh_balance",
            VaultCall::CollectFees => "collect_fees",
            VaultCall::Rebalance { .. } => "rebalance",
            VaultCall::DeployToProtocol { .. } => "deploy_to_protocol",
            VaultCall::InitiateCrossChain { .. } => "initiate_cross_chain",
            VaultCall::ExecuteCrossChain { .. } => "execute_cross_chain",
            VaultCall::TransferShares { .. } => "transfer_shares",
        }
    }
}
