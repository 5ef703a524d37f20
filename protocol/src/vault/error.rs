//! # Vault Errors
//!
//! Every failure of a vault entry point is a [`VaultError`]. Each variant
//! belongs to one [`ErrorCategory`]; the node maps categories to HTTP status
//! codes and JSON-RPC error codes.
//!
//! A failed top-level call leaves no trace in the vault: the engine restores
//! its checkpoint before returning the error. The single exception is an
//! optional batch entry, whose failure is recorded in the batch receipt
//! instead of being propagated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::host::HostError;
use super::ids::{Address, AssetId, OperationKey};
use crate::config::ConfigError;

/// Coarse classification of a [`VaultError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Caller is not owner / agent / the vault's delegated identity.
    Authorization,
    /// Malformed or out-of-range input.
    Validation,
    /// The call is well-formed but the numbers do not work out.
    Economic,
    /// A collaborator (token, router, protocol) reported failure.
    External,
    /// Replay, reentry, or lifecycle violations.
    State,
}

/// Errors returned by vault entry points.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    // -- authorization ------------------------------------------------------
    #[error("caller {0} is not the vault owner")]
    NotOwner(Address),

    #[error("caller {0} is not an authorized agent")]
    NotAgent(Address),

    #[error("caller {0} is neither an agent nor the vault's delegated identity")]
    NotAuthorized(Address),

    #[error("signature does not verify for the claimed signer")]
    InvalidSignature,

    // -- validation ---------------------------------------------------------
    #[error("invalid asset {0}: null or already supported")]
    InvalidAsset(AssetId),

    #[error("invalid weight: {0}")]
    InvalidWeight(&'static str),

    #[error("asset registry is full ({max} active assets)")]
    TooManyAssets { max: usize },

    #[error("asset {0} is not supported")]
    AssetNotSupported(AssetId),

    #[error("asset {asset} still holds {balance} units and cannot be delisted")]
    AssetNotEmpty { asset: AssetId, balance: u128 },

    #[error("invalid amount: {0}")]
    InvalidAmount(&'static str),

    #[error("deposit of {amount} is below the minimum of {minimum}")]
    BelowMinimumDeposit { amount: u128, minimum: u128 },

    #[error("null address is not allowed here")]
    InvalidAddress,

    #[error("address {0} is already an authorized agent")]
    AlreadyAuthorized(Address),

    #[error("address {0} is not in the authorized agent set")]
    NotAuthorizedAgent(Address),

    #[error("fee rate {rate_bps} bps exceeds the cap of {cap_bps} bps")]
    InvalidFeeRate { rate_bps: u32, cap_bps: u32 },

    #[error("batch of {size} calls exceeds the maximum of {max}")]
    ExceedsMaxBatch { size: usize, max: usize },

    #[error("batch contains no calls")]
    EmptyBatch,

    #[error("call {index} failed validation: {reason}")]
    InvalidInvocation { index: usize, reason: String },

    #[error("protocol {0} is not approved")]
    ProtocolNotApproved(Address),

    #[error("domain {0} is not registered")]
    UnknownDomain(u64),

    #[error("remote vault does not match the one registered for domain {0}")]
    DomainVaultMismatch(u64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("failed to encode batch for signing: {0}")]
    Encoding(String),

    #[error("arithmetic overflow")]
    ArithmeticOverflow,

    #[error("division by zero")]
    DivisionByZero,

    // -- economic -----------------------------------------------------------
    #[error("slippage exceeded: would receive {amount_out}, minimum is {min_out}")]
    SlippageExceeded { amount_out: u128, min_out: u128 },

    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: u128, requested: u128 },

    #[error("insufficient shares: holder has {available}, requested {requested}")]
    InsufficientShares { available: u128, requested: u128 },

    #[error("rebalance threshold not met")]
    RebalanceThresholdNotMet,

    #[error("deposit would mint zero shares")]
    ZeroShares,

    #[error("vault has outstanding shares but zero total value")]
    ZeroValue,

    #[error("fees of {fees} would consume the vault's total value of {total_value}")]
    FeeExceedsValue { fees: u128, total_value: u128 },

    #[error("deadline {deadline} has passed (now {now})")]
    DeadlineExpired {
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    // -- external -----------------------------------------------------------
    #[error("external call failed: {0}")]
    External(#[from] HostError),

    // -- replay / state -----------------------------------------------------
    #[error("operation {0} has already been executed")]
    OperationAlreadyExecuted(OperationKey),

    #[error("operation {0} not found")]
    OperationNotFound(OperationKey),

    #[error("reentrant call rejected")]
    ReentrantCall,

    #[error("vault is paused")]
    Paused,

    #[error("vault is not paused")]
    NotPaused,

    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("insufficient gas: call needs {required}, {remaining} remaining")]
    InsufficientGas { required: u64, remaining: u64 },

    #[error("out of gas: call costs {cost}, ceiling is {limit}")]
    OutOfGas { cost: u64, limit: u64 },

    #[error("required call {index} failed: {source}")]
    CallFailed {
        index: usize,
        source: Box<VaultError>,
    },
}

impl VaultError {
    /// The taxonomy bucket this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        use VaultError::*;
        match self {
            NotOwner(_) | NotAgent(_) | NotAuthorized(_) | InvalidSignature => {
                ErrorCategory::Authorization
            }
            InvalidAsset(_)
            | InvalidWeight(_)
            | TooManyAssets { .. }
            | AssetNotSupported(_)
            | AssetNotEmpty { .. }
            | InvalidAmount(_)
            | BelowMinimumDeposit { .. }
            | InvalidAddress
            | AlreadyAuthorized(_)
            | NotAuthorizedAgent(_)
            | InvalidFeeRate { .. }
            | ExceedsMaxBatch { .. }
            | EmptyBatch
            | InvalidInvocation { .. }
            | ProtocolNotApproved(_)
            | UnknownDomain(_)
            | DomainVaultMismatch(_)
            | InvalidConfig(_)
            | Encoding(_)
            | ArithmeticOverflow
            | DivisionByZero => ErrorCategory::Validation,
            SlippageExceeded { .. }
            | InsufficientBalance { .. }
            | InsufficientShares { .. }
            | RebalanceThresholdNotMet
            | ZeroShares
            | ZeroValue
            | FeeExceedsValue { .. }
            | DeadlineExpired { .. } => ErrorCategory::Economic,
            External(_) => ErrorCategory::External,
            OperationAlreadyExecuted(_)
            | OperationNotFound(_)
            | ReentrantCall
            | Paused
            | NotPaused
            | NonceMismatch { .. }
            | InsufficientGas { .. }
            | OutOfGas { .. } => ErrorCategory::State,
            CallFailed { source, .. } => source.category(),
        }
    }
}
