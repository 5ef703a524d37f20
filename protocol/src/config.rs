//! # Vault Configuration & Constants
//!
//! Every fixed number in Tessera lives here. The share math, the fee
//! schedule, the rebalance trigger and the batch gas table all read from this
//! module, so changing one of them changes the economics of every vault
//! built from this crate. Treat edits accordingly.
//!
//! Values that an operator may legitimately tune per deployment (minimum
//! deposit, initial fee rates, display name) live in [`VaultConfig`] instead,
//! which is serialized to JSON by `tessera-node init`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Library version string reported by the node.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Fixed-Point Arithmetic
// ---------------------------------------------------------------------------

/// Fixed-point scale for NAV-per-share values. `SCALE` represents 1.0.
pub const SCALE: u128 = 1_000_000_000_000_000_000;

/// Basis-point denominator. 10_000 bps = 100%.
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Seconds in a (non-leap) year, used to pro-rate the management fee.
pub const SECONDS_PER_YEAR: u64 = 31_536_000;

// ---------------------------------------------------------------------------
// Asset Registry
// ---------------------------------------------------------------------------

/// Maximum number of simultaneously active assets.
pub const MAX_ASSETS: usize = 10;

/// Minimum deviation (bps) between current and target weight that makes the
/// vault eligible for a rebalance.
pub const REBALANCE_THRESHOLD_BPS: u32 = 500;

// ---------------------------------------------------------------------------
// Deposits & Fees
// ---------------------------------------------------------------------------

/// Default minimum deposit, in the asset's smallest unit.
pub const DEFAULT_MIN_DEPOSIT: u128 = 100;

/// Default annual management fee: 2%.
pub const DEFAULT_MANAGEMENT_FEE_BPS: u32 = 200;

/// Default performance fee on gains above the high-water mark: 20%.
pub const DEFAULT_PERFORMANCE_FEE_BPS: u32 = 2_000;

/// Upper bound for the annual management fee: 10%.
pub const MAX_MANAGEMENT_FEE_BPS: u32 = 1_000;

/// Upper bound for the performance fee: 50%.
pub const MAX_PERFORMANCE_FEE_BPS: u32 = 5_000;

// ---------------------------------------------------------------------------
// Delegated Batch Execution
// ---------------------------------------------------------------------------

/// Maximum number of calls in a single batch.
pub const MAX_BATCH_SIZE: usize = 10;

/// Maximum opaque payload accepted by a protocol call.
pub const MAX_PROTOCOL_PAYLOAD_BYTES: usize = 4_096;

/// Gas budget used when a caller does not specify one.
pub const DEFAULT_BATCH_GAS_LIMIT: u64 = 3_000_000;

/// Gas that must remain on top of a call's own ceiling before it is attempted.
pub const CALL_OVERHEAD_GAS: u64 = 5_000;

/// Cost of a token transfer from the delegating identity.
pub const TRANSFER_CALL_GAS: u64 = 35_000;

/// Cost of a token approval by the delegating identity.
pub const APPROVAL_CALL_GAS: u64 = 30_000;

/// Base cost of an opaque protocol call.
pub const PROTOCOL_CALL_GAS: u64 = 60_000;

/// Additional protocol-call cost per payload byte.
pub const PAYLOAD_BYTE_GAS: u64 = 16;

/// Cost of a bookkeeping-only vault entry point (weights, fees, ledger).
pub const VAULT_LIGHT_CALL_GAS: u64 = 50_000;

/// Cost of a vault entry point that hands off to a collaborator.
pub const VAULT_HEAVY_CALL_GAS: u64 = 120_000;

/// Domain separator mixed into every signed-batch digest.
pub const SIGNED_BATCH_DOMAIN: &[u8] = b"tessera/signed-batch/v1";

/// Domain separator mixed into every cross-chain operation key.
pub const OPERATION_KEY_DOMAIN: &[u8] = b"tessera/cross-chain-op/v1";

/// Domain separator for the address holding a vault's in-flight transfers.
pub const ESCROW_ADDRESS_DOMAIN: &[u8] = b"tessera/cross-chain-escrow/v1";

// ---------------------------------------------------------------------------
// Node Defaults
// ---------------------------------------------------------------------------

/// Default port for the REST / JSON-RPC API.
pub const DEFAULT_RPC_PORT: u16 = 9841;

/// Default port for the Prometheus metrics endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 9842;

// ---------------------------------------------------------------------------
// VaultConfig
// ---------------------------------------------------------------------------

/// Errors raised when validating a [`VaultConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("vault name must not be empty")]
    EmptyName,

    #[error("minimum deposit must be at least 1")]
    ZeroMinDeposit,

    #[error("management fee {0} bps exceeds the cap")]
    ManagementFeeTooHigh(u32),

    #[error("performance fee {0} bps exceeds the cap")]
    PerformanceFeeTooHigh(u32),
}

/// Per-deployment vault parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Display name, used in logs and the status endpoint.
    pub name: String,
    /// Deposits below this amount are rejected.
    pub min_deposit: u128,
    /// Initial annual management fee in bps.
    pub management_fee_bps: u32,
    /// Initial performance fee in bps.
    pub performance_fee_bps: u32,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            name: "tessera".to_string(),
            min_deposit: DEFAULT_MIN_DEPOSIT,
            management_fee_bps: DEFAULT_MANAGEMENT_FEE_BPS,
            performance_fee_bps: DEFAULT_PERFORMANCE_FEE_BPS,
        }
    }
}

impl VaultConfig {
    /// Checks every field against the protocol caps.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.min_deposit == 0 {
            return Err(ConfigError::ZeroMinDeposit);
        }
        if self.management_fee_bps > MAX_MANAGEMENT_FEE_BPS {
            return Err(ConfigError::ManagementFeeTooHigh(self.management_fee_bps));
        }
        if self.performance_fee_bps > MAX_PERFORMANCE_FEE_BPS {
            return Err(ConfigError::PerformanceFeeTooHigh(self.performance_fee_bps));
        }
        Ok(())
    }
}
