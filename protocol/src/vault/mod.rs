//! # Vault Module — Multi-Asset Fund Engine
//!
//! The vault pools deposits of several assets, issues shares against them,
//! charges fees through share dilution, and lets its agents move value
//! through batched, replay-protected calls.
//!
//! ## Architecture
//!
//! ```text
//! ids.rs          — Address / AssetId / OperationKey
//! error.rs        — VaultError and its category taxonomy
//! math.rs         — 256-bit mul-div
//! access.rs       — owner, agents, pause flag
//! assets.rs       — asset registry: weights and cached balances
//! shares.rs       — share ledger
//! valuation.rs    — NAV, deposit and withdrawal pricing
//! fees.rs         — management + performance fees, high-water mark
//! rebalance.rs    — allocation drift advice
//! cross_chain.rs  — outbound operation records
//! events.rs       — event journal
//! invocation.rs   — typed calls for batches and callbacks
//! batch.rs        — delegated batch executor, signed batches
//! host.rs         — collaborator traits + in-memory host
//! state.rs        — the VaultState aggregate
//! engine.rs       — Vault<H>: entry points and checkpoints
//! ```
//!
//! ## Design Principles
//!
//! 1. **All amounts are `u128` in smallest units.** Intermediate products
//!    are computed in 256 bits and floored. Rounding always favours the
//!    vault.
//!
//! 2. **One aggregate, no globals.** A vault is a `VaultState` value plus a
//!    host. Any number of independent vaults can live in one process.
//!
//! 3. **Validate, compute, call out, commit.** State changes are applied
//!    only after the external call they depend on has succeeded, and every
//!    entry point runs under a checkpoint that is restored on failure.
//!
//! 4. **Typed invocations.** Batches and protocol callbacks carry
//!    [`Invocation`] values, validated before anything runs.

pub mod access;
pub mod assets;
pub mod batch;
pub mod cross_chain;
pub mod engine;
pub mod error;
pub mod events;
pub mod fees;
pub mod host;
pub mod ids;
pub mod invocation;
pub mod math;
pub mod rebalance;
pub mod shares;
pub mod state;
pub mod valuation;

pub use access::AccessControl;
pub use assets::{AssetRecord, AssetRegistry};
pub use batch::{
    batch_digest, BatchCall, BatchReceipt, CallOutcome, CallOutput, NonceRegistry, SignedBatch,
};
pub use cross_chain::{escrow_address, CrossChainLedger, CrossChainRecord};
pub use engine::{CallContext, Vault};
pub use error::{ErrorCategory, VaultError};
pub use events::{EventJournal, EventKind, VaultEvent};
pub use fees::{FeeBreakdown, FeeState};
pub use host::{
    EndpointBehavior, Host, HostError, InMemoryHost, ProtocolEndpoint, ProtocolGateway,
    ProtocolResponse, SwapRequest, SwapRouter, TokenLedger,
};
pub use ids::{Address, AssetId, OperationKey};
pub use invocation::{Invocation, Reentry, VaultCall};
pub use rebalance::{AssetDeviation, RebalanceReport};
pub use shares::ShareLedger;
pub use state::VaultState;
pub use valuation::WithdrawQuote;
