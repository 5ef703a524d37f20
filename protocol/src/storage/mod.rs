//! # Storage Module
//!
//! Durable vault state on sled. A running node keeps its vault in memory
//! and writes it through a [`VaultStore`] after every accepted mutation, so
//! a restart resumes from the last committed call.
//!
//! ## Design Decisions
//!
//! 1. **One tree per registry.** Assets, shares, cross-chain operations,
//!    nonces and events each get their own sled tree; scalar state lives
//!    in `meta`.
//!
//! 2. **Bincode on disk, JSON at the edges.** Compact and deterministic
//!    for storage; the node's HTTP API speaks JSON.
//!
//! 3. **Host snapshot included.** The in-memory collaborator ledger is
//!    saved beside the vault so balances and cached balances stay in step.

pub mod db;

pub use db::{StoreError, StoreResult, VaultStore};
