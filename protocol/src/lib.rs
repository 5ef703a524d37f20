// Copyright (c) 2026 Tessera Contributors. MIT License.
// See LICENSE for details.

//! # Tessera — Core Library
//!
//! Tessera is a multi-asset share vault. Holders deposit any supported
//! asset and receive shares priced at net asset value; an authorized agent
//! reallocates the pooled assets through swaps, protocol deployments and
//! cross-chain transfers, optionally bundled into signed, replay-protected
//! batches.
//!
//! ## Architecture
//!
//! - **vault** — The vault engine: registries, pricing, fees, batches.
//! - **crypto** — BLAKE3 hashing and Ed25519 keys for signed batches.
//! - **storage** — Persistence of vault state over sled.
//! - **config** — Protocol constants and per-vault configuration.
//!
//! ## Design Philosophy
//!
//! 1. Every amount is an integer. No floats touch money.
//! 2. A failed call leaves no trace: state and host are rolled back.
//! 3. Collaborators (tokens, router, protocols) sit behind traits, so the
//!    engine runs the same against an in-memory host and a real chain.

pub mod config;
pub mod crypto;
pub mod storage;
pub mod vault;
