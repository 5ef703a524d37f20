//! # Cryptographic Primitives
//!
//! Everything security-related in the vault flows through here:
//!
//! - **BLAKE3** for identifiers, operation keys and batch digests.
//! - **Ed25519** for agent signatures on relayed batches.
//!
//! Both are thin, typed wrappers around audited crates. Nothing in this
//! module implements cryptography itself.

pub mod hash;
pub mod keys;
pub mod signatures;

pub use hash::{blake3_hash, domain_separated_hash, hash_fields};
pub use keys::{AgentKeypair, KeyError, PublicKey, Signature};
pub use signatures::{sign, verify, verify_strict, SignatureError};
