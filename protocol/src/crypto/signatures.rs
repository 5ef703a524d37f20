//! # Digital Signatures
//!
//! Ed25519 sign/verify as used by signed batches.

use thiserror::Error;

use super::keys::{AgentKeypair, PublicKey, Signature};

/// Errors during signature checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature verification failed")]
    VerificationFailed,
}

/// Sign `message` with the agent's keypair.
///
/// # Example
///
/// ```
/// use tessera_protocol::crypto::{sign, verify, AgentKeypair};
///
/// let keypair = AgentKeypair::generate();
/// let signature = sign(&keypair, b"execute batch 7");
/// assert!(verify(&keypair.public_key(), b"execute batch 7", &signature));
/// ```
pub fn sign(keypair: &AgentKeypair, message: &[u8]) -> Signature {
    keypair.sign(message)
}

/// Returns `true` if `signature` is a valid signature over `message`.
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    public_key.verify(message, signature)
}

/// `Result` flavour of [`verify`] for `?`-style call sites.
pub fn verify_strict(
    public_key: &PublicKey,
    message: &[u8],
    signature: &Signature,
) -> Result<(), SignatureError> {
    if verify(public_key, message, signature) {
        Ok(())
    } else {
        Err(SignatureError::VerificationFailed)
    }
}
