//! # Hashing Utilities
//!
//! BLAKE3 is the only hash function in Tessera. It derives identifiers
//! (`AssetId::derive`, `Address::from_public_key`), cross-chain operation
//! keys, and the digest that agents sign for relayed batches.
//!
//! Composite preimages are always built with [`hash_fields`], which
//! length-prefixes every field and keys the hasher with a context string.
//! Two different field lists can therefore never produce the same preimage,
//! even when one field's suffix matches the next field's prefix.

/// Compute the BLAKE3 hash of the input data.
///
/// # Example
///
/// ```
/// use tessera_protocol::crypto::blake3_hash;
///
/// let hash = blake3_hash(b"tessera");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Domain-separated BLAKE3 using the `derive_key` mode.
///
/// The context string selects a distinct internal IV, so hashes computed
/// under different contexts cannot collide by construction.
pub fn domain_separated_hash(context: &str, data: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Hash an ordered list of fields under a context string.
///
/// Each field is fed as `len (u64 LE) || bytes`. The context is a byte
/// string so callers can pass the `*_DOMAIN` constants from
/// [`crate::config`] directly.
pub fn hash_fields(context: &[u8], fields: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(context.len() as u64).to_le_bytes());
    hasher.update(context);
    for field in fields {
        hasher.update(&(field.len() as u64).to_le_bytes());
        hasher.update(field);
    }
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blake3_deterministic() {
        assert_eq!(blake3_hash(b"vault"), blake3_hash(b"vault"));
    }

    #[test]
    fn test_blake3_different_inputs() {
        assert_ne!(blake3_hash(b"USDC"), blake3_hash(b"USDT"));
    }

    #[test]
    fn test_domain_separation() {
        let a = domain_separated_hash("tessera asset", b"X");
        let b = domain_separated_hash("tessera address", b"X");
        assert_ne!(a, b);
        assert_ne!(a, blake3_hash(b"X"));
    }

    #[test]
    fn test_hash_fields_boundaries_matter() {
        // "ab" + "c" and "a" + "bc" concatenate to the same bytes but must
        // hash differently once length-prefixed.
        let left = hash_fields(b"ctx", &[b"ab", b"c"]);
        let right = hash_fields(b"ctx", &[b"a", b"bc"]);
        assert_ne!(left, right);
    }

    #[test]
    fn test_hash_fields_context_matters() {
        let a = hash_fields(b"one", &[b"payload"]);
        let b = hash_fields(b"two", &[b"payload"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_fields_empty_list() {
        // An empty field list still commits to the context.
        assert_eq!(hash_fields(b"ctx", &[]), hash_fields(b"ctx", &[]));
        assert_ne!(hash_fields(b"ctx", &[]), hash_fields(b"ctx", &[b""]));
    }
}
