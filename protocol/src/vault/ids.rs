//! # Identifiers
//!
//! Three 32-byte identifier types share one representation:
//!
//! - [`Address`] — an identity (owner, agent, depositor, protocol, the vault
//!   itself).
//! - [`AssetId`] — an opaque handle for a fungible asset tracked by the
//!   token collaborator.
//! - [`OperationKey`] — the key of a cross-chain operation record.
//!
//! All three serialize as lowercase hex strings, so they work as JSON object
//! keys and read well in logs. The all-zero value is the "null" identifier
//! and is rejected wherever a real identity or asset is required.
//!
//! They are distinct types, though. Passing an asset where a holder was
//! expected is a compile error, not a very confusing balance of zero.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::crypto::hash::domain_separated_hash;
use crate::crypto::keys::PublicKey;

macro_rules! hex_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name([u8; 32]);

        impl $name {
            /// The null identifier.
            pub const ZERO: Self = Self([0u8; 32]);

            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; 32]
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s)?;
                let arr: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(arr))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}..)", stringify!($name), &self.to_hex()[..12])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl std::str::FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_identifier!(
    /// A 32-byte identity handle.
    Address
);

hex_identifier!(
    /// A 32-byte asset handle.
    AssetId
);

hex_identifier!(
    /// Deterministic key of a cross-chain operation record.
    OperationKey
);

impl Address {
    /// Deterministic address from a human-readable label. Used for fixtures,
    /// protocol endpoints and the vault's own identity.
    pub fn derive(label: &str) -> Self {
        Self(domain_separated_hash("tessera 2026 address", label.as_bytes()))
    }

    /// The address controlled by an agent signing key.
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self(domain_separated_hash(
            "tessera 2026 agent key",
            public_key.as_bytes(),
        ))
    }
}

impl AssetId {
    /// The chain's native currency, forwarded as `value` by batch calls.
    pub const NATIVE: Self = Self([0xEE; 32]);

    /// Deterministic asset handle from a ticker symbol.
    pub fn derive(symbol: &str) -> Self {
        Self(domain_separated_hash(
            "tessera 2026 asset",
            symbol.to_uppercase().as_bytes(),
        ))
    }
}
