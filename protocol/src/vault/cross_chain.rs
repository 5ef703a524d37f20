//! # Cross-Chain Operation Ledger
//!
//! Bookkeeping for value the vault has committed to move to another
//! settlement domain. Nothing here talks to a bridge. On initiation the
//! engine moves the amount out of the vault into its [`escrow_address`],
//! debits the cached balance and writes a record here; execution flips the
//! record's flag once the transport reports delivery.
//!
//! The escrow hop matters. Cached balances get resynced from the ledger on
//! refresh, rebalance and batch transfers, and a committed amount still
//! sitting at the vault address would be counted again the moment that
//! happens. Once it sits in escrow the live balance already excludes it.
//!
//! Each record is keyed by a BLAKE3 hash over every input plus the
//! initiator's monotonic counter, so two identical requests by the same
//! initiator never share a key.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::VaultError;
use super::ids::{Address, AssetId, OperationKey};
use crate::config::{ESCROW_ADDRESS_DOMAIN, OPERATION_KEY_DOMAIN};
use crate::crypto::hash::hash_fields;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainRecord {
    pub target_domain: u64,
    pub target_vault: Address,
    pub asset_id: AssetId,
    pub amount: u128,
    pub created_at: DateTime<Utc>,
    pub executed: bool,
    pub initiator: Address,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainLedger {
    domains: BTreeMap<u64, Address>,
    operations: BTreeMap<OperationKey, CrossChainRecord>,
    counters: BTreeMap<Address, u64>,
}

/// Deterministic key for an operation.
pub fn operation_key(
    domain: u64,
    remote_vault: &Address,
    asset: &AssetId,
    amount: u128,
    initiator: &Address,
    counter: u64,
) -> OperationKey {
    OperationKey::from_bytes(hash_fields(
        OPERATION_KEY_DOMAIN,
        &[
            &domain.to_be_bytes(),
            remote_vault.as_bytes(),
            asset.as_bytes(),
            &amount.to_be_bytes(),
            initiator.as_bytes(),
            &counter.to_be_bytes(),
        ],
    ))
}

/// Where `vault` parks value committed to outbound operations.
pub fn escrow_address(vault: &Address) -> Address {
    Address::from_bytes(hash_fields(ESCROW_ADDRESS_DOMAIN, &[vault.as_bytes()]))
}

impl CrossChainLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(
        domains: BTreeMap<u64, Address>,
        operations: BTreeMap<OperationKey, CrossChainRecord>,
        counters: BTreeMap<Address, u64>,
    ) -> Self {
        Self {
            domains,
            operations,
            counters,
        }
    }

    /// Register or re-point a domain at its remote vault.
    pub fn register_domain(&mut self, domain: u64, remote_vault: Address) -> Result<(), VaultError> {
        if remote_vault.is_zero() {
            return Err(VaultError::InvalidAddress);
        }
        self.domains.insert(domain, remote_vault);
        Ok(())
    }

    pub fn domains(&self) -> &BTreeMap<u64, Address> {
        &self.domains
    }

    pub fn counters(&self) -> &BTreeMap<Address, u64> {
        &self.counters
    }

    pub fn operations(&self) -> &BTreeMap<OperationKey, CrossChainRecord> {
        &self.operations
    }

    pub fn get(&self, key: &OperationKey) -> Option<&CrossChainRecord> {
        self.operations.get(key)
    }

    pub fn pending(&self) -> impl Iterator<Item = (&OperationKey, &CrossChainRecord)> {
        self.operations.iter().filter(|(_, r)| !r.executed)
    }

    pub fn counter(&self, initiator: &Address) -> u64 {
        self.counters.get(initiator).copied().unwrap_or(0)
    }

    pub fn check_route(&self, domain: u64, remote_vault: &Address) -> Result<(), VaultError> {
        match self.domains.get(&domain) {
            None => Err(VaultError::UnknownDomain(domain)),
            Some(registered) if registered != remote_vault => {
                Err(VaultError::DomainVaultMismatch(domain))
            }
            Some(_) => Ok(()),
        }
    }

    /// Write a new record and bump the initiator's counter. The caller has
    /// already debited the vault.
    pub fn record(
        &mut self,
        domain: u64,
        remote_vault: Address,
        asset: AssetId,
        amount: u128,
        initiator: Address,
        now: DateTime<Utc>,
    ) -> Result<OperationKey, VaultError> {
        self.check_route(domain, &remote_vault)?;
        let counter = self.counter(&initiator);
        let key = operation_key(domain, &remote_vault, &asset, amount, &initiator, counter);
        if self.operations.contains_key(&key) {
            return Err(VaultError::OperationAlreadyExecuted(key));
        }
        self.operations.insert(
            key,
            CrossChainRecord {
                target_domain: domain,
                target_vault: remote_vault,
                asset_id: asset,
                amount,
                created_at: now,
                executed: false,
                initiator,
            },
        );
        self.counters.insert(
            initiator,
            counter.checked_add(1).ok_or(VaultError::ArithmeticOverflow)?,
        );
        Ok(key)
    }

    /// Mark an operation delivered.
    pub fn execute(&mut self, key: &OperationKey) -> Result<&CrossChainRecord, VaultError> {
        let record = self
            .operations
            .get_mut(key)
            .ok_or(VaultError::OperationNotFound(*key))?;
        if record.executed {
            return Err(VaultError::OperationAlreadyExecuted(*key));
        }
        record.executed = true;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> CrossChainLedger {
        let mut l = CrossChainLedger::new();
        l.register_domain(42, Address::derive("remote")).unwrap();
        l
    }

    #[test]
    fn route_must_match_registration() {
        let l = ledger();
        assert!(l.check_route(42, &Address::derive("remote")).is_ok());
        assert_eq!(
            l.check_route(7, &Address::derive("remote")),
            Err(VaultError::UnknownDomain(7))
        );
        assert_eq!(
            l.check_route(42, &Address::derive("elsewhere")),
            Err(VaultError::DomainVaultMismatch(42))
        );
    }

    #[test]
    fn identical_requests_get_distinct_keys() {
        let mut l = ledger();
        let (remote, asset, who) = (
            Address::derive("remote"),
            AssetId::derive("USDC"),
            Address::derive("agent"),
        );
        let now = Utc::now();
        let k1 = l.record(42, remote, asset, 100, who, now).unwrap();
        let k2 = l.record(42, remote, asset, 100, who, now).unwrap();
        assert_ne!(k1, k2);
        assert_eq!(l.counter(&who), 2);
        assert_eq!(l.pending().count(), 2);
        assert_eq!(k1, operation_key(42, &remote, &asset, 100, &who, 0));
    }

    #[test]
    fn escrow_is_per_vault() {
        let (a, b) = (Address::derive("vault-a"), Address::derive("vault-b"));
        assert_eq!(escrow_address(&a), escrow_address(&a));
        assert_ne!(escrow_address(&a), escrow_address(&b));
        assert_ne!(escrow_address(&a), a);
    }

    #[test]
    fn execute_is_one_shot() {
        let mut l = ledger();
        let key = l
            .record(
                42,
                Address::derive("remote"),
                AssetId::derive("USDC"),
                5,
                Address::derive("agent"),
                Utc::now(),
            )
            .unwrap();
        assert!(l.execute(&key).unwrap().executed);
        assert_eq!(l.execute(&key), Err(VaultError::OperationAlreadyExecuted(key)));
        let missing = OperationKey::from_bytes([1; 32]);
        assert_eq!(l.execute(&missing), Err(VaultError::OperationNotFound(missing)));
    }
}
