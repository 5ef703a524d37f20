//! # Asset Registry
//!
//! The ordered list of assets the vault tracks, each with a target weight
//! and a cached balance. The cached balance is the vault's own bookkeeping:
//! deposits credit it, withdrawals and outbound moves debit it, and
//! `refresh_balance` resynchronises it with the token ledger.
//!
//! Records are never deleted. Removing an asset flips `active` off; its
//! index keeps resolving forever, and adding the same identifier again
//! reactivates the record in place.
//!
//! Weight sums have two different rules:
//!
//! | Operation           | Rule on the active weight sum |
//! |---------------------|-------------------------------|
//! | `add`               | must stay `<= 10000`          |
//! | `set_target_weight` | must stay `<= 10000`          |
//! | `set_all_weights`   | must equal `10000` exactly    |
//!
//! Incremental edits may leave part of the allocation unassigned while the
//! registry is being built up; a full overwrite must describe a complete
//! allocation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::VaultError;
use super::ids::AssetId;
use super::math::{checked_add, checked_sub};
use crate::config::{BPS_DENOMINATOR, MAX_ASSETS};

/// One registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub asset_id: AssetId,
    pub target_weight_bps: u32,
    pub cached_balance: u128,
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRegistry {
    records: Vec<AssetRecord>,
    index: BTreeMap<AssetId, usize>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from records in index order.
    pub fn from_records(records: Vec<AssetRecord>) -> Self {
        let index = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.asset_id, i))
            .collect();
        Self { records, index }
    }

    // -- reads --------------------------------------------------------------

    pub fn get(&self, asset: &AssetId) -> Option<&AssetRecord> {
        self.index.get(asset).map(|&i| &self.records[i])
    }

    pub fn index_of(&self, asset: &AssetId) -> Option<usize> {
        self.index.get(asset).copied()
    }

    /// Lookup by index. Deactivated records stay reachable.
    pub fn at(&self, index: usize) -> Option<&AssetRecord> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[AssetRecord] {
        &self.records
    }

    pub fn active(&self) -> impl Iterator<Item = &AssetRecord> {
        self.records.iter().filter(|r| r.active)
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    pub fn is_active(&self, asset: &AssetId) -> bool {
        self.get(asset).is_some_and(|r| r.active)
    }

    /// The record for an active asset, or `AssetNotSupported`.
    pub fn require_active(&self, asset: &AssetId) -> Result<&AssetRecord, VaultError> {
        self.get(asset)
            .filter(|r| r.active)
            .ok_or(VaultError::AssetNotSupported(*asset))
    }

    fn require_active_mut(&mut self, asset: &AssetId) -> Result<&mut AssetRecord, VaultError> {
        match self.index.get(asset) {
            Some(&i) if self.records[i].active => Ok(&mut self.records[i]),
            _ => Err(VaultError::AssetNotSupported(*asset)),
        }
    }

    pub fn active_weight_sum(&self) -> u32 {
        self.active().map(|r| r.target_weight_bps).sum()
    }

    /// Sum of cached balances over active assets.
    pub fn total_value(&self) -> Result<u128, VaultError> {
        self.active()
            .try_fold(0u128, |acc, r| checked_add(acc, r.cached_balance))
    }

    // -- mutations ----------------------------------------------------------

    /// Add or reactivate an asset. Returns its index.
    ///
    /// # Errors
    ///
    /// `InvalidAsset`, `InvalidWeight`, `TooManyAssets`.
    pub fn add(&mut self, asset: AssetId, weight_bps: u32) -> Result<usize, VaultError> {
        if asset.is_zero() || self.is_active(&asset) {
            return Err(VaultError::InvalidAsset(asset));
        }
        if weight_bps == 0 || weight_bps > BPS_DENOMINATOR {
            return Err(VaultError::InvalidWeight("weight must be within 1..=10000 bps"));
        }
        if self.active_weight_sum() + weight_bps > BPS_DENOMINATOR {
            return Err(VaultError::InvalidWeight("active weights would exceed 10000 bps"));
        }
        if self.active_count() >= MAX_ASSETS {
            return Err(VaultError::TooManyAssets { max: MAX_ASSETS });
        }

        let record = AssetRecord {
            asset_id: asset,
            target_weight_bps: weight_bps,
            cached_balance: 0,
            active: true,
        };
        match self.index.get(&asset) {
            Some(&i) => {
                self.records[i] = record;
                Ok(i)
            }
            None => {
                self.records.push(record);
                let i = self.records.len() - 1;
                self.index.insert(asset, i);
                Ok(i)
            }
        }
    }

    /// Deactivate an asset. Refused while the vault still holds any of it.
    pub fn remove(&mut self, asset: &AssetId) -> Result<usize, VaultError> {
        let index = self
            .index_of(asset)
            .filter(|&i| self.records[i].active)
            .ok_or(VaultError::AssetNotSupported(*asset))?;
        let record = &mut self.records[index];
        if record.cached_balance > 0 {
            return Err(VaultError::AssetNotEmpty {
                asset: *asset,
                balance: record.cached_balance,
            });
        }
        record.active = false;
        Ok(index)
    }

    /// Update one weight. A weight of zero is allowed here so an asset can
    /// be phased out before removal.
    pub fn set_target_weight(&mut self, asset: &AssetId, weight_bps: u32) -> Result<(), VaultError> {
        let current = self.require_active(asset)?.target_weight_bps;
        if weight_bps > BPS_DENOMINATOR
            || self.active_weight_sum() - current + weight_bps > BPS_DENOMINATOR
        {
            return Err(VaultError::InvalidWeight("active weights would exceed 10000 bps"));
        }
        self.require_active_mut(asset)?.target_weight_bps = weight_bps;
        Ok(())
    }

    /// Atomically overwrite the weights of the listed assets. The resulting
    /// active sum must be exactly 10000; on any error nothing changes.
    pub fn set_all_weights(&mut self, assets: &[AssetId], weights: &[u32]) -> Result<(), VaultError> {
        if assets.len() != weights.len() {
            return Err(VaultError::InvalidWeight("asset and weight lists differ in length"));
        }
        let mut staged: Vec<u32> = self.records.iter().map(|r| r.target_weight_bps).collect();
        let mut seen = Vec::with_capacity(assets.len());
        for (asset, &weight) in assets.iter().zip(weights) {
            if !self.is_active(asset) {
                return Err(VaultError::InvalidWeight("weight given for an inactive asset"));
            }
            if seen.contains(asset) {
                return Err(VaultError::InvalidAsset(*asset));
            }
            if weight > BPS_DENOMINATOR {
                return Err(VaultError::InvalidWeight("weight above 10000 bps"));
            }
            seen.push(*asset);
            if let Some(i) = self.index_of(asset) {
                staged[i] = weight;
            }
        }
        let sum: u64 = self
            .records
            .iter()
            .zip(&staged)
            .filter(|(r, _)| r.active)
            .map(|(_, &w)| u64::from(w))
            .sum();
        if sum != u64::from(BPS_DENOMINATOR) {
            return Err(VaultError::InvalidWeight("weights must sum to exactly 10000 bps"));
        }
        for (record, weight) in self.records.iter_mut().zip(staged) {
            record.target_weight_bps = weight;
        }
        Ok(())
    }

    pub fn set_cached_balance(&mut self, asset: &AssetId, balance: u128) -> Result<(), VaultError> {
        self.require_active_mut(asset)?.cached_balance = balance;
        Ok(())
    }

    pub fn credit(&mut self, asset: &AssetId, amount: u128) -> Result<u128, VaultError> {
        let record = self.require_active_mut(asset)?;
        record.cached_balance = checked_add(record.cached_balance, amount)?;
        Ok(record.cached_balance)
    }

    pub fn debit(&mut self, asset: &AssetId, amount: u128) -> Result<u128, VaultError> {
        let record = self.require_active_mut(asset)?;
        if record.cached_balance < amount {
            return Err(VaultError::InsufficientBalance {
                available: record.cached_balance,
                requested: amount,
            });
        }
        record.cached_balance = checked_sub(record.cached_balance, amount)?;
        Ok(record.cached_balance)
    }

    /// Zero the cached balance of any record, active or not. Used by the
    /// owner's emergency withdrawal.
    pub fn clear_balance(&mut self, asset: &AssetId) {
        if let Some(&i) = self.index.get(asset) {
            self.records[i].cached_balance = 0;
        }
    }
}
