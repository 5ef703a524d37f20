//! Share ledger: per-holder balances and total supply.
//!
//! Supply only moves through [`ShareLedger::mint`] and [`ShareLedger::burn`],
//! so `total_supply == sum(balances)` holds after every call. Zero balances
//! are dropped from the map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::VaultError;
use super::ids::Address;
use super::math::{checked_add, checked_sub};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareLedger {
    balances: BTreeMap<Address, u128>,
    total_supply: u128,
}

impl ShareLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted balances; supply is recomputed.
    pub fn from_balances(balances: BTreeMap<Address, u128>) -> Result<Self, VaultError> {
        let total_supply = balances
            .values()
            .try_fold(0u128, |acc, b| checked_add(acc, *b))?;
        let balances = balances.into_iter().filter(|(_, b)| *b > 0).collect();
        Ok(Self {
            balances,
            total_supply,
        })
    }

    pub fn total_supply(&self) -> u128 {
        self.total_supply
    }

    pub fn balance_of(&self, holder: &Address) -> u128 {
        self.balances.get(holder).copied().unwrap_or(0)
    }

    pub fn holders(&self) -> impl Iterator<Item = (&Address, &u128)> {
        self.balances.iter()
    }

    pub fn mint(&mut self, to: Address, amount: u128) -> Result<(), VaultError> {
        if amount == 0 {
            return Ok(());
        }
        let supply = checked_add(self.total_supply, amount)?;
        let balance = checked_add(self.balance_of(&to), amount)?;
        self.balances.insert(to, balance);
        self.total_supply = supply;
        Ok(())
    }

    pub fn burn(&mut self, from: &Address, amount: u128) -> Result<(), VaultError> {
        let available = self.balance_of(from);
        if available < amount {
            return Err(VaultError::InsufficientShares {
                available,
                requested: amount,
            });
        }
        self.set_balance(*from, available - amount);
        self.total_supply = checked_sub(self.total_supply, amount)?;
        Ok(())
    }

    pub fn transfer(&mut self, from: &Address, to: Address, amount: u128) -> Result<(), VaultError> {
        if to.is_zero() {
            return Err(VaultError::InvalidAddress);
        }
        let available = self.balance_of(from);
        if available < amount {
            return Err(VaultError::InsufficientShares {
                available,
                requested: amount,
            });
        }
        if *from == to {
            return Ok(());
        }
        let received = checked_add(self.balance_of(&to), amount)?;
        self.set_balance(*from, available - amount);
        self.set_balance(to, received);
        Ok(())
    }

    fn set_balance(&mut self, holder: Address, balance: u128) {
        if balance == 0 {
            self.balances.remove(&holder);
        } else {
            self.balances.insert(holder, balance);
        }
    }
}
