//! # Access Control Registry
//!
//! Two tiers of authority:
//!
//! - **Owner**: administrative and emergency actions (agent management,
//!   pause, weight bootstrapping, fee rates, domains, protocol approvals).
//! - **Agents**: the primary agent plus any number of authorized agents.
//!   They run day-to-day operations: assets, fees, rebalancing, deployments.
//!
//! The vault's own address is a third identity that only matters to the
//! batch executor: a batch may be submitted by an agent or by the vault
//! itself acting as a delegated identity.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::error::VaultError;
use super::ids::Address;

/// Owner, agents and the pause flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    owner: Address,
    primary_agent: Address,
    authorized_agents: BTreeSet<Address>,
    paused: bool,
}

impl AccessControl {
    pub fn new(owner: Address, primary_agent: Address) -> Result<Self, VaultError> {
        if owner.is_zero() || primary_agent.is_zero() {
            return Err(VaultError::InvalidAddress);
        }
        Ok(Self {
            owner,
            primary_agent,
            authorized_agents: BTreeSet::new(),
            paused: false,
        })
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn primary_agent(&self) -> Address {
        self.primary_agent
    }

    pub fn authorized_agents(&self) -> impl Iterator<Item = &Address> {
        self.authorized_agents.iter()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_owner(&self, who: &Address) -> bool {
        *who == self.owner
    }

    /// Primary agent or any authorized agent.
    pub fn is_agent(&self, who: &Address) -> bool {
        *who == self.primary_agent || self.authorized_agents.contains(who)
    }

    pub fn ensure_owner(&self, who: &Address) -> Result<(), VaultError> {
        if self.is_owner(who) {
            Ok(())
        } else {
            Err(VaultError::NotOwner(*who))
        }
    }

    pub fn ensure_agent(&self, who: &Address) -> Result<(), VaultError> {
        if self.is_agent(who) {
            Ok(())
        } else {
            Err(VaultError::NotAgent(*who))
        }
    }

    /// Batch submitters: an agent, or the vault's own delegated identity.
    pub fn ensure_agent_or_self(&self, who: &Address, vault: &Address) -> Result<(), VaultError> {
        if self.is_agent(who) || who == vault {
            Ok(())
        } else {
            Err(VaultError::NotAuthorized(*who))
        }
    }

    pub fn ensure_not_paused(&self) -> Result<(), VaultError> {
        if self.paused {
            Err(VaultError::Paused)
        } else {
            Ok(())
        }
    }

    // -- owner mutations ----------------------------------------------------

    /// Returns the replaced primary agent.
    pub fn set_primary_agent(&mut self, agent: Address) -> Result<Address, VaultError> {
        if agent.is_zero() {
            return Err(VaultError::InvalidAddress);
        }
        Ok(std::mem::replace(&mut self.primary_agent, agent))
    }

    pub fn authorize(&mut self, agent: Address) -> Result<(), VaultError> {
        if agent.is_zero() {
            return Err(VaultError::InvalidAddress);
        }
        if self.is_agent(&agent) {
            return Err(VaultError::AlreadyAuthorized(agent));
        }
        self.authorized_agents.insert(agent);
        Ok(())
    }

    pub fn revoke(&mut self, agent: &Address) -> Result<(), VaultError> {
        if !self.authorized_agents.remove(agent) {
            return Err(VaultError::NotAuthorizedAgent(*agent));
        }
        Ok(())
    }

    /// Returns the previous owner.
    pub fn transfer_ownership(&mut self, new_owner: Address) -> Result<Address, VaultError> {
        if new_owner.is_zero() {
            return Err(VaultError::InvalidAddress);
        }
        Ok(std::mem::replace(&mut self.owner, new_owner))
    }

    pub fn pause(&mut self) -> Result<(), VaultError> {
        if self.paused {
            return Err(VaultError::Paused);
        }
        self.paused = true;
        Ok(())
    }

    pub fn unpause(&mut self) -> Result<(), VaultError> {
        if !self.paused {
            return Err(VaultError::NotPaused);
        }
        self.paused = false;
        Ok(())
    }
}
