//! The `VaultState` aggregate: every registry of one vault instance in a
//! single owned value. [`Vault`](super::engine::Vault) checkpoints it by
//! cloning (with the event journal set aside, see `events`), and
//! [`VaultStore`](crate::storage::VaultStore) persists it.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::access::AccessControl;
use super::assets::AssetRegistry;
use super::batch::NonceRegistry;
use super::cross_chain::CrossChainLedger;
use super::error::VaultError;
use super::events::EventJournal;
use super::fees::FeeState;
use super::ids::Address;
use super::shares::ShareLedger;
use super::valuation::nav_per_share;
use crate::config::VaultConfig;

/// Call-in-progress flags. Never persisted: a loaded vault starts unlocked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Locks {
    pub vault: bool,
    pub batch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultState {
    /// The vault's own identity: holds its assets, may submit batches.
    pub address: Address,
    pub config: VaultConfig,
    pub access: AccessControl,
    pub assets: AssetRegistry,
    pub shares: ShareLedger,
    pub fees: FeeState,
    pub cross_chain: CrossChainLedger,
    pub nonces: NonceRegistry,
    pub approved_protocols: BTreeSet<Address>,
    pub events: EventJournal,
    #[serde(skip)]
    pub locks: Locks,
}

impl VaultState {
    pub fn new(
        address: Address,
        config: VaultConfig,
        owner: Address,
        primary_agent: Address,
        now: DateTime<Utc>,
    ) -> Result<Self, VaultError> {
        if address.is_zero() {
            return Err(VaultError::InvalidAddress);
        }
        config.validate()?;
        let fees = FeeState::new(config.management_fee_bps, config.performance_fee_bps, now)?;
        Ok(Self {
            address,
            access: AccessControl::new(owner, primary_agent)?,
            config,
            assets: AssetRegistry::new(),
            shares: ShareLedger::new(),
            fees,
            cross_chain: CrossChainLedger::new(),
            nonces: NonceRegistry::new(),
            approved_protocols: BTreeSet::new(),
            events: EventJournal::new(),
            locks: Locks::default(),
        })
    }

    pub fn total_value(&self) -> Result<u128, VaultError> {
        self.assets.total_value()
    }

    pub fn nav_per_share(&self) -> Result<u128, VaultError> {
        nav_per_share(self.total_value()?, self.shares.total_supply())
    }

    pub fn is_protocol_approved(&self, protocol: &Address) -> bool {
        self.approved_protocols.contains(protocol)
    }
}
