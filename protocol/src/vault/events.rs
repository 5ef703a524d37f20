//! # Event Journal
//!
//! Every successful state change appends one [`VaultEvent`]. Off-chain
//! observers (the node's `/events` endpoint, agents polling for deposits)
//! read the journal instead of diffing state.
//!
//! The journal lives in [`VaultState`](super::state::VaultState) but stays
//! out of the per-call checkpoint: it only ever grows, and cloning a
//! history that long on every entry point would be silly. The engine notes
//! its length instead and [`EventJournal::truncate`]s back to it when a
//! call fails, so a failed call still leaves no events behind.
//!
//! Sequence numbers start at 1 and are never reused by a committed event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{Address, AssetId, OperationKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEvent {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    // -- assets --
    AssetAdded {
        asset: AssetId,
        index: usize,
        weight_bps: u32,
    },
    AssetRemoved {
        asset: AssetId,
        index: usize,
    },
    WeightsUpdated {
        weights: Vec<(AssetId, u32)>,
    },
    BalanceRefreshed {
        asset: AssetId,
        balance: u128,
    },

    // -- holders --
    Deposited {
        depositor: Address,
        asset: AssetId,
        amount: u128,
        shares: u128,
    },
    Withdrawn {
        holder: Address,
        asset: AssetId,
        shares: u128,
        amount_out: u128,
    },
    SharesTransferred {
        from: Address,
        to: Address,
        amount: u128,
    },

    // -- fees --
    FeesCollected {
        management_fee: u128,
        performance_fee: u128,
        fee_shares: u128,
        recipient: Address,
    },
    FeeRatesUpdated {
        management_fee_bps: u32,
        performance_fee_bps: u32,
    },

    // -- value movement --
    Rebalanced {
        asset_in: AssetId,
        asset_out: AssetId,
        amount_in: u128,
        amount_out: u128,
    },
    DeployedToProtocol {
        asset: AssetId,
        protocol: Address,
        amount: u128,
    },
    CrossChainInitiated {
        key: OperationKey,
        domain: u64,
        asset: AssetId,
        amount: u128,
        initiator: Address,
    },
    CrossChainExecuted {
        key: OperationKey,
    },
    BatchExecuted {
        authorizer: Address,
        nonce: u64,
        call_count: usize,
        success_count: usize,
        gas_used: u64,
    },

    // -- administration --
    DomainRegistered {
        domain: u64,
        remote_vault: Address,
    },
    ProtocolApproved {
        protocol: Address,
    },
    ProtocolRevoked {
        protocol: Address,
    },
    PrimaryAgentChanged {
        previous: Address,
        current: Address,
    },
    AgentAuthorized {
        agent: Address,
    },
    AgentRevoked {
        agent: Address,
    },
    OwnershipTransferred {
        previous: Address,
        current: Address,
    },
    Paused {
        by: Address,
    },
    Unpaused {
        by: Address,
    },
    EmergencyWithdrawal {
        asset: AssetId,
        to: Address,
        amount: u128,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventJournal {
    last_sequence: u64,
    events: Vec<VaultEvent>,
}

impl EventJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: Vec<VaultEvent>) -> Self {
        let last_sequence = events.last().map(|e| e.sequence).unwrap_or(0);
        Self {
            last_sequence,
            events,
        }
    }

    /// Append an event and return its sequence number.
    pub fn record(&mut self, timestamp: DateTime<Utc>, kind: EventKind) -> u64 {
        self.last_sequence += 1;
        self.events.push(VaultEvent {
            sequence: self.last_sequence,
            timestamp,
            kind,
        });
        self.last_sequence
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn events(&self) -> &[VaultEvent] {
        &self.events
    }

    /// Events with a sequence number strictly greater than `sequence`.
    pub fn since(&self, sequence: u64) -> &[VaultEvent] {
        let start = self.events.partition_point(|e| e.sequence <= sequence);
        &self.events[start..]
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Keep only the first `len` events. The next sequence continues from
    /// the last one kept.
    pub fn truncate(&mut self, len: usize) {
        self.events.truncate(len);
        self.last_sequence = self.events.last().map_or(0, |e| e.sequence);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
