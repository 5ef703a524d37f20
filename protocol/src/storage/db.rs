//! # VaultStore — Persistent Vault State
//!
//! Persistence for a [`Vault`] on top of sled's embedded key-value store.
//!
//! ## Tree Layout
//!
//! | Tree         | Key                    | Value                      |
//! |--------------|------------------------|----------------------------|
//! | `assets`     | `index` (8B BE)        | `bincode(AssetRecord)`     |
//! | `shares`     | `address` (32B)        | `balance` (16B BE)         |
//! | `operations` | `operation key` (32B)  | `bincode(CrossChainRecord)`|
//! | `nonces`     | `address` (32B)        | `nonce` (8B BE)            |
//! | `events`     | `sequence` (8B BE)     | `bincode(VaultEvent)`      |
//! | `meta`       | key (UTF-8)            | `bincode(..)`              |
//!
//! Indices and sequences are big-endian so sled's lexicographic order is
//! numeric order and a full scan yields records in registry order.
//!
//! ## Atomicity
//!
//! A save builds one `Batch` per tree (stale keys removed, current ones
//! inserted; for `events`, only the new tail) and applies all six inside a
//! single sled transaction, so a crash or error leaves either the old vault
//! or the new one on disk, never a mix. The store is flushed afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionResult, TransactionError};
use sled::{Batch, Db, Transactional, Tree};
use tracing::debug;

use crate::config::VaultConfig;
use crate::vault::{
    AccessControl, Address, AssetRecord, AssetRegistry, CrossChainLedger, CrossChainRecord,
    EventJournal, FeeState, Host, NonceRegistry, OperationKey, ShareLedger, Vault, VaultError,
    VaultEvent, VaultState,
};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt entry in tree {tree}: {detail}")]
    Corrupt { tree: &'static str, detail: String },

    #[error("stored vault is inconsistent: {0}")]
    Vault(#[from] VaultError),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Meta
// ---------------------------------------------------------------------------

const META_VAULT: &[u8] = b"vault";
const META_HOST: &[u8] = b"host";

/// Everything in `VaultState` that is not stored in its own tree.
#[derive(Serialize, Deserialize)]
struct VaultMeta {
    address: Address,
    config: VaultConfig,
    access: AccessControl,
    fees: FeeState,
    domains: BTreeMap<u64, Address>,
    counters: BTreeMap<Address, u64>,
    approved_protocols: BTreeSet<Address>,
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn fixed<const N: usize>(tree: &'static str, bytes: &[u8]) -> StoreResult<[u8; N]> {
    bytes.try_into().map_err(|_| StoreError::Corrupt {
        tree,
        detail: format!("expected {N} bytes, found {}", bytes.len()),
    })
}

// ---------------------------------------------------------------------------
// VaultStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct VaultStore {
    db: Db,
    assets: Tree,
    shares: Tree,
    operations: Tree,
    nonces: Tree,
    events: Tree,
    meta: Tree,
}

impl VaultStore {
    /// Open or create a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// An in-memory store, discarded on drop. For tests.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        Ok(Self {
            assets: db.open_tree("assets")?,
            shares: db.open_tree("shares")?,
            operations: db.open_tree("operations")?,
            nonces: db.open_tree("nonces")?,
            events: db.open_tree("events")?,
            meta: db.open_tree("meta")?,
            db,
        })
    }

    /// Block until every pending write is on disk.
    pub fn flush(&self) -> StoreResult<usize> {
        Ok(self.db.flush()?)
    }

    /// True once a vault has been saved here.
    pub fn is_initialized(&self) -> StoreResult<bool> {
        Ok(self.meta.contains_key(META_VAULT)?)
    }

    /// Persist the full vault, host snapshot included.
    ///
    /// Every value is encoded before anything is written; the writes then
    /// land in one transaction over all six trees.
    pub fn save<H: Host + Serialize>(&self, vault: &Vault<H>) -> StoreResult<()> {
        let state = vault.state();

        let mut assets = Vec::new();
        for (index, record) in state.assets.records().iter().enumerate() {
            assets.push(((index as u64).to_be_bytes().to_vec(), encode(record)?));
        }
        let assets = Self::replacement(&self.assets, assets)?;

        let shares = state
            .shares
            .holders()
            .map(|(addr, bal)| (addr.as_bytes().to_vec(), bal.to_be_bytes().to_vec()))
            .collect();
        let shares = Self::replacement(&self.shares, shares)?;

        let mut operations = Vec::new();
        for (key, record) in state.cross_chain.operations() {
            operations.push((key.as_bytes().to_vec(), encode(record)?));
        }
        let operations = Self::replacement(&self.operations, operations)?;

        let nonces = state
            .nonces
            .iter()
            .map(|(addr, nonce)| (addr.as_bytes().to_vec(), nonce.to_be_bytes().to_vec()))
            .collect();
        let nonces = Self::replacement(&self.nonces, nonces)?;

        let events = self.event_delta(&state.events)?;

        let meta = VaultMeta {
            address: state.address,
            config: state.config.clone(),
            access: state.access.clone(),
            fees: state.fees.clone(),
            domains: state.cross_chain.domains().clone(),
            counters: state.cross_chain.counters().clone(),
            approved_protocols: state.approved_protocols.clone(),
        };
        let mut meta_batch = Batch::default();
        meta_batch.insert(META_VAULT, encode(&meta)?);
        meta_batch.insert(META_HOST, encode(vault.host())?);

        (
            &self.assets,
            &self.shares,
            &self.operations,
            &self.nonces,
            &self.events,
            &self.meta,
        )
            .transaction(
                |(tx_assets, tx_shares, tx_operations, tx_nonces, tx_events, tx_meta)|
                 -> ConflictableTransactionResult<(), StoreError> {
                    tx_assets.apply_batch(&assets)?;
                    tx_shares.apply_batch(&shares)?;
                    tx_operations.apply_batch(&operations)?;
                    tx_nonces.apply_batch(&nonces)?;
                    tx_events.apply_batch(&events)?;
                    tx_meta.apply_batch(&meta_batch)?;
                    Ok(())
                },
            )
            .map_err(|e| match e {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(err) => StoreError::Sled(err),
            })?;

        self.db.flush()?;
        debug!(
            vault = %state.address,
            assets = state.assets.records().len(),
            events = state.events.len(),
            "vault saved"
        );
        Ok(())
    }

    /// Load the vault saved here, if any.
    pub fn load<H: Host + DeserializeOwned>(&self) -> StoreResult<Option<Vault<H>>> {
        let Some(meta_bytes) = self.meta.get(META_VAULT)? else {
            return Ok(None);
        };
        let meta: VaultMeta = decode(&meta_bytes)?;
        let host_bytes = self.meta.get(META_HOST)?.ok_or(StoreError::Corrupt {
            tree: "meta",
            detail: "host snapshot missing".into(),
        })?;
        let host: H = decode(&host_bytes)?;

        let mut records = Vec::new();
        for entry in self.assets.iter() {
            let (_, value) = entry?;
            records.push(decode::<AssetRecord>(&value)?);
        }

        let mut balances = BTreeMap::new();
        for entry in self.shares.iter() {
            let (key, value) = entry?;
            let holder = Address::from_bytes(fixed::<32>("shares", &key)?);
            balances.insert(holder, u128::from_be_bytes(fixed::<16>("shares", &value)?));
        }

        let mut operations = BTreeMap::new();
        for entry in self.operations.iter() {
            let (key, value) = entry?;
            let key = OperationKey::from_bytes(fixed::<32>("operations", &key)?);
            operations.insert(key, decode::<CrossChainRecord>(&value)?);
        }

        let mut nonces = BTreeMap::new();
        for entry in self.nonces.iter() {
            let (key, value) = entry?;
            let who = Address::from_bytes(fixed::<32>("nonces", &key)?);
            nonces.insert(who, u64::from_be_bytes(fixed::<8>("nonces", &value)?));
        }

        let mut events = Vec::new();
        for entry in self.events.iter() {
            let (_, value) = entry?;
            events.push(decode::<VaultEvent>(&value)?);
        }

        let state = VaultState {
            address: meta.address,
            config: meta.config,
            access: meta.access,
            assets: AssetRegistry::from_records(records),
            shares: ShareLedger::from_balances(balances)?,
            fees: meta.fees,
            cross_chain: CrossChainLedger::from_parts(meta.domains, operations, meta.counters),
            nonces: NonceRegistry::from_map(nonces),
            approved_protocols: meta.approved_protocols,
            events: EventJournal::from_events(events),
            locks: Default::default(),
        };
        debug!(vault = %state.address, "vault loaded");
        Ok(Some(Vault::from_parts(state, host)))
    }

    /// A batch that makes `tree` contain exactly `entries`.
    fn replacement(tree: &Tree, entries: Vec<(Vec<u8>, Vec<u8>)>) -> StoreResult<Batch> {
        let keep: BTreeSet<&[u8]> = entries.iter().map(|(k, _)| k.as_slice()).collect();
        let mut batch = Batch::default();
        for key in tree.iter().keys() {
            let key = key?;
            if !keep.contains(key.as_ref()) {
                batch.remove(key);
            }
        }
        for (key, value) in &entries {
            batch.insert(key.as_slice(), value.as_slice());
        }
        Ok(batch)
    }

    /// Events are immutable once journaled: only sequences past the last
    /// stored one are written. Stored sequences the journal no longer has
    /// are dropped.
    fn event_delta(&self, journal: &EventJournal) -> StoreResult<Batch> {
        let stored_last = match self.events.last()? {
            Some((key, _)) => u64::from_be_bytes(fixed::<8>("events", &key)?),
            None => 0,
        };
        let mut batch = Batch::default();
        let last = journal.last_sequence();
        if stored_last > last {
            let from = (last + 1).to_be_bytes();
            for key in self.events.range(from..).keys() {
                batch.remove(key?);
            }
        }
        for event in journal.since(stored_last.min(last)) {
            batch.insert(event.sequence.to_be_bytes().to_vec(), encode(event)?);
        }
        Ok(batch)
    }
}
