//! A storage provider node: ledger plus on-disk block files under one
//! home directory, held exclusively for the lifetime of the node.

use crate::activity::Activity;
use crate::block_store::BlockStore;
use crate::config::{load_json, save_json, ProviderConfig};
use crate::error::{Error, Result};
use crate::keys::Identity;
use crate::ledger::StorageLedger;
use crate::network::StoreAck;
use crate::snapshot::{FileSnapshotStore, SnapshotSink, Stats};
use crate::types::{Contract, ProviderInfo};
use crate::version::sha256_hex;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const CONFIG_FILE: &str = "provider.json";
pub const IDENTITY_FILE: &str = "identity.json";
const LOCK_FILE: &str = ".lock";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockRef {
    pub renter_id: String,
    pub block_id: String,
}

/// Drift between what the ledger charges for and what is on disk.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    /// Recorded in the ledger, no file.
    pub missing_on_disk: Vec<BlockRef>,
    /// File present, not recorded.
    pub untracked_on_disk: Vec<BlockRef>,
    /// File length differs from the recorded size.
    pub size_mismatch: Vec<BlockRef>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.missing_on_disk.is_empty() && self.untracked_on_disk.is_empty() && self.size_mismatch.is_empty()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub provider_id: String,
    pub address: String,
    pub public_key: String,
    pub total_storage: i64,
    pub stats: Stats,
    pub contracts: usize,
    pub activity: Vec<Activity>,
}

pub struct Provider {
    config: ProviderConfig,
    public_key: String,
    home: PathBuf,
    ledger: StorageLedger,
    blocks: BlockStore,
    _lock: fs::File,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.config.provider_id)
            .field("address", &self.config.api_address)
            .field("home", &self.home)
            .finish()
    }
}

impl Provider {
    /// Writes a fresh provider home: config plus identity key file.
    pub fn init(home: &Path, config: &ProviderConfig, identity: &Identity) -> Result<()> {
        if identity.id != config.provider_id {
            return Err(Error::Validation(format!(
                "identity {} does not belong to provider {}",
                identity.id, config.provider_id
            )));
        }
        if home.join(CONFIG_FILE).exists() {
            return Err(Error::Conflict(format!("{:?} already holds a provider", home)));
        }
        fs::create_dir_all(home)?;
        save_json(&home.join(CONFIG_FILE), config)?;
        identity.save(&home.join(IDENTITY_FILE))?;
        Ok(())
    }

    /// Opens a home created by [`Provider::init`].
    pub fn open_home(home: &Path) -> Result<Self> {
        let config: ProviderConfig = load_json(&home.join(CONFIG_FILE))?;
        let identity = Identity::load(&home.join(IDENTITY_FILE))?;
        Self::open(config, &identity, home)
    }

    pub fn open(config: ProviderConfig, identity: &Identity, home: &Path) -> Result<Self> {
        let sink = Arc::new(FileSnapshotStore::new(home));
        Self::open_with_sink(config, identity, home, sink)
    }

    pub fn open_with_sink(
        config: ProviderConfig,
        identity: &Identity,
        home: &Path,
        sink: Arc<dyn SnapshotSink>,
    ) -> Result<Self> {
        if identity.id != config.provider_id {
            return Err(Error::Validation(format!(
                "identity {} does not belong to provider {}",
                identity.id, config.provider_id
            )));
        }
        fs::create_dir_all(home)?;
        let lock = OpenOptions::new().create(true).truncate(false).write(true).open(home.join(LOCK_FILE))?;
        lock.try_lock_exclusive()
            .map_err(|_| Error::Conflict(format!("provider home {:?} is in use", home)))?;

        let ledger = match sink.load()? {
            Some(snap) => {
                info!(provider = %config.provider_id, contracts = snap.contracts.len(), "restoring ledger from snapshot");
                StorageLedger::restore(&config, identity.signing_key().clone(), snap, sink)?
            }
            None => StorageLedger::new(&config, identity.signing_key().clone(), sink)?,
        };
        let blocks = BlockStore::open(home.join("blocks"))?;
        Ok(Self {
            public_key: identity.public().public_key,
            config,
            home: home.to_path_buf(),
            ledger,
            blocks,
            _lock: lock,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.provider_id
    }

    pub fn address(&self) -> &str {
        &self.config.api_address
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn ledger(&self) -> &StorageLedger {
        &self.ledger
    }

    pub fn block_store(&self) -> &BlockStore {
        &self.blocks
    }

    /// What this provider advertises in the directory.
    pub fn provider_info(&self) -> Result<ProviderInfo> {
        let stats = self.ledger.stats()?;
        Ok(ProviderInfo {
            id: self.config.provider_id.clone(),
            public_key: self.public_key.clone(),
            address: self.config.api_address.clone(),
            space_avail: self.config.total_storage - stats.storage_reserved,
            storage_rate: self.config.storage_rate,
        })
    }

    pub fn negotiate_contract(&self, contract: &Contract) -> Result<Contract> {
        self.ledger.negotiate_contract(contract)
    }

    /// Charges the ledger first, then writes the file; a failed write
    /// releases the charge again.
    pub fn store_block(&self, renter_id: &str, block_id: &str, contract_id: &str, bytes: &[u8]) -> Result<StoreAck> {
        if !self.ledger.has_contract(renter_id, contract_id)? {
            return Err(Error::NotFound(format!("renter {renter_id} holds no contract {contract_id} here")));
        }
        self.blocks.path_for(renter_id, block_id)?;
        let newly_recorded = self.ledger.record_block_stored(renter_id, block_id, bytes.len() as i64)?;
        if let Err(e) = self.blocks.write(renter_id, block_id, bytes) {
            if newly_recorded {
                if let Err(rb) = self.ledger.record_block_deleted(renter_id, block_id) {
                    warn!(block = %block_id, error = %rb, "rollback after failed block write also failed");
                }
            }
            return Err(e);
        }
        Ok(StoreAck { block_id: block_id.to_string(), sha256_hash: sha256_hex(bytes) })
    }

    pub fn fetch_block(&self, renter_id: &str, block_id: &str) -> Result<Vec<u8>> {
        let bytes = self.blocks.read(renter_id, block_id)?;
        self.ledger.record_block_fetched(renter_id, block_id);
        Ok(bytes)
    }

    /// Deleting a block that is not here succeeds.
    pub fn delete_block(&self, renter_id: &str, block_id: &str) -> Result<()> {
        self.blocks.remove(renter_id, block_id)?;
        self.ledger.record_block_deleted(renter_id, block_id)
    }

    pub fn audit(&self) -> Result<AuditReport> {
        let snap = self.ledger.snapshot()?;
        let mut on_disk = self.blocks.list()?;
        let mut report = AuditReport::default();
        for (renter_id, account) in &snap.renters {
            for b in &account.blocks {
                let key = (renter_id.clone(), b.block_id.clone());
                let r = BlockRef { renter_id: renter_id.clone(), block_id: b.block_id.clone() };
                if !on_disk.remove(&key) {
                    report.missing_on_disk.push(r);
                    continue;
                }
                let len = fs::metadata(self.blocks.path_for(renter_id, &b.block_id)?)?.len();
                if len as i64 != b.size {
                    report.size_mismatch.push(r);
                }
            }
        }
        report.untracked_on_disk = on_disk
            .into_iter()
            .map(|(renter_id, block_id)| BlockRef { renter_id, block_id })
            .collect();
        if !report.is_clean() {
            warn!(
                provider = %self.config.provider_id,
                missing = report.missing_on_disk.len(),
                untracked = report.untracked_on_disk.len(),
                mismatched = report.size_mismatch.len(),
                "ledger and disk disagree"
            );
        }
        Ok(report)
    }

    pub fn info(&self) -> Result<ProviderStatus> {
        Ok(ProviderStatus {
            provider_id: self.config.provider_id.clone(),
            address: self.config.api_address.clone(),
            public_key: self.public_key.clone(),
            total_storage: self.config.total_storage,
            stats: self.ledger.stats()?,
            contracts: self.ledger.contracts()?.len(),
            activity: self.ledger.activity()?,
        })
    }
}
