use crate::config::{load_json, save_json};
use crate::error::{Error, Result};
use crate::types::Contract;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub const SNAPSHOT_FILE: &str = "snapshot.json";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub storage_reserved: i64,
    pub storage_used: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    #[serde(rename = "blockId")]
    pub block_id: String,
    #[serde(rename = "blockSize")]
    pub size: i64,
}

/// Per-renter accounting. Holds signed contracts by value; nothing here
/// ever edits contract terms.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RenterAccount {
    pub storage_reserved: i64,
    pub storage_used: i64,
    #[serde(default)]
    pub contracts: Vec<Contract>,
    #[serde(default)]
    pub blocks: Vec<BlockInfo>,
}

impl RenterAccount {
    pub fn block(&self, block_id: &str) -> Option<&BlockInfo> {
        self.blocks.iter().find(|b| b.block_id == block_id)
    }

    pub fn has_contract(&self, contract_id: &str) -> bool {
        self.contracts.iter().any(|c| c.id == contract_id)
    }
}

/// Whole provider state, written in one piece after every mutation.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub contracts: Vec<Contract>,
    pub stats: Stats,
    pub renters: BTreeMap<String, RenterAccount>,
}

pub trait SnapshotSink: Send + Sync {
    fn save(&self, snapshot: &Snapshot) -> Result<()>;
    fn load(&self) -> Result<Option<Snapshot>>;
}

/// `snapshot.json` in the provider home, replaced atomically on save.
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(home: &Path) -> Self {
        Self { path: home.join(SNAPSHOT_FILE) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotSink for FileSnapshotStore {
    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        save_json(&self.path, snapshot)
    }

    fn load(&self) -> Result<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        load_json(&self.path)
            .map(Some)
            .map_err(|e| Error::Validation(format!("unable to load snapshot {:?}: {e}", self.path)))
    }
}

/// Keeps the last snapshot in memory; can be told to fail saves.
#[derive(Default)]
pub struct MemorySnapshotStore {
    last: Mutex<Option<Snapshot>>,
    fail_saves: AtomicBool,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn last(&self) -> Option<Snapshot> {
        self.last.lock().ok().and_then(|g| g.clone())
    }
}

impl SnapshotSink for MemorySnapshotStore {
    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "snapshot store unavailable")));
        }
        let mut g = self.last.lock().map_err(|_| Error::Consistency("snapshot lock poisoned".into()))?;
        *g = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<Snapshot>> {
        Ok(self.last())
    }
}
