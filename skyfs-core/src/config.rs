use crate::error::Result;
use crate::placement::PlacementPolicy;
use crate::transfer::TransferConfig;
use crate::version::RedundancyPolicy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::Path;

pub const DEFAULT_MAX_ACTIVITY: usize = 10;

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub provider_id: String,
    #[serde(rename = "apiAddress")]
    pub api_address: String,
    pub total_storage: i64,
    #[serde(default)]
    pub storage_rate: i64,
    #[serde(default = "default_max_activity")]
    pub max_activity: usize,
}

fn default_max_activity() -> usize {
    DEFAULT_MAX_ACTIVITY
}

impl ProviderConfig {
    pub fn new(provider_id: impl Into<String>, api_address: impl Into<String>, total_storage: i64) -> Self {
        Self {
            provider_id: provider_id.into(),
            api_address: api_address.into(),
            total_storage,
            storage_rate: 0,
            max_activity: DEFAULT_MAX_ACTIVITY,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RenterConfig {
    pub renter_id: String,
    pub alias: String,
    #[serde(default)]
    pub redundancy: RedundancyPolicy,
    #[serde(default)]
    pub placement: PlacementPolicy,
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl RenterConfig {
    pub fn new(renter_id: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            renter_id: renter_id.into(),
            alias: alias.into(),
            redundancy: RedundancyPolicy::default(),
            placement: PlacementPolicy::default(),
            transfer: TransferConfig::default(),
        }
    }
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let f = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(f))?)
}

/// Whole-file overwrite: write a sibling temp file, fsync, rename over the target.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    {
        let mut f = File::create(&tmp)?;
        f.write_all(serde_json::to_string_pretty(value)?.as_bytes())?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
