use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub id: String,
    pub public_key: String,
    pub address: String,
    #[serde(default)]
    pub space_avail: i64,
    #[serde(default)]
    pub storage_rate: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RenterInfo {
    pub id: String,
    pub alias: String,
    /// Ed25519 verifying key (hex), checked against renter contract signatures.
    pub public_key: String,
    /// X25519 public key (hex) that shared file keys are wrapped to.
    pub encryption_key: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub shared: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    #[serde(rename = "contractId")]
    pub id: String,
    pub renter_id: String,
    pub provider_id: String,
    pub storage_space: i64,
    #[serde(default)]
    pub renter_signature: String,
    #[serde(default)]
    pub provider_signature: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockLocation {
    pub provider_id: String,
    pub address: String,
    pub contract_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    /// Position within the version: `[0, k)` data shards, `[k, k+m)` parity.
    pub num: usize,
    pub size: i64,
    #[serde(rename = "sha256hash")]
    pub sha256_hash: String,
    pub location: BlockLocation,
}

/// Grants a non-owner access to a file. Key material is the file's
/// AES key/IV wrapped to the recipient's encryption key.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub renter_id: String,
    pub aes_key: String,
    #[serde(rename = "aesIV")]
    pub aes_iv: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct File {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub is_dir: bool,
    #[serde(default)]
    pub access_list: Vec<Permission>,
    /// File key and IV, each wrapped to the owner's encryption key.
    pub aes_key: String,
    #[serde(rename = "aesIV")]
    pub aes_iv: String,
    #[serde(default)]
    pub versions: Vec<Version>,
}

impl File {
    pub fn latest_version(&self) -> Option<&Version> {
        self.versions.iter().max_by_key(|v| v.num)
    }

    pub fn version(&self, num: u64) -> Option<&Version> {
        self.versions.iter().find(|v| v.num == num)
    }

    pub fn permission_for(&self, renter_id: &str) -> Option<&Permission> {
        self.access_list.iter().find(|p| p.renter_id == renter_id)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub num: u64,
    pub size: i64,
    pub mod_time: DateTime<Utc>,
    pub upload_size: i64,
    pub padding_bytes: i64,
    pub num_data_blocks: usize,
    pub num_parity_blocks: usize,
    /// Mixed with the file IV so every version encrypts under a fresh nonce.
    pub nonce_salt: String,
    pub blocks: Vec<Block>,
}

impl Version {
    pub fn total_blocks(&self) -> usize {
        self.num_data_blocks + self.num_parity_blocks
    }
}
