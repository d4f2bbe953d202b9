//! File versions: encrypt, pad, split into `k` data shards, add `m`
//! Reed-Solomon parity shards, and the reverse.

use crate::cipher::{random_salt, FileKey};
use crate::error::{Error, Result};
use crate::rs_codec::{RsCodec, MAX_SHARDS};
use crate::types::{Block, BlockLocation, File, Version};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const DEFAULT_TARGET_BLOCK: u64 = 4 << 20;

/// How many data and parity shards a version gets.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum RedundancyPolicy {
    /// Always `data_blocks` + `parity_blocks`.
    #[serde(rename_all = "camelCase")]
    Fixed { data_blocks: usize, parity_blocks: usize },
    /// `k = clamp(ceil(size / target_block_size), 1, max_data_blocks)`,
    /// `m = max(1, ceil(k * parity_ratio))`.
    #[serde(rename_all = "camelCase")]
    Ratio { target_block_size: u64, max_data_blocks: usize, parity_ratio: f64 },
}

impl Default for RedundancyPolicy {
    fn default() -> Self {
        RedundancyPolicy::Ratio {
            target_block_size: DEFAULT_TARGET_BLOCK,
            max_data_blocks: 4,
            parity_ratio: 0.5,
        }
    }
}

impl RedundancyPolicy {
    pub fn fixed(data_blocks: usize, parity_blocks: usize) -> Self {
        RedundancyPolicy::Fixed { data_blocks, parity_blocks }
    }

    pub fn shard_counts(&self, upload_size: usize) -> Result<(usize, usize)> {
        let (k, m) = self.raw_counts(upload_size)?;
        if k == 0 || m == 0 || k.checked_add(m).map_or(true, |n| n > MAX_SHARDS) {
            return Err(Error::Validation(format!(
                "redundancy policy gives k={k} m={m}; need k, m >= 1 and k+m <= {MAX_SHARDS}"
            )));
        }
        Ok((k, m))
    }

    fn raw_counts(&self, upload_size: usize) -> Result<(usize, usize)> {
        match *self {
            RedundancyPolicy::Fixed { data_blocks, parity_blocks } => Ok((data_blocks, parity_blocks)),
            RedundancyPolicy::Ratio { target_block_size, max_data_blocks, parity_ratio } => {
                if target_block_size == 0 || max_data_blocks == 0 {
                    return Err(Error::Validation("redundancy policy needs a block size and data block limit".into()));
                }
                if !parity_ratio.is_finite() || parity_ratio <= 0.0 {
                    return Err(Error::Validation(format!("parity ratio must be positive, got {parity_ratio}")));
                }
                let k = (upload_size as u64).div_ceil(target_block_size).clamp(1, max_data_blocks as u64) as usize;
                let m = ((k as f64) * parity_ratio).ceil().max(1.0) as usize;
                Ok((k, m))
            }
        }
    }
}

/// A version whose blocks are encoded but not yet placed. `shards[i]`
/// holds the bytes of `version.blocks[i]`.
#[derive(Debug, Clone)]
pub struct EncodedVersion {
    pub version: Version,
    pub shards: Vec<Vec<u8>>,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// `key` is the file's unwrapped AES key and IV; the file record itself
/// only carries wrapped copies.
pub fn create_version(file: &File, key: &FileKey, plaintext: &[u8], policy: &RedundancyPolicy) -> Result<EncodedVersion> {
    if file.is_dir {
        return Err(Error::Validation(format!("{} is a folder and has no content versions", file.name)));
    }
    let salt = random_salt();
    let mut buf = key.encrypt(plaintext, &salt)?;
    let upload_size = buf.len();

    let (k, m) = policy.shard_counts(upload_size)?;
    let codec = RsCodec::new(k, m)?;
    let shard_len = upload_size.div_ceil(k);
    let padded = shard_len * k;
    buf.resize(padded, 0);

    let data: Vec<Vec<u8>> = buf.chunks(shard_len).map(|c| c.to_vec()).collect();
    let parity = codec.parity_for(&data)?;
    let mut shards = data;
    shards.extend(parity);

    let hashes: Vec<String> = shards.par_iter().map(|s| sha256_hex(s)).collect();
    let blocks = hashes
        .into_iter()
        .enumerate()
        .map(|(num, sha256_hash)| Block {
            id: uuid::Uuid::new_v4().to_string(),
            num,
            size: shard_len as i64,
            sha256_hash,
            location: BlockLocation::default(),
        })
        .collect();

    let version = Version {
        num: 0,
        size: plaintext.len() as i64,
        mod_time: chrono::Utc::now(),
        upload_size: upload_size as i64,
        padding_bytes: (padded - upload_size) as i64,
        num_data_blocks: k,
        num_parity_blocks: m,
        nonce_salt: hex::encode(salt),
        blocks,
    };
    Ok(EncodedVersion { version, shards })
}

/// Rebuilds the ciphertext from any `k` verified shards. `shards` is
/// indexed by block number; `None` marks a missing or rejected block.
pub fn reconstruct(version: &Version, mut shards: Vec<Option<Vec<u8>>>) -> Result<Vec<u8>> {
    let k = version.num_data_blocks;
    let codec = RsCodec::new(k, version.num_parity_blocks)?;
    let shard_len = version.blocks.first().map(|b| b.size as usize).unwrap_or(0);
    for (i, s) in shards.iter().enumerate() {
        if let Some(s) = s {
            if s.len() != shard_len {
                return Err(Error::Validation(format!("shard {i} has {} bytes, expected {shard_len}", s.len())));
            }
        }
    }
    if shards.iter().take(k).any(|s| s.is_none()) {
        codec.reconstruct_data(&mut shards)?;
    }
    let mut out = Vec::with_capacity(shard_len * k);
    for s in shards.into_iter().take(k) {
        match s {
            Some(s) => out.extend_from_slice(&s),
            None => return Err(Error::Validation("data shard still missing after reconstruction".into())),
        }
    }
    let padding = version.padding_bytes as usize;
    if padding > out.len() || out.len() - padding != version.upload_size as usize {
        return Err(Error::Validation(format!(
            "version {}: padding {} inconsistent with upload size {}",
            version.num, version.padding_bytes, version.upload_size
        )));
    }
    out.truncate(out.len() - padding);
    Ok(out)
}

pub fn decode_version(key: &FileKey, version: &Version, shards: Vec<Option<Vec<u8>>>) -> Result<Vec<u8>> {
    let ciphertext = reconstruct(version, shards)?;
    let salt = hex::decode(&version.nonce_salt).map_err(|e| Error::Validation(format!("nonce salt: {e}")))?;
    key.decrypt(&ciphertext, &salt)
}
