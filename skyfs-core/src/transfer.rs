//! Moving a version's blocks to and from providers on a bounded worker
//! pool, with per-block retry and compensation on failed uploads.

use crate::error::{Error, Result};
use crate::network::ProviderNetwork;
use crate::progress::Progress;
use crate::types::{Block, BlockLocation, Version};
use crate::version::sha256_hex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferConfig {
    pub workers: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self { workers: 4, max_attempts: 3, backoff_base_ms: 50 }
    }
}

/// Shared flag checked before every transfer attempt.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A block that should no longer exist on its provider but could not be
/// deleted yet.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingDelete {
    pub block_id: String,
    pub location: BlockLocation,
}

impl PendingDelete {
    pub fn for_block(block: &Block) -> Self {
        Self { block_id: block.id.clone(), location: block.location.clone() }
    }
}

/// Why an upload was abandoned, plus whatever compensation could not clean up.
#[derive(Debug)]
pub struct UploadFailure {
    pub error: Error,
    pub unreconciled: Vec<PendingDelete>,
}

impl From<UploadFailure> for Error {
    fn from(f: UploadFailure) -> Self {
        f.error
    }
}

fn pool(cfg: &TransferConfig) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.workers.max(1))
        .build()
        .map_err(|e| Error::Validation(format!("transfer pool: {e}")))
}

/// Runs `op` until it succeeds, fails with a non-retryable error, runs out
/// of attempts, or `stop` turns true. Waits `base * 2^attempt` between tries.
fn with_retry<T>(
    cfg: &TransferConfig,
    what: &str,
    stop: impl Fn() -> bool,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let max = cfg.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        if stop() {
            return Err(Error::Cancelled);
        }
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt + 1 < max => {
                let delay = cfg.backoff_base_ms.saturating_mul(1u64 << attempt.min(16));
                warn!(what, attempt = attempt + 1, of = max, delay_ms = delay, error = %e, "retrying");
                thread::sleep(Duration::from_millis(delay));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Returns whether the provider ever acknowledged the block, alongside
/// the outcome. An acknowledged block may sit on the provider even when
/// its ack hash was wrong.
fn store_one(
    net: &dyn ProviderNetwork,
    renter_id: &str,
    block: &Block,
    bytes: &[u8],
    cfg: &TransferConfig,
    stop: impl Fn() -> bool,
) -> (bool, Result<()>) {
    let mut acked = false;
    let r = with_retry(cfg, &block.id, stop, || {
        let loc = &block.location;
        let ack = net.store_block(&loc.address, renter_id, &block.id, &loc.contract_id, bytes)?;
        acked = true;
        if ack.sha256_hash != block.sha256_hash {
            return Err(Error::Transport(format!(
                "provider {} acknowledged block {} with hash {}",
                loc.provider_id, block.id, ack.sha256_hash
            )));
        }
        Ok(())
    });
    (acked, r)
}

/// Stores every block; `shards[i]` is the content of `blocks[i]`. Either
/// all blocks are confirmed or the ones already stored are deleted again.
pub fn upload_blocks(
    net: &dyn ProviderNetwork,
    renter_id: &str,
    blocks: &[Block],
    shards: &[Vec<u8>],
    cfg: &TransferConfig,
    cancel: &CancelToken,
    progress: &Progress,
) -> std::result::Result<(), UploadFailure> {
    if blocks.len() != shards.len() {
        return Err(UploadFailure {
            error: Error::Validation(format!("{} blocks but {} shards", blocks.len(), shards.len())),
            unreconciled: Vec::new(),
        });
    }
    let workers = pool(cfg).map_err(|error| UploadFailure { error, unreconciled: Vec::new() })?;
    progress.set_stage("upload", blocks.len());
    let aborted = AtomicBool::new(false);
    let stop = || cancel.is_cancelled() || aborted.load(Ordering::SeqCst);

    let results: Vec<(bool, Result<()>)> = workers.install(|| {
        blocks
            .par_iter()
            .zip(shards.par_iter())
            .map(|(block, bytes)| {
                let (acked, r) = store_one(net, renter_id, block, bytes, cfg, stop);
                match &r {
                    Ok(()) => {
                        debug!(block = %block.id, provider = %block.location.provider_id, "block stored");
                        progress.block_done(bytes.len());
                    }
                    Err(_) => aborted.store(true, Ordering::SeqCst),
                }
                (acked, r)
            })
            .collect()
    });

    let mut error = None;
    let mut confirmed = 0;
    let mut acked_blocks = Vec::new();
    for (block, (acked, r)) in blocks.iter().zip(results) {
        if acked {
            acked_blocks.push(block.clone());
        }
        match r {
            Ok(()) => confirmed += 1,
            Err(Error::Cancelled) => {}
            Err(e) => {
                if error.is_none() {
                    error = Some(e);
                }
            }
        }
    }
    if confirmed == blocks.len() {
        return Ok(());
    }
    let error = error.unwrap_or(Error::Cancelled);
    warn!(renter = %renter_id, confirmed, of = blocks.len(), error = %error, "upload abandoned, deleting stored blocks");
    let unreconciled = delete_blocks(net, renter_id, &acked_blocks, cfg);
    Err(UploadFailure { error, unreconciled })
}

/// Best-effort delete of every block, returning the ones that could not
/// be removed.
pub fn delete_blocks(net: &dyn ProviderNetwork, renter_id: &str, blocks: &[Block], cfg: &TransferConfig) -> Vec<PendingDelete> {
    let pending: Vec<PendingDelete> = blocks.iter().map(PendingDelete::for_block).collect();
    retry_deletes(net, renter_id, pending, cfg)
}

pub fn retry_deletes(
    net: &dyn ProviderNetwork,
    renter_id: &str,
    pending: Vec<PendingDelete>,
    cfg: &TransferConfig,
) -> Vec<PendingDelete> {
    let workers = match pool(cfg) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "no worker pool for deletes");
            return pending;
        }
    };
    let left: Vec<PendingDelete> = workers.install(|| {
        pending
            .into_par_iter()
            .filter(|p| {
                let r = with_retry(cfg, &p.block_id, || false, || {
                    net.delete_block(&p.location.address, renter_id, &p.block_id)
                });
                if let Err(e) = &r {
                    warn!(block = %p.block_id, provider = %p.location.provider_id, error = %e, "block left unreconciled");
                }
                r.is_err()
            })
            .collect()
    });
    left
}

fn fetch_set(
    net: &dyn ProviderNetwork,
    renter_id: &str,
    blocks: &[Block],
    cfg: &TransferConfig,
    cancel: &CancelToken,
    progress: &Progress,
) -> Result<Vec<(usize, Option<Vec<u8>>)>> {
    let results: Vec<Result<(usize, Option<Vec<u8>>)>> = blocks
        .par_iter()
        .map(|block| {
            let fetched = with_retry(cfg, &block.id, || cancel.is_cancelled(), || {
                net.fetch_block(&block.location.address, renter_id, &block.id)
            });
            match fetched {
                Err(Error::Cancelled) => Err(Error::Cancelled),
                Err(e) => {
                    warn!(block = %block.id, provider = %block.location.provider_id, error = %e, "block unavailable");
                    Ok((block.num, None))
                }
                Ok(bytes) if sha256_hex(&bytes) != block.sha256_hash => {
                    warn!(block = %block.id, provider = %block.location.provider_id, "block failed hash check");
                    Ok((block.num, None))
                }
                Ok(bytes) => {
                    progress.block_done(bytes.len());
                    Ok((block.num, Some(bytes)))
                }
            }
        })
        .collect();
    results.into_iter().collect()
}

/// Fetches data blocks first and falls back to parity only when some data
/// block is missing or corrupt. The result is indexed by block number.
pub fn download_blocks(
    net: &dyn ProviderNetwork,
    renter_id: &str,
    version: &Version,
    cfg: &TransferConfig,
    cancel: &CancelToken,
    progress: &Progress,
) -> Result<Vec<Option<Vec<u8>>>> {
    let k = version.num_data_blocks;
    let total = version.total_blocks();
    if version.blocks.len() != total || version.blocks.iter().any(|b| b.num >= total) {
        return Err(Error::Validation(format!(
            "version {} lists {} blocks for k={k} m={}",
            version.num,
            version.blocks.len(),
            version.num_parity_blocks
        )));
    }
    let workers = pool(cfg)?;
    progress.set_stage("download", k);
    let (data, parity): (Vec<Block>, Vec<Block>) = version.blocks.iter().cloned().partition(|b| b.num < k);

    let mut shards: Vec<Option<Vec<u8>>> = vec![None; total];
    for (num, bytes) in workers.install(|| fetch_set(net, renter_id, &data, cfg, cancel, progress))? {
        shards[num] = bytes;
    }
    let mut valid = shards.iter().filter(|s| s.is_some()).count();
    if valid < k {
        debug!(valid, needed = k, "fetching parity blocks");
        for (num, bytes) in workers.install(|| fetch_set(net, renter_id, &parity, cfg, cancel, progress))? {
            shards[num] = bytes;
        }
        valid = shards.iter().filter(|s| s.is_some()).count();
    }
    if valid < k {
        return Err(Error::Transport(format!(
            "recovered {valid} of {total} blocks, {k} needed to rebuild version {}",
            version.num
        )));
    }
    Ok(shards)
}
