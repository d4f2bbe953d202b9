use crate::error::{Error, Result};
use reed_solomon_erasure::galois_8::ReedSolomon;

/// GF(2^8) limits a code to this many shards in total.
pub const MAX_SHARDS: usize = 256;

/// Systematic Reed-Solomon over GF(2^8): `k` data shards stay verbatim,
/// `m` parity shards are appended, any `k` of `k+m` rebuild the rest.
pub struct RsCodec {
    pub k: usize,
    pub m: usize,
    inner: ReedSolomon,
}

impl RsCodec {
    pub fn new(k: usize, m: usize) -> Result<Self> {
        if k == 0 || m == 0 {
            return Err(Error::Validation(format!("erasure code needs k >= 1 and m >= 1 (k={k}, m={m})")));
        }
        if k.checked_add(m).filter(|n| *n <= MAX_SHARDS).is_none() {
            return Err(Error::Validation(format!("erasure code supports at most {MAX_SHARDS} shards (k={k}, m={m})")));
        }
        let inner = ReedSolomon::new(k, m).map_err(codec_err)?;
        Ok(Self { k, m, inner })
    }

    /// Computes parity in place; `shards` holds `k` data then `m` zeroed parity slices.
    pub fn encode(&self, shards: &mut [&mut [u8]]) -> Result<()> {
        self.inner.encode(shards).map_err(codec_err)
    }

    /// Returns the `m` parity shards for `data` (`k` equal-length shards).
    pub fn parity_for(&self, data: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
        if data.len() != self.k {
            return Err(Error::Validation(format!("expected {} data shards, got {}", self.k, data.len())));
        }
        let shard_len = data[0].len();
        let mut work: Vec<Vec<u8>> = data.to_vec();
        work.extend((0..self.m).map(|_| vec![0u8; shard_len]));
        let mut refs: Vec<&mut [u8]> = work.iter_mut().map(|v| v.as_mut_slice()).collect();
        self.encode(&mut refs)?;
        Ok(work.split_off(self.k))
    }

    /// Fills every missing shard, data and parity, in place.
    pub fn reconstruct(&self, shards: &mut [Option<Vec<u8>>]) -> Result<()> {
        self.check_present(shards)?;
        self.inner.reconstruct(shards).map_err(codec_err)
    }

    /// Like [`reconstruct`](Self::reconstruct) but only rebuilds missing data shards.
    pub fn reconstruct_data(&self, shards: &mut [Option<Vec<u8>>]) -> Result<()> {
        self.check_present(shards)?;
        self.inner.reconstruct_data(shards).map_err(codec_err)
    }

    fn check_present(&self, shards: &[Option<Vec<u8>>]) -> Result<()> {
        if shards.len() != self.k + self.m {
            return Err(Error::Validation(format!(
                "expected {} shards, got {}",
                self.k + self.m,
                shards.len()
            )));
        }
        let present = shards.iter().filter(|s| s.is_some()).count();
        if present < self.k {
            return Err(Error::Validation(format!("only {present} of {} required shards present", self.k)));
        }
        Ok(())
    }
}

fn codec_err(e: reed_solomon_erasure::Error) -> Error {
    Error::Validation(format!("erasure code: {e:?}"))
}
