mod common;

use common::{fast_transfer, random_bytes, Cluster, MB};
use skyfs_core::config::RenterConfig;
use skyfs_core::keys::Identity;
use skyfs_core::network::{LocalNetwork, ProviderNetwork, StoreAck};
use skyfs_core::renter::Renter;
use skyfs_core::transfer::{CancelToken, TransferConfig};
use skyfs_core::types::Contract;
use skyfs_core::version::RedundancyPolicy;
use skyfs_core::{Error, ErrorKind, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Wraps the in-process network with per-address failure switches.
#[derive(Default)]
struct Faults {
    refuse_stores: Option<String>,
    refuse_deletes: Option<String>,
    bad_ack: Option<String>,
}

struct FlakyNet {
    inner: Arc<LocalNetwork>,
    faults: Mutex<Faults>,
    store_calls: AtomicUsize,
}

impl FlakyNet {
    fn new(inner: Arc<LocalNetwork>) -> Self {
        Self { inner, faults: Mutex::new(Faults::default()), store_calls: AtomicUsize::new(0) }
    }

    fn set(&self, f: impl FnOnce(&mut Faults)) {
        f(&mut self.faults.lock().unwrap());
    }

    fn hits(&self, pick: impl Fn(&Faults) -> &Option<String>, address: &str) -> bool {
        pick(&self.faults.lock().unwrap()).as_deref() == Some(address)
    }
}

impl ProviderNetwork for FlakyNet {
    fn negotiate_contract(&self, address: &str, contract: &Contract) -> Result<Contract> {
        self.inner.negotiate_contract(address, contract)
    }

    fn store_block(&self, address: &str, renter_id: &str, block_id: &str, contract_id: &str, bytes: &[u8]) -> Result<StoreAck> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        if self.hits(|f| &f.refuse_stores, address) {
            return Err(Error::Transport(format!("{address} unreachable")));
        }
        let mut ack = self.inner.store_block(address, renter_id, block_id, contract_id, bytes)?;
        if self.hits(|f| &f.bad_ack, address) {
            ack.sha256_hash = "00".repeat(32);
        }
        Ok(ack)
    }

    fn fetch_block(&self, address: &str, renter_id: &str, block_id: &str) -> Result<Vec<u8>> {
        self.inner.fetch_block(address, renter_id, block_id)
    }

    fn delete_block(&self, address: &str, renter_id: &str, block_id: &str) -> Result<()> {
        if self.hits(|f| &f.refuse_deletes, address) {
            return Err(Error::Transport(format!("{address} unreachable")));
        }
        self.inner.delete_block(address, renter_id, block_id)
    }
}

fn flaky_renter(cluster: &Cluster) -> (Renter, Arc<FlakyNet>) {
    let net = Arc::new(FlakyNet::new(cluster.net.clone()));
    let mut config = RenterConfig::new("r1", "r1");
    config.redundancy = RedundancyPolicy::fixed(2, 1);
    // slow enough backoff that healthy blocks land before a refused one gives up
    config.transfer = TransferConfig { backoff_base_ms: 40, ..fast_transfer() };
    let renter = Renter::new(config, Identity::generate("r1"), cluster.dir.clone(), net.clone()).unwrap();
    renter.register().unwrap();
    renter.reserve_storage(MB, 3).unwrap();
    (renter, net)
}

fn blocks_on_disk(cluster: &Cluster) -> usize {
    cluster.providers.iter().map(|p| p.block_store().list().unwrap().len()).sum()
}

fn used(cluster: &Cluster) -> i64 {
    cluster.providers.iter().map(|p| p.ledger().stats().unwrap().storage_used).sum()
}

#[test]
fn transient_failures_are_retried() {
    let cluster = Cluster::new(3, 4 * MB);
    let renter = cluster.renter("r1", 2, 1);
    renter.reserve_storage(MB, 3).unwrap();
    cluster.net.fail_next("local://p1", 2);
    let data = random_bytes(9000, 5);
    let file = renter.upload("a.bin", &data, false).unwrap();
    assert_eq!(blocks_on_disk(&cluster), 3);
    assert_eq!(renter.download(&file.id, None).unwrap(), data);
}

#[test]
fn failed_upload_deletes_what_was_stored() {
    let cluster = Cluster::new(3, 4 * MB);
    let renter = cluster.renter("r1", 2, 1);
    renter.reserve_storage(MB, 3).unwrap();
    cluster.net.set_offline("local://p2", true);

    let err = renter.upload("a.bin", &random_bytes(9000, 5), false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(blocks_on_disk(&cluster), 0);
    assert_eq!(used(&cluster), 0);
    assert!(renter.list_files().unwrap().is_empty());
    assert!(renter.pending_deletes().is_empty());
}

#[test]
fn failed_existing_file_upload_keeps_previous_version() {
    let cluster = Cluster::new(3, 4 * MB);
    let renter = cluster.renter("r1", 2, 1);
    renter.reserve_storage(MB, 3).unwrap();
    let v1 = random_bytes(4000, 1);
    let file = renter.upload("a.bin", &v1, false).unwrap();

    cluster.net.set_offline("local://p0", true);
    assert!(renter.upload("a.bin", &random_bytes(4000, 2), true).is_err());
    cluster.net.set_offline("local://p0", false);

    let after = renter.find_by_name("a.bin").unwrap();
    assert_eq!(after.versions.len(), 1);
    assert_eq!(renter.download(&file.id, None).unwrap(), v1);
    assert_eq!(blocks_on_disk(&cluster), 3);
}

#[test]
fn undeletable_blocks_are_queued_and_reconciled() {
    let cluster = Cluster::new(3, 4 * MB);
    let (renter, net) = flaky_renter(&cluster);
    net.set(|f| {
        f.refuse_stores = Some("local://p2".into());
        f.refuse_deletes = Some("local://p0".into());
    });

    let err = renter.upload("a.bin", &random_bytes(9000, 5), false).unwrap_err();
    assert!(err.is_retryable());
    let pending = renter.pending_deletes();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].location.provider_id, "p0");
    assert_eq!(blocks_on_disk(&cluster), 1);

    assert_eq!(renter.reconcile().unwrap(), 1);
    net.set(|f| f.refuse_deletes = None);
    assert_eq!(renter.reconcile().unwrap(), 0);
    assert!(renter.pending_deletes().is_empty());
    assert_eq!(blocks_on_disk(&cluster), 0);
    assert_eq!(used(&cluster), 0);
}

#[test]
fn wrong_ack_hash_counts_as_transport_failure() {
    let cluster = Cluster::new(3, 4 * MB);
    let (renter, net) = flaky_renter(&cluster);
    net.set(|f| f.bad_ack = Some("local://p1".into()));
    let err = renter.upload("a.bin", &random_bytes(2000, 9), false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.to_string().contains("acknowledged"));
    assert_eq!(blocks_on_disk(&cluster), 0);
    // p1 was asked three times
    assert!(net.store_calls.load(Ordering::SeqCst) >= 3);
}

#[test]
fn cancelled_upload_stores_nothing() {
    let cluster = Cluster::new(3, 4 * MB);
    let (renter, net) = flaky_renter(&cluster);
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = renter.upload_with_cancel("a.bin", b"data", false, &cancel).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(net.store_calls.load(Ordering::SeqCst), 0);
    assert_eq!(blocks_on_disk(&cluster), 0);
    assert!(renter.list_files().unwrap().is_empty());
}

#[test]
fn cancelled_download_reports_cancelled() {
    let cluster = Cluster::new(3, 4 * MB);
    let renter = cluster.renter("r1", 2, 1);
    renter.reserve_storage(MB, 3).unwrap();
    let file = renter.upload("a.bin", b"data", false).unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = renter.download_with_cancel(&file.id, None, &cancel).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}
