#![allow(dead_code)]

use rand::{rngs::StdRng, Rng, SeedableRng};
use skyfs_core::config::{ProviderConfig, RenterConfig};
use skyfs_core::directory::{MemoryDirectory, MetadataDirectory};
use skyfs_core::keys::Identity;
use skyfs_core::network::LocalNetwork;
use skyfs_core::provider::Provider;
use skyfs_core::renter::Renter;
use skyfs_core::transfer::TransferConfig;
use skyfs_core::version::RedundancyPolicy;
use std::sync::Arc;

pub const MB: i64 = 1 << 20;

pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

pub fn fast_transfer() -> TransferConfig {
    TransferConfig { workers: 4, max_attempts: 3, backoff_base_ms: 1 }
}

/// `n` providers with homes in one temp dir, wired to a shared in-process
/// network and directory.
pub struct Cluster {
    pub td: tempfile::TempDir,
    pub net: Arc<LocalNetwork>,
    pub dir: Arc<MemoryDirectory>,
    pub providers: Vec<Arc<Provider>>,
}

impl Cluster {
    pub fn new(n: usize, capacity: i64) -> Self {
        let td = tempfile::tempdir().unwrap();
        let net = Arc::new(LocalNetwork::new());
        let dir = Arc::new(MemoryDirectory::new());
        let mut providers = Vec::new();
        for i in 0..n {
            let id = format!("p{i}");
            let identity = Identity::generate(&id);
            let config = ProviderConfig::new(&id, format!("local://{id}"), capacity);
            let p = Arc::new(Provider::open(config, &identity, &td.path().join(&id)).unwrap());
            dir.insert_provider(&p.provider_info().unwrap()).unwrap();
            net.attach(p.clone());
            providers.push(p);
        }
        Self { td, net, dir, providers }
    }

    pub fn renter_with(&self, id: &str, config: RenterConfig) -> Renter {
        let renter = Renter::new(config, Identity::generate(id), self.dir.clone(), self.net.clone()).unwrap();
        renter.register().unwrap();
        renter
    }

    /// Registered renter using fixed `k + m` redundancy.
    pub fn renter(&self, id: &str, k: usize, m: usize) -> Renter {
        let mut config = RenterConfig::new(id, format!("{id}-alias"));
        config.redundancy = RedundancyPolicy::fixed(k, m);
        config.transfer = fast_transfer();
        self.renter_with(id, config)
    }

    pub fn provider(&self, id: &str) -> &Arc<Provider> {
        self.providers.iter().find(|p| p.id() == id).unwrap()
    }
}
