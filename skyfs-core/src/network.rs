use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::types::Contract;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Returned by a provider once a block is durably stored.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoreAck {
    pub block_id: String,
    #[serde(rename = "sha256hash")]
    pub sha256_hash: String,
}

/// How a renter reaches providers. Implementations report unreachable
/// peers as [`Error::Transport`].
pub trait ProviderNetwork: Send + Sync {
    fn negotiate_contract(&self, address: &str, contract: &Contract) -> Result<Contract>;

    fn store_block(
        &self,
        address: &str,
        renter_id: &str,
        block_id: &str,
        contract_id: &str,
        bytes: &[u8],
    ) -> Result<StoreAck>;

    fn fetch_block(&self, address: &str, renter_id: &str, block_id: &str) -> Result<Vec<u8>>;

    fn delete_block(&self, address: &str, renter_id: &str, block_id: &str) -> Result<()>;
}

#[derive(Default, Clone, Copy)]
struct Fault {
    offline: bool,
    fail_next: usize,
}

/// In-process network: addresses map straight to [`Provider`]s.
#[derive(Default)]
pub struct LocalNetwork {
    providers: RwLock<HashMap<String, Arc<Provider>>>,
    faults: Mutex<HashMap<String, Fault>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, provider: Arc<Provider>) {
        if let Ok(mut p) = self.providers.write() {
            p.insert(provider.address().to_string(), provider);
        }
    }

    pub fn provider(&self, address: &str) -> Option<Arc<Provider>> {
        self.providers.read().ok().and_then(|p| p.get(address).cloned())
    }

    /// Every request to `address` fails until brought back online.
    pub fn set_offline(&self, address: &str, offline: bool) {
        if let Ok(mut f) = self.faults.lock() {
            f.entry(address.to_string()).or_default().offline = offline;
        }
    }

    /// The next `n` requests to `address` fail, later ones go through.
    pub fn fail_next(&self, address: &str, n: usize) {
        if let Ok(mut f) = self.faults.lock() {
            f.entry(address.to_string()).or_default().fail_next = n;
        }
    }

    fn route(&self, address: &str) -> Result<Arc<Provider>> {
        {
            let mut faults = self.faults.lock().map_err(|_| Error::Transport("fault table poisoned".into()))?;
            if let Some(f) = faults.get_mut(address) {
                if f.offline {
                    return Err(Error::Transport(format!("{address} is offline")));
                }
                if f.fail_next > 0 {
                    f.fail_next -= 1;
                    return Err(Error::Transport(format!("{address} dropped the request")));
                }
            }
        }
        self.provider(address)
            .ok_or_else(|| Error::Transport(format!("no provider listening at {address}")))
    }
}

impl ProviderNetwork for LocalNetwork {
    fn negotiate_contract(&self, address: &str, contract: &Contract) -> Result<Contract> {
        self.route(address)?.negotiate_contract(contract)
    }

    fn store_block(
        &self,
        address: &str,
        renter_id: &str,
        block_id: &str,
        contract_id: &str,
        bytes: &[u8],
    ) -> Result<StoreAck> {
        self.route(address)?.store_block(renter_id, block_id, contract_id, bytes)
    }

    fn fetch_block(&self, address: &str, renter_id: &str, block_id: &str) -> Result<Vec<u8>> {
        self.route(address)?.fetch_block(renter_id, block_id)
    }

    fn delete_block(&self, address: &str, renter_id: &str, block_id: &str) -> Result<()> {
        self.route(address)?.delete_block(renter_id, block_id)
    }
}
