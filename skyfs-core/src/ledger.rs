//! Provider-side storage accounting: how much each renter reserved, how
//! much of it their blocks use, which contracts were accepted, and a short
//! activity log. Every accepted mutation is followed by a full snapshot.

use crate::activity::{Activity, BoundedLog, RequestType};
use crate::config::ProviderConfig;
use crate::contract;
use crate::error::{Error, Result};
use crate::snapshot::{BlockInfo, RenterAccount, Snapshot, SnapshotSink, Stats};
use crate::types::Contract;
use ed25519_dalek::SigningKey;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

#[derive(Default)]
struct Totals {
    reserved: i64,
    used: i64,
    contracts: Vec<Contract>,
}

pub struct StorageLedger {
    provider_id: String,
    total_capacity: i64,
    signing: SigningKey,
    // lock order: renter account, then totals
    renters: RwLock<HashMap<String, Arc<Mutex<RenterAccount>>>>,
    totals: Mutex<Totals>,
    activity: Mutex<BoundedLog<Activity>>,
    persist: Mutex<()>,
    sink: Arc<dyn SnapshotSink>,
}

fn lock<'a, T>(m: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    m.lock().map_err(|_| Error::Consistency(format!("{what} lock poisoned")))
}

impl StorageLedger {
    pub fn new(config: &ProviderConfig, signing: SigningKey, sink: Arc<dyn SnapshotSink>) -> Result<Self> {
        if config.total_storage < 0 {
            return Err(Error::Validation(format!("total storage must not be negative, got {}", config.total_storage)));
        }
        Ok(Self {
            provider_id: config.provider_id.clone(),
            total_capacity: config.total_storage,
            signing,
            renters: RwLock::new(HashMap::new()),
            totals: Mutex::new(Totals::default()),
            activity: Mutex::new(BoundedLog::new(config.max_activity)),
            persist: Mutex::new(()),
            sink,
        })
    }

    /// Rebuilds a ledger from a persisted snapshot. Totals are recomputed
    /// from the per-renter accounts; a snapshot that breaks
    /// `used <= reserved <= total` is refused.
    pub fn restore(
        config: &ProviderConfig,
        signing: SigningKey,
        snapshot: Snapshot,
        sink: Arc<dyn SnapshotSink>,
    ) -> Result<Self> {
        let ledger = Self::new(config, signing, sink)?;
        let mut reserved = 0i64;
        let mut used = 0i64;
        let mut renters = HashMap::new();
        for (id, account) in snapshot.renters {
            if account.storage_used > account.storage_reserved {
                return Err(Error::Consistency(format!(
                    "renter {id}: used {} exceeds reserved {}",
                    account.storage_used, account.storage_reserved
                )));
            }
            reserved += account.storage_reserved;
            used += account.storage_used;
            renters.insert(id, Arc::new(Mutex::new(account)));
        }
        if reserved > ledger.total_capacity {
            return Err(Error::Consistency(format!(
                "reserved {reserved} exceeds total capacity {}",
                ledger.total_capacity
            )));
        }
        if snapshot.stats != (Stats { storage_reserved: reserved, storage_used: used }) {
            warn!(
                stored_reserved = snapshot.stats.storage_reserved,
                stored_used = snapshot.stats.storage_used,
                reserved,
                used,
                "snapshot stats disagree with renter accounts; using account sums"
            );
        }
        {
            let mut t = lock(&ledger.totals, "totals")?;
            t.reserved = reserved;
            t.used = used;
            t.contracts = snapshot.contracts;
        }
        *ledger.renters.write().map_err(|_| Error::Consistency("renter table lock poisoned".into()))? = renters;
        Ok(ledger)
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn total_capacity(&self) -> i64 {
        self.total_capacity
    }

    fn account(&self, renter_id: &str) -> Result<Option<Arc<Mutex<RenterAccount>>>> {
        let table = self.renters.read().map_err(|_| Error::Consistency("renter table lock poisoned".into()))?;
        Ok(table.get(renter_id).cloned())
    }

    fn account_or_insert(&self, renter_id: &str) -> Result<Arc<Mutex<RenterAccount>>> {
        if let Some(a) = self.account(renter_id)? {
            return Ok(a);
        }
        let mut table = self.renters.write().map_err(|_| Error::Consistency("renter table lock poisoned".into()))?;
        Ok(table.entry(renter_id.to_string()).or_default().clone())
    }

    fn log(&self, entry: Activity) {
        if let Ok(mut log) = self.activity.lock() {
            log.push(entry);
        }
    }

    /// Accepts the contract if the remaining capacity allows it, returning
    /// it with the provider signature attached.
    pub fn negotiate_contract(&self, contract: &Contract) -> Result<Contract> {
        if contract.storage_space <= 0 {
            return Err(Error::Validation(format!(
                "contract {} asks for {} bytes",
                contract.id, contract.storage_space
            )));
        }
        if contract.provider_id != self.provider_id {
            return Err(Error::Validation(format!(
                "contract {} names provider {}, this is {}",
                contract.id, contract.provider_id, self.provider_id
            )));
        }

        let mut signed = contract.clone();
        signed.provider_signature = contract::sign(contract, &self.signing);

        let account = self.account_or_insert(&contract.renter_id)?;
        {
            let mut acct = lock(&account, "renter account")?;
            let mut totals = lock(&self.totals, "totals")?;
            if totals.contracts.iter().any(|c| c.id == contract.id) {
                return Err(Error::Conflict(format!("contract {} already accepted", contract.id)));
            }
            let fits = totals
                .reserved
                .checked_add(contract.storage_space)
                .is_some_and(|r| r <= self.total_capacity);
            if !fits {
                return Err(Error::CapacityExceeded(format!(
                    "{} bytes requested, {} of {} already reserved",
                    contract.storage_space, totals.reserved, self.total_capacity
                )));
            }
            totals.reserved += contract.storage_space;
            totals.contracts.push(signed.clone());
            acct.storage_reserved += contract.storage_space;
            acct.contracts.push(signed.clone());
        }
        self.log(Activity::new(RequestType::NegotiateContract, &contract.renter_id).with_contract(&signed));
        info!(
            contract = %signed.id,
            renter = %signed.renter_id,
            space = signed.storage_space,
            "contract accepted"
        );
        self.persist()?;
        Ok(signed)
    }

    /// Charges `size` bytes of the renter's reservation for a new block.
    /// Recording the same block again with the same size changes nothing
    /// and returns `false`; `true` means this call added the record.
    pub fn record_block_stored(&self, renter_id: &str, block_id: &str, size: i64) -> Result<bool> {
        if size < 0 {
            return Err(Error::Validation(format!("block {block_id} has negative size {size}")));
        }
        let account = self
            .account(renter_id)?
            .ok_or_else(|| Error::NotFound(format!("renter {renter_id} has no contracts here")))?;
        {
            let mut acct = lock(&account, "renter account")?;
            if let Some(existing) = acct.block(block_id) {
                if existing.size == size {
                    return Ok(false);
                }
                return Err(Error::Conflict(format!(
                    "block {block_id} already recorded with {} bytes, not {size}",
                    existing.size
                )));
            }
            let used = acct
                .storage_used
                .checked_add(size)
                .filter(|u| *u <= acct.storage_reserved)
                .ok_or_else(|| {
                    Error::Consistency(format!(
                        "renter {renter_id}: storing {size} bytes exceeds the {} reserved ({} in use)",
                        acct.storage_reserved, acct.storage_used
                    ))
                })?;
            let mut totals = lock(&self.totals, "totals")?;
            totals.used = totals
                .used
                .checked_add(size)
                .ok_or_else(|| Error::Consistency(format!("provider usage overflows adding {size} bytes")))?;
            acct.storage_used = used;
            acct.blocks.push(BlockInfo { block_id: block_id.to_string(), size });
        }
        self.log(Activity::new(RequestType::PostBlock, renter_id).with_block(block_id));
        debug!(renter = %renter_id, block = %block_id, size, "block recorded");
        self.persist()?;
        Ok(true)
    }

    /// Releases the block's bytes. Unknown renters and blocks are a no-op.
    pub fn record_block_deleted(&self, renter_id: &str, block_id: &str) -> Result<()> {
        let Some(account) = self.account(renter_id)? else {
            return Ok(());
        };
        {
            let mut acct = lock(&account, "renter account")?;
            let Some(pos) = acct.blocks.iter().position(|b| b.block_id == block_id) else {
                return Ok(());
            };
            let removed = acct.blocks.remove(pos);
            acct.storage_used -= removed.size;
            lock(&self.totals, "totals")?.used -= removed.size;
        }
        self.log(Activity::new(RequestType::DeleteBlock, renter_id).with_block(block_id));
        debug!(renter = %renter_id, block = %block_id, "block released");
        self.persist()
    }

    pub fn record_block_fetched(&self, renter_id: &str, block_id: &str) {
        self.log(Activity::new(RequestType::GetBlock, renter_id).with_block(block_id));
    }

    pub fn has_contract(&self, renter_id: &str, contract_id: &str) -> Result<bool> {
        match self.account(renter_id)? {
            Some(a) => Ok(lock(&a, "renter account")?.has_contract(contract_id)),
            None => Ok(false),
        }
    }

    pub fn stats(&self) -> Result<Stats> {
        let t = lock(&self.totals, "totals")?;
        Ok(Stats { storage_reserved: t.reserved, storage_used: t.used })
    }

    /// `None` for renters without any accepted contract.
    pub fn renter_account(&self, renter_id: &str) -> Result<Option<RenterAccount>> {
        match self.account(renter_id)? {
            Some(a) => {
                let acct = lock(&a, "renter account")?;
                Ok((!acct.contracts.is_empty()).then(|| acct.clone()))
            }
            None => Ok(None),
        }
    }

    pub fn contracts(&self) -> Result<Vec<Contract>> {
        Ok(lock(&self.totals, "totals")?.contracts.clone())
    }

    /// Oldest first.
    pub fn activity(&self) -> Result<Vec<Activity>> {
        Ok(lock(&self.activity, "activity")?.to_vec())
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        let accounts: Vec<(String, Arc<Mutex<RenterAccount>>)> = {
            let table = self.renters.read().map_err(|_| Error::Consistency("renter table lock poisoned".into()))?;
            table.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        let mut renters = BTreeMap::new();
        for (id, a) in accounts {
            let acct = lock(&a, "renter account")?;
            // rejected negotiations leave an empty account behind
            if !acct.contracts.is_empty() {
                renters.insert(id, acct.clone());
            }
        }
        let t = lock(&self.totals, "totals")?;
        Ok(Snapshot {
            contracts: t.contracts.clone(),
            stats: Stats { storage_reserved: t.reserved, storage_used: t.used },
            renters,
        })
    }

    /// State is captured while holding the persist lock, so whichever
    /// writer runs last also writes the newest state.
    fn persist(&self) -> Result<()> {
        let _guard = lock(&self.persist, "persist")?;
        let snap = self.snapshot()?;
        self.sink.save(&snap).map_err(|e| {
            warn!(error = %e, "snapshot write failed; in-memory ledger is ahead of disk");
            e
        })
    }
}
