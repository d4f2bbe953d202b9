//! The shared metadata directory every renter consults: providers,
//! renters, files (with versions and ACLs) and contracts.

use crate::contract::compare_contract_terms;
use crate::error::{Error, Result};
use crate::types::{Contract, File, Permission, ProviderInfo, RenterInfo, Version};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// True when `name` lies strictly inside `folder` (`folder + "/"` prefix).
pub fn is_under(name: &str, folder: &str) -> bool {
    name.strip_prefix(folder).is_some_and(|rest| rest.starts_with('/'))
}

pub trait MetadataDirectory: Send + Sync {
    // providers, in registration order
    fn insert_provider(&self, provider: &ProviderInfo) -> Result<()>;
    fn update_provider(&self, provider: &ProviderInfo) -> Result<()>;
    fn find_provider(&self, id: &str) -> Result<ProviderInfo>;
    fn find_providers(&self) -> Result<Vec<ProviderInfo>>;
    fn delete_provider(&self, id: &str) -> Result<()>;

    // renters
    fn insert_renter(&self, renter: &RenterInfo) -> Result<()>;
    fn update_renter(&self, renter: &RenterInfo) -> Result<()>;
    fn find_renter(&self, id: &str) -> Result<RenterInfo>;
    fn find_renters(&self) -> Result<Vec<RenterInfo>>;
    fn find_renter_by_alias(&self, alias: &str) -> Result<RenterInfo>;
    fn delete_renter(&self, id: &str) -> Result<()>;
    fn add_renter_file(&self, renter_id: &str, file_id: &str) -> Result<()>;
    fn remove_renter_file(&self, renter_id: &str, file_id: &str) -> Result<()>;
    fn add_shared_file(&self, renter_id: &str, file_id: &str) -> Result<()>;
    fn remove_shared_file(&self, renter_id: &str, file_id: &str) -> Result<()>;

    // files; names are unique per owner
    fn insert_file(&self, file: &File) -> Result<()>;
    fn update_file(&self, file: &File) -> Result<()>;
    fn find_file(&self, id: &str) -> Result<File>;
    fn find_file_by_name(&self, owner_id: &str, name: &str) -> Result<Option<File>>;
    /// Every file of every owner, by owner then name.
    fn find_files(&self) -> Result<Vec<File>>;
    fn delete_file(&self, id: &str) -> Result<File>;
    fn find_files_by_owner(&self, owner_id: &str) -> Result<Vec<File>>;
    fn find_files_with_prefix(&self, owner_id: &str, folder: &str) -> Result<Vec<File>>;
    fn rename_file(&self, id: &str, new_name: &str) -> Result<()>;
    /// Renames `old` and everything under it; returns how many entries moved.
    fn rename_prefix(&self, owner_id: &str, old: &str, new: &str) -> Result<usize>;
    /// Removes `folder` and everything under it, returning what was removed.
    fn remove_with_prefix(&self, owner_id: &str, folder: &str) -> Result<Vec<File>>;

    // versions
    fn next_version_number(&self, file_id: &str) -> Result<u64>;
    fn insert_version(&self, file_id: &str, version: &Version) -> Result<()>;
    fn remove_version(&self, file_id: &str, num: u64) -> Result<Version>;
    /// Replaces every version with `version`, returning the old ones.
    fn replace_versions(&self, file_id: &str, version: &Version) -> Result<Vec<Version>>;

    // access lists
    fn add_permission_if_absent(&self, file_id: &str, permission: &Permission) -> Result<()>;
    fn update_permission(&self, file_id: &str, permission: &Permission) -> Result<()>;
    fn remove_permission(&self, file_id: &str, renter_id: &str) -> Result<Permission>;

    // contracts
    fn insert_contract(&self, contract: &Contract) -> Result<()>;
    /// Replaces a recorded contract; its terms must not change.
    fn update_contract(&self, contract: &Contract) -> Result<()>;
    fn find_contract(&self, id: &str) -> Result<Contract>;
    /// In insertion order.
    fn find_contracts(&self) -> Result<Vec<Contract>>;
    fn find_contracts_by_renter(&self, renter_id: &str) -> Result<Vec<Contract>>;
    fn delete_contract(&self, id: &str) -> Result<()>;
}

/// In-memory directory; one lock per collection.
#[derive(Default)]
pub struct MemoryDirectory {
    providers: RwLock<Vec<ProviderInfo>>,
    renters: RwLock<HashMap<String, RenterInfo>>,
    files: RwLock<HashMap<String, File>>,
    version_counters: Mutex<HashMap<String, u64>>,
    contracts: RwLock<Vec<Contract>>,
}

fn read<'a, T>(l: &'a RwLock<T>, what: &str) -> Result<RwLockReadGuard<'a, T>> {
    l.read().map_err(|_| Error::Consistency(format!("{what} collection poisoned")))
}

fn write<'a, T>(l: &'a RwLock<T>, what: &str) -> Result<RwLockWriteGuard<'a, T>> {
    l.write().map_err(|_| Error::Consistency(format!("{what} collection poisoned")))
}

fn file_mut<'a>(files: &'a mut HashMap<String, File>, id: &str) -> Result<&'a mut File> {
    files.get_mut(id).ok_or_else(|| Error::NotFound(format!("file {id}")))
}

fn renter_mut<'a>(renters: &'a mut HashMap<String, RenterInfo>, id: &str) -> Result<&'a mut RenterInfo> {
    renters.get_mut(id).ok_or_else(|| Error::NotFound(format!("renter {id}")))
}

fn name_taken(files: &HashMap<String, File>, owner_id: &str, name: &str, except: &str) -> bool {
    files.values().any(|f| f.owner_id == owner_id && f.name == name && f.id != except)
}

fn sorted(mut v: Vec<File>) -> Vec<File> {
    v.sort_by(|a, b| a.name.cmp(&b.name));
    v
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataDirectory for MemoryDirectory {
    fn insert_provider(&self, provider: &ProviderInfo) -> Result<()> {
        let mut p = write(&self.providers, "provider")?;
        if p.iter().any(|x| x.id == provider.id) {
            return Err(Error::Conflict(format!("provider {} already registered", provider.id)));
        }
        p.push(provider.clone());
        Ok(())
    }

    fn update_provider(&self, provider: &ProviderInfo) -> Result<()> {
        let mut p = write(&self.providers, "provider")?;
        let slot = p
            .iter_mut()
            .find(|x| x.id == provider.id)
            .ok_or_else(|| Error::NotFound(format!("provider {}", provider.id)))?;
        *slot = provider.clone();
        Ok(())
    }

    fn find_provider(&self, id: &str) -> Result<ProviderInfo> {
        read(&self.providers, "provider")?
            .iter()
            .find(|x| x.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("provider {id}")))
    }

    fn find_providers(&self) -> Result<Vec<ProviderInfo>> {
        Ok(read(&self.providers, "provider")?.clone())
    }

    fn delete_provider(&self, id: &str) -> Result<()> {
        let mut p = write(&self.providers, "provider")?;
        let before = p.len();
        p.retain(|x| x.id != id);
        if p.len() == before {
            return Err(Error::NotFound(format!("provider {id}")));
        }
        Ok(())
    }

    fn insert_renter(&self, renter: &RenterInfo) -> Result<()> {
        let mut r = write(&self.renters, "renter")?;
        if r.contains_key(&renter.id) {
            return Err(Error::Conflict(format!("renter {} already registered", renter.id)));
        }
        if r.values().any(|x| x.alias == renter.alias) {
            return Err(Error::Conflict(format!("alias {} is taken", renter.alias)));
        }
        r.insert(renter.id.clone(), renter.clone());
        Ok(())
    }

    fn update_renter(&self, renter: &RenterInfo) -> Result<()> {
        let mut r = write(&self.renters, "renter")?;
        *renter_mut(&mut r, &renter.id)? = renter.clone();
        Ok(())
    }

    fn find_renter(&self, id: &str) -> Result<RenterInfo> {
        read(&self.renters, "renter")?
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("renter {id}")))
    }

    fn find_renters(&self) -> Result<Vec<RenterInfo>> {
        let mut v: Vec<RenterInfo> = read(&self.renters, "renter")?.values().cloned().collect();
        v.sort_by(|a, b| a.alias.cmp(&b.alias));
        Ok(v)
    }

    fn find_renter_by_alias(&self, alias: &str) -> Result<RenterInfo> {
        read(&self.renters, "renter")?
            .values()
            .find(|r| r.alias == alias)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("renter alias {alias}")))
    }

    fn delete_renter(&self, id: &str) -> Result<()> {
        write(&self.renters, "renter")?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("renter {id}")))
    }

    fn add_renter_file(&self, renter_id: &str, file_id: &str) -> Result<()> {
        let mut r = write(&self.renters, "renter")?;
        let renter = renter_mut(&mut r, renter_id)?;
        if !renter.files.iter().any(|f| f == file_id) {
            renter.files.push(file_id.to_string());
        }
        Ok(())
    }

    fn remove_renter_file(&self, renter_id: &str, file_id: &str) -> Result<()> {
        let mut r = write(&self.renters, "renter")?;
        renter_mut(&mut r, renter_id)?.files.retain(|f| f != file_id);
        Ok(())
    }

    fn add_shared_file(&self, renter_id: &str, file_id: &str) -> Result<()> {
        let mut r = write(&self.renters, "renter")?;
        let renter = renter_mut(&mut r, renter_id)?;
        if !renter.shared.iter().any(|f| f == file_id) {
            renter.shared.push(file_id.to_string());
        }
        Ok(())
    }

    fn remove_shared_file(&self, renter_id: &str, file_id: &str) -> Result<()> {
        let mut r = write(&self.renters, "renter")?;
        renter_mut(&mut r, renter_id)?.shared.retain(|f| f != file_id);
        Ok(())
    }

    fn insert_file(&self, file: &File) -> Result<()> {
        let mut files = write(&self.files, "file")?;
        if files.contains_key(&file.id) {
            return Err(Error::Conflict(format!("file {} already exists", file.id)));
        }
        if name_taken(&files, &file.owner_id, &file.name, &file.id) {
            return Err(Error::Conflict(format!("{} already exists", file.name)));
        }
        files.insert(file.id.clone(), file.clone());
        Ok(())
    }

    fn update_file(&self, file: &File) -> Result<()> {
        let mut files = write(&self.files, "file")?;
        if name_taken(&files, &file.owner_id, &file.name, &file.id) {
            return Err(Error::Conflict(format!("{} already exists", file.name)));
        }
        *file_mut(&mut files, &file.id)? = file.clone();
        Ok(())
    }

    fn find_file(&self, id: &str) -> Result<File> {
        read(&self.files, "file")?
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("file {id}")))
    }

    fn find_file_by_name(&self, owner_id: &str, name: &str) -> Result<Option<File>> {
        Ok(read(&self.files, "file")?
            .values()
            .find(|f| f.owner_id == owner_id && f.name == name)
            .cloned())
    }

    fn find_files(&self) -> Result<Vec<File>> {
        let mut v: Vec<File> = read(&self.files, "file")?.values().cloned().collect();
        v.sort_by(|a, b| (&a.owner_id, &a.name).cmp(&(&b.owner_id, &b.name)));
        Ok(v)
    }

    fn delete_file(&self, id: &str) -> Result<File> {
        let removed = write(&self.files, "file")?
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("file {id}")))?;
        if let Ok(mut c) = self.version_counters.lock() {
            c.remove(id);
        }
        Ok(removed)
    }

    fn find_files_by_owner(&self, owner_id: &str) -> Result<Vec<File>> {
        let files = read(&self.files, "file")?;
        Ok(sorted(files.values().filter(|f| f.owner_id == owner_id).cloned().collect()))
    }

    fn find_files_with_prefix(&self, owner_id: &str, folder: &str) -> Result<Vec<File>> {
        let files = read(&self.files, "file")?;
        Ok(sorted(
            files
                .values()
                .filter(|f| f.owner_id == owner_id && is_under(&f.name, folder))
                .cloned()
                .collect(),
        ))
    }

    fn rename_file(&self, id: &str, new_name: &str) -> Result<()> {
        let mut files = write(&self.files, "file")?;
        let owner = file_mut(&mut files, id)?.owner_id.clone();
        if name_taken(&files, &owner, new_name, id) {
            return Err(Error::Conflict(format!("{new_name} already exists")));
        }
        file_mut(&mut files, id)?.name = new_name.to_string();
        Ok(())
    }

    fn rename_prefix(&self, owner_id: &str, old: &str, new: &str) -> Result<usize> {
        let mut files = write(&self.files, "file")?;
        let moves: Vec<(String, String)> = files
            .values()
            .filter(|f| f.owner_id == owner_id && (f.name == old || is_under(&f.name, old)))
            .map(|f| (f.id.clone(), format!("{new}{}", &f.name[old.len()..])))
            .collect();
        let moving: Vec<&str> = moves.iter().map(|(id, _)| id.as_str()).collect();
        for (_, name) in &moves {
            let clash = files
                .values()
                .any(|f| f.owner_id == owner_id && f.name == *name && !moving.contains(&f.id.as_str()));
            if clash {
                return Err(Error::Conflict(format!("{name} already exists")));
            }
        }
        for (id, name) in &moves {
            file_mut(&mut files, id)?.name = name.clone();
        }
        Ok(moves.len())
    }

    fn remove_with_prefix(&self, owner_id: &str, folder: &str) -> Result<Vec<File>> {
        let mut files = write(&self.files, "file")?;
        let ids: Vec<String> = files
            .values()
            .filter(|f| f.owner_id == owner_id && (f.name == folder || is_under(&f.name, folder)))
            .map(|f| f.id.clone())
            .collect();
        let removed: Vec<File> = ids.iter().filter_map(|id| files.remove(id)).collect();
        if let Ok(mut c) = self.version_counters.lock() {
            for id in &ids {
                c.remove(id);
            }
        }
        Ok(sorted(removed))
    }

    fn next_version_number(&self, file_id: &str) -> Result<u64> {
        if !read(&self.files, "file")?.contains_key(file_id) {
            return Err(Error::NotFound(format!("file {file_id}")));
        }
        let mut counters = self
            .version_counters
            .lock()
            .map_err(|_| Error::Consistency("version counters poisoned".into()))?;
        let n = counters.entry(file_id.to_string()).or_insert(0);
        *n += 1;
        Ok(*n)
    }

    fn insert_version(&self, file_id: &str, version: &Version) -> Result<()> {
        let mut files = write(&self.files, "file")?;
        let file = file_mut(&mut files, file_id)?;
        if file.version(version.num).is_some() {
            return Err(Error::Conflict(format!("{} already has version {}", file.name, version.num)));
        }
        file.versions.push(version.clone());
        Ok(())
    }

    fn remove_version(&self, file_id: &str, num: u64) -> Result<Version> {
        let mut files = write(&self.files, "file")?;
        let file = file_mut(&mut files, file_id)?;
        let pos = file
            .versions
            .iter()
            .position(|v| v.num == num)
            .ok_or_else(|| Error::NotFound(format!("version {num} of {}", file.name)))?;
        if file.versions.len() == 1 {
            return Err(Error::Validation(format!("version {num} is the only version of {}", file.name)));
        }
        Ok(file.versions.remove(pos))
    }

    fn replace_versions(&self, file_id: &str, version: &Version) -> Result<Vec<Version>> {
        let mut files = write(&self.files, "file")?;
        let file = file_mut(&mut files, file_id)?;
        Ok(std::mem::replace(&mut file.versions, vec![version.clone()]))
    }

    fn add_permission_if_absent(&self, file_id: &str, permission: &Permission) -> Result<()> {
        let mut files = write(&self.files, "file")?;
        let file = file_mut(&mut files, file_id)?;
        if file.permission_for(&permission.renter_id).is_some() {
            return Err(Error::Conflict(format!(
                "{} is already shared with {}",
                file.name, permission.renter_id
            )));
        }
        file.access_list.push(permission.clone());
        Ok(())
    }

    fn update_permission(&self, file_id: &str, permission: &Permission) -> Result<()> {
        let mut files = write(&self.files, "file")?;
        let file = file_mut(&mut files, file_id)?;
        let name = file.name.clone();
        let slot = file
            .access_list
            .iter_mut()
            .find(|p| p.renter_id == permission.renter_id)
            .ok_or_else(|| Error::NotFound(format!("{name} is not shared with {}", permission.renter_id)))?;
        *slot = permission.clone();
        Ok(())
    }

    fn remove_permission(&self, file_id: &str, renter_id: &str) -> Result<Permission> {
        let mut files = write(&self.files, "file")?;
        let file = file_mut(&mut files, file_id)?;
        let pos = file
            .access_list
            .iter()
            .position(|p| p.renter_id == renter_id)
            .ok_or_else(|| Error::NotFound(format!("{} is not shared with {renter_id}", file.name)))?;
        Ok(file.access_list.remove(pos))
    }

    fn insert_contract(&self, contract: &Contract) -> Result<()> {
        let mut c = write(&self.contracts, "contract")?;
        if c.iter().any(|x| x.id == contract.id) {
            return Err(Error::Conflict(format!("contract {} already recorded", contract.id)));
        }
        c.push(contract.clone());
        Ok(())
    }

    fn update_contract(&self, contract: &Contract) -> Result<()> {
        let mut c = write(&self.contracts, "contract")?;
        let slot = c
            .iter_mut()
            .find(|x| x.id == contract.id)
            .ok_or_else(|| Error::NotFound(format!("contract {}", contract.id)))?;
        if !compare_contract_terms(slot, contract) {
            return Err(Error::Validation(format!("terms of contract {} cannot change", contract.id)));
        }
        *slot = contract.clone();
        Ok(())
    }

    fn find_contract(&self, id: &str) -> Result<Contract> {
        read(&self.contracts, "contract")?
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("contract {id}")))
    }

    fn find_contracts_by_renter(&self, renter_id: &str) -> Result<Vec<Contract>> {
        Ok(read(&self.contracts, "contract")?
            .iter()
            .filter(|c| c.renter_id == renter_id)
            .cloned()
            .collect())
    }

    fn find_contracts(&self) -> Result<Vec<Contract>> {
        Ok(read(&self.contracts, "contract")?.clone())
    }

    fn delete_contract(&self, id: &str) -> Result<()> {
        let mut c = write(&self.contracts, "contract")?;
        let before = c.len();
        c.retain(|x| x.id != id);
        if c.len() == before {
            return Err(Error::NotFound(format!("contract {id}")));
        }
        Ok(())
    }
}
