//! Renter-side orchestration: reserving space, uploading and downloading
//! versions, folders, sharing and cleanup of orphaned blocks.

use crate::cipher::{wrap_file_key, FileKey};
use crate::config::RenterConfig;
use crate::contract;
use crate::directory::MetadataDirectory;
use crate::error::{Error, Result};
use crate::keys::{parse_encryption_key, parse_verifying_key, Identity};
use crate::network::ProviderNetwork;
use crate::placement::{apply_assignments, plan_placement, remaining_capacity, ContractSlot};
use crate::progress::Progress;
use crate::sharing;
use crate::transfer::{self, CancelToken, PendingDelete};
use crate::types::{Block, Contract, File, Permission, RenterInfo, Version};
use crate::version::{create_version, decode_version};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RenterUsage {
    pub reserved: i64,
    pub used: i64,
    pub free: i64,
    pub total_files: usize,
}

pub struct Renter {
    config: RenterConfig,
    identity: Identity,
    dir: Arc<dyn MetadataDirectory>,
    net: Arc<dyn ProviderNetwork>,
    progress: Progress,
    pending: Mutex<Vec<PendingDelete>>,
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('/') || name.ends_with('/') || name.contains("//") {
        return Err(Error::Validation(format!("invalid name {name:?}")));
    }
    Ok(())
}

/// `dest/a/b` for the local relative path `a/b`.
fn remote_name(dest: &str, rel: &Path) -> Result<String> {
    let mut name = dest.to_string();
    for c in rel.components() {
        let Component::Normal(part) = c else {
            return Err(Error::Validation(format!("unexpected path component in {}", rel.display())));
        };
        let part = part
            .to_str()
            .ok_or_else(|| Error::Validation(format!("{} is not valid UTF-8", rel.display())))?;
        name.push('/');
        name.push_str(part);
    }
    Ok(name)
}

/// Local path for `rel`, a `/`-separated name below a downloaded folder.
fn local_path(root: &Path, rel: &str) -> Result<PathBuf> {
    let mut path = root.to_path_buf();
    for part in rel.split('/') {
        if part.is_empty() || part == "." || part == ".." || part.contains('\\') {
            return Err(Error::Validation(format!("refusing to write {rel:?} outside {}", root.display())));
        }
        path.push(part);
    }
    Ok(path)
}

fn blocks_of(files: &[File]) -> Vec<Block> {
    files
        .iter()
        .flat_map(|f| f.versions.iter())
        .flat_map(|v| v.blocks.iter().cloned())
        .collect()
}

impl Renter {
    pub fn new(
        config: RenterConfig,
        identity: Identity,
        dir: Arc<dyn MetadataDirectory>,
        net: Arc<dyn ProviderNetwork>,
    ) -> Result<Self> {
        if identity.id != config.renter_id {
            return Err(Error::Validation(format!(
                "identity {} does not belong to renter {}",
                identity.id, config.renter_id
            )));
        }
        Ok(Self {
            config,
            identity,
            dir,
            net,
            progress: Progress::disabled(),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn id(&self) -> &str {
        &self.identity.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn register(&self) -> Result<RenterInfo> {
        let public = self.identity.public();
        let info = RenterInfo {
            id: self.identity.id.clone(),
            alias: self.config.alias.clone(),
            public_key: public.public_key,
            encryption_key: public.encryption_key,
            files: Vec::new(),
            shared: Vec::new(),
        };
        self.dir.insert_renter(&info)?;
        info!(renter = %info.id, alias = %info.alias, "renter registered");
        Ok(info)
    }

    /// Negotiates a contract of `amount` bytes with each of up to
    /// `provider_count` providers, in directory order.
    pub fn reserve_storage(&self, amount: i64, provider_count: usize) -> Result<Vec<Contract>> {
        if amount <= 0 || provider_count == 0 {
            return Err(Error::Validation(format!(
                "cannot reserve {amount} bytes on {provider_count} providers"
            )));
        }
        let mut accepted = Vec::new();
        for mut provider in self.dir.find_providers()? {
            if accepted.len() == provider_count {
                break;
            }
            if provider.space_avail < amount {
                continue;
            }
            let mut proposal = contract::build(&self.identity.id, &provider.id, amount);
            proposal.renter_signature = contract::sign(&proposal, self.identity.signing_key());

            let signed = match self.net.negotiate_contract(&provider.address, &proposal) {
                Ok(c) => c,
                Err(e @ (Error::CapacityExceeded(_) | Error::Transport(_))) => {
                    debug!(provider = %provider.id, error = %e, "provider declined contract");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !contract::compare_contract_terms(&proposal, &signed)
                || signed.renter_signature != proposal.renter_signature
            {
                return Err(Error::SignatureMismatch(format!(
                    "provider {} returned contract {} with altered terms",
                    provider.id, proposal.id
                )));
            }
            let provider_key = parse_verifying_key(&provider.public_key)?;
            contract::verify(&signed, &signed.provider_signature, &provider_key)?;

            self.dir.insert_contract(&signed)?;
            provider.space_avail -= amount;
            self.dir.update_provider(&provider)?;
            info!(contract = %signed.id, provider = %provider.id, space = amount, "storage reserved");
            accepted.push(signed);
        }
        if accepted.is_empty() {
            return Err(Error::CapacityExceeded(format!("no provider accepted {amount} bytes")));
        }
        Ok(accepted)
    }

    /// Fully executed contracts with what is left of each, in contract order.
    fn contract_slots(&self) -> Result<Vec<ContractSlot>> {
        let renter_key = self.identity.verifying_key();
        let mut usable = Vec::new();
        let mut addresses = Vec::new();
        for c in self.dir.find_contracts_by_renter(&self.identity.id)? {
            let provider = match self.dir.find_provider(&c.provider_id) {
                Ok(p) => p,
                Err(Error::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let provider_key = parse_verifying_key(&provider.public_key)?;
            if let Err(e) = contract::verify_fully_executed(&c, &renter_key, &provider_key) {
                warn!(contract = %c.id, error = %e, "skipping contract");
                continue;
            }
            addresses.push(provider.address);
            usable.push(c);
        }
        let files = self.dir.find_files_by_owner(&self.identity.id)?;
        let remaining = remaining_capacity(&usable, &files);
        Ok(usable
            .into_iter()
            .zip(addresses)
            .map(|(contract, address)| {
                let remaining = remaining.get(&contract.id).copied().unwrap_or(0);
                ContractSlot { contract, address, remaining }
            })
            .collect())
    }

    fn queue(&self, mut leftovers: Vec<PendingDelete>) {
        if leftovers.is_empty() {
            return;
        }
        warn!(renter = %self.identity.id, blocks = leftovers.len(), "blocks queued for reconciliation");
        if let Ok(mut p) = self.pending.lock() {
            p.append(&mut leftovers);
        }
    }

    fn delete_blocks(&self, blocks: &[Block]) {
        let leftovers = transfer::delete_blocks(self.net.as_ref(), &self.identity.id, blocks, &self.config.transfer);
        self.queue(leftovers);
    }

    fn new_record(&self, name: &str, is_dir: bool) -> Result<(File, FileKey)> {
        let key = FileKey::generate();
        let (aes_key, aes_iv) = wrap_file_key(&key, &self.identity.encryption_key())?;
        let file = File {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: self.identity.id.clone(),
            name: name.to_string(),
            is_dir,
            access_list: Vec::new(),
            aes_key,
            aes_iv,
            versions: Vec::new(),
        };
        self.dir.insert_file(&file)?;
        self.dir.add_renter_file(&self.identity.id, &file.id)?;
        Ok((file, key))
    }

    fn discard_record(&self, file: &File) {
        let r = self.dir.delete_file(&file.id).and_then(|f| sharing::forget_file(self.dir.as_ref(), &f));
        if let Err(e) = r {
            warn!(file = %file.name, error = %e, "could not drop record of failed upload");
        }
    }

    pub fn upload(&self, name: &str, bytes: &[u8], overwrite: bool) -> Result<File> {
        self.upload_with_cancel(name, bytes, overwrite, &CancelToken::new())
    }

    /// Stores `bytes` as a new version of `name`, creating the file on
    /// first upload. With `overwrite` the new version replaces all others.
    pub fn upload_with_cancel(&self, name: &str, bytes: &[u8], overwrite: bool, cancel: &CancelToken) -> Result<File> {
        check_name(name)?;
        let (file, key, created) = match self.dir.find_file_by_name(&self.identity.id, name)? {
            Some(f) if f.is_dir => return Err(Error::Validation(format!("{name} is a folder"))),
            Some(f) => {
                let key = sharing::file_key_for(&f, &self.identity)?;
                (f, key, false)
            }
            None => {
                let (f, key) = self.new_record(name, false)?;
                (f, key, true)
            }
        };
        match self.commit_version(&file, &key, bytes, overwrite, cancel) {
            Ok(version) => {
                info!(
                    file = %file.name,
                    version = version.num,
                    k = version.num_data_blocks,
                    m = version.num_parity_blocks,
                    "version committed"
                );
                self.dir.find_file(&file.id)
            }
            Err(e) => {
                if created {
                    self.discard_record(&file);
                }
                Err(e)
            }
        }
    }

    fn commit_version(
        &self,
        file: &File,
        key: &FileKey,
        bytes: &[u8],
        overwrite: bool,
        cancel: &CancelToken,
    ) -> Result<Version> {
        let mut encoded = create_version(file, key, bytes, &self.config.redundancy)?;
        let slots = self.contract_slots()?;
        let plan = plan_placement(&encoded.version.blocks, &slots, self.config.placement)?;
        apply_assignments(&mut encoded.version.blocks, &plan);

        let uploaded = transfer::upload_blocks(
            self.net.as_ref(),
            &self.identity.id,
            &encoded.version.blocks,
            &encoded.shards,
            &self.config.transfer,
            cancel,
            &self.progress,
        );
        if let Err(failure) = uploaded {
            self.queue(failure.unreconciled);
            return Err(failure.error);
        }

        let mut version = encoded.version;
        let committed = self.dir.next_version_number(&file.id).and_then(|num| {
            version.num = num;
            if overwrite {
                self.dir.replace_versions(&file.id, &version)
            } else {
                self.dir.insert_version(&file.id, &version).map(|()| Vec::new())
            }
        });
        match committed {
            Ok(replaced) => {
                let stale: Vec<Block> = replaced.iter().flat_map(|v| v.blocks.iter().cloned()).collect();
                self.delete_blocks(&stale);
                Ok(version)
            }
            Err(e) => {
                self.delete_blocks(&version.blocks);
                Err(e)
            }
        }
    }

    /// Latest version unless `num` names one. Works for the owner and for
    /// anyone the file is shared with.
    pub fn download(&self, file_id: &str, num: Option<u64>) -> Result<Vec<u8>> {
        self.download_with_cancel(file_id, num, &CancelToken::new())
    }

    pub fn download_with_cancel(&self, file_id: &str, num: Option<u64>, cancel: &CancelToken) -> Result<Vec<u8>> {
        let file = self.dir.find_file(file_id)?;
        if file.is_dir {
            return Err(Error::Validation(format!("{} is a folder", file.name)));
        }
        let key = sharing::file_key_for(&file, &self.identity)?;
        let version = match num {
            Some(n) => file.version(n),
            None => file.latest_version(),
        }
        .ok_or_else(|| Error::NotFound(format!("{}: no version {}", file.name, num.map_or("stored".into(), |n| n.to_string()))))?;
        let shards = transfer::download_blocks(
            self.net.as_ref(),
            &file.owner_id,
            version,
            &self.config.transfer,
            cancel,
            &self.progress,
        )?;
        decode_version(&key, version, shards)
    }

    pub fn create_folder(&self, name: &str) -> Result<File> {
        check_name(name)?;
        let (file, _) = self.new_record(name, true)?;
        Ok(file)
    }

    fn ensure_folder(&self, name: &str) -> Result<File> {
        match self.dir.find_file_by_name(&self.identity.id, name)? {
            Some(f) if f.is_dir => Ok(f),
            Some(_) => Err(Error::Conflict(format!("{name} exists and is not a folder"))),
            None => self.create_folder(name),
        }
    }

    /// Uploads the local tree under `root` as folder `dest`. Existing
    /// folders are reused and existing files get a new version.
    pub fn upload_folder(&self, root: &Path, dest: &str) -> Result<File> {
        check_name(dest)?;
        if !root.is_dir() {
            return Err(Error::Validation(format!("{} is not a directory", root.display())));
        }
        let folder = self.ensure_folder(dest)?;
        let mut files = 0usize;
        for ent in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let ent = ent.map_err(std::io::Error::from)?;
            let rel = ent
                .path()
                .strip_prefix(root)
                .map_err(|_| Error::Validation(format!("{} escapes {}", ent.path().display(), root.display())))?;
            let name = remote_name(dest, rel)?;
            if ent.file_type().is_dir() {
                self.ensure_folder(&name)?;
            } else if ent.file_type().is_file() {
                let bytes = fs::read(ent.path())?;
                self.upload(&name, &bytes, false)?;
                files += 1;
            } else {
                debug!(path = %ent.path().display(), "skipping non-regular entry");
            }
        }
        info!(folder = %dest, files, "folder uploaded");
        Ok(folder)
    }

    /// Writes the folder and everything under it readable by this renter
    /// to `dest`; returns how many files were written.
    pub fn download_folder(&self, folder_id: &str, dest: &Path) -> Result<usize> {
        let folder = self.dir.find_file(folder_id)?;
        if !folder.is_dir {
            return Err(Error::Validation(format!("{} is not a folder", folder.name)));
        }
        sharing::file_key_for(&folder, &self.identity)?;
        fs::create_dir_all(dest)?;
        let me = self.identity.id.as_str();
        let mut written = 0;
        for entry in self.dir.find_files_with_prefix(&folder.owner_id, &folder.name)? {
            let path = local_path(dest, &entry.name[folder.name.len() + 1..])?;
            if entry.is_dir {
                fs::create_dir_all(&path)?;
                continue;
            }
            if entry.owner_id != me && entry.permission_for(me).is_none() {
                debug!(file = %entry.name, "not shared with this renter, skipped");
                continue;
            }
            let bytes = self.download(&entry.id, None)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, bytes)?;
            written += 1;
        }
        info!(folder = %folder.name, files = written, "folder downloaded");
        Ok(written)
    }

    pub fn find_by_name(&self, name: &str) -> Result<File> {
        self.dir
            .find_file_by_name(&self.identity.id, name)?
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Folders take everything under them along.
    pub fn rename(&self, file_id: &str, new_name: &str) -> Result<()> {
        check_name(new_name)?;
        let file = sharing::owned_file(self.dir.as_ref(), file_id, &self.identity.id)?;
        if file.is_dir {
            sharing::rename_folder(self.dir.as_ref(), &self.identity.id, &file.name, new_name)?;
        } else {
            self.dir.rename_file(file_id, new_name)?;
        }
        Ok(())
    }

    /// A non-empty folder is only removed with `recursive`.
    pub fn remove(&self, file_id: &str, recursive: bool) -> Result<()> {
        let file = sharing::owned_file(self.dir.as_ref(), file_id, &self.identity.id)?;
        let removed = if file.is_dir {
            let children = self.dir.find_files_with_prefix(&self.identity.id, &file.name)?;
            if !children.is_empty() && !recursive {
                return Err(Error::Validation(format!("{} is not empty", file.name)));
            }
            sharing::delete_folder(self.dir.as_ref(), &self.identity.id, &file.name)?
        } else {
            let f = self.dir.delete_file(file_id)?;
            sharing::forget_file(self.dir.as_ref(), &f)?;
            vec![f]
        };
        self.delete_blocks(&blocks_of(&removed));
        Ok(())
    }

    /// The last remaining version cannot be removed; remove the file instead.
    pub fn remove_version(&self, file_id: &str, num: u64) -> Result<()> {
        sharing::owned_file(self.dir.as_ref(), file_id, &self.identity.id)?;
        let version = self.dir.remove_version(file_id, num)?;
        self.delete_blocks(&version.blocks);
        Ok(())
    }

    pub fn share(&self, file_id: &str, recipient_id: &str) -> Result<Permission> {
        let recipient = self.dir.find_renter(recipient_id)?;
        let key = parse_encryption_key(&recipient.encryption_key)?;
        sharing::share_file(self.dir.as_ref(), file_id, &self.identity, recipient_id, &key)
    }

    pub fn unshare(&self, file_id: &str, recipient_id: &str) -> Result<()> {
        sharing::revoke_permission(self.dir.as_ref(), file_id, &self.identity.id, recipient_id)
    }

    pub fn list_files(&self) -> Result<Vec<File>> {
        self.dir.find_files_by_owner(&self.identity.id)
    }

    pub fn list_shared(&self) -> Result<Vec<File>> {
        let me = self.dir.find_renter(&self.identity.id)?;
        let mut out = Vec::new();
        for id in &me.shared {
            match self.dir.find_file(id) {
                Ok(f) => out.push(f),
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    pub fn list_contracts(&self) -> Result<Vec<Contract>> {
        self.dir.find_contracts_by_renter(&self.identity.id)
    }

    pub fn info(&self) -> Result<RenterUsage> {
        let reserved = self.list_contracts()?.iter().map(|c| c.storage_space).sum::<i64>();
        let files = self.list_files()?;
        let used = blocks_of(&files).iter().map(|b| b.size).sum::<i64>();
        Ok(RenterUsage {
            reserved,
            used,
            free: reserved - used,
            total_files: files.iter().filter(|f| !f.is_dir).count(),
        })
    }

    /// Blocks that still have to be deleted from some provider.
    pub fn pending_deletes(&self) -> Vec<PendingDelete> {
        self.pending.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Retries every queued delete; returns how many are still pending.
    pub fn reconcile(&self) -> Result<usize> {
        let queued = {
            let mut p = self.pending.lock().map_err(|_| Error::Consistency("pending queue poisoned".into()))?;
            std::mem::take(&mut *p)
        };
        if queued.is_empty() {
            return Ok(0);
        }
        let before = queued.len();
        let left = transfer::retry_deletes(self.net.as_ref(), &self.identity.id, queued, &self.config.transfer);
        let remaining = left.len();
        info!(renter = %self.identity.id, cleaned = before - remaining, remaining, "reconciliation pass");
        if let Ok(mut p) = self.pending.lock() {
            p.extend(left);
        }
        Ok(remaining)
    }
}
