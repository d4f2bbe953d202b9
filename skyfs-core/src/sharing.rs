//! Access lists and folder operations. A Permission carries the file key
//! wrapped to one recipient; revoking it does not re-key the file.

use crate::cipher::{unwrap_file_key, wrap_file_key, FileKey};
use crate::directory::{is_under, MetadataDirectory};
use crate::error::{Error, Result};
use crate::keys::Identity;
use crate::types::{File, Permission};
use tracing::{debug, info};
use x25519_dalek::{PublicKey as EncryptionKey, StaticSecret};

/// The file, provided `owner_id` owns it.
pub fn owned_file(dir: &dyn MetadataDirectory, file_id: &str, owner_id: &str) -> Result<File> {
    let file = dir.find_file(file_id)?;
    if file.owner_id != owner_id {
        return Err(Error::Validation(format!("{} is not owned by {owner_id}", file.name)));
    }
    Ok(file)
}

/// Unwraps the key material of `file` for `identity`, as owner or as a
/// recipient.
pub fn file_key_for(file: &File, identity: &Identity) -> Result<FileKey> {
    if file.owner_id == identity.id {
        return unwrap_file_key(&file.aes_key, &file.aes_iv, identity.encryption_secret());
    }
    match file.permission_for(&identity.id) {
        Some(p) => unwrap_permission(p, identity.encryption_secret()),
        None => Err(Error::NotFound(format!("{} is not shared with {}", file.name, identity.id))),
    }
}

pub fn unwrap_permission(permission: &Permission, secret: &StaticSecret) -> Result<FileKey> {
    unwrap_file_key(&permission.aes_key, &permission.aes_iv, secret)
}

fn permission_for(file: &File, owner: &Identity, recipient_id: &str, recipient_key: &EncryptionKey) -> Result<Permission> {
    let key = unwrap_file_key(&file.aes_key, &file.aes_iv, owner.encryption_secret())?;
    let (aes_key, aes_iv) = wrap_file_key(&key, recipient_key)?;
    Ok(Permission { renter_id: recipient_id.to_string(), aes_key, aes_iv })
}

/// Grants `recipient_id` access. A second grant for the same recipient is
/// a conflict; use [`update_permission`] to re-wrap.
pub fn share_file(
    dir: &dyn MetadataDirectory,
    file_id: &str,
    owner: &Identity,
    recipient_id: &str,
    recipient_key: &EncryptionKey,
) -> Result<Permission> {
    let file = owned_file(dir, file_id, &owner.id)?;
    if recipient_id == owner.id {
        return Err(Error::Validation(format!("{} already owns {}", owner.id, file.name)));
    }
    dir.find_renter(recipient_id)?;
    let permission = permission_for(&file, owner, recipient_id, recipient_key)?;
    dir.add_permission_if_absent(file_id, &permission)?;
    dir.add_shared_file(recipient_id, file_id)?;
    info!(file = %file.name, recipient = %recipient_id, "file shared");
    Ok(permission)
}

pub fn update_permission(
    dir: &dyn MetadataDirectory,
    file_id: &str,
    owner: &Identity,
    recipient_id: &str,
    recipient_key: &EncryptionKey,
) -> Result<Permission> {
    let file = owned_file(dir, file_id, &owner.id)?;
    if file.permission_for(recipient_id).is_none() {
        return Err(Error::NotFound(format!("{} is not shared with {recipient_id}", file.name)));
    }
    let permission = permission_for(&file, owner, recipient_id, recipient_key)?;
    dir.update_permission(file_id, &permission)?;
    Ok(permission)
}

pub fn revoke_permission(dir: &dyn MetadataDirectory, file_id: &str, owner_id: &str, recipient_id: &str) -> Result<()> {
    let file = owned_file(dir, file_id, owner_id)?;
    dir.remove_permission(file_id, recipient_id)?;
    match dir.remove_shared_file(recipient_id, file_id) {
        Ok(()) | Err(Error::NotFound(_)) => {}
        Err(e) => return Err(e),
    }
    info!(file = %file.name, recipient = %recipient_id, "permission revoked");
    Ok(())
}

fn check_folder_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('/') || name.ends_with('/') || name.contains("//") {
        return Err(Error::Validation(format!("invalid folder name {name:?}")));
    }
    Ok(())
}

/// Renames folder `old` to `new` together with everything whose name has
/// the exact prefix `old + "/"`. Returns how many entries moved.
pub fn rename_folder(dir: &dyn MetadataDirectory, owner_id: &str, old: &str, new: &str) -> Result<usize> {
    check_folder_name(old)?;
    check_folder_name(new)?;
    if new == old || is_under(new, old) {
        return Err(Error::Validation(format!("cannot move {old} into {new}")));
    }
    match dir.find_file_by_name(owner_id, old)? {
        Some(f) if f.is_dir => {}
        Some(_) => return Err(Error::Validation(format!("{old} is not a folder"))),
        None => return Err(Error::NotFound(format!("folder {old}"))),
    }
    let moved = dir.rename_prefix(owner_id, old, new)?;
    debug!(owner = %owner_id, from = %old, to = %new, moved, "folder renamed");
    Ok(moved)
}

/// Removes the folder and everything under it from the directory,
/// returning the removed records so their blocks can be deleted.
pub fn delete_folder(dir: &dyn MetadataDirectory, owner_id: &str, folder: &str) -> Result<Vec<File>> {
    check_folder_name(folder)?;
    match dir.find_file_by_name(owner_id, folder)? {
        Some(f) if f.is_dir => {}
        Some(_) => return Err(Error::Validation(format!("{folder} is not a folder"))),
        None => return Err(Error::NotFound(format!("folder {folder}"))),
    }
    let removed = dir.remove_with_prefix(owner_id, folder)?;
    for f in &removed {
        forget_file(dir, f)?;
    }
    debug!(owner = %owner_id, folder = %folder, removed = removed.len(), "folder deleted");
    Ok(removed)
}

/// Drops a removed file from its owner's list and every recipient's
/// shared list.
pub fn forget_file(dir: &dyn MetadataDirectory, file: &File) -> Result<()> {
    let owner = std::iter::once((&file.owner_id, true));
    let recipients = file.access_list.iter().map(|p| (&p.renter_id, false));
    for (renter_id, is_owner) in owner.chain(recipients) {
        let r = if is_owner {
            dir.remove_renter_file(renter_id, &file.id)
        } else {
            dir.remove_shared_file(renter_id, &file.id)
        };
        match r {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
