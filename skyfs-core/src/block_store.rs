use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Block files under `<root>/<renterId>/<blockId>`.
pub struct BlockStore {
    root: PathBuf,
}

/// Ids become single path components; anything that could escape the
/// store root is refused.
fn check_component(kind: &str, s: &str) -> Result<()> {
    let bad = s.is_empty()
        || s == "."
        || s == ".."
        || s.contains(['/', '\\', '\0'])
        || s.ends_with(".tmp");
    if bad {
        return Err(Error::Validation(format!("invalid {kind} id {s:?}")));
    }
    Ok(())
}

impl BlockStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, renter_id: &str, block_id: &str) -> Result<PathBuf> {
        check_component("renter", renter_id)?;
        check_component("block", block_id)?;
        Ok(self.root.join(renter_id).join(block_id))
    }

    pub fn write(&self, renter_id: &str, block_id: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(renter_id, block_id)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_file_name(format!("{block_id}.tmp"));
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn read(&self, renter_id: &str, block_id: &str) -> Result<Vec<u8>> {
        let path = self.path_for(renter_id, block_id)?;
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::NotFound(format!("block {block_id} of renter {renter_id}")),
            _ => Error::Io(e),
        })
    }

    /// Returns whether a file was actually removed.
    pub fn remove(&self, renter_id: &str, block_id: &str) -> Result<bool> {
        let path = self.path_for(renter_id, block_id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub fn exists(&self, renter_id: &str, block_id: &str) -> Result<bool> {
        Ok(self.path_for(renter_id, block_id)?.is_file())
    }

    /// Every `(renterId, blockId)` on disk, sorted.
    pub fn list(&self) -> Result<BTreeSet<(String, String)>> {
        let mut out = BTreeSet::new();
        for renter in fs::read_dir(&self.root)? {
            let renter = renter?;
            if !renter.file_type()?.is_dir() {
                continue;
            }
            let renter_id = renter.file_name().to_string_lossy().into_owned();
            for block in fs::read_dir(renter.path())? {
                let block = block?;
                let name = block.file_name().to_string_lossy().into_owned();
                if block.file_type()?.is_file() && !name.ends_with(".tmp") {
                    out.insert((renter_id.clone(), name));
                }
            }
        }
        Ok(out)
    }
}
