//! Object store (C6, §4.6): the on-disk half of asset storage. Pairs with
//! [`index::Index`] (C5) — this module owns bytes on disk, the index owns
//! metadata in the KV store, and the ingestion pipeline (§4.7) is the only
//! code that writes to both in the same operation.

pub mod index;

use std::path::{Path, PathBuf};

use rand::Rng;

use crate::error::WavyError;
use crate::types::{AssetId, OwnerId};

pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("owners"))?;
        std::fs::create_dir_all(root.join("keys"))?;
        std::fs::create_dir_all(root.join("db"))?;
        Ok(Self { root })
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("db")
    }

    fn owner_dir(&self, owner: &OwnerId) -> PathBuf {
        self.root.join("owners").join(&owner.0)
    }

    pub fn asset_dir(&self, owner: &OwnerId, asset: &AssetId) -> PathBuf {
        self.owner_dir(owner).join(&asset.0)
    }

    /// Creates a fresh staging directory under the owner's tree, to be
    /// populated by [`crate::archive::unpack`] and renamed into place once
    /// ingestion validates successfully.
    pub fn new_staging_dir(&self, owner: &OwnerId) -> std::io::Result<PathBuf> {
        let owner_dir = self.owner_dir(owner);
        std::fs::create_dir_all(&owner_dir)?;
        let suffix: u64 = rand::thread_rng().r#gen();
        let dir = owner_dir.join(format!(".staging-{suffix:016x}"));
        std::fs::create_dir(&dir)?;
        Ok(dir)
    }

    /// Ensures `owners/<owner_id>/` exists and returns it, the root that
    /// [`crate::archive::unpack`] stages a fresh random subdirectory under.
    pub fn ensure_owner_dir(&self, owner: &OwnerId) -> std::io::Result<PathBuf> {
        let owner_dir = self.owner_dir(owner);
        std::fs::create_dir_all(&owner_dir)?;
        Ok(owner_dir)
    }

    /// Atomically publishes a staged asset directory (§4.6 "Atomic commit").
    /// The KV transaction must happen strictly after this call returns.
    pub fn commit_staging(
        &self,
        staging: &Path,
        owner: &OwnerId,
        asset: &AssetId,
    ) -> std::io::Result<()> {
        let dest = self.asset_dir(owner, asset);
        if dest.exists() {
            // Another upload of the same content already published this
            // asset; drop our staging copy and treat as already-committed.
            std::fs::remove_dir_all(staging)?;
            return Ok(());
        }
        std::fs::rename(staging, &dest)
    }

    /// Writes `keys/<asset_id>.key` via temp-and-rename (§4.7 step 8).
    pub fn write_key_file(&self, asset: &AssetId, sha256_hex: &str) -> std::io::Result<()> {
        let keys_dir = self.root.join("keys");
        std::fs::create_dir_all(&keys_dir)?;
        let final_path = keys_dir.join(format!("{}.key", asset.0));
        let suffix: u64 = rand::thread_rng().r#gen();
        let tmp_path = keys_dir.join(format!(".{}.key.tmp-{suffix:016x}", asset.0));
        std::fs::write(&tmp_path, sha256_hex)?;
        std::fs::rename(&tmp_path, &final_path)
    }

    /// Removes an asset's directory and its key file. Called before the KV
    /// transaction commits the delete (§3 lifecycle "Destroyed").
    pub fn remove_asset(&self, owner: &OwnerId, asset: &AssetId) -> std::io::Result<()> {
        let dir = self.asset_dir(owner, asset);
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        let key_path = self.root.join("keys").join(format!("{}.key", asset.0));
        if key_path.exists() {
            std::fs::remove_file(key_path)?;
        }
        Ok(())
    }

    /// Resolves a client-supplied relative path against an asset directory,
    /// rejecting traversal (§4.8 "path confined to asset dir").
    pub fn resolve_within_asset(
        &self,
        owner: &OwnerId,
        asset: &AssetId,
        rel_path: &str,
    ) -> Result<PathBuf, WavyError> {
        let base = self.asset_dir(owner, asset);
        let mut resolved = base.clone();
        for component in Path::new(rel_path).components() {
            match component {
                std::path::Component::Normal(part) => resolved.push(part),
                std::path::Component::CurDir => {}
                _ => {
                    return Err(WavyError::PathInvalid(format!(
                        "path escapes asset root: {rel_path}"
                    )));
                }
            }
        }
        if !resolved.starts_with(&base) {
            return Err(WavyError::PathInvalid(format!(
                "path escapes asset root: {rel_path}"
            )));
        }
        Ok(resolved)
    }

    /// Total on-disk byte size of every regular file in `dir`, recursively.
    pub fn directory_byte_size(dir: &Path) -> std::io::Result<u64> {
        let mut total = 0u64;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                total += Self::directory_byte_size(&path)?;
            } else {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    /// Startup reconciliation pass (§4.6): removes any asset directory with
    /// no matching `A|owner|asset` index entry, the recovery path for a
    /// crash between the staging rename and the KV commit.
    pub fn scrub_orphans(&self, index: &index::Index) -> std::io::Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        let owners_dir = self.root.join("owners");
        if !owners_dir.exists() {
            return Ok(removed);
        }
        for owner_entry in std::fs::read_dir(&owners_dir)? {
            let owner_entry = owner_entry?;
            if !owner_entry.path().is_dir() {
                continue;
            }
            let owner_name = owner_entry.file_name().to_string_lossy().into_owned();
            let Ok(owner_id) = OwnerId::parse(&owner_name) else {
                continue;
            };

            for asset_entry in std::fs::read_dir(owner_entry.path())? {
                let asset_entry = asset_entry?;
                let name = asset_entry.file_name().to_string_lossy().into_owned();
                if name.starts_with(".staging-") {
                    let _ = std::fs::remove_dir_all(asset_entry.path());
                    removed.push(asset_entry.path());
                    continue;
                }
                if !asset_entry.path().is_dir() {
                    continue;
                }
                let asset_id = AssetId(name);
                let has_entry = index
                    .get_asset(&owner_id, &asset_id)
                    .map(|opt| opt.is_some())
                    .unwrap_or(false);
                if !has_entry {
                    let _ = std::fs::remove_dir_all(asset_entry.path());
                    removed.push(asset_entry.path());
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetId, OwnerId};

    #[test]
    fn resolve_within_asset_rejects_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(tmp.path()).unwrap();
        let owner = OwnerId("alice".into());
        let asset = AssetId("deadbeef".into());

        assert!(store
            .resolve_within_asset(&owner, &asset, "128000.m3u8")
            .is_ok());
        assert!(store
            .resolve_within_asset(&owner, &asset, "../../../etc/passwd")
            .is_err());
    }

    #[test]
    fn commit_staging_renames_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(tmp.path()).unwrap();
        let owner = OwnerId("alice".into());
        let asset = AssetId("deadbeef".into());

        let staging = store.new_staging_dir(&owner).unwrap();
        std::fs::write(staging.join("master.m3u8"), b"#EXTM3U\n").unwrap();
        store.commit_staging(&staging, &owner, &asset).unwrap();

        let dest = store.asset_dir(&owner, &asset);
        assert!(dest.join("master.m3u8").exists());
        assert!(!staging.exists());
    }

    #[test]
    fn scrub_removes_orphan_and_staging_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(tmp.path()).unwrap();
        let index = index::Index::open(&store.db_path()).unwrap();
        let owner = OwnerId("alice".into());

        let staging = store.new_staging_dir(&owner).unwrap();
        assert!(staging.exists());

        let orphan_asset = AssetId("orphan".into());
        let orphan_dir = store.asset_dir(&owner, &orphan_asset);
        std::fs::create_dir_all(&orphan_dir).unwrap();

        let removed = store.scrub_orphans(&index).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!staging.exists());
        assert!(!orphan_dir.exists());
    }
}
