//! Embedded transactional KV index (C5, §4.5). Backed by `sled`, a
//! memory-mapped B+tree store with MVCC snapshots: many readers may run
//! concurrently with a single writer, and every reader sees a consistent
//! snapshot. The keyspace layout follows §4.5 exactly:
//!
//! - `O|<owner_id>`            → [`OwnerRecord`]
//! - `A|<owner_id>|<asset_id>` → [`AssetMetadata`]
//! - `M|<owner_id>`            → [`OwnerMetricsSnapshot`]
//! - `G|`                      → global [`crate::metrics::MetricsSnapshot`]

use std::path::Path;

use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};

use crate::error::WavyError;
use crate::metadata::{AssetMetadata, OwnerMetricsSnapshot, OwnerRecord};
use crate::metrics::MetricsSnapshot;
use crate::types::{AssetId, OwnerId};

const GLOBAL_KEY: &[u8] = b"G|";

pub struct Index {
    db: sled::Db,
}

fn owner_key(owner: &OwnerId) -> Vec<u8> {
    format!("O|{}", owner.0).into_bytes()
}

fn asset_key(owner: &OwnerId, asset: &AssetId) -> Vec<u8> {
    format!("A|{}|{}", owner.0, asset.0).into_bytes()
}

fn asset_prefix(owner: &OwnerId) -> Vec<u8> {
    format!("A|{}|", owner.0).into_bytes()
}

fn metrics_key(owner: &OwnerId) -> Vec<u8> {
    format!("M|{}", owner.0).into_bytes()
}

fn abort(msg: impl Into<String>) -> ConflictableTransactionError<WavyError> {
    ConflictableTransactionError::Abort(WavyError::Db(msg.into()))
}

impl Index {
    pub fn open(path: &Path) -> Result<Self, WavyError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    pub fn get_owner(&self, owner: &OwnerId) -> Result<Option<OwnerRecord>, WavyError> {
        get_json(&self.db, &owner_key(owner))
    }

    pub fn list_owners(&self) -> Result<Vec<OwnerId>, WavyError> {
        let mut out = Vec::new();
        for kv in self.db.scan_prefix(b"O|") {
            let (k, _) = kv?;
            let s = std::str::from_utf8(&k).unwrap_or_default();
            if let Some(id) = s.strip_prefix("O|") {
                out.push(OwnerId(id.to_string()));
            }
        }
        Ok(out)
    }

    pub fn get_asset(
        &self,
        owner: &OwnerId,
        asset: &AssetId,
    ) -> Result<Option<AssetMetadata>, WavyError> {
        get_json(&self.db, &asset_key(owner, asset))
    }

    pub fn list_assets(&self, owner: &OwnerId) -> Result<Vec<AssetId>, WavyError> {
        let prefix = asset_prefix(owner);
        let prefix_str = std::str::from_utf8(&prefix).unwrap().to_string();
        let mut out = Vec::new();
        for kv in self.db.scan_prefix(&prefix) {
            let (k, _) = kv?;
            let s = std::str::from_utf8(&k).unwrap_or_default();
            if let Some(id) = s.strip_prefix(prefix_str.as_str()) {
                out.push(AssetId(id.to_string()));
            }
        }
        Ok(out)
    }

    pub fn get_owner_metrics(&self, owner: &OwnerId) -> Result<OwnerMetricsSnapshot, WavyError> {
        Ok(get_json(&self.db, &metrics_key(owner))?.unwrap_or_default())
    }

    /// Increments `M|owner.downloads` by one (§4.9). Called from the
    /// download/stream handlers; a no-op (other than creating a zeroed
    /// record) for an owner whose metrics haven't been touched yet.
    pub fn increment_downloads(&self, owner: &OwnerId) -> Result<(), WavyError> {
        let mkey = metrics_key(owner);
        self.db
            .transaction(|tx| -> ConflictableTransactionResult<(), WavyError> {
                let mut owner_metrics: OwnerMetricsSnapshot = match tx.get(&mkey)? {
                    Some(v) => serde_json::from_slice(&v).map_err(|e| abort(e.to_string()))?,
                    None => OwnerMetricsSnapshot::default(),
                };
                owner_metrics.downloads += 1;
                tx.insert(
                    mkey.clone(),
                    serde_json::to_vec(&owner_metrics).map_err(|e| abort(e.to_string()))?,
                )?;
                Ok(())
            })
            .map_err(|e| WavyError::Db(e.to_string()))
    }

    pub fn get_global_metrics(&self) -> Result<MetricsSnapshot, WavyError> {
        Ok(get_json(&self.db, GLOBAL_KEY)?.unwrap_or_default())
    }

    pub fn put_global_metrics(&self, snapshot: &MetricsSnapshot) -> Result<(), WavyError> {
        put_json(&self.db, GLOBAL_KEY, snapshot)
    }

    /// Commits the three-key write of a successful upload (§4.7 steps 7-9)
    /// atomically: `A|owner|asset`, `O|owner` (created or `asset_count`
    /// incremented), `M|owner` (uploads/songs_count/storage_bytes updated).
    /// Returns `Ok(false)` without writing if the asset already exists
    /// (idempotent upload, §3 invariant 5).
    pub fn commit_upload(
        &self,
        owner: &OwnerId,
        metadata: &AssetMetadata,
    ) -> Result<bool, WavyError> {
        let akey = asset_key(owner, &metadata.asset_id);
        let okey = owner_key(owner);
        let mkey = metrics_key(owner);

        let result = self
            .db
            .transaction(|tx| -> ConflictableTransactionResult<bool, WavyError> {
                if tx.get(&akey)?.is_some() {
                    return Ok(false);
                }

                let mut owner_record: OwnerRecord = match tx.get(&okey)? {
                    Some(v) => {
                        serde_json::from_slice(&v).map_err(|e| abort(e.to_string()))?
                    }
                    None => OwnerRecord {
                        created_unix: crate::metadata::now_unix(),
                        asset_count: 0,
                    },
                };
                owner_record.asset_count += 1;

                let mut owner_metrics: OwnerMetricsSnapshot = match tx.get(&mkey)? {
                    Some(v) => serde_json::from_slice(&v).map_err(|e| abort(e.to_string()))?,
                    None => OwnerMetricsSnapshot::default(),
                };
                owner_metrics.uploads += 1;
                owner_metrics.songs_count += 1;
                owner_metrics.storage_bytes += metadata.byte_size_total;

                tx.insert(
                    akey.clone(),
                    serde_json::to_vec(metadata).map_err(|e| abort(e.to_string()))?,
                )?;
                tx.insert(
                    okey.clone(),
                    serde_json::to_vec(&owner_record).map_err(|e| abort(e.to_string()))?,
                )?;
                tx.insert(
                    mkey.clone(),
                    serde_json::to_vec(&owner_metrics).map_err(|e| abort(e.to_string()))?,
                )?;

                Ok(true)
            });

        result.map_err(|e| WavyError::Db(e.to_string()))
    }

    /// Atomically removes `A|owner|asset`, decrements `O|owner.asset_count`
    /// and updates `M|owner` (§3 lifecycle "Destroyed"). The caller is
    /// responsible for removing the on-disk directory first or after,
    /// per the atomic-commit discipline in §4.6.
    pub fn commit_delete(&self, owner: &OwnerId, asset: &AssetId) -> Result<bool, WavyError> {
        let akey = asset_key(owner, asset);
        let okey = owner_key(owner);
        let mkey = metrics_key(owner);

        let result = self
            .db
            .transaction(|tx| -> ConflictableTransactionResult<bool, WavyError> {
                let Some(existing) = tx.get(&akey)? else {
                    return Ok(false);
                };
                let metadata: AssetMetadata =
                    serde_json::from_slice(&existing).map_err(|e| abort(e.to_string()))?;

                tx.remove(akey.clone())?;

                if let Some(v) = tx.get(&okey)? {
                    let mut owner_record: OwnerRecord =
                        serde_json::from_slice(&v).map_err(|e| abort(e.to_string()))?;
                    owner_record.asset_count = owner_record.asset_count.saturating_sub(1);
                    tx.insert(
                        okey.clone(),
                        serde_json::to_vec(&owner_record).map_err(|e| abort(e.to_string()))?,
                    )?;
                }

                if let Some(v) = tx.get(&mkey)? {
                    let mut owner_metrics: OwnerMetricsSnapshot =
                        serde_json::from_slice(&v).map_err(|e| abort(e.to_string()))?;
                    owner_metrics.deletes += 1;
                    owner_metrics.songs_count = owner_metrics.songs_count.saturating_sub(1);
                    owner_metrics.storage_bytes = owner_metrics
                        .storage_bytes
                        .saturating_sub(metadata.byte_size_total);
                    tx.insert(
                        mkey.clone(),
                        serde_json::to_vec(&owner_metrics).map_err(|e| abort(e.to_string()))?,
                    )?;
                }

                Ok(true)
            });

        result.map_err(|e| WavyError::Db(e.to_string()))
    }
}

fn get_json<T: serde::de::DeserializeOwned>(
    db: &sled::Db,
    key: &[u8],
) -> Result<Option<T>, WavyError> {
    match db.get(key)? {
        Some(v) => Ok(Some(
            serde_json::from_slice(&v).map_err(|e| WavyError::Db(e.to_string()))?,
        )),
        None => Ok(None),
    }
}

fn put_json<T: serde::Serialize>(db: &sled::Db, key: &[u8], value: &T) -> Result<(), WavyError> {
    let bytes = serde_json::to_vec(value).map_err(|e| WavyError::Db(e.to_string()))?;
    db.insert(key, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetId, OwnerId};

    fn sample_metadata(owner: &OwnerId, asset: &AssetId) -> AssetMetadata {
        AssetMetadata {
            owner_id: owner.clone(),
            asset_id: asset.clone(),
            title: "t".into(),
            artist: "a".into(),
            duration_seconds: 4.0,
            variants: vec![],
            created_unix: 0,
            byte_size_total: 100,
            sha256: asset.clone(),
        }
    }

    #[test]
    fn upload_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let idx = Index::open(tmp.path()).unwrap();
        let owner = OwnerId("alice".into());
        let asset = AssetId("deadbeef".into());
        let meta = sample_metadata(&owner, &asset);

        assert!(idx.commit_upload(&owner, &meta).unwrap());
        assert!(!idx.commit_upload(&owner, &meta).unwrap());

        let metrics = idx.get_owner_metrics(&owner).unwrap();
        assert_eq!(metrics.uploads, 1);
        assert_eq!(metrics.songs_count, 1);
        assert_eq!(metrics.storage_bytes, 100);
    }

    #[test]
    fn delete_updates_counters() {
        let tmp = tempfile::tempdir().unwrap();
        let idx = Index::open(tmp.path()).unwrap();
        let owner = OwnerId("alice".into());
        let asset = AssetId("deadbeef".into());
        idx.commit_upload(&owner, &sample_metadata(&owner, &asset))
            .unwrap();

        assert!(idx.commit_delete(&owner, &asset).unwrap());
        assert!(idx.get_asset(&owner, &asset).unwrap().is_none());
        assert!(!idx.list_assets(&owner).unwrap().contains(&asset));

        let metrics = idx.get_owner_metrics(&owner).unwrap();
        assert_eq!(metrics.songs_count, 0);
        assert_eq!(metrics.storage_bytes, 0);
        assert_eq!(metrics.deletes, 1);
    }
}
