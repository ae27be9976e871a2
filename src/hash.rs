//! Content hasher (C4, §4.4): derives the content-addressed [`AssetId`] from
//! an unpacked archive's fingerprint. The hash covers content only, never
//! timestamps or permissions — both come from [`crate::archive`], which
//! walks members in canonical sorted order.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::archive::archive_fingerprint;
use crate::types::AssetId;

pub fn compute_asset_id(dir: &Path) -> std::io::Result<AssetId> {
    let fingerprint = archive_fingerprint(dir)?;
    let mut hasher = Sha256::new();
    hasher.update(&fingerprint);
    Ok(AssetId::from_digest(&hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_content_same_id() {
        let tmp1 = tempfile::tempdir().unwrap();
        std::fs::write(tmp1.path().join("a.txt"), b"hello").unwrap();
        let tmp2 = tempfile::tempdir().unwrap();
        std::fs::write(tmp2.path().join("a.txt"), b"hello").unwrap();
        assert_eq!(
            compute_asset_id(tmp1.path()).unwrap(),
            compute_asset_id(tmp2.path()).unwrap()
        );
    }

    #[test]
    fn different_content_different_id() {
        let tmp1 = tempfile::tempdir().unwrap();
        std::fs::write(tmp1.path().join("a.txt"), b"hello").unwrap();
        let tmp2 = tempfile::tempdir().unwrap();
        std::fs::write(tmp2.path().join("a.txt"), b"world").unwrap();
        assert_ne!(
            compute_asset_id(tmp1.path()).unwrap(),
            compute_asset_id(tmp2.path()).unwrap()
        );
    }
}
