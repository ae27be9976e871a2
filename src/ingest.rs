//! Ingestion pipeline (C7, §4.7): the only code path that writes to both the
//! object store and the KV index. Every step before the KV commit is
//! reversible — a failure anywhere deletes the staging directory (or, past
//! the rename, leaves cleanup to [`crate::store::ObjectStore::scrub_orphans`]).

use std::path::Path;

use crate::archive;
use crate::error::WavyError;
use crate::hash::compute_asset_id;
use crate::metadata::{AssetMetadata, VariantMetadata, now_unix};
use crate::playlist;
use crate::store::ObjectStore;
use crate::store::index::Index;
use crate::types::{AssetId, OwnerId};
use crate::validator;

/// Outcome of [`upload`]. `AlreadyExists` surfaces the existing asset id so
/// the HTTP layer can return the idempotent-success response from §6.
pub enum UploadOutcome {
    Created(AssetId),
    AlreadyExists(AssetId),
}

pub fn upload(
    store: &ObjectStore,
    index: &Index,
    owner: &OwnerId,
    archive_bytes: &[u8],
) -> Result<UploadOutcome, WavyError> {
    // Step 1: stream-unpack the archive into a staging directory. Dropped
    // (and its directory removed) if we return before `into_kept`.
    let owner_dir = store.ensure_owner_dir(owner).map_err(WavyError::Io)?;
    let unpacked = archive::unpack(archive_bytes, &owner_dir)?;

    // Step 2: validate every file by extension + format.
    validate_tree(unpacked.path())?;

    // Step 3: parse master.m3u8, validate variant/segment references.
    let master_path = unpacked.path().join("master.m3u8");
    let master_text = std::fs::read_to_string(&master_path).map_err(|_| {
        WavyError::InvalidArchive("archive is missing master.m3u8".into())
    })?;
    let master = playlist::parse_master(&master_text)?;
    let variants = verify_variants(unpacked.path(), &master)?;

    // Step 4: content-addressed asset id.
    let asset_id = compute_asset_id(unpacked.path())
        .map_err(|e| WavyError::InvalidArchive(format!("hashing failed: {e}")))?;

    // Step 5: idempotent short-circuit (existing asset wins; discard staging).
    if index.get_asset(owner, &asset_id)?.is_some() {
        return Ok(UploadOutcome::AlreadyExists(asset_id));
    }

    // Parse the metadata sidecar before the rename — a malformed sidecar
    // must not leave an asset directory behind with no index entry.
    let metadata_toml = std::fs::read_to_string(unpacked.path().join("metadata.toml"))
        .map_err(|_| WavyError::InvalidArchive("archive is missing metadata.toml".into()))?;
    let sidecar = validator::validate_toml(&metadata_toml)?;
    let title = toml_string(&sidecar, "title")?;
    let artist = toml_string(&sidecar, "artist")?;
    let duration_seconds = toml_float(&sidecar, "duration_seconds")?;

    let byte_size_total = ObjectStore::directory_byte_size(unpacked.path())
        .map_err(WavyError::Io)?;

    // Step 6: rename staging to its final, content-addressed home.
    let staged_dir = unpacked.into_kept();
    store
        .commit_staging(&staged_dir, owner, &asset_id)
        .map_err(WavyError::Io)?;

    // Step 7: compose + commit metadata atomically.
    let metadata = AssetMetadata {
        owner_id: owner.clone(),
        asset_id: asset_id.clone(),
        title,
        artist,
        duration_seconds,
        variants,
        created_unix: now_unix(),
        byte_size_total,
        sha256: asset_id.clone(),
    };

    let created = index.commit_upload(owner, &metadata)?;
    if !created {
        // Lost a race against a concurrent identical upload; our directory
        // is a duplicate of the one that won — remove it, keep the winner.
        let _ = store.remove_asset(owner, &asset_id);
        return Ok(UploadOutcome::AlreadyExists(asset_id));
    }

    // Step 8: redundant key file for external verification tools.
    store
        .write_key_file(&asset_id, asset_id.as_ref())
        .map_err(WavyError::Io)?;

    // Step 9: commit is implicit — the KV transaction above already
    // committed; this point is only reached on success.
    Ok(UploadOutcome::Created(asset_id))
}

fn validate_tree(dir: &Path) -> Result<(), WavyError> {
    for rel in walk_files(dir)? {
        let path = dir.join(&rel);
        validator::validate_extension(&path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();
        match ext.as_str() {
            "m3u8" => {
                let content = std::fs::read_to_string(&path)?;
                validator::validate_m3u8(&content)?;
            }
            "ts" => {
                let data = std::fs::read(&path)?;
                validator::validate_ts(&data)?;
            }
            "m4s" => {
                let data = std::fs::read(&path)?;
                validator::validate_m4s(&data)?;
            }
            "toml" => {
                let content = std::fs::read_to_string(&path)?;
                validator::validate_toml(&content)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn walk_files(dir: &Path) -> std::io::Result<Vec<std::path::PathBuf>> {
    let mut out = Vec::new();
    walk_files_into(dir, dir, &mut out)?;
    Ok(out)
}

fn walk_files_into(
    root: &Path,
    dir: &Path,
    out: &mut Vec<std::path::PathBuf>,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_files_into(root, &path, out)?;
        } else {
            out.push(path.strip_prefix(root).unwrap().to_path_buf());
        }
    }
    Ok(())
}

/// Ensures every variant's media playlist and every segment it references
/// exists in the unpacked tree, with no traversal outside the asset root
/// (§4.7 step 3). Returns per-variant metadata for the asset record.
fn verify_variants(
    dir: &Path,
    master: &playlist::MasterPlaylist,
) -> Result<Vec<VariantMetadata>, WavyError> {
    let mut out = Vec::with_capacity(master.variants.len());
    for variant in &master.variants {
        let media_rel = archive_relative(&variant.uri)?;
        let media_path = dir.join(&media_rel);
        let media_text = std::fs::read_to_string(&media_path).map_err(|_| {
            WavyError::InvalidArchive(format!(
                "variant references missing media playlist: {}",
                variant.uri
            ))
        })?;
        let media = playlist::parse_media(&media_text)?;

        let media_dir = media_path.parent().unwrap_or(dir);
        let mut total_bytes = 0u64;
        for segment in &media.segments {
            let seg_rel = archive_relative(&segment.uri)?;
            let seg_path = media_dir.join(&seg_rel);
            let meta = std::fs::metadata(&seg_path).map_err(|_| {
                WavyError::InvalidArchive(format!(
                    "media playlist references missing segment: {}",
                    segment.uri
                ))
            })?;
            total_bytes += meta.len();
        }
        if let Some(map_uri) = &media.map_uri {
            let map_rel = archive_relative(map_uri)?;
            let map_path = media_dir.join(&map_rel);
            let meta = std::fs::metadata(&map_path).map_err(|_| {
                WavyError::InvalidArchive(format!(
                    "media playlist references missing init segment: {map_uri}"
                ))
            })?;
            total_bytes += meta.len();
        }

        out.push(VariantMetadata {
            bitrate: variant.bitrate,
            codec: variant.codecs.clone(),
            media_playlist_path: variant.uri.clone(),
            segment_count: media.segments.len() as u64,
            total_bytes,
        });
    }
    Ok(out)
}

/// Rejects a playlist-referenced URI that is absolute or escapes the asset
/// root via `..` (§4.7 step 3 "must be relative and not escape").
fn archive_relative(uri: &str) -> Result<std::path::PathBuf, WavyError> {
    let path = Path::new(uri);
    let mut out = std::path::PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::Normal(part) => out.push(part),
            std::path::Component::CurDir => {}
            _ => {
                return Err(WavyError::InvalidArchive(format!(
                    "segment/playlist URI escapes asset root: {uri}"
                )));
            }
        }
    }
    Ok(out)
}

fn toml_string(value: &toml::Value, key: &str) -> Result<String, WavyError> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| WavyError::MalformedToml(format!("{key} is not a string")))
}

fn toml_float(value: &toml::Value, key: &str) -> Result<f64, WavyError> {
    value
        .get(key)
        .and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
        .ok_or_else(|| WavyError::MalformedToml(format!("{key} is not a number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut tar_buf = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut tar_buf);
            for (name, content) in files {
                let compressed = zstd::stream::encode_all(*content, 0).unwrap();
                let mut header = tar::Header::new_gnu();
                header.set_size(compressed.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder
                    .append_data(&mut header, format!("{name}.zst"), compressed.as_slice())
                    .unwrap();
            }
            builder.finish().unwrap();
        }
        let mut gz_buf = Vec::new();
        {
            let mut enc =
                flate2::write::GzEncoder::new(&mut gz_buf, flate2::Compression::default());
            enc.write_all(&tar_buf).unwrap();
            enc.finish().unwrap();
        }
        gz_buf
    }

    fn valid_asset_files() -> Vec<(&'static str, &'static [u8])> {
        vec![
            (
                "master.m3u8",
                b"#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=64000\n64000.m3u8\n",
            ),
            (
                "64000.m3u8",
                b"#EXTM3U\n#EXTINF:2.0,\n64000/0.ts\n#EXT-X-ENDLIST\n",
            ),
            ("64000/0.ts", &[0x47u8; 188]),
            (
                "metadata.toml",
                b"title = \"song\"\nartist = \"band\"\nduration_seconds = 2.0\n",
            ),
        ]
    }

    #[test]
    fn upload_then_duplicate_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(tmp.path().join("root")).unwrap();
        let index = Index::open(&store.db_path()).unwrap();
        let owner = OwnerId("alice".into());
        let blob = build_archive(&valid_asset_files());

        let first = upload(&store, &index, &owner, &blob).unwrap();
        let asset_id = match first {
            UploadOutcome::Created(id) => id,
            UploadOutcome::AlreadyExists(_) => panic!("expected Created on first upload"),
        };

        let second = upload(&store, &index, &owner, &blob).unwrap();
        match second {
            UploadOutcome::AlreadyExists(id) => assert_eq!(id, asset_id),
            UploadOutcome::Created(_) => panic!("expected AlreadyExists on duplicate upload"),
        }

        let metrics = index.get_owner_metrics(&owner).unwrap();
        assert_eq!(metrics.uploads, 1);
        assert_eq!(metrics.songs_count, 1);
    }

    #[test]
    fn upload_rejects_missing_segment() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(tmp.path().join("root")).unwrap();
        let index = Index::open(&store.db_path()).unwrap();
        let owner = OwnerId("alice".into());

        let mut files = valid_asset_files();
        files.retain(|(name, _)| *name != "64000/0.ts");
        let blob = build_archive(&files);

        assert!(upload(&store, &index, &owner, &blob).is_err());
    }
}
