//! Ingestion archive codec (C1): a gzip-compressed tar whose members are
//! individually zstd-compressed playlists and segments (§4.1).

use std::io::Read;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::WavyError;

const MAX_MEMBER_BYTES: u64 = 256 * 1024 * 1024;
const MAX_TOTAL_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// A directory holding the unpacked contents of one ingestion archive.
/// Removed on drop unless [`UnpackedArchive::into_kept`] is called, mirroring
/// the staging-directory lifecycle in §4.6/§4.7 (the ingestion pipeline owns
/// the final rename; everything before that is disposable).
pub struct UnpackedArchive {
    root: Option<PathBuf>,
}

impl UnpackedArchive {
    pub fn path(&self) -> &Path {
        self.root.as_deref().expect("path used after into_kept/drop")
    }

    /// Consumes self without deleting the directory — used once the
    /// ingestion pipeline is ready to rename it into place.
    pub fn into_kept(mut self) -> PathBuf {
        self.root.take().expect("already consumed")
    }
}

impl Drop for UnpackedArchive {
    fn drop(&mut self) {
        if let Some(root) = &self.root {
            let _ = std::fs::remove_dir_all(root);
        }
    }
}

/// Rejects a tar member path that escapes the unpack root: any leading `..`
/// component or an absolute prefix (§9 Design Notes).
fn safe_relative_path(name: &str) -> Result<PathBuf, WavyError> {
    let path = Path::new(name);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(WavyError::InvalidArchive(format!(
                    "member path escapes archive root: {name}"
                )));
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(WavyError::InvalidArchive("empty member path".into()));
    }
    Ok(out)
}

/// Streams the outer tar.gz into a fresh directory under `staging_root`,
/// zstd-decompressing each member to its original name (the `.zst` suffix is
/// stripped). Fails on oversized members, an oversized total, or path
/// traversal.
pub fn unpack(blob: &[u8], staging_root: &Path) -> Result<UnpackedArchive, WavyError> {
    std::fs::create_dir_all(staging_root)?;
    let dir = tempfile_dir(staging_root)?;

    let gz = flate2::read::GzDecoder::new(blob);
    let mut archive = tar::Archive::new(gz);

    let mut total: u64 = 0;
    let entries = archive
        .entries()
        .map_err(|e| WavyError::InvalidArchive(format!("not a valid tar.gz: {e}")))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| WavyError::InvalidArchive(e.to_string()))?;
        let raw_name = entry
            .path()
            .map_err(|e| WavyError::InvalidArchive(e.to_string()))?
            .to_string_lossy()
            .into_owned();

        let stripped = raw_name.strip_suffix(".zst").unwrap_or(&raw_name).to_string();
        let rel_path = safe_relative_path(&stripped)?;
        let dest = dir.join(&rel_path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut compressed = Vec::new();
        entry
            .read_to_end(&mut compressed)
            .map_err(|e| WavyError::InvalidArchive(e.to_string()))?;

        let decompressed = if raw_name.ends_with(".zst") {
            decompress_member(&compressed)?
        } else {
            if compressed.len() as u64 > MAX_MEMBER_BYTES {
                return Err(WavyError::InvalidArchive(format!(
                    "member {raw_name} exceeds {MAX_MEMBER_BYTES} bytes"
                )));
            }
            compressed
        };

        total += decompressed.len() as u64;
        if total > MAX_TOTAL_BYTES {
            return Err(WavyError::InvalidArchive(format!(
                "archive exceeds total uncompressed cap of {MAX_TOTAL_BYTES} bytes"
            )));
        }

        std::fs::write(&dest, &decompressed)?;
    }

    Ok(UnpackedArchive { root: Some(dir) })
}

fn decompress_member(compressed: &[u8]) -> Result<Vec<u8>, WavyError> {
    let decoder = zstd::stream::read::Decoder::new(compressed)
        .map_err(|e| WavyError::InvalidArchive(format!("bad zstd member: {e}")))?;
    let mut limited = decoder.take(MAX_MEMBER_BYTES + 1);
    let mut out = Vec::new();
    limited
        .read_to_end(&mut out)
        .map_err(|e| WavyError::InvalidArchive(format!("zstd decompression failed: {e}")))?;
    if out.len() as u64 > MAX_MEMBER_BYTES {
        return Err(WavyError::InvalidArchive(format!(
            "member exceeds {MAX_MEMBER_BYTES} decompressed bytes"
        )));
    }
    Ok(out)
}

fn tempfile_dir(root: &Path) -> Result<PathBuf, WavyError> {
    use rand::Rng;
    let suffix: u64 = rand::thread_rng().r#gen();
    let dir = root.join(format!(".staging-{suffix:016x}"));
    std::fs::create_dir(&dir)?;
    Ok(dir)
}

/// Lists every regular file under `dir`, relative to `dir`, sorted by path —
/// the canonical member ordering for the archive fingerprint.
fn sorted_relative_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    collect_files(dir, dir, &mut out)?;
    out.sort();
    Ok(out)
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            out.push(path.strip_prefix(root).unwrap().to_path_buf());
        }
    }
    Ok(())
}

/// Computes the canonical fingerprint of an unpacked archive: SHA-256 over
/// members sorted by path, each contributing
/// `(len(name) || name || len(content) || content)` (§4.1, §4.4).
pub fn archive_fingerprint(dir: &Path) -> std::io::Result<Vec<u8>> {
    let files = sorted_relative_files(dir)?;
    let mut hasher = Sha256::new();
    for rel in files {
        let name = rel.to_string_lossy();
        let content = std::fs::read(dir.join(&rel))?;
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update((content.len() as u64).to_le_bytes());
        hasher.update(&content);
    }
    Ok(hasher.finalize().to_vec())
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
            let mut enc = flate2::write::GzEncoder::new(&mut gz_buf, flate2::Compression::default());
            enc.write_all(&tar_buf).unwrap();
            enc.finish().unwrap();
        }
        gz_buf
    }

    #[test]
    fn unpack_roundtrips_file_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let blob = build_archive(&[("master.m3u8", b"#EXTM3U\n"), ("metadata.toml", b"title=\"x\"")]);
        let unpacked = unpack(&blob, tmp.path()).unwrap();
        let master = std::fs::read(unpacked.path().join("master.m3u8")).unwrap();
        assert_eq!(master, b"#EXTM3U\n");
    }

    #[test]
    fn rejects_path_traversal() {
        assert!(safe_relative_path("../../etc/passwd").is_err());
        assert!(safe_relative_path("/etc/passwd").is_err());
        assert!(safe_relative_path("a/../../b").is_err());
    }

    #[test]
    fn fingerprint_is_deterministic_and_order_independent() {
        let tmp1 = tempfile::tempdir().unwrap();
        std::fs::write(tmp1.path().join("b.txt"), b"two").unwrap();
        std::fs::write(tmp1.path().join("a.txt"), b"one").unwrap();

        let tmp2 = tempfile::tempdir().unwrap();
        std::fs::write(tmp2.path().join("a.txt"), b"one").unwrap();
        std::fs::write(tmp2.path().join("b.txt"), b"two").unwrap();

        assert_eq!(
            archive_fingerprint(tmp1.path()).unwrap(),
            archive_fingerprint(tmp2.path()).unwrap()
        );
    }
}
