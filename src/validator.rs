//! Per-file ingestion validation (C3, §4.3). Every unpacked archive member is
//! checked by extension; failure of any single file is fatal for the whole
//! upload (atomicity is enforced by the ingestion pipeline, not here).

use std::path::Path;

use crate::error::WavyError;
use crate::playlist;

pub fn validate_extension(path: &Path) -> Result<(), WavyError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();
    match ext.as_str() {
        "m3u8" | "ts" | "m4s" | "toml" | "mp3" | "flac" => Ok(()),
        other => Err(WavyError::InvalidArchive(format!(
            "unsupported file extension: .{other} ({})",
            path.display()
        ))),
    }
}

/// Validates a `.m3u8` file: first line must be `#EXTM3U` and the body must
/// parse via C2 as either a master or a media playlist.
pub fn validate_m3u8(content: &str) -> Result<(), WavyError> {
    if content.lines().next() != Some("#EXTM3U") {
        return Err(WavyError::MalformedPlaylist(
            "file does not start with #EXTM3U".into(),
        ));
    }
    match playlist::parse_master(content) {
        Ok(_) => Ok(()),
        Err(master_err) => match playlist::parse_media(content) {
            Ok(_) => Ok(()),
            Err(_) => Err(master_err),
        },
    }
}

/// Validates a `.ts` transport-stream file: nonempty, length a multiple of
/// 188, every packet starting with sync byte `0x47`.
pub fn validate_ts(data: &[u8]) -> Result<(), WavyError> {
    if data.is_empty() {
        return Err(WavyError::MalformedSegment("empty .ts file".into()));
    }
    if data.len() % 188 != 0 {
        return Err(WavyError::MalformedSegment(format!(
            ".ts length {} is not a multiple of 188",
            data.len()
        )));
    }
    for (i, packet) in data.chunks(188).enumerate() {
        if packet[0] != 0x47 {
            return Err(WavyError::MalformedSegment(format!(
                ".ts packet {i} missing sync byte 0x47"
            )));
        }
    }
    Ok(())
}

const VALID_M4S_BOX_TYPES: [&[u8; 4]; 5] = [b"styp", b"sidx", b"moof", b"mdat", b"moov"];

/// Validates a `.m4s` fragment: nonempty, first 8 bytes parse as a valid
/// ISO-BMFF box (size >= 8, a recognized fragment box type).
pub fn validate_m4s(data: &[u8]) -> Result<(), WavyError> {
    if data.is_empty() {
        return Err(WavyError::MalformedSegment("empty .m4s file".into()));
    }
    if data.len() < 8 {
        return Err(WavyError::MalformedSegment(
            ".m4s shorter than a box header".into(),
        ));
    }
    let size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    if size < 8 {
        return Err(WavyError::MalformedSegment(format!(
            ".m4s box size {size} is smaller than the header"
        )));
    }
    let box_type: [u8; 4] = [data[4], data[5], data[6], data[7]];
    if !VALID_M4S_BOX_TYPES.iter().any(|t| **t == box_type) {
        return Err(WavyError::MalformedSegment(format!(
            ".m4s unrecognized box type: {}",
            String::from_utf8_lossy(&box_type)
        )));
    }
    Ok(())
}

/// Validates the `metadata.toml` sidecar: parses as TOML and has `title`,
/// `artist`, `duration_seconds`.
pub fn validate_toml(content: &str) -> Result<toml::Value, WavyError> {
    let value: toml::Value = toml::from_str(content)
        .map_err(|e| WavyError::MalformedToml(format!("not valid TOML: {e}")))?;
    let table = value
        .as_table()
        .ok_or_else(|| WavyError::MalformedToml("metadata.toml is not a table".into()))?;
    for key in ["title", "artist", "duration_seconds"] {
        if !table.contains_key(key) {
            return Err(WavyError::MalformedToml(format!(
                "metadata.toml missing key: {key}"
            )));
        }
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ts_requires_multiple_of_188_and_sync_byte() {
        let mut good = vec![0x47u8; 188 * 2];
        good[188] = 0x47;
        assert!(validate_ts(&good).is_ok());

        let bad_len = vec![0x47u8; 187];
        assert!(validate_ts(&bad_len).is_err());

        let mut bad_sync = vec![0x47u8; 188];
        bad_sync[0] = 0x00;
        assert!(validate_ts(&bad_sync).is_err());
    }

    #[test]
    fn m4s_requires_known_box_type() {
        let mut data = vec![0u8; 16];
        data[0..4].copy_from_slice(&16u32.to_be_bytes());
        data[4..8].copy_from_slice(b"moof");
        assert!(validate_m4s(&data).is_ok());

        data[4..8].copy_from_slice(b"xxxx");
        assert!(validate_m4s(&data).is_err());
    }

    #[test]
    fn toml_requires_all_three_keys() {
        assert!(validate_toml("title=\"x\"\nartist=\"y\"\nduration_seconds=1.0").is_ok());
        assert!(validate_toml("title=\"x\"").is_err());
    }

    #[test]
    fn extension_allowlist() {
        assert!(validate_extension(Path::new("a.ts")).is_ok());
        assert!(validate_extension(Path::new("a.exe")).is_err());
    }
}
