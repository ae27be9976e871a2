//! HLS playlist parsing (C2): accepts HLSv3 VOD playlists only and produces
//! an in-memory AST covering the master + media playlist pair the
//! ingestion pipeline needs (§4.2).

use crate::error::WavyError;

#[derive(Debug, Clone, PartialEq)]
pub struct VariantStream {
    pub bitrate: u64,
    pub uri: String,
    pub resolution: Option<String>,
    pub codecs: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub duration: f64,
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaPlaylist {
    pub map_uri: Option<String>,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MasterPlaylist {
    pub variants: Vec<VariantStream>,
}

fn extract_attr(line: &str, key: &str) -> Option<String> {
    let key_eq = format!("{}=", key);
    let pos = line
        .find(&format!(":{}", key_eq))
        .map(|p| p + 1)
        .or_else(|| line.find(&format!(",{}", key_eq)).map(|p| p + 1))?;
    let rest = &line[pos + key_eq.len()..];

    if rest.starts_with('"') {
        let end = rest[1..].find('"')?;
        Some(rest[1..1 + end].to_string())
    } else {
        let end = rest.find(',').unwrap_or(rest.len());
        Some(rest[..end].trim().to_string())
    }
}

/// Parses a master playlist: `#EXT-X-STREAM-INF` blocks followed by a URI
/// line. Variants are returned sorted ascending by bitrate, ties broken by
/// insertion order (§4.2 Ordering).
pub fn parse_master(text: &str) -> Result<MasterPlaylist, WavyError> {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.first() != Some(&"#EXTM3U") {
        return Err(WavyError::MalformedPlaylist(
            "missing #EXTM3U header".into(),
        ));
    }

    let is_master = lines.iter().any(|l| l.starts_with("#EXT-X-STREAM-INF"));
    let is_media = lines.iter().any(|l| l.starts_with("#EXTINF"));
    if is_master && is_media {
        return Err(WavyError::MalformedPlaylist(
            "mixed media and master indicators".into(),
        ));
    }
    if !is_master {
        return Err(WavyError::MalformedPlaylist(
            "not a master playlist (no #EXT-X-STREAM-INF)".into(),
        ));
    }

    let mut variants = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if line.starts_with("#EXT-X-STREAM-INF") {
            let bandwidth = extract_attr(line, "BANDWIDTH")
                .or_else(|| extract_attr(line, "AVERAGE-BANDWIDTH"))
                .ok_or_else(|| {
                    WavyError::MalformedPlaylist("#EXT-X-STREAM-INF missing BANDWIDTH".into())
                })?
                .parse::<u64>()
                .map_err(|_| WavyError::MalformedPlaylist("BANDWIDTH not an integer".into()))?;

            let resolution = extract_attr(line, "RESOLUTION");
            let codecs = extract_attr(line, "CODECS");

            let mut j = i + 1;
            while j < lines.len() && lines[j].starts_with('#') {
                j += 1;
            }
            let uri = lines.get(j).ok_or_else(|| {
                WavyError::MalformedPlaylist("stream-inf with no following URI".into())
            })?;

            variants.push(VariantStream {
                bitrate: bandwidth,
                uri: uri.to_string(),
                resolution,
                codecs,
            });
            i = j + 1;
        } else {
            i += 1;
        }
    }

    variants.sort_by_key(|v| v.bitrate);
    Ok(MasterPlaylist { variants })
}

/// Parses a media playlist: an optional `#EXT-X-MAP`, `#EXTINF`/URI pairs,
/// and a required `#EXT-X-ENDLIST` (VOD only, §4.2).
pub fn parse_media(text: &str) -> Result<MediaPlaylist, WavyError> {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.first() != Some(&"#EXTM3U") {
        return Err(WavyError::MalformedPlaylist(
            "missing #EXTM3U header".into(),
        ));
    }
    if lines.iter().any(|l| l.starts_with("#EXT-X-STREAM-INF")) {
        return Err(WavyError::MalformedPlaylist(
            "mixed media and master indicators".into(),
        ));
    }
    if !lines.iter().any(|l| l == &"#EXT-X-ENDLIST") {
        return Err(WavyError::MalformedPlaylist(
            "VOD media playlist missing #EXT-X-ENDLIST".into(),
        ));
    }

    let mut map_uri = None;
    let mut segments = Vec::new();
    let mut pending_duration: Option<f64> = None;

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if line.starts_with("#EXT-X-MAP") {
            map_uri = extract_attr(line, "URI");
            i += 1;
        } else if let Some(rest) = line.strip_prefix("#EXTINF:") {
            let duration: f64 = rest
                .split(',')
                .next()
                .and_then(|d| d.trim().parse().ok())
                .ok_or_else(|| {
                    WavyError::MalformedPlaylist("#EXTINF with unparsable duration".into())
                })?;
            pending_duration = Some(duration);
            i += 1;
        } else if !line.starts_with('#') {
            let duration = pending_duration.take().ok_or_else(|| {
                WavyError::MalformedPlaylist("URI line without preceding #EXTINF".into())
            })?;
            segments.push(Segment {
                duration,
                uri: line.to_string(),
            });
            i += 1;
        } else {
            // Unknown tag (including #EXT-X-ENDLIST itself) — ignored.
            i += 1;
        }
    }

    Ok(MediaPlaylist { map_uri, segments })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_master_sorted_by_bitrate() {
        let text = "#EXTM3U\n\
                     #EXT-X-STREAM-INF:BANDWIDTH=320000,CODECS=\"mp4a.40.2\"\n\
                     320.m3u8\n\
                     #EXT-X-STREAM-INF:BANDWIDTH=64000\n\
                     64.m3u8\n";
        let ast = parse_master(text).unwrap();
        assert_eq!(ast.variants.len(), 2);
        assert_eq!(ast.variants[0].bitrate, 64000);
        assert_eq!(ast.variants[1].bitrate, 320000);
        assert_eq!(ast.variants[1].codecs.as_deref(), Some("mp4a.40.2"));
    }

    #[test]
    fn rejects_stream_inf_without_bandwidth() {
        let text = "#EXTM3U\n#EXT-X-STREAM-INF:CODECS=\"mp4a.40.2\"\n320.m3u8\n";
        assert!(matches!(
            parse_master(text),
            Err(WavyError::MalformedPlaylist(_))
        ));
    }

    #[test]
    fn parses_media_playlist_with_segments() {
        let text = "#EXTM3U\n\
                     #EXTINF:2.0,\n\
                     seg0.ts\n\
                     #EXTINF:2.0,\n\
                     seg1.ts\n\
                     #EXT-X-ENDLIST\n";
        let media = parse_media(text).unwrap();
        assert_eq!(media.segments.len(), 2);
        assert_eq!(media.segments[0].uri, "seg0.ts");
    }

    #[test]
    fn rejects_media_playlist_without_endlist() {
        let text = "#EXTM3U\n#EXTINF:2.0,\nseg0.ts\n";
        assert!(matches!(
            parse_media(text),
            Err(WavyError::MalformedPlaylist(_))
        ));
    }

    #[test]
    fn rejects_uri_without_preceding_extinf() {
        let text = "#EXTM3U\nseg0.ts\n#EXT-X-ENDLIST\n";
        assert!(matches!(
            parse_media(text),
            Err(WavyError::MalformedPlaylist(_))
        ));
    }
}
