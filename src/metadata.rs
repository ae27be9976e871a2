//! Persisted data model (§3): the records stored in the KV index (C5) under
//! the `O|`, `A|`, `M|` and `G|` key prefixes.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::{AssetId, OwnerId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantMetadata {
    pub bitrate: u64,
    pub codec: Option<String>,
    pub media_playlist_path: String,
    pub segment_count: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub owner_id: OwnerId,
    pub asset_id: AssetId,
    pub title: String,
    pub artist: String,
    pub duration_seconds: f64,
    pub variants: Vec<VariantMetadata>,
    pub created_unix: u64,
    pub byte_size_total: u64,
    /// Equals `asset_id`; carried alongside for self-verification (§3).
    pub sha256: AssetId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerRecord {
    pub created_unix: u64,
    pub asset_count: u64,
}

/// Per-owner counters (C9, §4.9). Plain atomics rather than a serde-derived
/// struct: persisted as a point-in-time [`OwnerMetricsSnapshot`] instead.
#[derive(Debug, Default)]
pub struct OwnerMetrics {
    pub uploads: AtomicU64,
    pub downloads: AtomicU64,
    pub deletes: AtomicU64,
    pub songs_count: AtomicU64,
    pub storage_bytes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OwnerMetricsSnapshot {
    pub uploads: u64,
    pub downloads: u64,
    pub deletes: u64,
    pub songs_count: u64,
    pub storage_bytes: u64,
}

impl OwnerMetrics {
    pub fn snapshot(&self) -> OwnerMetricsSnapshot {
        OwnerMetricsSnapshot {
            uploads: self.uploads.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            songs_count: self.songs_count.load(Ordering::Relaxed),
            storage_bytes: self.storage_bytes.load(Ordering::Relaxed),
        }
    }

    pub fn from_snapshot(s: OwnerMetricsSnapshot) -> Self {
        Self {
            uploads: AtomicU64::new(s.uploads),
            downloads: AtomicU64::new(s.downloads),
            deletes: AtomicU64::new(s.deletes),
            songs_count: AtomicU64::new(s.songs_count),
            storage_bytes: AtomicU64::new(s.storage_bytes),
        }
    }
}

pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
