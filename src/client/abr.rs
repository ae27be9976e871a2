//! Adaptive bitrate selector (C11, §4.11). The diagnoser reports latency,
//! not bandwidth, so selection uses a latency/jitter/loss scoring policy
//! rather than a direct bandwidth comparison.

use crate::client::diagnose::NetworkStats;
use crate::playlist::{MasterPlaylist, VariantStream};

/// Degradation applied uniformly to every variant's nominal bitrate by the
/// current network conditions: `1 / (1 + latency_ms/50) * (1 -
/// loss_percent/100) * (1 - min(1, jitter_ms/100))`. `score(v)` below is
/// `v.bitrate * network_factor(stats)`.
fn network_factor(stats: &NetworkStats) -> f64 {
    let latency_term = 1.0 + stats.latency_ms / 50.0;
    let loss_term = 1.0 - stats.loss_percent / 100.0;
    let jitter_term = 1.0 - (stats.jitter_ms / 100.0).min(1.0);
    (1.0 / latency_term) * loss_term * jitter_term
}

/// `score(v) = v.bitrate / (1 + latency_ms/50) * (1 - loss_percent/100) * (1 - min(1, jitter_ms/100))`
fn score(variant: &VariantStream, stats: &NetworkStats) -> f64 {
    variant.bitrate as f64 * network_factor(stats)
}

/// Below this, the network is judged unable to sustain *any* variant's
/// nominal bitrate at a usable margin — every variant's "required effective
/// bandwidth" (§4.11) fails the safety-factor gate and the selector falls
/// back to the lowest-bitrate variant instead of the nominally
/// highest-scoring one.
const MIN_NETWORK_FACTOR: f64 = 0.35;

/// Chooses a variant from `master` given the current network diagnosis.
/// Falls back to the lowest-bitrate variant when the network is judged
/// unusable: loss >= 50%, a failed diagnosis (latency <= 0), or the
/// network's degradation factor leaves every variant's effective bandwidth
/// requirement below the safety margin (§4.11).
///
/// Returns `None` only if `master.variants` is empty.
pub fn select(master: &MasterPlaylist, stats: &NetworkStats) -> Option<VariantStream> {
    if master.variants.is_empty() {
        return None;
    }
    if stats.loss_percent >= 50.0 || stats.latency_ms <= 0.0 {
        return master.variants.iter().min_by_key(|v| v.bitrate).cloned();
    }
    if network_factor(stats) < MIN_NETWORK_FACTOR {
        return master.variants.iter().min_by_key(|v| v.bitrate).cloned();
    }

    master
        .variants
        .iter()
        .max_by(|a, b| {
            let sa = score(a, stats);
            let sb = score(b, stats);
            sa.partial_cmp(&sb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.bitrate.cmp(&b.bitrate))
        })
        .cloned()
}

/// Tracks the currently-selected variant across reselection cycles (§4.11
/// "a new selection that differs from the current is logged"). The fetcher
/// switches at the next segment boundary, not immediately.
pub struct Selector {
    current: Option<VariantStream>,
    cadence: std::time::Duration,
}

impl Selector {
    pub fn new(cadence: std::time::Duration) -> Self {
        Self {
            current: None,
            cadence,
        }
    }

    pub fn cadence(&self) -> std::time::Duration {
        self.cadence
    }

    /// Seeds the current selection without reporting a change — used when a
    /// selection was already made by a different `Selector` instance and a
    /// follow-up reselection loop needs to pick up tracking from there.
    pub fn seed(&mut self, variant: VariantStream) {
        self.current = Some(variant);
    }

    /// Re-evaluates the selection. Returns `Some(variant)` when the pick
    /// changes (the caller is responsible for logging and scheduling the
    /// fetcher switch); returns `None` when the pick is unchanged.
    pub fn reselect(
        &mut self,
        master: &MasterPlaylist,
        stats: &NetworkStats,
    ) -> Option<VariantStream> {
        let chosen = select(master, stats)?;
        let changed = self
            .current
            .as_ref()
            .map(|c| c.uri != chosen.uri)
            .unwrap_or(true);
        self.current = Some(chosen.clone());
        if changed { Some(chosen) } else { None }
    }
}

impl Default for Selector {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master_with(bitrates: &[u64]) -> MasterPlaylist {
        MasterPlaylist {
            variants: bitrates
                .iter()
                .map(|&b| VariantStream {
                    bitrate: b,
                    uri: format!("{b}.m3u8"),
                    resolution: None,
                    codecs: None,
                })
                .collect(),
        }
    }

    #[test]
    fn good_network_prefers_highest_bitrate() {
        let master = master_with(&[64_000, 128_000, 320_000]);
        let stats = NetworkStats {
            latency_ms: 10.0,
            jitter_ms: 1.0,
            loss_percent: 0.0,
        };
        let chosen = select(&master, &stats).unwrap();
        assert_eq!(chosen.bitrate, 320_000);
    }

    #[test]
    fn heavy_loss_forces_lowest_bitrate() {
        let master = master_with(&[64_000, 128_000, 320_000]);
        let stats = NetworkStats {
            latency_ms: 10.0,
            jitter_ms: 1.0,
            loss_percent: 60.0,
        };
        let chosen = select(&master, &stats).unwrap();
        assert_eq!(chosen.bitrate, 64_000);
    }

    #[test]
    fn degraded_network_below_throughput_gate_forces_lowest_bitrate() {
        // §8 seed scenario 5: {latency:300, jitter:80, loss:40} must select
        // 64000 even though loss < 50% and latency > 0 (the ordinary
        // monotonic score would otherwise still prefer 320000).
        let master = master_with(&[64_000, 128_000, 320_000]);
        let stats = NetworkStats {
            latency_ms: 300.0,
            jitter_ms: 80.0,
            loss_percent: 40.0,
        };
        let chosen = select(&master, &stats).unwrap();
        assert_eq!(chosen.bitrate, 64_000);
    }

    #[test]
    fn failed_diagnosis_forces_lowest_bitrate() {
        let master = master_with(&[64_000, 128_000]);
        let chosen = select(&master, &NetworkStats::FAILED).unwrap();
        assert_eq!(chosen.bitrate, 64_000);
    }

    #[test]
    fn selector_reports_none_when_unchanged() {
        let master = master_with(&[64_000, 128_000]);
        let stats = NetworkStats {
            latency_ms: 10.0,
            jitter_ms: 1.0,
            loss_percent: 0.0,
        };
        let mut selector = Selector::default();
        assert!(selector.reselect(&master, &stats).is_some());
        assert!(selector.reselect(&master, &stats).is_none());
    }

    #[test]
    fn seeding_suppresses_the_first_reselect_if_unchanged() {
        let master = master_with(&[64_000, 128_000, 320_000]);
        let stats = NetworkStats {
            latency_ms: 10.0,
            jitter_ms: 1.0,
            loss_percent: 0.0,
        };
        let mut selector = Selector::default();
        selector.seed(master.variants[2].clone()); // 320_000, already the winner
        assert!(selector.reselect(&master, &stats).is_none());
    }
}
