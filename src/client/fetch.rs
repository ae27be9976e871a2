//! Segment fetcher (C12, §4.12). Retrieves a media playlist and its
//! segments over HTTPS in batch or chunked mode: retry-with-backoff and
//! continue past a transient failure, using a capped exponential backoff
//! in place of a fixed retry sleep.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::playlist::{self, MediaPlaylist};
use crate::types::AnyResult;

/// Segments are batched below this cumulative declared size; above it the
/// fetcher switches to chunked pipelining (§4.12).
const BATCH_THRESHOLD_BYTES: u64 = 64 * 1024 * 1024;
const CHUNKED_QUEUE_DEPTH: usize = 4;
const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("segment unavailable after {0} attempts: {1}")]
    SegmentUnavailable(u32, String),
    #[error("media playlist segment count mismatch: expected {expected}, received {received}")]
    SegmentCountMismatch { expected: u64, received: u64 },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

pub struct Fetcher {
    client: reqwest::Client,
    base_url: String,
}

impl Fetcher {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn media_playlist_url(&self, owner: &str, asset: &str, bitrate: u64) -> String {
        format!(
            "{}/download/{owner}/{asset}/{bitrate}.m3u8",
            self.base_url
        )
    }

    fn stream_url(&self, owner: &str, asset: &str, rel_path: &str) -> String {
        format!("{}/stream/{owner}/{asset}/{rel_path}", self.base_url)
    }

    pub async fn fetch_media_playlist(
        &self,
        owner: &str,
        asset: &str,
        bitrate: u64,
    ) -> AnyResult<MediaPlaylist> {
        let url = self.media_playlist_url(owner, asset, bitrate);
        let text = self.client.get(&url).send().await?.error_for_status()?.text().await?;
        Ok(playlist::parse_media(&text)?)
    }

    async fn fetch_segment_with_retry(&self, url: &str) -> Result<bytes::Bytes, FetchError> {
        let mut attempt = 0u32;
        loop {
            match self.client.get(url).send().await {
                Ok(resp) => match resp.error_for_status() {
                    Ok(resp) => return Ok(resp.bytes().await?),
                    Err(e) if attempt < MAX_RETRIES => {
                        attempt += 1;
                        backoff_sleep(attempt).await;
                        let _ = e;
                    }
                    Err(e) => {
                        return Err(FetchError::SegmentUnavailable(attempt + 1, e.to_string()));
                    }
                },
                Err(e) if attempt < MAX_RETRIES => {
                    attempt += 1;
                    backoff_sleep(attempt).await;
                    let _ = e;
                }
                Err(e) => {
                    return Err(FetchError::SegmentUnavailable(attempt + 1, e.to_string()));
                }
            }
        }
    }

    /// Batch mode (§4.12): downloads every segment, concatenates, returns a
    /// single buffer once the whole asset is in memory.
    pub async fn fetch_batch(
        &self,
        owner: &str,
        asset: &str,
        bitrate: u64,
    ) -> Result<Vec<u8>, FetchError> {
        let media = self
            .fetch_media_playlist(owner, asset, bitrate)
            .await
            .map_err(|e| FetchError::SegmentUnavailable(0, e.to_string()))?;

        let bitrate_dir = bitrate.to_string();
        let mut buffer = Vec::new();
        let mut received = 0u64;

        if let Some(map_uri) = &media.map_uri {
            let rel = format!("{bitrate_dir}/{map_uri}");
            let url = self.stream_url(owner, asset, &rel);
            let bytes = self.fetch_segment_with_retry(&url).await?;
            buffer.extend_from_slice(&bytes);
        }

        for segment in &media.segments {
            let rel = format!("{bitrate_dir}/{}", segment.uri);
            let url = self.stream_url(owner, asset, &rel);
            let bytes = self.fetch_segment_with_retry(&url).await?;
            buffer.extend_from_slice(&bytes);
            received += 1;
        }

        let expected = media.segments.len() as u64;
        if received != expected {
            return Err(FetchError::SegmentCountMismatch { expected, received });
        }

        Ok(buffer)
    }

    /// Whether the asset's declared total byte size recommends batch mode.
    pub fn should_batch(total_bytes: u64) -> bool {
        total_bytes < BATCH_THRESHOLD_BYTES
    }

    /// Chunked mode (§4.12): pipelines segments through a bounded queue that
    /// a decoder drains concurrently. Backpressure blocks the fetcher (the
    /// bounded channel's `send` awaits a free slot) when the queue is full.
    pub fn fetch_chunked(
        self: std::sync::Arc<Self>,
        owner: String,
        asset: String,
        bitrate: u64,
    ) -> mpsc::Receiver<Result<bytes::Bytes, FetchError>> {
        let (tx, rx) = mpsc::channel(CHUNKED_QUEUE_DEPTH);
        tokio::spawn(async move {
            let media = match self.fetch_media_playlist(&owner, &asset, bitrate).await {
                Ok(m) => m,
                Err(e) => {
                    let _ = tx
                        .send(Err(FetchError::SegmentUnavailable(0, e.to_string())))
                        .await;
                    return;
                }
            };

            let bitrate_dir = bitrate.to_string();
            let mut received = 0u64;
            let expected = media.segments.len() as u64;

            if let Some(map_uri) = &media.map_uri {
                let rel = format!("{bitrate_dir}/{map_uri}");
                let url = self.stream_url(&owner, &asset, &rel);
                let result = self.fetch_segment_with_retry(&url).await;
                let is_err = result.is_err();
                if tx.send(result).await.is_err() || is_err {
                    return;
                }
            }

            for segment in &media.segments {
                let rel = format!("{bitrate_dir}/{}", segment.uri);
                let url = self.stream_url(&owner, &asset, &rel);
                let result = self.fetch_segment_with_retry(&url).await;
                let is_err = result.is_err();
                received += 1;
                if tx.send(result).await.is_err() || is_err {
                    return;
                }
            }

            if received != expected {
                let _ = tx
                    .send(Err(FetchError::SegmentCountMismatch { expected, received }))
                    .await;
            }
        });
        rx
    }

    /// Like [`Fetcher::fetch_chunked`], but re-checks `target_bitrate` at
    /// every segment boundary and switches variants when it changes (§4.11
    /// "the fetcher switches at the next segment boundary"; §5 "the
    /// fetcher's backpressure wait on a full queue" still applies via the
    /// same bounded channel). `target_bitrate` is written by the caller's
    /// ABR reselection loop; `0` means "no change requested".
    ///
    /// Assumes every variant in the ladder segments its media at the same
    /// cadence (one playlist entry per segment index lines up across
    /// bitrates) — true of every HLS ladder this ingestion pipeline
    /// produces, since all variants are cut from the same source audio.
    pub fn fetch_chunked_adaptive(
        self: std::sync::Arc<Self>,
        owner: String,
        asset: String,
        initial_bitrate: u64,
        target_bitrate: std::sync::Arc<std::sync::atomic::AtomicU64>,
    ) -> mpsc::Receiver<Result<bytes::Bytes, FetchError>> {
        let (tx, rx) = mpsc::channel(CHUNKED_QUEUE_DEPTH);
        tokio::spawn(async move {
            let mut current_bitrate = initial_bitrate;
            let mut media = match self
                .fetch_media_playlist(&owner, &asset, current_bitrate)
                .await
            {
                Ok(m) => m,
                Err(e) => {
                    let _ = tx
                        .send(Err(FetchError::SegmentUnavailable(0, e.to_string())))
                        .await;
                    return;
                }
            };
            let expected = media.segments.len() as u64;

            if !self
                .send_init_segment(&tx, &owner, &asset, current_bitrate, &media)
                .await
            {
                return;
            }

            let mut received = 0u64;
            let mut idx = 0usize;
            while idx < media.segments.len() {
                let desired = target_bitrate.swap(0, Ordering::Relaxed);
                if desired != 0 && desired != current_bitrate {
                    match self.fetch_media_playlist(&owner, &asset, desired).await {
                        Ok(new_media) if new_media.segments.len() == media.segments.len() => {
                            tracing::info!(
                                from = current_bitrate,
                                to = desired,
                                at_segment = idx,
                                "adaptive bitrate switch"
                            );
                            current_bitrate = desired;
                            media = new_media;
                            if !self
                                .send_init_segment(&tx, &owner, &asset, current_bitrate, &media)
                                .await
                            {
                                return;
                            }
                        }
                        Ok(_) => {
                            tracing::warn!(
                                desired,
                                "skipped adaptive switch: segment count mismatch"
                            );
                        }
                        Err(e) => {
                            tracing::warn!(desired, error = %e, "skipped adaptive switch: fetch failed");
                        }
                    }
                }

                let bitrate_dir = current_bitrate.to_string();
                let rel = format!("{bitrate_dir}/{}", media.segments[idx].uri);
                let url = self.stream_url(&owner, &asset, &rel);
                let result = self.fetch_segment_with_retry(&url).await;
                let is_err = result.is_err();
                received += 1;
                idx += 1;
                if tx.send(result).await.is_err() || is_err {
                    return;
                }
            }

            if received != expected {
                let _ = tx
                    .send(Err(FetchError::SegmentCountMismatch { expected, received }))
                    .await;
            }
        });
        rx
    }

    async fn send_init_segment(
        &self,
        tx: &mpsc::Sender<Result<bytes::Bytes, FetchError>>,
        owner: &str,
        asset: &str,
        bitrate: u64,
        media: &MediaPlaylist,
    ) -> bool {
        let Some(map_uri) = &media.map_uri else {
            return true;
        };
        let rel = format!("{bitrate}/{map_uri}");
        let url = self.stream_url(owner, asset, &rel);
        let result = self.fetch_segment_with_retry(&url).await;
        let is_err = result.is_err();
        if tx.send(result).await.is_err() || is_err {
            return false;
        }
        true
    }
}

/// `attempt` is the 1-based retry number (the first retry is `1`). Sleeps
/// `100ms * 2^(attempt-1)`, capped at 2s (§4.12): 100ms, 200ms, 400ms, ...
async fn backoff_sleep(attempt: u32) {
    let delay = BACKOFF_BASE
        .saturating_mul(1 << (attempt - 1).min(8))
        .min(BACKOFF_CAP);
    tokio::time::sleep(delay).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn batch_threshold_matches_spec_default() {
        assert!(Fetcher::should_batch(63 * 1024 * 1024));
        assert!(!Fetcher::should_batch(65 * 1024 * 1024));
    }

    /// Spawns a plain-HTTP server on an ephemeral port that fails the first
    /// `fail_times` requests with a 500 and then returns 200 with `body`
    /// (§8 seed test 6: "first two GETs fail... third succeeds").
    fn spawn_flaky_server(fail_times: usize, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = std::sync::Arc::new(AtomicUsize::new(0));

        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);

                let attempt = seen.fetch_add(1, Ordering::SeqCst);
                if attempt < fail_times {
                    let _ = stream.write_all(b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n");
                } else {
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes());
                    let _ = stream.write_all(body);
                }
            }
        });

        format!("http://{addr}")
    }

    #[tokio::test]
    async fn segment_retry_succeeds_after_two_failures() {
        let base_url = spawn_flaky_server(2, b"segment-bytes");
        let fetcher = Fetcher::new(reqwest::Client::new(), base_url.clone());

        let bytes = fetcher
            .fetch_segment_with_retry(&format!("{base_url}/seg.ts"))
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"segment-bytes");
    }

    #[tokio::test]
    async fn segment_retry_gives_up_after_max_attempts() {
        let base_url = spawn_flaky_server(100, b"unused");
        let fetcher = Fetcher::new(reqwest::Client::new(), base_url.clone());

        let err = fetcher
            .fetch_segment_with_retry(&format!("{base_url}/seg.ts"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::SegmentUnavailable(_, _)));
    }
}
