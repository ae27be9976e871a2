//! Route handlers (C8, §4.8).

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use futures::StreamExt;
use serde::Serialize;
use tokio_util::io::ReaderStream;

use super::AppState;
use crate::error::{ApiError, WavyError};
use crate::ingest::{self, UploadOutcome};
use crate::metadata::AssetMetadata;
use crate::types::{AssetId, OwnerId};

const STREAM_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Serialize)]
pub struct UploadResponse {
    pub asset_id: String,
    pub owner: String,
}

/// `POST /upload` — multipart form with `owner` (text) and `file`
/// (application/gzip) fields (§6).
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut owner_raw: Option<String> = None;
    let mut file_bytes: Option<Vec<u8>> = None;

    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::new(WavyError::InvalidArchive(e.to_string()), "/upload"))?;
        let Some(field) = field else { break };
        match field.name() {
            Some("owner") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::new(WavyError::InvalidArchive(e.to_string()), "/upload"))?;
                owner_raw = Some(text);
            }
            Some("file") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::new(WavyError::InvalidArchive(e.to_string()), "/upload"))?;
                file_bytes = Some(bytes.to_vec());
            }
            _ => {}
        }
    }

    let owner_raw = owner_raw.ok_or_else(|| {
        ApiError::new(
            WavyError::InvalidArchive("missing 'owner' field".into()),
            "/upload",
        )
    })?;
    let archive_bytes = file_bytes.ok_or_else(|| {
        ApiError::new(
            WavyError::InvalidArchive("missing 'file' field".into()),
            "/upload",
        )
    })?;

    let owner = OwnerId::parse(owner_raw).map_err(|e| ApiError::new(e, "/upload"))?;
    state.metrics.record_bytes_in(archive_bytes.len() as u64);

    // Ingestion is CPU-bound (hash + decompress + validation, §5) and runs
    // on the blocking pool; the upload handler blocks for its duration.
    let blocking_state = state.clone();
    let owner_for_blocking = owner.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        ingest::upload(
            &blocking_state.store,
            &blocking_state.index,
            &owner_for_blocking,
            &archive_bytes,
        )
    })
    .await
    .map_err(|e| ApiError::new(WavyError::Db(e.to_string()), "/upload"))?
    .map_err(|e| ApiError::new(e, "/upload"))?;

    let asset_id = match outcome {
        UploadOutcome::Created(id) | UploadOutcome::AlreadyExists(id) => id,
    };

    Ok(Json(UploadResponse {
        asset_id: asset_id.0,
        owner: owner.0,
    }))
}

/// `GET /owners` — all owner ids from the `O|` range.
pub async fn list_owners(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>, ApiError> {
    let owners = state
        .index
        .list_owners()
        .map_err(|e| ApiError::new(e, "/owners"))?;
    Ok(Json(owners.into_iter().map(|o| o.0).collect()))
}

/// `GET /owners/<owner>` — asset ids for an owner from the `A|owner|` range.
pub async fn list_assets(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    let path = format!("/owners/{owner}");
    let owner = OwnerId::parse(owner).map_err(|e| ApiError::new(e, path.clone()))?;
    let assets = state
        .index
        .list_assets(&owner)
        .map_err(|e| ApiError::new(e, path))?;
    Ok(Json(assets.into_iter().map(|a| a.0).collect()))
}

/// `GET /audio/info/<owner>/<asset>` — metadata JSON from C5.
pub async fn asset_info(
    State(state): State<Arc<AppState>>,
    Path((owner, asset)): Path<(String, String)>,
) -> Result<Json<AssetMetadata>, ApiError> {
    let path = format!("/audio/info/{owner}/{asset}");
    let owner_id = OwnerId::parse(owner).map_err(|e| ApiError::new(e, path.clone()))?;
    let asset_id = AssetId(asset);
    let metadata = state
        .index
        .get_asset(&owner_id, &asset_id)
        .map_err(|e| ApiError::new(e, path.clone()))?
        .ok_or_else(|| ApiError::new(WavyError::NotFound(path.clone()), path))?;
    Ok(Json(metadata))
}

/// `GET /download/<owner>/<asset>/<path>` — whole-file response, path
/// confined to the asset directory.
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path((owner, asset, rel_path)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let path = format!("/download/{owner}/{asset}/{rel_path}");
    let owner_id = OwnerId::parse(owner).map_err(|e| ApiError::new(e, path.clone()))?;
    let asset_id = AssetId(asset);
    let file_path = state
        .store
        .resolve_within_asset(&owner_id, &asset_id, &rel_path)
        .map_err(|e| ApiError::new(e, path.clone()))?;

    let data = tokio::fs::read(&file_path)
        .await
        .map_err(|_| ApiError::new(WavyError::NotFound(path.clone()), path))?;

    state.metrics.record_bytes_out(data.len() as u64);
    let _ = state.index.increment_downloads(&owner_id);

    Ok((
        [(header::CONTENT_TYPE, content_type_for(&rel_path))],
        data,
    )
        .into_response())
}

/// `GET /stream/<owner>/<asset>/<path>` — same bytes, `Transfer-Encoding:
/// chunked`, 64 KiB frames (§4.8).
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Path((owner, asset, rel_path)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let path = format!("/stream/{owner}/{asset}/{rel_path}");
    let owner_id = OwnerId::parse(owner).map_err(|e| ApiError::new(e, path.clone()))?;
    let asset_id = AssetId(asset);
    let file_path = state
        .store
        .resolve_within_asset(&owner_id, &asset_id, &rel_path)
        .map_err(|e| ApiError::new(e, path.clone()))?;

    let file = tokio::fs::File::open(&file_path)
        .await
        .map_err(|_| ApiError::new(WavyError::NotFound(path.clone()), path))?;

    let _ = state.index.increment_downloads(&owner_id);
    let metrics_state = state.clone();
    let reader = ReaderStream::with_capacity(file, STREAM_CHUNK_BYTES).map(move |chunk| {
        if let Ok(bytes) = &chunk {
            metrics_state.metrics.record_bytes_out(bytes.len() as u64);
        }
        chunk
    });

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_for(&rel_path))
        .header(header::TRANSFER_ENCODING, "chunked")
        .body(Body::from_stream(reader))
        .expect("static headers always build a valid response"))
}

/// `DELETE /delete/<owner>/<asset>` — directory then index entry, atomic
/// per §4.6.
pub async fn delete_asset(
    State(state): State<Arc<AppState>>,
    Path((owner, asset)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let path = format!("/delete/{owner}/{asset}");
    let owner_id = OwnerId::parse(owner).map_err(|e| ApiError::new(e, path.clone()))?;
    let asset_id = AssetId(asset);

    if state
        .index
        .get_asset(&owner_id, &asset_id)
        .map_err(|e| ApiError::new(e, path.clone()))?
        .is_none()
    {
        return Err(ApiError::new(WavyError::NotFound(path.clone()), path));
    }

    state
        .store
        .remove_asset(&owner_id, &asset_id)
        .map_err(|e| ApiError::new(WavyError::Io(e), path.clone()))?;
    state
        .index
        .commit_delete(&owner_id, &asset_id)
        .map_err(|e| ApiError::new(e, path))?;

    Ok(StatusCode::OK)
}

/// `GET /ping` — health check.
pub async fn ping() -> &'static str {
    "pong"
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub global: crate::metrics::MetricsSnapshot,
    pub response_time: crate::metrics::HistogramSnapshot,
    pub owners: std::collections::BTreeMap<String, crate::metadata::OwnerMetricsSnapshot>,
}

/// `GET /metrics` — snapshot of global + per-owner counters (§4.9).
///
/// Scrapers that ask for Prometheus text exposition (`Accept: text/plain`,
/// the convention `prometheus.io` clients use) get
/// [`crate::metrics::Metrics::encode_prometheus`]'s output; everything else
/// gets the JSON snapshot the owner-facing callers in §8's seed scenarios
/// parse.
pub async fn metrics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let wants_prometheus = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/plain"));

    if wants_prometheus {
        let body = state
            .metrics
            .encode_prometheus()
            .map_err(|e| ApiError::new(WavyError::Db(e.to_string()), "/metrics"))?;
        return Ok((
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response());
    }

    let owner_ids = state
        .index
        .list_owners()
        .map_err(|e| ApiError::new(e, "/metrics"))?;

    let mut owners = std::collections::BTreeMap::new();
    for owner in owner_ids {
        let snap = state
            .index
            .get_owner_metrics(&owner)
            .map_err(|e| ApiError::new(e, "/metrics"))?;
        owners.insert(owner.0, snap);
    }

    Ok(Json(MetricsResponse {
        global: state.metrics.snapshot(),
        response_time: state.metrics.response_time_snapshot(),
        owners,
    })
    .into_response())
}

fn content_type_for(path: &str) -> &'static str {
    if path.ends_with(".m3u8") {
        "application/vnd.apple.mpegurl"
    } else if path.ends_with(".ts") {
        "video/mp2t"
    } else if path.ends_with(".m4s") {
        "video/iso.segment"
    } else if path.ends_with(".toml") {
        "application/toml"
    } else {
        "application/octet-stream"
    }
}
