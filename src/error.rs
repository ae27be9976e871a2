use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Stable wire-level error taxonomy (§7).
///
/// Each variant maps to exactly one HTTP status code and one `error` string
/// in the JSON envelope returned to clients. `AlreadyExists` is deliberately
/// not an error from the HTTP caller's point of view — handlers that hit it
/// return a normal `200` response themselves rather than constructing this
/// variant.
#[derive(Debug, thiserror::Error)]
pub enum WavyError {
    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    #[error("malformed playlist: {0}")]
    MalformedPlaylist(String),

    #[error("malformed segment: {0}")]
    MalformedSegment(String),

    #[error("malformed metadata sidecar: {0}")]
    MalformedToml(String),

    #[error("invalid owner id: {0}")]
    OwnerIdInvalid(String),

    #[error("invalid path: {0}")]
    PathInvalid(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage full: {0}")]
    StorageFull(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Db(String),
}

impl WavyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidArchive(_)
            | Self::MalformedPlaylist(_)
            | Self::MalformedSegment(_)
            | Self::MalformedToml(_)
            | Self::OwnerIdInvalid(_)
            | Self::PathInvalid(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::StorageFull(_) | Self::Io(_) | Self::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::InvalidArchive(_) => "InvalidArchive",
            Self::MalformedPlaylist(_) => "MalformedPlaylist",
            Self::MalformedSegment(_) => "MalformedSegment",
            Self::MalformedToml(_) => "MalformedToml",
            Self::OwnerIdInvalid(_) => "OwnerIdInvalid",
            Self::PathInvalid(_) => "PathInvalid",
            Self::NotFound(_) => "NotFound",
            Self::StorageFull(_) => "StorageFull",
            Self::Io(_) => "IoError",
            Self::Db(_) => "DbError",
        }
    }
}

impl From<sled::Error> for WavyError {
    fn from(e: sled::Error) -> Self {
        Self::Db(e.to_string())
    }
}

/// Wire error envelope: timestamp, status, error code, message, path.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub timestamp: u64,
    pub status: u16,
    pub error: &'static str,
    pub message: String,
    pub path: String,
}

impl ErrorEnvelope {
    pub fn new(err: &WavyError, path: impl Into<String>) -> Self {
        Self {
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            status: err.status().as_u16(),
            error: err.wire_code(),
            message: err.to_string(),
            path: path.into(),
        }
    }
}

/// Request-scoped error: the `WavyError` plus the path it occurred on, so
/// the axum error handler can fill in [`ErrorEnvelope::path`] without
/// threading the request through every call site.
pub struct ApiError {
    pub err: WavyError,
    pub path: String,
}

impl ApiError {
    pub fn new(err: WavyError, path: impl Into<String>) -> Self {
        Self {
            err,
            path: path.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.err.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(path = %self.path, err = %self.err, "request failed");
        }
        let body = ErrorEnvelope::new(&self.err, self.path);
        (status, axum::Json(body)).into_response()
    }
}
