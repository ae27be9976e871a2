//! Per-request timing middleware: wraps every request in a
//! [`crate::metrics::RequestTimer`], which records
//! `total_requests`/`active_connections` on entry and the response-time
//! histogram + outcome counters on drop (§4.8, §4.9).

use std::sync::Arc;

use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use super::AppState;
use crate::metrics::RequestTimer;

pub async fn track_request(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let mut timer = RequestTimer::start(&state.metrics);
    let response = next.run(request).await;
    timer.mark_status(response.status().as_u16());
    response
}
