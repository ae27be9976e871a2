pub mod handlers;
pub mod middleware;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{delete, get, post};
use axum_server::tls_rustls::RustlsConfig;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::metrics::Metrics;
use crate::store::ObjectStore;
use crate::store::index::Index;
use crate::types::AnyResult;

/// Top-level application state (§5 "Global state"): the KV handle, the
/// object store, and the metrics registry, constructed once at startup and
/// shared by every handler via an `Arc`.
pub struct AppState {
    pub store: ObjectStore,
    pub index: Index,
    pub metrics: Metrics,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> AnyResult<Self> {
        let root = PathBuf::from(&config.server.root);
        let store = ObjectStore::new(&root)?;
        let index = Index::open(&store.db_path())?;
        let removed = store.scrub_orphans(&index)?;
        if !removed.is_empty() {
            warn!(count = removed.len(), "removed orphaned asset directories on startup");
        }
        Ok(Self {
            store,
            index,
            metrics: Metrics::new(),
            config,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/upload", post(handlers::upload))
        .route("/owners", get(handlers::list_owners))
        .route("/owners/{owner}", get(handlers::list_assets))
        .route("/audio/info/{owner}/{asset}", get(handlers::asset_info))
        .route("/download/{owner}/{asset}/{*path}", get(handlers::download))
        .route("/stream/{owner}/{asset}/{*path}", get(handlers::stream))
        .route("/delete/{owner}/{asset}", delete(handlers::delete_asset))
        .route("/ping", get(handlers::ping))
        .route("/metrics", get(handlers::metrics))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::track_request,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Loads the TLS cert/key configured via `WAVY_CERT`/`WAVY_KEY` and serves
/// the router over HTTPS 1.1, TLS >= 1.2 (rustls' default minimum), honoring
/// SIGINT/SIGTERM with the configured grace period (§5 "Cancellation").
pub async fn serve(state: Arc<AppState>) -> AnyResult<()> {
    let cert_path = state.config.server.cert_path.clone();
    let key_path = state.config.server.key_path.clone();
    let port = state.config.server.port;
    let grace = Duration::from_secs(state.config.server.shutdown_grace_seconds);

    let tls_config = RustlsConfig::from_pem_file(&cert_path, &key_path).await?;
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "wavy-server listening");

    let app = router(state);
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!(grace_seconds = grace.as_secs(), "shutdown signal received, draining");
        shutdown_handle.graceful_shutdown(Some(grace));
    });

    axum_server::bind_rustls(addr, tls_config)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
