//! `wavy-server` entry point: loads configuration, initializes logging, and
//! serves the HTTPS API until SIGINT/SIGTERM (§5, §6).

use std::sync::Arc;

use wavy::common::banner::{self, BannerInfo};
use wavy::config::Config;
use wavy::server::{self, AppState};
use wavy::types::AnyResult;

/// Entry point proper runs inside a manually built runtime (rather than
/// `#[tokio::main]`) so `WAVY_WORKERS` (§6, §4.8 "a worker pool of N
/// threads") can size the reactor's thread pool instead of defaulting to
/// whatever `#[tokio::main]` picks before `Config::load()` has run.
fn main() -> AnyResult<()> {
    let config = Config::load()?;
    wavy::common::logger::init(&config);
    banner::print_banner(&BannerInfo::default());

    if config.server.cert_path.is_empty() || config.server.key_path.is_empty() {
        tracing::error!("WAVY_CERT/WAVY_KEY (or wavy.toml [server].cert_path/key_path) must be set");
        std::process::exit(1);
    }

    let worker_threads = if config.server.workers > 0 {
        config.server.workers
    } else {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    };
    tracing::info!(worker_threads, "sizing server runtime thread pool");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let state = Arc::new(AppState::new(config)?);
        server::serve(state).await
    })
}
