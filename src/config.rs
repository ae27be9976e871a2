use serde::{Deserialize, Serialize};

/// Server-side configuration. Loaded from `wavy.toml` (if present) and then
/// overridden by the environment variables named in §6: `WAVY_ROOT`,
/// `WAVY_PORT`, `WAVY_CERT`, `WAVY_KEY`, `WAVY_WORKERS`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub root: String,
    pub port: u16,
    pub cert_path: String,
    pub key_path: String,
    /// 0 means "use the number of available CPUs" (the default).
    pub workers: usize,
    /// Grace period, in seconds, the server waits for in-flight requests to
    /// finish after SIGINT/SIGTERM before it closes sockets (§5).
    pub shutdown_grace_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: "/var/lib/wavy".to_string(),
            port: 8080,
            cert_path: String::new(),
            key_path: String::new(),
            workers: 0,
            shutdown_grace_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub filters: Option<String>,
    pub file: Option<LogFileConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogFileConfig {
    pub path: String,
    pub max_lines: u32,
}

impl Config {
    /// Loads `wavy.toml` from the current directory if present, then applies
    /// the env-var overrides from §6. A missing config file is not an error
    /// — the server falls back to defaults plus env vars, matching the CLI
    /// surface's "no arguments, reads env" contract.
    pub fn load() -> crate::types::AnyResult<Self> {
        let mut config: Config = match std::fs::read_to_string("wavy.toml") {
            Ok(raw) => toml::from_str(&raw)?,
            Err(_) => Config {
                server: ServerConfig::default(),
                logging: None,
            },
        };

        if let Ok(root) = std::env::var("WAVY_ROOT") {
            config.server.root = root;
        }
        if let Ok(port) = std::env::var("WAVY_PORT") {
            config.server.port = port.parse()?;
        }
        if let Ok(cert) = std::env::var("WAVY_CERT") {
            config.server.cert_path = cert;
        }
        if let Ok(key) = std::env::var("WAVY_KEY") {
            config.server.key_path = key;
        }
        if let Ok(workers) = std::env::var("WAVY_WORKERS") {
            config.server.workers = workers.parse()?;
        }

        Ok(config)
    }
}

/// Client-side CLI configuration (§6): `wavy-client <server-host> <owner>
/// <asset-index> [--backend <path>] [--bitrate <kbps>] [--chunked]`.
#[derive(Debug, Clone)]
pub struct ClientArgs {
    pub server_host: String,
    pub owner: String,
    pub asset_index: usize,
    pub backend_path: Option<String>,
    pub forced_bitrate: Option<u32>,
    pub chunked: bool,
}

impl ClientArgs {
    pub fn parse(mut args: impl Iterator<Item = String>) -> Option<Self> {
        args.next(); // argv[0]
        let server_host = args.next()?;
        let owner = args.next()?;
        let asset_index: usize = args.next()?.parse().ok()?;

        let mut backend_path = None;
        let mut forced_bitrate = None;
        let mut chunked = false;

        while let Some(flag) = args.next() {
            match flag.as_str() {
                "--backend" => backend_path = args.next(),
                "--bitrate" => forced_bitrate = args.next().and_then(|s| s.parse().ok()),
                "--chunked" => chunked = true,
                _ => {}
            }
        }

        Some(Self {
            server_host,
            owner,
            asset_index,
            backend_path,
            forced_bitrate,
            chunked,
        })
    }
}
