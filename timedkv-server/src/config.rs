//! Server configuration: a `ServerConfig` struct filled from CLI flags with
//! an optional TOML file underneath, following a "CLI overrides file
//! overrides defaults" layering.

use serde::Deserialize;
use std::time::Duration;
use timedkv_common::DatabaseSpec;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = timedkv_net::DEFAULT_PORT;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_WORKER_THREADS: usize = 8;

/// Fully resolved configuration the core itself operates on.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub io_timeout: Duration,
    pub worker_threads: usize,
    pub databases: Vec<DatabaseSpec>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            io_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            worker_threads: DEFAULT_WORKER_THREADS,
            databases: vec![DatabaseSpec {
                name: "main".to_string(),
                path: None,
                persistent: false,
                max_count: None,
                max_size: None,
            }],
        }
    }
}

/// Shape of an optional `--config` TOML file. Every field mirrors a CLI
/// flag of the same name; a flag the user actually passed on the command
/// line always wins over whatever the file set (see `Args::into_config` in
/// `main.rs`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub timeout_ms: Option<u64>,
    pub threads: Option<usize>,
    #[serde(default)]
    pub db: Vec<FileDatabaseSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileDatabaseSpec {
    pub name: String,
    pub path: Option<String>,
    #[serde(default)]
    pub persistent: bool,
    pub max_count: Option<u64>,
    pub max_size: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
        toml::from_str(&text).map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.display()))
    }
}
