use clap::Parser;
use timedkv_common::DatabaseSpec;
use timedkv_server::config::{FileConfig, ServerConfig, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_TIMEOUT_MS, DEFAULT_WORKER_THREADS};
use timedkv_server::Server;
use tokio_util::sync::CancellationToken;

/// One `name=path` argument to `--db`. `path` of `-` or `:memory:` means an
/// in-memory-only database (no `MemEngine` persistence backing file).
#[derive(Debug, Clone)]
struct DbArg {
    name: String,
    path: Option<String>,
}

impl std::str::FromStr for DbArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, path) = s.split_once('=').ok_or_else(|| format!("expected name=path, got {s:?}"))?;
        let path = match path {
            "-" | ":memory:" => None,
            other => Some(other.to_string()),
        };
        Ok(DbArg { name: name.to_string(), path })
    }
}

#[derive(Parser, Debug)]
#[command(name = "timedkv-server")]
struct Args {
    /// Address to bind the listening socket to.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind the listening socket to.
    #[arg(long)]
    port: Option<u16>,

    /// Per-I/O-call timeout, in milliseconds.
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Number of worker tasks serving accepted connections.
    #[arg(long)]
    threads: Option<usize>,

    /// `name=path` database to open; repeatable. `path` of `-` or
    /// `:memory:` opens an in-memory-only database.
    #[arg(long = "db")]
    db: Vec<DbArg>,

    /// Applies to every `--db` given on this invocation.
    #[arg(long)]
    persistent: bool,

    /// Applies to every `--db` given on this invocation.
    #[arg(long = "max-count")]
    max_count: Option<u64>,

    /// Applies to every `--db` given on this invocation.
    #[arg(long = "max-size")]
    max_size: Option<u64>,

    /// TOML file providing the same keys as the flags above; any flag
    /// actually passed on the command line overrides the file's value.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// `tracing_subscriber::EnvFilter` directive string, e.g. `debug` or
    /// `timedkv_rpc=debug,timedkv_store=info`.
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let file = match &self.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        let databases = if !self.db.is_empty() {
            self.db
                .iter()
                .map(|arg| DatabaseSpec {
                    name: arg.name.clone(),
                    path: arg.path.clone(),
                    persistent: self.persistent,
                    max_count: self.max_count,
                    max_size: self.max_size,
                })
                .collect()
        } else if !file.db.is_empty() {
            file.db
                .iter()
                .map(|spec| DatabaseSpec {
                    name: spec.name.clone(),
                    path: spec.path.clone(),
                    persistent: spec.persistent,
                    max_count: spec.max_count,
                    max_size: spec.max_size,
                })
                .collect()
        } else {
            ServerConfig::default().databases
        };

        Ok(ServerConfig {
            host: self.host.or(file.host).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.or(file.port).unwrap_or(DEFAULT_PORT),
            io_timeout: std::time::Duration::from_millis(self.timeout_ms.or(file.timeout_ms).unwrap_or(DEFAULT_TIMEOUT_MS)),
            worker_threads: self.threads.or(file.threads).unwrap_or(DEFAULT_WORKER_THREADS),
            databases,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::new(args.log_level.clone())).init();

    let config = args.into_config()?;
    let server = Server::with_default_databases(config);

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_stop_signal().await;
        tracing::info!("stop signal received, shutting down");
        signal_shutdown.cancel();
    });

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if let Ok(addr) = ready_rx.await {
            println!("Listening on {addr}");
        }
    });

    server.run(ready_tx, shutdown).await?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_stop_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut int = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    let mut hup = signal(SignalKind::hangup()).expect("install SIGHUP handler");
    tokio::select! {
        _ = term.recv() => {}
        _ = int.recv() => {}
        _ = hup.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
