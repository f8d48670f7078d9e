//! The bundled `timedkv-server` binary's core: wires the socket layer, the
//! HTTP/RPC stack and the TimedDB instances into a running accept loop with
//! a fixed worker pool.

pub mod config;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use timedkv_common::{DatabaseSpec, TimedKvError};
use timedkv_net::{Poller, ServerListener, ServerSocketConfig};
use timedkv_rpc::{dispatch, read_request, write_response, DatabaseRegistry, HttpReadError, HttpResponse, ServerInfo};
use timedkv_store::{Clock, Engine, MemEngine, SystemClock, TimedDb, TimedDbConfig, WriteObserver};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

pub use config::ServerConfig;

/// Builds the set of open [`TimedDb`] instances a [`ServerConfig`]
/// describes, each backed by the one in-process reference [`MemEngine`]
/// this core ships.
pub fn open_databases(specs: &[DatabaseSpec], clock: Arc<dyn Clock>) -> Vec<Arc<TimedDb>> {
    specs
        .iter()
        .map(|spec| {
            let engine: Arc<dyn Engine> = Arc::new(MemEngine::new(spec.path.clone()));
            let config = TimedDbConfig {
                name: spec.name.clone(),
                persistent: spec.persistent,
                max_count: spec.max_count,
                max_size: spec.max_size,
                writable: true,
            };
            Arc::new(TimedDb::open(config, engine, clock.clone()))
        })
        .collect()
}

/// The running server. Created with a config and a registry of already-open
/// databases (so callers — tests included — can share a registry or attach
/// a [`WriteObserver`] before serving any traffic).
pub struct Server {
    config: ServerConfig,
    registry: Arc<DatabaseRegistry>,
    info: ServerInfo,
}

impl Server {
    pub fn new(config: ServerConfig, registry: Arc<DatabaseRegistry>) -> Self {
        Self { config, registry, info: ServerInfo { pid: std::process::id(), started_at: SystemTime::now() } }
    }

    /// Convenience constructor: opens every database named in `config` with
    /// the production [`SystemClock`], wraps it in a [`DatabaseRegistry`].
    pub fn with_default_databases(config: ServerConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let databases = open_databases(&config.databases, clock);
        let registry = Arc::new(DatabaseRegistry::new(databases));
        Self::new(config, registry)
    }

    pub fn registry(&self) -> &Arc<DatabaseRegistry> {
        &self.registry
    }

    pub fn set_observer(&self, observer: Arc<dyn WriteObserver>) {
        for db in self.registry.all() {
            db.set_observer(observer.clone());
        }
    }

    /// Runs the accept loop and worker pool until `shutdown` is cancelled.
    /// Signals `ready_tx` with the bound address once listening.
    pub async fn run(
        self,
        ready_tx: oneshot::Sender<std::net::SocketAddr>,
        shutdown: CancellationToken,
    ) -> Result<(), TimedKvError> {
        let socket_config = ServerSocketConfig { io_timeout: self.config.io_timeout, ..Default::default() };
        let listener = ServerListener::bind(&self.config.host, self.config.port, socket_config).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "listening");
        ready_tx.send(local_addr).ok();

        // Every accepted connection is registered with this poller so a
        // single `abort_all()` on shutdown interrupts in-flight reads the
        // same way an explicit per-stream `abort()` would, rather than
        // waiting out each connection's own keep-alive sequence.
        let poller = Poller::new();
        {
            let poller = poller.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                poller.abort_all();
            });
        }

        // The FIFO task queue: a bounded channel feeding a
        // fixed set of worker tasks, each with a stable thread_id for its
        // lifetime. The accept loop is the sole producer.
        let (tx, rx) = mpsc::channel(self.config.worker_threads * 4);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = Vec::with_capacity(self.config.worker_threads);
        for thread_id in 0..self.config.worker_threads {
            let rx = rx.clone();
            let registry = self.registry.clone();
            let info = ServerInfo { pid: self.info.pid, started_at: self.info.started_at };
            let worker_shutdown = shutdown.clone();
            workers.push(tokio::spawn(worker_loop(thread_id, rx, registry, info, worker_shutdown)));
        }

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("shutdown requested, draining accept loop");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok(mut stream) => {
                            poller.attach(&mut stream);
                            if tx.send(stream).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "accept failed"),
                    }
                }
            }
        }

        drop(tx);
        for worker in workers {
            let _ = worker.await;
        }
        tracing::info!("server stopped");
        Ok(())
    }
}

/// One worker thread's loop: pulls connections off the shared queue and
/// serves each one's full keep-alive request sequence before returning to
/// the queue for the next.
async fn worker_loop(
    thread_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<timedkv_net::ClientStream>>>,
    registry: Arc<DatabaseRegistry>,
    info: ServerInfo,
    shutdown: CancellationToken,
) {
    loop {
        let stream = {
            let mut guard = rx.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                item = guard.recv() => item,
            }
        };
        let Some(stream) = stream else { break };
        serve_connection(thread_id, stream, &registry, &info).await;
    }
}

static CONNECTIONS_SERVED: AtomicUsize = AtomicUsize::new(0);

/// Count of connections that have completed their keep-alive sequence,
/// exposed for tests that want to observe worker activity without racing
/// on real sockets.
pub fn connections_served() -> usize {
    CONNECTIONS_SERVED.load(Ordering::Relaxed)
}

/// Serves one connection's full keep-alive sequence of requests: parses a
/// request, dispatches it through the RPC layer, writes the response, and
/// loops until the peer (or this core) asks to close.
async fn serve_connection(
    thread_id: usize,
    mut stream: timedkv_net::ClientStream,
    registry: &DatabaseRegistry,
    info: &ServerInfo,
) {
    let span = tracing::debug_span!("connection", thread_id, peer = ?stream.peer_addr());
    let _enter = span.enter();
    loop {
        let request = match read_request(&mut stream).await {
            Ok(Some(req)) => req,
            Ok(None) => break,
            Err(HttpReadError::TooLarge) => {
                let response = HttpResponse::new(413, "text/plain", b"request body too large".to_vec());
                let _ = write_response(&mut stream, &response, false).await;
                break;
            }
            Err(HttpReadError::Protocol(e)) => {
                tracing::debug!(error = %e, "malformed request, closing connection");
                let response = HttpResponse::new(400, "text/plain", format!("bad request: {e}").into_bytes());
                let _ = write_response(&mut stream, &response, false).await;
                break;
            }
        };

        let keep_alive = request.keep_alive;
        let response = dispatch(&request, registry, info);
        if write_response(&mut stream, &response, keep_alive).await.is_err() {
            break;
        }
        if !keep_alive {
            break;
        }
    }
    CONNECTIONS_SERVED.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use timedkv_client::Client;

    async fn start_server(config: ServerConfig) -> (std::net::SocketAddr, CancellationToken) {
        let server = Server::with_default_databases(config);
        let (ready_tx, ready_rx) = oneshot::channel();
        let shutdown = CancellationToken::new();
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            server.run(ready_tx, server_shutdown).await.unwrap();
        });
        let addr = tokio::time::timeout(Duration::from_secs(5), ready_rx).await.unwrap().unwrap();
        (addr, shutdown)
    }

    #[tokio::test]
    async fn serves_a_set_and_get_round_trip() {
        let mut config = ServerConfig::default();
        config.port = 0;
        config.host = "127.0.0.1".to_string();
        let (addr, shutdown) = start_server(config).await;

        let client = Client::new(format!("http://{addr}"));
        client.set("foo", b"bar", None).await.unwrap();
        let value = client.get("foo").await.unwrap();
        assert_eq!(value.0, b"bar");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn shutdown_stops_the_accept_loop() {
        let mut config = ServerConfig::default();
        config.port = 0;
        config.host = "127.0.0.1".to_string();
        let (addr, shutdown) = start_server(config).await;
        shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = Client::new(format!("http://{addr}"));
        assert!(client.get("anything").await.is_err());
    }
}
