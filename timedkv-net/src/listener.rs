//! The server listening socket: binds with `SO_REUSEADDR`,
//! and every accepted connection gets the same keep-alive/`TCP_NODELAY`/
//! timeout options as the listener itself.

use std::net::SocketAddr;
use std::time::Duration;
use timedkv_common::TimedKvError;
use tokio::net::{TcpListener, TcpStream};

use crate::stream::ClientStream;

const LISTEN_BACKLOG: i32 = 1024;

/// Socket options stamped onto every accepted connection.
#[derive(Debug, Clone, Copy)]
pub struct ServerSocketConfig {
    pub keepalive: Duration,
    pub nodelay: bool,
    pub io_timeout: Duration,
}

impl Default for ServerSocketConfig {
    fn default() -> Self {
        Self {
            keepalive: Duration::from_secs(60),
            nodelay: true,
            io_timeout: Duration::from_secs(30),
        }
    }
}

pub struct ServerListener {
    listener: TcpListener,
    config: ServerSocketConfig,
}

impl ServerListener {
    pub async fn bind(host: &str, port: u16, config: ServerSocketConfig) -> Result<Self, TimedKvError> {
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| TimedKvError::Invalid(format!("bad bind address {host}:{port}: {e}")))?;

        let domain = if addr.is_ipv6() { socket2::Domain::IPV6 } else { socket2::Domain::IPV4 };
        let socket = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))
            .map_err(|e| TimedKvError::Network(format!("socket() failed: {e}")))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| TimedKvError::Network(format!("SO_REUSEADDR failed: {e}")))?;
        socket
            .bind(&addr.into())
            .map_err(|e| TimedKvError::Network(format!("bind to {addr} failed: {e}")))?;
        socket
            .listen(LISTEN_BACKLOG)
            .map_err(|e| TimedKvError::Network(format!("listen() failed: {e}")))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| TimedKvError::Network(format!("set_nonblocking() failed: {e}")))?;

        let listener = TcpListener::from_std(socket.into())
            .map_err(|e| TimedKvError::Network(format!("TcpListener::from_std failed: {e}")))?;

        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TimedKvError> {
        self.listener
            .local_addr()
            .map_err(|e| TimedKvError::Network(e.to_string()))
    }

    /// Accepts one connection, configuring it to match the listener's socket
    /// options before handing back a [`ClientStream`].
    pub async fn accept(&self) -> Result<ClientStream, TimedKvError> {
        let (stream, _peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| TimedKvError::Network(format!("accept() failed: {e}")))?;
        configure_accepted_socket(&stream, &self.config)?;
        Ok(ClientStream::from_tcp_stream(stream, self.config.io_timeout))
    }
}

fn configure_accepted_socket(stream: &TcpStream, config: &ServerSocketConfig) -> Result<(), TimedKvError> {
    stream
        .set_nodelay(config.nodelay)
        .map_err(|e| TimedKvError::Network(format!("TCP_NODELAY failed: {e}")))?;

    let sock_ref = socket2::SockRef::from(stream);
    sock_ref
        .set_keepalive(true)
        .map_err(|e| TimedKvError::Network(format!("SO_KEEPALIVE failed: {e}")))?;
    let keepalive = socket2::TcpKeepalive::new().with_time(config.keepalive);
    sock_ref
        .set_tcp_keepalive(&keepalive)
        .map_err(|e| TimedKvError::Network(format!("tcp keepalive tuning failed: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_accept_round_trip() {
        let listener = ServerListener::bind("127.0.0.1", 0, ServerSocketConfig::default())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let connect = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let server_side = listener.accept().await.unwrap();
        let _client_side = connect.await.unwrap();
        assert!(server_side.peer_addr().is_some());
    }
}
