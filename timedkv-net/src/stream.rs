//! The client stream socket: a connected, timeout- and
//! cancellation-aware byte/line stream.
//!
//! A non-blocking-descriptor design polls in short slices so a cooperative
//! `abort()` can interrupt a pending wait. Under tokio that slicing is
//! unnecessary — the runtime's own reactor already delivers readiness
//! without busy-waiting — so `abort` here is a [`CancellationToken`] raced
//! against the I/O future with `tokio::select!`, the idiomatic tokio
//! equivalent of the same cancellable-wait contract.

use std::any::Any;
use std::net::SocketAddr;
use std::time::Duration;
use timedkv_common::TimedKvError;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::endpoint::parse_endpoint;

/// Page-sized staging buffer for buffered line/byte reads.
const STAGING_BUFFER_SIZE: usize = 4096;

pub struct ClientStream {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Duration,
    pushback: Option<u8>,
    abort_token: CancellationToken,
    peer_addr: Option<SocketAddr>,
    /// Opaque per-session scratch space a worker can attach to the stream;
    /// it lives for as long as the stream does and is dropped with it.
    session_data: Option<Box<dyn Any + Send>>,
}

impl ClientStream {
    /// Connects to `endpoint`, failing with a
    /// [`TimedKvError::Network`] if the connection can't be established
    /// before `timeout` elapses.
    pub async fn open(endpoint: &str, timeout: Duration) -> Result<Self, TimedKvError> {
        let (host, port) = parse_endpoint(endpoint, crate::endpoint::DEFAULT_PORT)?;
        let addr = format!("{host}:{port}");
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| TimedKvError::Network(format!("connect to {addr} timed out")))?
            .map_err(|e| TimedKvError::Network(format!("connect to {addr} failed: {e}")))?;
        Ok(Self::from_tcp_stream(stream, timeout))
    }

    pub(crate) fn from_tcp_stream(stream: TcpStream, timeout: Duration) -> Self {
        let peer_addr = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::with_capacity(STAGING_BUFFER_SIZE, read_half),
            writer: write_half,
            timeout,
            pushback: None,
            abort_token: CancellationToken::new(),
            peer_addr,
            session_data: None,
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Attaches an opaque per-session object, replacing and dropping
    /// whatever was attached before. Persists across requests on this
    /// stream until the stream is dropped or [`Self::clear_session_data`]
    /// is called.
    pub fn set_session_data<T: Any + Send>(&mut self, data: T) {
        self.session_data = Some(Box::new(data));
    }

    /// Borrows the attached session object as `T`, or `None` if nothing of
    /// that type is attached.
    pub fn session_data<T: Any + Send>(&self) -> Option<&T> {
        self.session_data.as_deref().and_then(|d| d.downcast_ref::<T>())
    }

    /// Mutably borrows the attached session object as `T`.
    pub fn session_data_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.session_data.as_deref_mut().and_then(|d| d.downcast_mut::<T>())
    }

    /// Detaches and returns the session object, dropping it if not taken.
    pub fn take_session_data<T: Any + Send>(&mut self) -> Option<T> {
        if self.session_data.as_deref().map(|d| d.is::<T>()).unwrap_or(false) {
            let boxed = self.session_data.take().unwrap();
            (boxed as Box<dyn Any>).downcast::<T>().ok().map(|b| *b)
        } else {
            None
        }
    }

    /// Drops whatever session object is attached, if any.
    pub fn clear_session_data(&mut self) {
        self.session_data = None;
    }

    /// A token whose cancellation interrupts any in-flight `send`/`receive*`
    /// call with a `Network` error.
    pub fn abort_handle(&self) -> CancellationToken {
        self.abort_token.clone()
    }

    pub fn abort(&self) {
        self.abort_token.cancel();
    }

    /// Replaces this stream's abort token, e.g. with a child of a
    /// [`crate::Poller`]'s root so a single `abort_all()` interrupts every
    /// connection the poller has ever registered.
    pub fn set_abort_token(&mut self, token: CancellationToken) {
        self.abort_token = token;
    }

    async fn guarded<T, F>(&self, fut: F) -> Result<T, TimedKvError>
    where
        F: std::future::Future<Output = std::io::Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.abort_token.cancelled() => Err(TimedKvError::Network("aborted".to_string())),
            res = tokio::time::timeout(self.timeout, fut) => {
                match res {
                    Ok(Ok(v)) => Ok(v),
                    Ok(Err(e)) => Err(TimedKvError::Network(e.to_string())),
                    Err(_) => Err(TimedKvError::Network("timed out".to_string())),
                }
            }
        }
    }

    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), TimedKvError> {
        let writer = &mut self.writer;
        self.abort_guarded_write(writer, bytes).await
    }

    async fn abort_guarded_write(&self, writer: &mut OwnedWriteHalf, bytes: &[u8]) -> Result<(), TimedKvError> {
        tokio::select! {
            biased;
            _ = self.abort_token.cancelled() => Err(TimedKvError::Network("aborted".to_string())),
            res = tokio::time::timeout(self.timeout, writer.write_all(bytes)) => {
                match res {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(TimedKvError::Network(e.to_string())),
                    Err(_) => Err(TimedKvError::Network("send timed out".to_string())),
                }
            }
        }
    }

    pub async fn printf(&mut self, text: &str) -> Result<(), TimedKvError> {
        self.send(text.as_bytes()).await
    }

    /// Reads up to `buf.len()` bytes, honoring a single byte of pushback first.
    pub async fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TimedKvError> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(b) = self.pushback.take() {
            buf[0] = b;
            return Ok(1);
        }
        let reader = &mut self.reader;
        self.guarded(reader.read(buf)).await
    }

    /// Reads exactly one byte.
    pub async fn receive_byte(&mut self) -> Result<u8, TimedKvError> {
        if let Some(b) = self.pushback.take() {
            return Ok(b);
        }
        let mut buf = [0u8; 1];
        let reader = &mut self.reader;
        let n = self.guarded(reader.read(&mut buf)).await?;
        if n == 0 {
            return Err(TimedKvError::Network("connection closed".to_string()));
        }
        Ok(buf[0])
    }

    /// Pushes one byte back so the next `receive_byte`/`receive` sees it
    /// again. Exactly one byte of pushback is guaranteed.
    pub fn push_back_byte(&mut self, byte: u8) {
        self.pushback = Some(byte);
    }

    /// Reads a line (up to and including, but not returning, the trailing
    /// `\n`), capped at `max` bytes.
    pub async fn receive_line(&mut self, max: usize) -> Result<Vec<u8>, TimedKvError> {
        let mut line = Vec::new();
        loop {
            let byte = self.receive_byte().await?;
            if byte == b'\n' {
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(line);
            }
            line.push(byte);
            if line.len() > max {
                return Err(TimedKvError::Invalid(format!("line exceeds {max} bytes")));
            }
        }
    }

    /// Reads exactly `buf.len()` bytes.
    pub async fn receive_exact(&mut self, buf: &mut [u8]) -> Result<(), TimedKvError> {
        let mut filled = 0;
        if let Some(b) = self.pushback.take() {
            if buf.is_empty() {
                return Ok(());
            }
            buf[0] = b;
            filled = 1;
        }
        if filled < buf.len() {
            let reader = &mut self.reader;
            self.guarded(reader.read_exact(&mut buf[filled..]))
                .await
                .map(|_| ())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn loopback_pair() -> (ClientStream, ClientStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server_side, _) = listener.accept().await.unwrap();
        let client_side = connect.await.unwrap();
        (
            ClientStream::from_tcp_stream(client_side, Duration::from_secs(2)),
            ClientStream::from_tcp_stream(server_side, Duration::from_secs(2)),
        )
    }

    #[tokio::test]
    async fn send_and_receive_line_round_trips() {
        let (mut client, mut server) = loopback_pair().await;
        client.send(b"hello world\n").await.unwrap();
        let line = server.receive_line(1024).await.unwrap();
        assert_eq!(line, b"hello world");
    }

    #[tokio::test]
    async fn pushback_is_observed_on_next_receive_byte() {
        let (mut client, mut server) = loopback_pair().await;
        client.send(b"X").await.unwrap();
        let byte = server.receive_byte().await.unwrap();
        assert_eq!(byte, b'X');
        server.push_back_byte(byte);
        let replayed = server.receive_byte().await.unwrap();
        assert_eq!(replayed, b'X');
    }

    #[tokio::test]
    async fn abort_interrupts_pending_receive() {
        let (_client, mut server) = loopback_pair().await;
        let abort = server.abort_handle();
        let wait = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            server.receive(&mut buf).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        abort.cancel();
        let result = wait.await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn session_data_persists_until_cleared() {
        let (_client, mut server) = loopback_pair().await;
        assert!(server.session_data::<u32>().is_none());

        server.set_session_data(7u32);
        assert_eq!(server.session_data::<u32>(), Some(&7));
        *server.session_data_mut::<u32>().unwrap() += 1;
        assert_eq!(server.session_data::<u32>(), Some(&8));

        let taken = server.take_session_data::<u32>();
        assert_eq!(taken, Some(8));
        assert!(server.session_data::<u32>().is_none());

        server.set_session_data("attached".to_string());
        server.clear_session_data();
        assert!(server.session_data::<String>().is_none());
    }

    #[tokio::test]
    async fn receive_times_out_with_no_data() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server_side, _) = listener.accept().await.unwrap();
        let _client_side = connect.await.unwrap();
        let mut server = ClientStream::from_tcp_stream(server_side, Duration::from_millis(50));
        let mut buf = [0u8; 16];
        let result = server.receive(&mut buf).await;
        assert!(matches!(result, Err(TimedKvError::Network(_))));
    }
}
