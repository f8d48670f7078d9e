//! The connection poller: tracks every connection the server
//! has handed to a worker and can abort them all at once, e.g. on `SIGHUP`
//! restart or shutdown.
//!
//! A descriptor-based poller would multiplex raw file descriptors itself
//! (`wait`/`pop`/`flush`/`abort` over `epoll`/`kqueue`). tokio's reactor
//! already is that multiplexer, so `Poller` here only keeps the one piece
//! tokio doesn't give you for free: a single handle that cancels every
//! connection it has ever issued a token to.

use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
pub struct Poller {
    root: CancellationToken,
}

impl Poller {
    pub fn new() -> Self {
        Self { root: CancellationToken::new() }
    }

    /// A token to hand to one connection's [`ClientStream::abort_handle`]
    /// wiring; cancelling the poller cancels every child it has issued.
    ///
    /// [`ClientStream::abort_handle`]: crate::stream::ClientStream::abort_handle
    pub fn register(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Aborts every connection registered so far.
    pub fn abort_all(&self) {
        self.root.cancel();
    }

    /// Registers `stream` with this poller: replaces its abort token with a
    /// child of the poller's root, so a later `abort_all()` interrupts its
    /// in-flight `send`/`receive*` calls the same way an explicit
    /// `stream.abort()` would.
    pub fn attach(&self, stream: &mut crate::stream::ClientStream) {
        stream.set_abort_token(self.register());
    }

    pub fn is_aborted(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Resolves once `abort_all` has been called.
    pub async fn wait(&self) {
        self.root.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn abort_all_cancels_every_registered_child() {
        let poller = Poller::new();
        let a = poller.register();
        let b = poller.register();
        assert!(!a.is_cancelled());
        assert!(!b.is_cancelled());
        poller.abort_all();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[tokio::test]
    async fn wait_resolves_after_abort() {
        let poller = Poller::new();
        let waiter = poller.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });
        poller.abort_all();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn attach_lets_abort_all_interrupt_a_pending_receive() {
        use crate::stream::ClientStream;
        use std::time::Duration;
        use tokio::net::{TcpListener, TcpStream};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server_side, _) = listener.accept().await.unwrap();
        let _client_side = connect.await.unwrap();

        let poller = Poller::new();
        let mut stream = ClientStream::from_tcp_stream(server_side, Duration::from_secs(5));
        poller.attach(&mut stream);

        let wait = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            stream.receive(&mut buf).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        poller.abort_all();
        let result = wait.await.unwrap();
        assert!(result.is_err());
    }
}
