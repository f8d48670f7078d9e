//! The socket layer: endpoint parsing, a connected client
//! stream, a listening server socket, and a poller that can abort every
//! connection it has issued. Built on tokio rather than a hand-rolled
//! epoll/kqueue poller; see `poller` for why that substitution is faithful
//! to the same contract.

pub mod endpoint;
pub mod listener;
pub mod poller;
pub mod stream;

pub use endpoint::{parse_endpoint, DEFAULT_PORT};
pub use listener::{ServerListener, ServerSocketConfig};
pub use poller::Poller;
pub use stream::ClientStream;
