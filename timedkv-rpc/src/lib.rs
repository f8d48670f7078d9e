//! Minimal HTTP/1.1 transport and the RPC-over-HTTP dispatcher: request/
//! response parsing, procedure routing, and the worker procedures that
//! drive a [`timedkv_store::TimedDb`].

pub mod dispatch;
pub mod http;
pub mod procedures;
pub mod registry;

pub use dispatch::dispatch;
pub use http::{read_request, write_response, HttpReadError, HttpRequest, HttpResponse, Method};
pub use procedures::ServerInfo;
pub use registry::DatabaseRegistry;
