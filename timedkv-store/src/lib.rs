//! `TimedDb`: the expiration-aware key/value store at the core of this
//! system. Everything here is synchronous — the server
//! crate is what drives it from an async runtime.

pub mod clock;
pub mod cursor;
pub mod db;
pub mod engine;
pub mod mem_engine;
pub mod merge;
pub mod observer;
pub mod record;
pub mod visitor;

pub use clock::{Clock, FixedClock, SystemClock};
pub use cursor::Cursor;
pub use db::{TimedDb, TimedDbConfig};
pub use engine::{Engine, EngineCursor, EngineErrorCode, RawAction, RawVisitor};
pub use mem_engine::MemEngine;
pub use merge::{merge, MergeMode};
pub use observer::{NullObserver, WriteLogEntry, WriteObserver};
pub use visitor::{Action, Visitor};
