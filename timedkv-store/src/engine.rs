//! The storage-engine contract: an opaque, polymorphic
//! ordered key/value collaborator that `TimedDb` wraps with expiration
//! semantics. `MemEngine` is the one in-process reference implementation;
//! a real deployment would plug in an on-disk B-tree or hash engine behind
//! the same trait.

use std::collections::BTreeMap;

/// Outcome of visiting a raw (prefix-bearing) record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawAction {
    /// Leave the stored bytes untouched.
    Keep,
    /// Delete the record.
    Remove,
    /// Overwrite the record with new raw bytes.
    Set(Vec<u8>),
}

/// Callback invoked under the engine's per-key (or whole-database, for
/// `iterate`) lock. `value` is `None` when the key is absent.
pub trait RawVisitor: Send {
    fn visit(&mut self, key: &[u8], value: Option<&[u8]>) -> RawAction;
}

impl<F> RawVisitor for F
where
    F: FnMut(&[u8], Option<&[u8]>) -> RawAction + Send,
{
    fn visit(&mut self, key: &[u8], value: Option<&[u8]>) -> RawAction {
        self(key, value)
    }
}

/// Last-error codes an engine can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorCode {
    Success,
    NoRecord,
    DuplicateRecord,
    Logic,
    Invalid,
    System,
}

/// A cursor over an `Engine`'s ordered keyspace.
pub trait EngineCursor: Send {
    /// Positions at the first key. `false` if the database is empty.
    fn jump(&mut self) -> bool;
    /// Positions at the first key `>= key`. `false` if none exists.
    fn jump_to(&mut self, key: &[u8]) -> bool;
    /// Positions at the last key. Hash-only engines may no-op and return `false`.
    fn jump_back(&mut self) -> bool;
    /// Advances to the next key. `false` (and invalidates the cursor) past the end.
    fn step(&mut self) -> bool;
    /// Steps to the previous key. Hash-only engines may no-op and return `false`.
    fn step_back(&mut self) -> bool;
    /// Applies `visitor` to the record at the current position.
    ///
    /// If `advance` is set, steps in the cursor's last-used direction
    /// afterwards (forward by default, backward after a `step_back`/`jump_back`).
    fn accept(&mut self, visitor: &mut dyn RawVisitor, writable: bool, advance: bool) -> bool;
    /// Removes the record at the current position and advances past it.
    fn remove(&mut self) -> bool;
    /// The key at the current position, or `None` if invalid.
    fn key(&self) -> Option<Vec<u8>>;
    /// `true` if positioned at a live record.
    fn is_valid(&self) -> bool {
        self.key().is_some()
    }
}

/// The storage-engine contract itself.
pub trait Engine: Send + Sync {
    /// Atomic with respect to other `accept(key, ...)` calls on the same key.
    fn accept(&self, key: &[u8], visitor: &mut dyn RawVisitor, writable: bool);
    /// Atomic for the whole database; no other operation progresses until it returns.
    fn iterate(&self, visitor: &mut dyn RawVisitor, writable: bool);
    fn new_cursor(&self) -> Box<dyn EngineCursor>;
    fn count(&self) -> u64;
    fn size(&self) -> u64;
    fn path(&self) -> Option<String>;
    fn clear(&self);
    fn status(&self) -> BTreeMap<String, String>;
    fn copy(&self, dest_path: &str) -> Result<(), EngineErrorCode>;
    fn synchronize(&self, hard: bool);
    /// The small opaque header block: byte 0 magic, byte 1 option flags.
    fn header(&self) -> [u8; 2];
    fn set_header(&self, bytes: [u8; 2]);
    /// Defragmentation; a no-op for engines that don't need it.
    fn defrag(&self) {}
    fn last_error(&self) -> EngineErrorCode {
        EngineErrorCode::Success
    }
}
