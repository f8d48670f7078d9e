//! An optional update-log observer seam. Replication itself stays out of
//! scope; this only gives a successful write procedure somewhere to notify.

/// One successful write, serialized for whatever observer is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteLogEntry {
    pub db_name: String,
    pub key: Vec<u8>,
    /// `None` means the record was removed (a tombstone).
    pub value: Option<Vec<u8>>,
    pub deadline: u64,
}

/// Notified after every successful `set`/`add`/`replace`/`append`/
/// `increment`/`increment_double`/`cas`/`remove`. No bundled implementation
/// ships with this core; a replication layer would implement this trait.
pub trait WriteObserver: Send + Sync {
    fn on_write(&self, entry: &WriteLogEntry);
}

/// An observer that discards every entry; the default when none is configured.
#[derive(Debug, Default)]
pub struct NullObserver;

impl WriteObserver for NullObserver {
    fn on_write(&self, _entry: &WriteLogEntry) {}
}
