use thiserror::Error;

/// The eight error kinds the core distinguishes, per the error handling design.
///
/// Stored in a database's last-error slot rather than thread-local, since
/// the slot must be readable by whichever dispatcher thread handles the
/// response after the operation returns.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimedKvError {
    #[error("no record: {0}")]
    NoRecord(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("logic error: {0}")]
    Logic(String),

    #[error("invalid argument: {0}")]
    Invalid(String),

    #[error("no implementation: {0}")]
    NoImpl(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("system error: {0}")]
    System(String),
}

impl TimedKvError {
    /// Short machine-readable tag, used in the `ERROR` RPC output key.
    pub fn tag(&self) -> &'static str {
        match self {
            TimedKvError::NoRecord(_) => "no_record",
            TimedKvError::Duplicate(_) => "duplicate",
            TimedKvError::Logic(_) => "logic",
            TimedKvError::Invalid(_) => "invalid",
            TimedKvError::NoImpl(_) => "no_impl",
            TimedKvError::Internal(_) => "internal",
            TimedKvError::Network(_) => "network",
            TimedKvError::System(_) => "system",
        }
    }
}

pub type Result<T> = std::result::Result<T, TimedKvError>;
