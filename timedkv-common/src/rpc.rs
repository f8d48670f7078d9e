use crate::error::TimedKvError;

/// Protocol-level return code, mapped to an HTTP status by the dispatcher.
///
/// Kept separate from `TimedKvError` (which carries a free-text message)
/// because several error kinds fold onto the same wire-level code: `Logic`,
/// `NoRecord` and `Duplicate` are all "logical" failures (450) from the
/// caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Success,
    InvalidArguments,
    Logical,
    Internal,
    NoImplementation,
}

impl ReturnCode {
    pub fn http_status(self) -> u16 {
        match self {
            ReturnCode::Success => 200,
            ReturnCode::InvalidArguments => 400,
            ReturnCode::Logical => 450,
            ReturnCode::Internal => 500,
            ReturnCode::NoImplementation => 501,
        }
    }
}

impl From<&TimedKvError> for ReturnCode {
    fn from(err: &TimedKvError) -> Self {
        match err {
            TimedKvError::NoRecord(_) | TimedKvError::Duplicate(_) | TimedKvError::Logic(_) => {
                ReturnCode::Logical
            }
            TimedKvError::Invalid(_) => ReturnCode::InvalidArguments,
            TimedKvError::NoImpl(_) => ReturnCode::NoImplementation,
            TimedKvError::Internal(_) | TimedKvError::Network(_) | TimedKvError::System(_) => {
                ReturnCode::Internal
            }
        }
    }
}

/// Maps an arbitrary HTTP status code to its reason phrase. This core
/// always sends a real one from the table below rather than a fixed
/// placeholder.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        304 => "Not Modified",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        450 => "Logical Inconsistency",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
