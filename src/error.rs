use std::fmt;

use crate::Status;

/// A boxed error, used where collaborator contracts only require
/// `std::error::Error`.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Error returned by call and stream handles.
///
/// Most failures are RPC failures carrying a [`Status`]. Misusing a handle
/// outside its allowed lifecycle (writing after [`complete`], reading
/// trailers before the call finished) is a programmer bug and is reported
/// separately so it is never mistaken for a peer-provided status.
///
/// [`complete`]: crate::client::StreamWriter::complete
#[derive(Debug)]
pub enum CallError {
    /// The call failed, locally or remotely, with a gRPC status.
    Status(Status),
    /// The handle was used outside its allowed lifecycle.
    InvalidOperation(&'static str),
}

impl CallError {
    /// Returns the inner [`Status`], if this is a status failure.
    pub fn status(&self) -> Option<&Status> {
        match self {
            CallError::Status(status) => Some(status),
            CallError::InvalidOperation(_) => None,
        }
    }
}

impl From<Status> for CallError {
    fn from(status: Status) -> Self {
        CallError::Status(status)
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Status(status) => status.fmt(f),
            CallError::InvalidOperation(msg) => write!(f, "invalid operation: {}", msg),
        }
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CallError::Status(status) => Some(status),
            CallError::InvalidOperation(_) => None,
        }
    }
}
