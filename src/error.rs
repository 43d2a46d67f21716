//! Core error type shared by every module in this crate: a small public
//! struct wrapping a private `Kind` plus an optional boxed cause, with
//! `is_*()` predicates for callers who want to branch on error category
//! without matching on a kind that isn't `pub`.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Boxed, type-erased cause, the same alias shape used across this crate.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The core error kinds enumerated in the specification's error-handling
/// design: protocol-agnostic outcomes shared by the reactor, event loop,
/// timer wheel, and both protocol engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NoErr,
    Failed,
    InvalidParam,
    InvalidState,
    InvalidProto,
    NotAuthorized,
    NotSupported,
    Timeout,
    Again,
    BufferTooSmall,
    SocketError,
    PollError,
    ProtoError,
    Rejected,
    Destroyed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoErr => "no error",
            Self::Failed => "operation failed",
            Self::InvalidParam => "invalid parameter",
            Self::InvalidState => "invalid state for this operation",
            Self::InvalidProto => "invalid protocol data",
            Self::NotAuthorized => "not authorized",
            Self::NotSupported => "not supported",
            Self::Timeout => "operation timed out",
            Self::Again => "operation would block, try again",
            Self::BufferTooSmall => "destination buffer too small",
            Self::SocketError => "socket I/O error",
            Self::PollError => "reactor poll error",
            Self::ProtoError => "protocol error",
            Self::Rejected => "rejected",
            Self::Destroyed => "object has been destroyed",
        })
    }
}

/// An opaque error value. Construct with [`Error::new`] or one of the
/// `From` impls; inspect with [`Error::kind`] and the `is_*` predicates.
pub struct Error {
    inner: Box<Inner>,
}

struct Inner {
    kind: ErrorKind,
    cause: Option<BoxError>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            inner: Box::new(Inner { kind, cause: None }),
        }
    }

    pub fn with_cause<C: Into<BoxError>>(kind: ErrorKind, cause: C) -> Self {
        Self {
            inner: Box::new(Inner {
                kind,
                cause: Some(cause.into()),
            }),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    #[must_use]
    pub fn is_again(&self) -> bool {
        self.inner.kind == ErrorKind::Again
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.inner.kind == ErrorKind::Timeout
    }

    #[must_use]
    pub fn is_proto(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::ProtoError | ErrorKind::InvalidProto)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner.cause {
            Some(cause) => write!(f, "{}: {cause}", self.inner.kind),
            None => write!(f, "{}", self.inner.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|c| &**c as &(dyn StdError + 'static))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::WouldBlock => ErrorKind::Again,
            io::ErrorKind::TimedOut => ErrorKind::Timeout,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => ErrorKind::InvalidParam,
            _ => ErrorKind::SocketError,
        };
        Self::with_cause(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_is_again_roundtrip() {
        let err: Error = ErrorKind::Again.into();
        assert!(err.is_again());
        assert_eq!(err.kind(), ErrorKind::Again);
    }

    #[test]
    fn io_would_block_maps_to_again() {
        let io_err = io::Error::from(io::ErrorKind::WouldBlock);
        let err: Error = io_err.into();
        assert!(err.is_again());
    }

    #[test]
    fn display_includes_cause() {
        let err = Error::with_cause(ErrorKind::Failed, "disk on fire");
        assert!(err.to_string().contains("disk on fire"));
    }
}
