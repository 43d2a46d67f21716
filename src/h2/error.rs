//! HTTP/2-specific error kinds: a `Reason`/`Initiator` split plus
//! `Reset`/`GoAway` scoping, folded into one `H2Error` that also records
//! whether a decoder error is stream- or connection-scoped instead of
//! splitting that decision across call sites.

use std::fmt;

/// RFC 7540 §7 error codes, carried on RST_STREAM and GOAWAY frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum Reason {
    NO_ERROR,
    PROTOCOL_ERROR,
    INTERNAL_ERROR,
    FLOW_CONTROL_ERROR,
    SETTINGS_TIMEOUT,
    STREAM_CLOSED,
    FRAME_SIZE_ERROR,
    REFUSED_STREAM,
    CANCEL,
    COMPRESSION_ERROR,
    CONNECT_ERROR,
    ENHANCE_YOUR_CALM,
    INADEQUATE_SECURITY,
    HTTP_1_1_REQUIRED,
    Other(u32),
}

impl Reason {
    #[must_use]
    pub fn as_u32(self) -> u32 {
        match self {
            Self::NO_ERROR => 0x0,
            Self::PROTOCOL_ERROR => 0x1,
            Self::INTERNAL_ERROR => 0x2,
            Self::FLOW_CONTROL_ERROR => 0x3,
            Self::SETTINGS_TIMEOUT => 0x4,
            Self::STREAM_CLOSED => 0x5,
            Self::FRAME_SIZE_ERROR => 0x6,
            Self::REFUSED_STREAM => 0x7,
            Self::CANCEL => 0x8,
            Self::COMPRESSION_ERROR => 0x9,
            Self::CONNECT_ERROR => 0xa,
            Self::ENHANCE_YOUR_CALM => 0xb,
            Self::INADEQUATE_SECURITY => 0xc,
            Self::HTTP_1_1_REQUIRED => 0xd,
            Self::Other(n) => n,
        }
    }

    #[must_use]
    pub fn from_u32(n: u32) -> Self {
        match n {
            0x0 => Self::NO_ERROR,
            0x1 => Self::PROTOCOL_ERROR,
            0x2 => Self::INTERNAL_ERROR,
            0x3 => Self::FLOW_CONTROL_ERROR,
            0x4 => Self::SETTINGS_TIMEOUT,
            0x5 => Self::STREAM_CLOSED,
            0x6 => Self::FRAME_SIZE_ERROR,
            0x7 => Self::REFUSED_STREAM,
            0x8 => Self::CANCEL,
            0x9 => Self::COMPRESSION_ERROR,
            0xa => Self::CONNECT_ERROR,
            0xb => Self::ENHANCE_YOUR_CALM,
            0xc => Self::INADEQUATE_SECURITY,
            0xd => Self::HTTP_1_1_REQUIRED,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NO_ERROR => "no error",
            Self::PROTOCOL_ERROR => "protocol error",
            Self::INTERNAL_ERROR => "internal error",
            Self::FLOW_CONTROL_ERROR => "flow control error",
            Self::SETTINGS_TIMEOUT => "settings ack timeout",
            Self::STREAM_CLOSED => "stream closed",
            Self::FRAME_SIZE_ERROR => "frame size error",
            Self::REFUSED_STREAM => "refused stream",
            Self::CANCEL => "cancelled",
            Self::COMPRESSION_ERROR => "compression error",
            Self::CONNECT_ERROR => "connect error",
            Self::ENHANCE_YOUR_CALM => "enhance your calm",
            Self::INADEQUATE_SECURITY => "inadequate security",
            Self::HTTP_1_1_REQUIRED => "HTTP/1.1 required",
            Self::Other(n) => return write!(f, "unknown error code {n:#x}"),
        };
        f.write_str(s)
    }
}

/// Who caused a RST_STREAM/GOAWAY: the remote peer, this library noticing a
/// protocol violation, or the application calling a `reset`/`close` API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initiator {
    Remote,
    Library,
    User,
}

/// Whether an [`H2Error`] is scoped to one stream (RST_STREAM) or to the
/// whole connection (GOAWAY), per RFC 7540 §5.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Stream(u32),
    Connection,
}

/// An HTTP/2 protocol-level error, always carrying a [`Reason`] and a
/// [`Scope`] (stream-level → RST_STREAM, connection-level → GOAWAY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H2Error {
    reason: Reason,
    scope: Scope,
    initiator: Initiator,
}

impl H2Error {
    #[must_use]
    pub fn stream(stream_id: u32, reason: Reason, initiator: Initiator) -> Self {
        Self {
            reason,
            scope: Scope::Stream(stream_id),
            initiator,
        }
    }

    #[must_use]
    pub fn connection(reason: Reason, initiator: Initiator) -> Self {
        Self {
            reason,
            scope: Scope::Connection,
            initiator,
        }
    }

    #[must_use]
    pub fn reason(&self) -> Reason {
        self.reason
    }

    #[must_use]
    pub fn scope(&self) -> Scope {
        self.scope
    }

    #[must_use]
    pub fn initiator(&self) -> Initiator {
        self.initiator
    }

    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self.scope, Scope::Connection)
    }
}

impl fmt::Display for H2Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            Scope::Stream(id) => write!(f, "stream {id} error: {}", self.reason),
            Scope::Connection => write!(f, "connection error: {}", self.reason),
        }
    }
}

impl std::error::Error for H2Error {}

/// Classifies whether a frame-size (or other) error arriving with the given
/// stream id and frame kind is connection- or stream-scoped, following RFC
/// 7540 §4.2 literally.
#[must_use]
pub fn is_connection_scoped(kind: crate::h2::frame::Kind, stream_id: u32) -> bool {
    use crate::h2::frame::Kind;
    match kind {
        Kind::Settings | Kind::Ping | Kind::GoAway => true,
        Kind::WindowUpdate => stream_id == 0,
        _ => stream_id == 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_round_trips_through_u32() {
        for reason in [
            Reason::NO_ERROR,
            Reason::PROTOCOL_ERROR,
            Reason::FLOW_CONTROL_ERROR,
            Reason::HTTP_1_1_REQUIRED,
            Reason::Other(0xffff),
        ] {
            assert_eq!(Reason::from_u32(reason.as_u32()), reason);
        }
    }

    #[test]
    fn settings_frame_is_always_connection_scoped() {
        assert!(is_connection_scoped(crate::h2::frame::Kind::Settings, 0));
    }

    #[test]
    fn window_update_scope_depends_on_stream_id() {
        assert!(is_connection_scoped(
            crate::h2::frame::Kind::WindowUpdate,
            0
        ));
        assert!(!is_connection_scoped(
            crate::h2::frame::Kind::WindowUpdate,
            3
        ));
    }
}
