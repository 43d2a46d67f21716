//! Per-stream state machine transitions, RFC 7540 §5.1.
//!
//! A single named-state enum (`IDLE`, `RESERVED_LOCAL`, `RESERVED_REMOTE`,
//! `OPEN`, `HALF_CLOSED_LOCAL`, `HALF_CLOSED_REMOTE`, `CLOSED`) rather than
//! independent local/remote sub-states, matching how a stream's lifecycle
//! is actually observed from outside.

use crate::h2::error::{H2Error, Initiator, Reason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl State {
    #[must_use]
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// This endpoint sends HEADERS (request, or a response on a stream
    /// already opened by a peer's request).
    pub fn send_headers(&mut self, end_stream: bool) -> Result<(), H2Error> {
        *self = match *self {
            Self::Idle => {
                if end_stream {
                    Self::HalfClosedLocal
                } else {
                    Self::Open
                }
            }
            Self::ReservedLocal => Self::HalfClosedRemote,
            Self::Open if end_stream => Self::HalfClosedLocal,
            Self::HalfClosedRemote if end_stream => Self::Closed,
            same @ (Self::Open | Self::HalfClosedRemote) => same,
            _ => return Err(H2Error::stream(0, Reason::PROTOCOL_ERROR, Initiator::Library)),
        };
        Ok(())
    }

    pub fn recv_headers(&mut self, end_stream: bool) -> Result<(), H2Error> {
        *self = match *self {
            Self::Idle => {
                if end_stream {
                    Self::HalfClosedRemote
                } else {
                    Self::Open
                }
            }
            Self::ReservedRemote => Self::HalfClosedLocal,
            Self::Open if end_stream => Self::HalfClosedRemote,
            Self::HalfClosedLocal if end_stream => Self::Closed,
            same @ (Self::Open | Self::HalfClosedLocal) => same,
            _ => return Err(H2Error::stream(0, Reason::PROTOCOL_ERROR, Initiator::Library)),
        };
        Ok(())
    }

    pub fn recv_push_promise(&mut self) -> Result<(), H2Error> {
        match *self {
            Self::Idle => {
                *self = Self::ReservedRemote;
                Ok(())
            }
            _ => Err(H2Error::stream(0, Reason::PROTOCOL_ERROR, Initiator::Library)),
        }
    }

    pub fn send_push_promise(&mut self) -> Result<(), H2Error> {
        match *self {
            Self::Idle => {
                *self = Self::ReservedLocal;
                Ok(())
            }
            _ => Err(H2Error::stream(0, Reason::PROTOCOL_ERROR, Initiator::Library)),
        }
    }

    /// A RST_STREAM was sent or received: always terminal, from any state.
    pub fn reset(&mut self) {
        *self = Self::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_send_headers_without_end_stream_opens() {
        let mut s = State::Idle;
        s.send_headers(false).unwrap();
        assert_eq!(s, State::Open);
    }

    #[test]
    fn idle_send_headers_with_end_stream_half_closes_local() {
        let mut s = State::Idle;
        s.send_headers(true).unwrap();
        assert_eq!(s, State::HalfClosedLocal);
    }

    #[test]
    fn open_recv_end_stream_half_closes_remote() {
        let mut s = State::Open;
        s.recv_headers(true).unwrap();
        assert_eq!(s, State::HalfClosedRemote);
    }

    #[test]
    fn half_closed_local_recv_end_stream_closes() {
        let mut s = State::HalfClosedLocal;
        s.recv_headers(true).unwrap();
        assert_eq!(s, State::Closed);
    }

    #[test]
    fn half_closed_remote_send_end_stream_closes() {
        let mut s = State::HalfClosedRemote;
        s.send_headers(true).unwrap();
        assert_eq!(s, State::Closed);
    }

    #[test]
    fn reserved_local_send_headers_half_closes_remote() {
        let mut s = State::ReservedLocal;
        s.send_headers(false).unwrap();
        assert_eq!(s, State::HalfClosedRemote);
    }

    #[test]
    fn reserved_remote_recv_headers_half_closes_local() {
        let mut s = State::ReservedRemote;
        s.recv_headers(false).unwrap();
        assert_eq!(s, State::HalfClosedLocal);
    }

    #[test]
    fn reset_is_terminal_from_any_state() {
        for mut s in [State::Idle, State::Open, State::HalfClosedLocal, State::ReservedRemote] {
            s.reset();
            assert_eq!(s, State::Closed);
        }
    }

    #[test]
    fn closed_rejects_further_headers() {
        let mut s = State::Closed;
        assert!(s.send_headers(false).is_err());
    }
}
