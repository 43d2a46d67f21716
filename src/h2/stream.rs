//! Per-stream state machine, `sendHeaders`/`sendData`, and event dispatch.
//!
//! The state-transition shape lives in [`crate::h2::stream_state`];
//! `send_data`'s result (`bytes_sent | blocked | failed`) is expressed here
//! as a [`SendOutcome`] enum rather than a C-style sentinel integer.

use crate::h2::error::{H2Error, Initiator, Reason};
use crate::h2::flow_control::{FlowControl, WindowUpdatePolicy};
use crate::h2::frame::DEFAULT_MAX_FRAME_SIZE;
use crate::h2::hpack::Header;
use crate::h2::stream_state::State;

pub type StreamId = u32;

/// Outcome of [`Stream::send_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent(usize),
    Blocked,
    Failed,
}

/// The four user callbacks a stream dispatches events to. Kept as trait-object callbacks, matching the event-loop
/// callback style used throughout this crate's reactor and timer modules,
/// rather than an `async`/`Future`-based surface. `Send` for the same
/// reason as [`crate::h2::hpack::HpackCodec`]: a stream's connection may be
/// shared with a [`crate::h2::stream_proxy::StreamProxy`] on another thread.
pub trait StreamCallbacks: Send {
    fn on_headers(&mut self, headers: &[Header], end_stream: bool) {
        let _ = (headers, end_stream);
    }
    fn on_data(&mut self, data: &[u8], end_stream: bool) {
        let _ = (data, end_stream);
    }
    fn on_reset(&mut self, reason: Reason) {
        let _ = reason;
    }
    fn on_write_ready(&mut self) {}
}

/// A single HTTP/2 stream. Exclusively owned by its
/// [`crate::h2::connection::Connection`]; callbacks are invoked by the
/// connection's dispatch loop, never directly by application code.
pub struct Stream {
    id: StreamId,
    state: State,
    local_flow: FlowControl,
    remote_flow: FlowControl,
    write_blocked: bool,
    headers_received: bool,
    end_stream_received: bool,
    max_frame_size: u32,
    callbacks: Option<Box<dyn StreamCallbacks>>,
}

impl Stream {
    #[must_use]
    pub fn new(id: StreamId, initial_local_window: i64, initial_remote_window: i64) -> Self {
        Self {
            id,
            state: State::Idle,
            local_flow: FlowControl::new(initial_local_window, 0, WindowUpdatePolicy::default()),
            remote_flow: FlowControl::new(0, initial_remote_window, WindowUpdatePolicy::default()),
            write_blocked: false,
            headers_received: false,
            end_stream_received: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            callbacks: None,
        }
    }

    pub fn set_callbacks(&mut self, callbacks: Box<dyn StreamCallbacks>) {
        self.callbacks = Some(callbacks);
    }

    pub(crate) fn dispatch_headers(&mut self, headers: &[Header], end_stream: bool) {
        if let Some(cb) = self.callbacks.as_mut() {
            cb.on_headers(headers, end_stream);
        }
    }

    pub(crate) fn dispatch_data(&mut self, data: &[u8], end_stream: bool) {
        if let Some(cb) = self.callbacks.as_mut() {
            cb.on_data(data, end_stream);
        }
    }

    pub(crate) fn dispatch_reset(&mut self, reason: Reason) {
        if let Some(cb) = self.callbacks.as_mut() {
            cb.on_reset(reason);
        }
    }

    pub(crate) fn dispatch_write_ready(&mut self) {
        if let Some(cb) = self.callbacks.as_mut() {
            cb.on_write_ready();
        }
    }

    #[must_use]
    pub fn id(&self) -> StreamId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub fn is_write_blocked(&self) -> bool {
        self.write_blocked
    }

    pub fn set_max_frame_size(&mut self, n: u32) {
        self.max_frame_size = n;
    }

    #[must_use]
    pub fn remote_window(&self) -> i64 {
        self.remote_flow.remote_window()
    }

    pub fn apply_remote_window_delta(&mut self, delta: i64) -> crate::error::Result<()> {
        self.remote_flow.update_remote_window_size(delta)
    }

    /// `send_headers(headers, total_bytes, end_stream)`. The
    /// header block itself is produced by the connection's HPACK encoder;
    /// this only advances the state machine.
    pub fn send_headers(&mut self, end_stream: bool) -> Result<(), H2Error> {
        self.state.send_headers(end_stream)
    }

    pub fn recv_headers(&mut self, end_stream: bool) -> Result<(), H2Error> {
        self.headers_received = true;
        if end_stream {
            self.end_stream_received = true;
        }
        self.state.recv_headers(end_stream)
    }

    /// A DATA frame carried END_STREAM. A no-op if END_STREAM already arrived on this stream.
    pub fn recv_data_end_stream(&mut self) -> Result<(), H2Error> {
        if self.end_stream_received {
            return Ok(());
        }
        self.end_stream_received = true;
        self.state.recv_headers(true)
    }

    /// This stream was just created from a received PUSH_PROMISE: Idle ->
    /// ReservedRemote (RFC 7540 §5.1).
    pub fn recv_push_promise(&mut self) -> Result<(), H2Error> {
        self.state.recv_push_promise()
    }

    /// This stream was just created by sending a PUSH_PROMISE referring to
    /// it: Idle -> ReservedLocal.
    pub fn send_push_promise(&mut self) -> Result<(), H2Error> {
        self.state.send_push_promise()
    }

    /// `send_data(buf, end_stream)`. Consults the stream's
    /// remote window: blocked if zero and not an end-stream-only marker;
    /// otherwise sends up to `min(len, remote_window, max_frame_size)`.
    pub fn send_data(&mut self, len: usize, end_stream: bool) -> SendOutcome {
        if self.state.is_closed() {
            return SendOutcome::Failed;
        }
        let window = self.remote_flow.remote_window();
        if window <= 0 && !(len == 0 && end_stream) {
            self.write_blocked = true;
            return SendOutcome::Blocked;
        }
        let max = (window.max(0) as usize).min(self.max_frame_size as usize);
        let to_send = len.min(max);
        if to_send < len && to_send == 0 && len > 0 {
            self.write_blocked = true;
            return SendOutcome::Blocked;
        }
        self.remote_flow.bytes_sent(to_send as u32);
        if to_send == len && end_stream {
            let _ = self.state.send_headers(true);
        }
        SendOutcome::Sent(to_send)
    }

    /// Receipt of WINDOW_UPDATE on this stream: zero increment
    /// is a stream protocol error; overflow past 2^31-1 is a stream
    /// flow-control error.
    pub fn recv_window_update(&mut self, increment: u32) -> Result<(), H2Error> {
        if increment == 0 {
            return Err(H2Error::stream(self.id, Reason::PROTOCOL_ERROR, Initiator::Remote));
        }
        match self.remote_flow.recv_window_update(increment) {
            Ok(_unblocked) => Ok(()),
            Err(_) => Err(H2Error::stream(self.id, Reason::FLOW_CONTROL_ERROR, Initiator::Remote)),
        }
    }

    /// Account for inbound DATA payload bytes and return a refill amount
    /// once the local window has drained below its floor.
    pub fn recv_data(&mut self, n: u32) -> Option<u32> {
        self.local_flow.bytes_received(n)
    }

    /// `on_write()`: clears `write_blocked`, called when the connection
    /// drains its send buffer or a WINDOW_UPDATE refills the window.
    pub fn on_write(&mut self) {
        self.write_blocked = false;
    }

    pub fn send_reset(&mut self) {
        self.state.reset();
    }

    pub fn recv_reset(&mut self) {
        self.state.reset();
    }

    pub fn close(&mut self) {
        self.state.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_stream_starts_idle() {
        let s = Stream::new(1, 65_535, 65_535);
        assert_eq!(s.state(), State::Idle);
    }

    #[test]
    fn send_data_blocks_when_window_exhausted_then_unblocks_on_window_update() {
        let mut s = Stream::new(1, 65_535, 65_535);
        s.send_headers(false).unwrap();
        assert_eq!(s.send_data(65_535, false), SendOutcome::Sent(65_535));
        assert_eq!(s.remote_window(), 0);
        assert_eq!(s.send_data(1, false), SendOutcome::Blocked);
        assert!(s.is_write_blocked());
        s.recv_window_update(100).unwrap();
        s.on_write();
        assert!(!s.is_write_blocked());
        assert_eq!(s.send_data(1, false), SendOutcome::Sent(1));
    }

    #[test]
    fn recv_window_update_zero_increment_is_protocol_error() {
        let mut s = Stream::new(1, 65_535, 65_535);
        let err = s.recv_window_update(0).unwrap_err();
        assert_eq!(err.reason(), Reason::PROTOCOL_ERROR);
    }

    #[test]
    fn send_data_on_closed_stream_fails() {
        let mut s = Stream::new(1, 65_535, 65_535);
        s.send_headers(true).unwrap();
        s.recv_headers(true).unwrap();
        assert_eq!(s.state(), State::Closed);
        assert_eq!(s.send_data(1, false), SendOutcome::Failed);
    }

    #[test]
    fn end_stream_flag_on_data_closes_remote_side_same_as_headers_would() {
        let mut s = Stream::new(1, 65_535, 65_535);
        s.recv_headers(false).unwrap();
        assert_eq!(s.state(), State::Open);
        s.recv_data_end_stream().unwrap();
        assert_eq!(s.state(), State::HalfClosedRemote);
        // A second DATA frame carrying END_STREAM (which cannot happen on
        // the wire, since this stream already half-closed remote) must not
        // double-transition.
        s.recv_data_end_stream().unwrap();
        assert_eq!(s.state(), State::HalfClosedRemote);
    }

    #[test]
    fn end_stream_flag_on_data_closes_stream_already_half_closed_local() {
        let mut s = Stream::new(1, 65_535, 65_535);
        s.send_headers(true).unwrap();
        assert_eq!(s.state(), State::HalfClosedLocal);
        s.recv_headers(false).unwrap();
        s.recv_data_end_stream().unwrap();
        assert_eq!(s.state(), State::Closed);
    }
}
