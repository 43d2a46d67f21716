//! The frame dispatcher, stream table, settings, push map, upgrade, and
//! preface handling.
//!
//! The stream table is split into regular and promised streams; settings
//! and GOAWAY bookkeeping follow the callback/event style this crate's
//! reactor and event loop already use rather than polling a future.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use indexmap::IndexSet;
use tracing::{debug, trace, warn};

use crate::h2::error::{H2Error, Initiator, Reason};
use crate::h2::flow_control::{FlowControl, WindowUpdatePolicy};
use crate::h2::frame::{
    self, flags, Codec, Data, Frame, FrameError, GoAway, Head, Headers, Kind, Ping, PushPromise,
    Reset, Settings, SettingsConfig, WindowUpdate, DEFAULT_INITIAL_WINDOW_SIZE,
    DEFAULT_MAX_FRAME_SIZE,
};
use crate::h2::hpack::{Header, HpackCodec};
use crate::h2::stream::{SendOutcome, Stream, StreamId};

/// The 24-byte client connection preface literal, checked byte-for-byte on the server side.
pub const PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Something a caller of [`Connection::receive`] should act on beyond what
/// already got written to [`Connection::outbound_bytes`]. Stream-scoped
/// events are also dispatched directly to the
/// stream's own [`crate::h2::stream::StreamCallbacks`]; this enum covers
/// what the *connection* owner (e.g. a [`crate::h2::stream_proxy::StreamProxy`])
/// needs to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnEvent {
    NewStream(StreamId),
    PushPromised { stream_id: StreamId, promised_id: StreamId, cache_key: String },
    GoAway { last_stream_id: StreamId, reason: Reason },
    SettingsAcked,
}

/// Negotiable values for one connection.
#[derive(Debug, Clone)]
pub struct H2Config {
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_concurrent_streams: u32,
    pub header_table_size: u32,
    pub enable_push: bool,
    pub enable_connect_protocol: bool,
}

impl Default for H2Config {
    fn default() -> Self {
        Self {
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_concurrent_streams: 100,
            header_table_size: frame::DEFAULT_SETTINGS_HEADER_TABLE_SIZE,
            enable_push: true,
            enable_connect_protocol: false,
        }
    }
}

struct HeaderBlockInProgress {
    stream_id: StreamId,
    buf: BytesMut,
    end_stream: bool,
    is_push: bool,
    promised_id: StreamId,
}

/// The HTTP/2 connection multiplexer.
pub struct Connection {
    role: Role,
    next_outgoing_stream_id: StreamId,
    last_accepted_stream_id: StreamId,
    streams: HashMap<StreamId, Stream>,
    promised: HashMap<StreamId, Stream>,
    blocked_streams: IndexSet<StreamId>,
    hpack_encoder: Box<dyn HpackCodec>,
    hpack_decoder: Box<dyn HpackCodec>,
    conn_flow: FlowControl,
    local: SettingsConfig,
    remote: SettingsConfig,
    preface_received: bool,
    expect_continuation: Option<HeaderBlockInProgress>,
    out_buf: BytesMut,
    push_clients: HashMap<String, StreamId>,
    codec: Codec,
    going_away: Option<(StreamId, Reason)>,
}

impl Connection {
    pub fn new(role: Role, config: &H2Config, hpack_encoder: Box<dyn HpackCodec>, hpack_decoder: Box<dyn HpackCodec>) -> Self {
        let next_outgoing_stream_id = match role {
            Role::Client => 1,
            Role::Server => 2,
        };
        let mut local = SettingsConfig::default();
        local.initial_window_size = Some(config.initial_window_size);
        local.max_frame_size = Some(config.max_frame_size);
        local.max_concurrent_streams = Some(config.max_concurrent_streams);
        local.header_table_size = Some(config.header_table_size);
        local.enable_push = Some(u32::from(config.enable_push));
        local.enable_connect_protocol = Some(u32::from(config.enable_connect_protocol));

        Self {
            role,
            next_outgoing_stream_id,
            last_accepted_stream_id: 0,
            streams: HashMap::new(),
            promised: HashMap::new(),
            blocked_streams: IndexSet::new(),
            hpack_encoder,
            hpack_decoder,
            conn_flow: FlowControl::new(
                i64::from(config.initial_window_size),
                i64::from(DEFAULT_INITIAL_WINDOW_SIZE),
                WindowUpdatePolicy::default(),
            ),
            local,
            remote: SettingsConfig::default(),
            preface_received: role == Role::Client,
            expect_continuation: None,
            out_buf: BytesMut::new(),
            push_clients: HashMap::new(),
            codec: Codec::new(config.max_frame_size),
            going_away: None,
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn stream(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(&id)
    }

    pub fn stream_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    #[must_use]
    pub fn outbound_bytes(&self) -> &[u8] {
        &self.out_buf
    }

    pub fn take_outbound_bytes(&mut self) -> Bytes {
        self.out_buf.split().freeze()
    }

    /// Consume server-preface-check on raw bytes.
    pub fn check_preface(buf: &[u8]) -> Option<bool> {
        if buf.len() < PREFACE.len() {
            return None;
        }
        Some(&buf[..PREFACE.len()] == PREFACE)
    }

    /// Create a new outbound (client-initiated, or server push) stream id
    /// and register it.
    pub fn create_stream(&mut self) -> StreamId {
        let id = self.next_outgoing_stream_id;
        self.next_outgoing_stream_id += 2;
        let stream = Stream::new(
            id,
            i64::from(self.local.initial_window_size.unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE)),
            i64::from(self.remote.initial_window_size.unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE)),
        );
        self.streams.insert(id, stream);
        id
    }

    /// `send_headers`: advances the stream state, HPACK
    /// encodes the header list inline after the frame header, and queues
    /// the encoded HEADERS frame on the connection's outbound buffer.
    pub fn send_headers(&mut self, id: StreamId, headers: &[Header], end_stream: bool) -> crate::error::Result<()> {
        {
            let stream = self
                .streams
                .get_mut(&id)
                .ok_or_else(|| crate::error::Error::new(crate::error::ErrorKind::InvalidState))?;
            stream.send_headers(end_stream).map_err(h2_to_core_err)?;
        }
        let mut block = Vec::new();
        self.hpack_encoder
            .encode(headers, &mut block)
            .map_err(|_| crate::error::Error::new(crate::error::ErrorKind::ProtoError))?;
        let frame = Frame::Headers(Headers {
            stream_id: id,
            header_block: Bytes::from(block),
            end_stream,
            end_headers: true,
            priority: None,
            pad_len: 0,
        });
        frame.encode(&mut self.out_buf);
        Ok(())
    }

    /// `send_data(buf, end_stream)`. Returns the number of
    /// bytes actually accepted; `Blocked`/`Failed` surface the same way
    /// [`Stream::send_data`] does.
    pub fn send_data(&mut self, id: StreamId, data: &[u8], end_stream: bool) -> SendOutcome {
        let Some(stream) = self.streams.get_mut(&id) else {
            return SendOutcome::Failed;
        };
        let outcome = stream.send_data(data.len(), end_stream);
        if let SendOutcome::Sent(n) = outcome {
            let frame = Frame::Data(Data {
                stream_id: id,
                payload: Bytes::copy_from_slice(&data[..n]),
                end_stream: end_stream && n == data.len(),
                pad_len: 0,
            });
            frame.encode(&mut self.out_buf);
        } else if outcome == SendOutcome::Blocked {
            self.blocked_streams.insert(id);
        }
        outcome
    }

    pub fn send_window_update(&mut self, id: StreamId, increment: u32) {
        let frame = Frame::WindowUpdate(WindowUpdate { stream_id: id, increment });
        frame.encode(&mut self.out_buf);
    }

    pub fn send_ping(&mut self, payload: [u8; 8]) {
        Frame::Ping(Ping { ack: false, payload }).encode(&mut self.out_buf);
    }

    pub fn send_settings(&mut self, config: SettingsConfig) {
        Frame::Settings(Settings { ack: false, config }).encode(&mut self.out_buf);
    }

    pub fn send_go_away(&mut self, reason: Reason, debug_data: Bytes) {
        let last_stream_id = self.last_accepted_stream_id;
        self.going_away = Some((last_stream_id, reason));
        Frame::GoAway(GoAway { last_stream_id, reason, debug_data }).encode(&mut self.out_buf);
    }

    pub fn reset_stream(&mut self, id: StreamId, reason: Reason) {
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.send_reset();
        }
        Frame::Reset(Reset { stream_id: id, reason }).encode(&mut self.out_buf);
    }

    /// Feed newly-arrived socket bytes and dispatch every decoded frame.
    pub fn receive(&mut self, src: &mut BytesMut) -> crate::error::Result<Vec<ConnEvent>> {
        let mut frames = Vec::new();
        let decode_result = {
            let mut codec = std::mem::replace(&mut self.codec, Codec::new(self.local.max_frame_size.unwrap_or(DEFAULT_MAX_FRAME_SIZE)));
            let result = codec.decode_from(src, |frame| frames.push(frame));
            self.codec = codec;
            result
        };

        let mut events = Vec::new();
        for frame in frames {
            if let Err(e) = self.dispatch_one(frame, &mut events) {
                warn!(error = %e, "connection-level error handling frame");
                self.send_go_away(e.reason(), Bytes::new());
                return Err(crate::error::Error::new(crate::error::ErrorKind::ProtoError));
            }
        }

        if let Err(e) = decode_result {
            trace!(error = ?e, "frame decode error, tearing down connection");
            self.send_go_away(e.reason(), Bytes::new());
            return Err(crate::error::Error::new(crate::error::ErrorKind::ProtoError));
        }
        Ok(events)
    }

    fn dispatch_one(&mut self, frame: Frame, events: &mut Vec<ConnEvent>) -> Result<(), H2Error> {
        // HEADERS without END_HEADERS must be followed only by CONTINUATION
        // frames on the same stream.
        if let Some(in_progress) = &self.expect_continuation {
            let ok = matches!(&frame, Frame::Continuation(c) if c.stream_id == in_progress.stream_id);
            if !ok {
                return Err(H2Error::connection(Reason::PROTOCOL_ERROR, Initiator::Library));
            }
        }

        match frame {
            Frame::Data(f) => self.on_data(f, events),
            Frame::Headers(f) => self.on_headers(f, events),
            Frame::Priority(_) => Ok(()),
            Frame::Reset(f) => self.on_reset(f, events),
            Frame::Settings(f) => self.on_settings(f, events),
            Frame::PushPromise(f) => self.on_push_promise(f, events),
            Frame::Ping(f) => self.on_ping(f),
            Frame::GoAway(f) => self.on_go_away(f, events),
            Frame::WindowUpdate(f) => self.on_window_update(f),
            Frame::Continuation(f) => self.on_continuation(f, events),
        }
    }

    fn on_data(&mut self, f: Data, events: &mut Vec<ConnEvent>) -> Result<(), H2Error> {
        // DATA counts against connection flow control immediately on
        // arrival, regardless of stream validity.
        if let Some(delta) = self.conn_flow.bytes_received(f.payload.len() as u32) {
            self.send_window_update(0, delta);
        }
        let Some(stream) = self.streams.get_mut(&f.stream_id) else {
            return Err(H2Error::stream(f.stream_id, Reason::STREAM_CLOSED, Initiator::Library));
        };
        if let Some(refill) = stream.recv_data(f.payload.len() as u32) {
            self.out_refill_window_update(f.stream_id, refill);
        }
        if f.end_stream {
            stream
                .recv_data_end_stream()
                .map_err(|_| H2Error::stream(f.stream_id, Reason::PROTOCOL_ERROR, Initiator::Library))?;
        }
        stream.dispatch_data(&f.payload, f.end_stream);
        let _ = events;
        Ok(())
    }

    fn out_refill_window_update(&mut self, stream_id: StreamId, increment: u32) {
        self.send_window_update(stream_id, increment);
    }

    fn on_headers(&mut self, f: Headers, events: &mut Vec<ConnEvent>) -> Result<(), H2Error> {
        if !self.is_valid_new_stream_id(f.stream_id) && !self.streams.contains_key(&f.stream_id) {
            return Err(H2Error::connection(Reason::PROTOCOL_ERROR, Initiator::Library));
        }
        if !f.end_headers {
            self.expect_continuation = Some(HeaderBlockInProgress {
                stream_id: f.stream_id,
                buf: BytesMut::from(&f.header_block[..]),
                end_stream: f.end_stream,
                is_push: false,
                promised_id: 0,
            });
            return Ok(());
        }
        self.finish_headers(f.stream_id, &f.header_block, f.end_stream, events)
    }

    fn on_continuation(&mut self, f: frame::Continuation, events: &mut Vec<ConnEvent>) -> Result<(), H2Error> {
        let Some(mut in_progress) = self.expect_continuation.take() else {
            return Err(H2Error::connection(Reason::PROTOCOL_ERROR, Initiator::Library));
        };
        in_progress.buf.extend_from_slice(&f.header_block);
        if !f.end_headers {
            self.expect_continuation = Some(in_progress);
            return Ok(());
        }
        if in_progress.is_push {
            let block = in_progress.buf.freeze();
            self.finish_push_promise(in_progress.stream_id, in_progress.promised_id, &block, events)
        } else {
            let block = in_progress.buf.freeze();
            self.finish_headers(in_progress.stream_id, &block, in_progress.end_stream, events)
        }
    }

    fn finish_headers(&mut self, stream_id: StreamId, block: &[u8], end_stream: bool, events: &mut Vec<ConnEvent>) -> Result<(), H2Error> {
        let mut headers = Vec::new();
        self.hpack_decoder
            .decode(block, &mut headers)
            .map_err(|_| H2Error::connection(Reason::COMPRESSION_ERROR, Initiator::Library))?;

        let is_new = !self.streams.contains_key(&stream_id);
        if is_new {
            if self.opened_stream_count() + 1 > self.max_concurrent_streams() {
                self.reset_stream(stream_id, Reason::REFUSED_STREAM);
                return Ok(());
            }
            self.last_accepted_stream_id = self.last_accepted_stream_id.max(stream_id);
            let stream = Stream::new(
                stream_id,
                i64::from(self.local.initial_window_size.unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE)),
                i64::from(self.remote.initial_window_size.unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE)),
            );
            self.streams.insert(stream_id, stream);
            events.push(ConnEvent::NewStream(stream_id));
        }
        let stream = self.streams.get_mut(&stream_id).expect("just inserted or already present");
        stream.recv_headers(end_stream).map_err(|_| H2Error::connection(Reason::PROTOCOL_ERROR, Initiator::Library))?;
        stream.dispatch_headers(&headers, end_stream);
        Ok(())
    }

    fn finish_push_promise(&mut self, parent_id: StreamId, promised_id: StreamId, block: &[u8], events: &mut Vec<ConnEvent>) -> Result<(), H2Error> {
        let mut headers = Vec::new();
        self.hpack_decoder
            .decode(block, &mut headers)
            .map_err(|_| H2Error::connection(Reason::COMPRESSION_ERROR, Initiator::Library))?;
        let mut stream = Stream::new(
            promised_id,
            i64::from(self.local.initial_window_size.unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE)),
            i64::from(self.remote.initial_window_size.unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE)),
        );
        stream
            .recv_push_promise()
            .map_err(|_| H2Error::connection(Reason::PROTOCOL_ERROR, Initiator::Library))?;
        let cache_key = cache_key_from_headers(&headers);
        self.promised.insert(promised_id, stream);
        self.push_clients.insert(cache_key.clone(), promised_id);
        events.push(ConnEvent::PushPromised {
            stream_id: parent_id,
            promised_id,
            cache_key,
        });
        Ok(())
    }

    fn on_push_promise(&mut self, f: PushPromise, events: &mut Vec<ConnEvent>) -> Result<(), H2Error> {
        if f.promised_stream_id % 2 != 0 || self.promised.contains_key(&f.promised_stream_id) {
            return Err(H2Error::connection(Reason::PROTOCOL_ERROR, Initiator::Library));
        }
        if !self.streams.contains_key(&f.stream_id) {
            return Err(H2Error::connection(Reason::PROTOCOL_ERROR, Initiator::Library));
        }
        if !f.end_headers {
            self.expect_continuation = Some(HeaderBlockInProgress {
                stream_id: f.stream_id,
                buf: BytesMut::from(&f.header_block[..]),
                end_stream: false,
                is_push: true,
                promised_id: f.promised_stream_id,
            });
            return Ok(());
        }
        self.finish_push_promise(f.stream_id, f.promised_stream_id, &f.header_block, events)
    }

    fn on_reset(&mut self, f: Reset, events: &mut Vec<ConnEvent>) -> Result<(), H2Error> {
        if let Some(stream) = self.streams.get_mut(&f.stream_id) {
            stream.recv_reset();
            stream.dispatch_reset(f.reason);
        }
        let _ = events;
        Ok(())
    }

    fn on_settings(&mut self, f: Settings, events: &mut Vec<ConnEvent>) -> Result<(), H2Error> {
        if f.ack {
            events.push(ConnEvent::SettingsAcked);
            return Ok(());
        }
        if let Some(table_size) = f.config.header_table_size {
            self.hpack_decoder.set_max_table_size(table_size);
        }
        if let Some(new_initial) = f.config.initial_window_size {
            let old = self.remote.initial_window_size.unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE);
            let delta = i64::from(new_initial) - i64::from(old);
            for stream in self.streams.values_mut().chain(self.promised.values_mut()) {
                if stream.apply_remote_window_delta(delta).is_err() {
                    return Err(H2Error::connection(Reason::FLOW_CONTROL_ERROR, Initiator::Library));
                }
            }
            self.remote.initial_window_size = Some(new_initial);
        }
        if let Some(mfs) = f.config.max_frame_size {
            self.codec.set_max_frame_size(mfs);
            self.remote.max_frame_size = Some(mfs);
        }
        if f.config.max_concurrent_streams.is_some() {
            self.remote.max_concurrent_streams = f.config.max_concurrent_streams;
        }
        if f.config.max_header_list_size.is_some() {
            self.remote.max_header_list_size = f.config.max_header_list_size;
        }
        if f.config.enable_connect_protocol.is_some() {
            self.remote.enable_connect_protocol = f.config.enable_connect_protocol;
        }
        if let Some(enable_push) = f.config.enable_push {
            self.remote.enable_push = Some(enable_push);
        }
        debug!("applied peer SETTINGS");
        self.out_buf.extend_from_slice(&encode_ack());
        Ok(())
    }

    fn local_accepts_connect_protocol(&self) -> bool {
        self.local.enable_connect_protocol == Some(1)
    }

    fn on_ping(&mut self, f: Ping) -> Result<(), H2Error> {
        if f.ack {
            return Ok(());
        }
        Frame::Ping(Ping { ack: true, payload: f.payload }).encode(&mut self.out_buf);
        Ok(())
    }

    fn on_go_away(&mut self, f: GoAway, events: &mut Vec<ConnEvent>) -> Result<(), H2Error> {
        let ids: Vec<StreamId> = self
            .streams
            .keys()
            .copied()
            .filter(|&id| id > f.last_stream_id)
            .collect();
        for id in ids {
            if let Some(mut stream) = self.streams.remove(&id) {
                stream.recv_reset();
                stream.dispatch_reset(f.reason);
            }
        }
        self.push_clients.clear();
        self.promised.clear();
        events.push(ConnEvent::GoAway {
            last_stream_id: f.last_stream_id,
            reason: f.reason,
        });
        Ok(())
    }

    fn on_window_update(&mut self, f: WindowUpdate) -> Result<(), H2Error> {
        if f.stream_id == 0 {
            let unblocked = self
                .conn_flow
                .recv_window_update(f.increment)
                .map_err(|_| H2Error::connection(Reason::FLOW_CONTROL_ERROR, Initiator::Remote))?;
            if unblocked {
                self.drain_blocked_streams();
            }
            Ok(())
        } else {
            let Some(stream) = self.streams.get_mut(&f.stream_id) else {
                return Ok(());
            };
            stream.recv_window_update(f.increment)?;
            stream.on_write();
            stream.dispatch_write_ready();
            Ok(())
        }
    }

    /// Walk `blocked_streams` in insertion order invoking `on_write` until
    /// the buffer refills or the window exhausts again.
    fn drain_blocked_streams(&mut self) {
        let ids: Vec<StreamId> = self.blocked_streams.iter().copied().collect();
        let mut remaining = IndexSet::new();
        for id in ids {
            if let Some(stream) = self.streams.get_mut(&id) {
                stream.on_write();
                stream.dispatch_write_ready();
                if stream.is_write_blocked() {
                    remaining.insert(id);
                }
            }
        }
        self.blocked_streams = remaining;
    }

    /// Called once the socket collaborator reports the outbound buffer has
    /// drained.
    pub fn on_socket_writable(&mut self) {
        if self.out_buf.is_empty() {
            self.drain_blocked_streams();
        }
    }

    fn is_valid_new_stream_id(&self, id: StreamId) -> bool {
        let peer_is_odd = self.role == Role::Server; // client ids are odd
        let is_odd = id % 2 == 1;
        if is_odd != peer_is_odd {
            return false;
        }
        id > self.last_accepted_stream_id
    }

    fn opened_stream_count(&self) -> usize {
        self.streams.len()
    }

    fn max_concurrent_streams(&self) -> usize {
        self.local.max_concurrent_streams.unwrap_or(u32::MAX) as usize
    }

    #[must_use]
    pub fn is_connect_protocol_enabled(&self) -> bool {
        self.remote.enable_connect_protocol == Some(1) && self.local_accepts_connect_protocol()
    }

    #[must_use]
    pub fn adopt_push(&mut self, cache_key: &str) -> Option<Stream> {
        let id = self.push_clients.remove(cache_key)?;
        self.promised.remove(&id)
    }

    pub fn preface_received(&self) -> bool {
        self.preface_received
    }

    pub fn mark_preface_received(&mut self) {
        self.preface_received = true;
    }
}

fn encode_ack() -> BytesMut {
    let mut buf = BytesMut::new();
    Frame::Settings(Settings::ack()).encode(&mut buf);
    buf
}

fn cache_key_from_headers(headers: &[Header]) -> String {
    let mut authority = String::new();
    let mut path = String::new();
    for h in headers {
        match h.name.as_str() {
            ":authority" => authority = h.value.clone(),
            ":path" => path = h.value.clone(),
            _ => {}
        }
    }
    format!("{authority}{path}")
}

fn h2_to_core_err(e: H2Error) -> crate::error::Error {
    crate::error::Error::with_cause(crate::error::ErrorKind::ProtoError, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::h2::hpack::PassthroughHpack;

    fn conn(role: Role) -> Connection {
        Connection::new(role, &H2Config::default(), Box::new(PassthroughHpack::default()), Box::new(PassthroughHpack::default()))
    }

    #[test]
    fn preface_literal_matches_exactly() {
        assert_eq!(Connection::check_preface(PREFACE), Some(true));
        let mut bad = PREFACE.to_vec();
        bad[0] = b'X';
        assert_eq!(Connection::check_preface(&bad), Some(false));
    }

    #[test]
    fn client_stream_ids_start_at_one_and_increase_by_two() {
        let mut c = conn(Role::Client);
        assert_eq!(c.create_stream(), 1);
        assert_eq!(c.create_stream(), 3);
    }

    #[test]
    fn server_stream_ids_are_even() {
        let mut c = conn(Role::Server);
        assert_eq!(c.create_stream(), 2);
        assert_eq!(c.create_stream(), 4);
    }

    #[test]
    fn receiving_headers_opens_a_new_stream() {
        let mut c = conn(Role::Server);
        let mut block = Vec::new();
        c.hpack_encoder
            .encode(&[Header::new(":method", "GET")], &mut block)
            .unwrap();
        let frame = Frame::Headers(Headers {
            stream_id: 1,
            header_block: Bytes::from(block),
            end_stream: true,
            end_headers: true,
            priority: None,
            pad_len: 0,
        });
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        let events = c.receive(&mut buf).unwrap();
        assert_eq!(events, vec![ConnEvent::NewStream(1)]);
        assert!(c.stream(1).is_some());
    }

    #[test]
    fn ping_is_echoed_with_ack() {
        let mut c = conn(Role::Server);
        let frame = Frame::Ping(Ping { ack: false, payload: [9; 8] });
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        c.receive(&mut buf).unwrap();
        let out = c.take_outbound_bytes();
        let head = Head::decode(&out[..frame::HEADER_LEN]).unwrap();
        assert_eq!(head.kind, Kind::Ping);
        assert!(head.is_set(flags::ACK));
    }

    #[test]
    fn settings_with_regressing_stream_id_on_headers_is_rejected() {
        let mut c = conn(Role::Server);
        c.last_accepted_stream_id = 5;
        assert!(!c.is_valid_new_stream_id(3));
    }

    #[test]
    fn go_away_closes_streams_above_last_stream_id() {
        let mut c = conn(Role::Client);
        let id = c.create_stream();
        let frame = Frame::GoAway(GoAway {
            last_stream_id: 0,
            reason: Reason::NO_ERROR,
            debug_data: Bytes::new(),
        });
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        let events = c.receive(&mut buf).unwrap();
        assert!(matches!(events[0], ConnEvent::GoAway { .. }));
        assert!(c.stream(id).is_none());
    }
}
