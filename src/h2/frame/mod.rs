//! Binary encode/decode of the ten HTTP/2 frame types.
//!
//! A `Frame` enum over a `Head`/`Kind` split, backed by a `BytesMut`
//! incremental parser that exposes its `READ_HEADER` -> `READ_PAYLOAD` ->
//! dispatch loop directly rather than hiding it behind an async codec
//! trait.

mod priority;
mod settings;

pub use priority::{Priority, StreamDependency};
pub use settings::{Settings, SettingsConfig, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE, DEFAULT_SETTINGS_HEADER_TABLE_SIZE, MAX_MAX_FRAME_SIZE};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::h2::error::Reason;

pub const HEADER_LEN: usize = 9;
pub type FrameSize = u32;

/// Bit flags used across frame types; not every bit applies to every kind.
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Data,
    Headers,
    Priority,
    Reset,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
}

impl Kind {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Data => 0,
            Self::Headers => 1,
            Self::Priority => 2,
            Self::Reset => 3,
            Self::Settings => 4,
            Self::PushPromise => 5,
            Self::Ping => 6,
            Self::GoAway => 7,
            Self::WindowUpdate => 8,
            Self::Continuation => 9,
        }
    }

    #[must_use]
    pub fn from_u8(n: u8) -> Option<Self> {
        Some(match n {
            0 => Self::Data,
            1 => Self::Headers,
            2 => Self::Priority,
            3 => Self::Reset,
            4 => Self::Settings,
            5 => Self::PushPromise,
            6 => Self::Ping,
            7 => Self::GoAway,
            8 => Self::WindowUpdate,
            9 => Self::Continuation,
            _ => return None,
        })
    }

    /// DATA/HEADERS/PRIORITY/RST_STREAM/PUSH_PROMISE/CONTINUATION require a
    /// non-zero stream id; SETTINGS/PING/GOAWAY require a zero one (spec
    /// §4.H "Frame dispatch" preconditions).
    #[must_use]
    pub fn requires_stream(self) -> bool {
        !matches!(self, Self::Settings | Self::Ping | Self::GoAway)
    }
}

/// Decoded 9-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Head {
    pub kind: Kind,
    pub flag: u8,
    pub stream_id: u32,
    pub length: u32,
}

impl Head {
    #[must_use]
    pub fn new(kind: Kind, flag: u8, stream_id: u32, length: u32) -> Self {
        Self {
            kind,
            flag,
            stream_id,
            length,
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < HEADER_LEN {
            return Err(FrameError::Short);
        }
        let length = u32::from(buf[0]) << 16 | u32::from(buf[1]) << 8 | u32::from(buf[2]);
        let kind = Kind::from_u8(buf[3]).ok_or(FrameError::InvalidFrameType(buf[3]))?;
        let flag = buf[4];
        let stream_id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) & 0x7fff_ffff;
        Ok(Self {
            kind,
            flag,
            stream_id,
            length,
        })
    }

    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.put_u8((self.length >> 16) as u8);
        dst.put_u8((self.length >> 8) as u8);
        dst.put_u8(self.length as u8);
        dst.put_u8(self.kind.as_u8());
        dst.put_u8(self.flag);
        dst.put_u32(self.stream_id & 0x7fff_ffff);
    }

    #[must_use]
    pub fn is_set(&self, bit: u8) -> bool {
        self.flag & bit == bit
    }
}

/// Parsing / validation errors for the frame layer, distinct from the
/// protocol-scoped [`crate::h2::error::H2Error`] the connection raises once
/// it knows whether a malformed frame is stream- or connection-scoped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Not enough bytes buffered yet; not fatal, ask for more input.
    Short,
    BadFrameSize,
    TooMuchPadding,
    InvalidSettingValue,
    InvalidInitialWindowSize,
    InvalidWindowUpdateValue,
    InvalidPayloadLength,
    InvalidFrameType(u8),
    InvalidStreamId,
    InvalidDependencyId,
    FrameTooLarge(u32),
}

impl FrameError {
    #[must_use]
    pub fn reason(&self) -> Reason {
        match self {
            Self::BadFrameSize | Self::InvalidPayloadLength | Self::FrameTooLarge(_) => {
                Reason::FRAME_SIZE_ERROR
            }
            Self::InvalidWindowUpdateValue | Self::InvalidInitialWindowSize => {
                Reason::FLOW_CONTROL_ERROR
            }
            _ => Reason::PROTOCOL_ERROR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub stream_id: u32,
    pub payload: Bytes,
    pub end_stream: bool,
    pub pad_len: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Headers {
    pub stream_id: u32,
    pub header_block: Bytes,
    pub end_stream: bool,
    pub end_headers: bool,
    pub priority: Option<StreamDependency>,
    pub pad_len: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPromise {
    pub stream_id: u32,
    pub promised_stream_id: u32,
    pub header_block: Bytes,
    pub end_headers: bool,
    pub pad_len: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reset {
    pub stream_id: u32,
    pub reason: Reason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub ack: bool,
    pub payload: [u8; 8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoAway {
    pub last_stream_id: u32,
    pub reason: Reason,
    pub debug_data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdate {
    pub stream_id: u32,
    pub increment: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    pub stream_id: u32,
    pub header_block: Bytes,
    pub end_headers: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(Data),
    Headers(Headers),
    Priority(Priority),
    Reset(Reset),
    Settings(Settings),
    PushPromise(PushPromise),
    Ping(Ping),
    GoAway(GoAway),
    WindowUpdate(WindowUpdate),
    Continuation(Continuation),
}

impl Frame {
    #[must_use]
    pub fn stream_id(&self) -> u32 {
        match self {
            Self::Data(f) => f.stream_id,
            Self::Headers(f) => f.stream_id,
            Self::Priority(f) => f.stream_id,
            Self::Reset(f) => f.stream_id,
            Self::Settings(_) => 0,
            Self::PushPromise(f) => f.stream_id,
            Self::Ping(_) => 0,
            Self::GoAway(_) => 0,
            Self::WindowUpdate(f) => f.stream_id,
            Self::Continuation(f) => f.stream_id,
        }
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        match self {
            Self::Data(_) => Kind::Data,
            Self::Headers(_) => Kind::Headers,
            Self::Priority(_) => Kind::Priority,
            Self::Reset(_) => Kind::Reset,
            Self::Settings(_) => Kind::Settings,
            Self::PushPromise(_) => Kind::PushPromise,
            Self::Ping(_) => Kind::Ping,
            Self::GoAway(_) => Kind::GoAway,
            Self::WindowUpdate(_) => Kind::WindowUpdate,
            Self::Continuation(_) => Kind::Continuation,
        }
    }

    /// Decode a complete frame (header + payload already buffered) of the
    /// declared `max_frame_size`. `head.length` must equal `payload.len()`.
    pub fn decode(head: Head, payload: &[u8]) -> Result<Self, FrameError> {
        if head.kind.requires_stream() && head.stream_id == 0 {
            return Err(FrameError::InvalidStreamId);
        }
        if !head.kind.requires_stream() && head.stream_id != 0 {
            return Err(FrameError::InvalidStreamId);
        }
        match head.kind {
            Kind::Data => decode_data(head, payload).map(Frame::Data),
            Kind::Headers => decode_headers(head, payload).map(Frame::Headers),
            Kind::Priority => priority::decode(head, payload).map(Frame::Priority),
            Kind::Reset => {
                if payload.len() != 4 {
                    return Err(FrameError::InvalidPayloadLength);
                }
                let code = u32::from_be_bytes(payload.try_into().unwrap());
                Ok(Frame::Reset(Reset {
                    stream_id: head.stream_id,
                    reason: Reason::from_u32(code),
                }))
            }
            Kind::Settings => settings::decode(head, payload).map(Frame::Settings),
            Kind::PushPromise => decode_push_promise(head, payload).map(Frame::PushPromise),
            Kind::Ping => {
                if payload.len() != 8 {
                    return Err(FrameError::BadFrameSize);
                }
                Ok(Frame::Ping(Ping {
                    ack: head.is_set(flags::ACK),
                    payload: payload.try_into().unwrap(),
                }))
            }
            Kind::GoAway => decode_goaway(payload).map(Frame::GoAway),
            Kind::WindowUpdate => {
                if payload.len() != 4 {
                    return Err(FrameError::InvalidPayloadLength);
                }
                let increment = u32::from_be_bytes(payload.try_into().unwrap()) & 0x7fff_ffff;
                if increment == 0 {
                    return Err(FrameError::InvalidWindowUpdateValue);
                }
                Ok(Frame::WindowUpdate(WindowUpdate {
                    stream_id: head.stream_id,
                    increment,
                }))
            }
            Kind::Continuation => Ok(Frame::Continuation(Continuation {
                stream_id: head.stream_id,
                header_block: Bytes::copy_from_slice(payload),
                end_headers: head.is_set(flags::END_HEADERS),
            })),
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Self::Data(f) => encode_data(f, dst),
            Self::Headers(f) => encode_headers(f, dst),
            Self::Priority(f) => priority::encode(f, dst),
            Self::Reset(f) => {
                let head = Head::new(Kind::Reset, 0, f.stream_id, 4);
                head.encode_into(dst);
                dst.put_u32(f.reason.as_u32());
            }
            Self::Settings(f) => f.encode(dst),
            Self::PushPromise(f) => encode_push_promise(f, dst),
            Self::Ping(f) => {
                let flag = if f.ack { flags::ACK } else { 0 };
                let head = Head::new(Kind::Ping, flag, 0, 8);
                head.encode_into(dst);
                dst.put_slice(&f.payload);
            }
            Self::GoAway(f) => {
                let len = 8 + f.debug_data.len() as u32;
                let head = Head::new(Kind::GoAway, 0, 0, len);
                head.encode_into(dst);
                dst.put_u32(f.last_stream_id & 0x7fff_ffff);
                dst.put_u32(f.reason.as_u32());
                dst.put_slice(&f.debug_data);
            }
            Self::WindowUpdate(f) => {
                let head = Head::new(Kind::WindowUpdate, 0, f.stream_id, 4);
                head.encode_into(dst);
                dst.put_u32(f.increment & 0x7fff_ffff);
            }
            Self::Continuation(f) => {
                let flag = if f.end_headers { flags::END_HEADERS } else { 0 };
                let head = Head::new(Kind::Continuation, flag, f.stream_id, f.header_block.len() as u32);
                head.encode_into(dst);
                dst.put_slice(&f.header_block);
            }
        }
    }
}

fn strip_padding(head: &Head, payload: &[u8]) -> Result<(u8, &[u8]), FrameError> {
    if head.is_set(flags::PADDED) {
        let pad_len = *payload.first().ok_or(FrameError::TooMuchPadding)?;
        let rest = &payload[1..];
        if usize::from(pad_len) > rest.len() {
            return Err(FrameError::TooMuchPadding);
        }
        Ok((pad_len, &rest[..rest.len() - usize::from(pad_len)]))
    } else {
        Ok((0, payload))
    }
}

fn decode_data(head: Head, payload: &[u8]) -> Result<Data, FrameError> {
    let (pad_len, body) = strip_padding(&head, payload)?;
    Ok(Data {
        stream_id: head.stream_id,
        payload: Bytes::copy_from_slice(body),
        end_stream: head.is_set(flags::END_STREAM),
        pad_len,
    })
}

fn encode_data(f: &Data, dst: &mut BytesMut) {
    let padded = f.pad_len > 0;
    let mut flag = if f.end_stream { flags::END_STREAM } else { 0 };
    if padded {
        flag |= flags::PADDED;
    }
    let len = (if padded { 1 } else { 0 }) + f.payload.len() as u32 + u32::from(f.pad_len);
    let head = Head::new(Kind::Data, flag, f.stream_id, len);
    head.encode_into(dst);
    if padded {
        dst.put_u8(f.pad_len);
    }
    dst.put_slice(&f.payload);
    dst.put_bytes(0, f.pad_len as usize);
}

fn decode_headers(head: Head, payload: &[u8]) -> Result<Headers, FrameError> {
    let (pad_len, mut rest) = strip_padding(&head, payload)?;
    let priority = if head.is_set(flags::PRIORITY) {
        if rest.len() < 5 {
            return Err(FrameError::InvalidPayloadLength);
        }
        let (dep, tail) = rest.split_at(5);
        rest = tail;
        Some(StreamDependency::decode(dep)?)
    } else {
        None
    };
    Ok(Headers {
        stream_id: head.stream_id,
        header_block: Bytes::copy_from_slice(rest),
        end_stream: head.is_set(flags::END_STREAM),
        end_headers: head.is_set(flags::END_HEADERS),
        priority,
        pad_len,
    })
}

fn encode_headers(f: &Headers, dst: &mut BytesMut) {
    let padded = f.pad_len > 0;
    let mut flag = if f.end_stream { flags::END_STREAM } else { 0 };
    if f.end_headers {
        flag |= flags::END_HEADERS;
    }
    if padded {
        flag |= flags::PADDED;
    }
    if f.priority.is_some() {
        flag |= flags::PRIORITY;
    }
    let mut len = (if padded { 1 } else { 0 }) + f.header_block.len() as u32 + u32::from(f.pad_len);
    if f.priority.is_some() {
        len += 5;
    }
    let head = Head::new(Kind::Headers, flag, f.stream_id, len);
    head.encode_into(dst);
    if padded {
        dst.put_u8(f.pad_len);
    }
    if let Some(dep) = &f.priority {
        dep.encode_into(dst);
    }
    dst.put_slice(&f.header_block);
    dst.put_bytes(0, f.pad_len as usize);
}

fn decode_push_promise(head: Head, payload: &[u8]) -> Result<PushPromise, FrameError> {
    let (pad_len, rest) = strip_padding(&head, payload)?;
    if rest.len() < 4 {
        return Err(FrameError::InvalidPayloadLength);
    }
    let (id_bytes, header_block) = rest.split_at(4);
    let promised_stream_id = u32::from_be_bytes(id_bytes.try_into().unwrap()) & 0x7fff_ffff;
    Ok(PushPromise {
        stream_id: head.stream_id,
        promised_stream_id,
        header_block: Bytes::copy_from_slice(header_block),
        end_headers: head.is_set(flags::END_HEADERS),
        pad_len,
    })
}

fn encode_push_promise(f: &PushPromise, dst: &mut BytesMut) {
    let padded = f.pad_len > 0;
    let mut flag = if f.end_headers { flags::END_HEADERS } else { 0 };
    if padded {
        flag |= flags::PADDED;
    }
    let len = (if padded { 1 } else { 0 }) + 4 + f.header_block.len() as u32 + u32::from(f.pad_len);
    let head = Head::new(Kind::PushPromise, flag, f.stream_id, len);
    head.encode_into(dst);
    if padded {
        dst.put_u8(f.pad_len);
    }
    dst.put_u32(f.promised_stream_id & 0x7fff_ffff);
    dst.put_slice(&f.header_block);
    dst.put_bytes(0, f.pad_len as usize);
}

fn decode_goaway(payload: &[u8]) -> Result<GoAway, FrameError> {
    if payload.len() < 8 {
        return Err(FrameError::InvalidPayloadLength);
    }
    let last_stream_id = u32::from_be_bytes(payload[0..4].try_into().unwrap()) & 0x7fff_ffff;
    let reason = Reason::from_u32(u32::from_be_bytes(payload[4..8].try_into().unwrap()));
    Ok(GoAway {
        last_stream_id,
        reason,
        debug_data: Bytes::copy_from_slice(&payload[8..]),
    })
}

/// Incremental frame parser driven by successive chunks of socket input: a
/// `READ_HEADER` -> `READ_PAYLOAD` -> dispatch loop. The payload buffer's
/// allocation is reused between frames rather than reallocated per frame.
#[derive(Debug)]
pub struct Codec {
    max_frame_size: u32,
    state: CodecState,
    payload_buf: BytesMut,
}

#[derive(Debug)]
enum CodecState {
    ReadHeader,
    ReadPayload(Head),
}

impl Codec {
    #[must_use]
    pub fn new(max_frame_size: u32) -> Self {
        Self {
            max_frame_size,
            state: CodecState::ReadHeader,
            payload_buf: BytesMut::new(),
        }
    }

    pub fn set_max_frame_size(&mut self, n: u32) {
        self.max_frame_size = n;
    }

    /// Feed newly-arrived bytes from the socket into `src` (already
    /// accumulated by the caller) and decode as many complete frames as
    /// possible, invoking `on_frame` for each. Returns `Ok(())` on a clean
    /// partial read, or the first fatal [`FrameError`] encountered.
    pub fn decode_from(
        &mut self,
        src: &mut BytesMut,
        mut on_frame: impl FnMut(Frame),
    ) -> Result<(), FrameError> {
        loop {
            match self.state {
                CodecState::ReadHeader => {
                    if src.len() < HEADER_LEN {
                        return Ok(());
                    }
                    let head = Head::decode(&src[..HEADER_LEN])?;
                    if head.length > self.max_frame_size {
                        return Err(FrameError::FrameTooLarge(head.length));
                    }
                    src.advance(HEADER_LEN);
                    self.state = CodecState::ReadPayload(head);
                }
                CodecState::ReadPayload(head) => {
                    let len = head.length as usize;
                    if src.len() < len {
                        return Ok(());
                    }
                    self.payload_buf.clear();
                    self.payload_buf.extend_from_slice(&src[..len]);
                    src.advance(len);
                    let frame = Frame::decode(head, &self.payload_buf)?;
                    self.state = CodecState::ReadHeader;
                    on_frame(frame);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_round_trips() {
        let frame = Frame::Ping(Ping {
            ack: false,
            payload: [1, 2, 3, 4, 5, 6, 7, 8],
        });
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        let head = Head::decode(&buf[..HEADER_LEN]).unwrap();
        let decoded = Frame::decode(head, &buf[HEADER_LEN..]).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn ping_echo_replies_with_ack_and_same_payload() {
        let header = [0x00, 0x00, 0x08, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00];
        let payload = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let head = Head::decode(&header).unwrap();
        let Frame::Ping(ping) = Frame::decode(head, &payload).unwrap() else {
            panic!("expected ping");
        };
        assert!(!ping.ack);
        let reply = Frame::Ping(Ping {
            ack: true,
            payload: ping.payload,
        });
        let mut buf = BytesMut::new();
        reply.encode(&mut buf);
        assert_eq!(&buf[..HEADER_LEN], &[0x00, 0x00, 0x08, 0x06, 0x01, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(&buf[HEADER_LEN..], &payload);
    }

    #[test]
    fn ping_with_wrong_length_is_bad_frame_size() {
        let head = Head::new(Kind::Ping, 0, 0, 4);
        let err = Frame::decode(head, &[0, 0, 0, 0]).unwrap_err();
        assert_eq!(err, FrameError::BadFrameSize);
    }

    #[test]
    fn window_update_zero_increment_is_invalid() {
        let head = Head::new(Kind::WindowUpdate, 0, 1, 4);
        let err = Frame::decode(head, &0u32.to_be_bytes()).unwrap_err();
        assert_eq!(err, FrameError::InvalidWindowUpdateValue);
        assert_eq!(err.reason(), Reason::FLOW_CONTROL_ERROR);
    }

    #[test]
    fn settings_with_zero_stream_id_required() {
        let head = Head::new(Kind::Settings, 0, 1, 0);
        let err = Frame::decode(head, &[]).unwrap_err();
        assert_eq!(err, FrameError::InvalidStreamId);
    }

    #[test]
    fn data_frame_with_padding_round_trips() {
        let frame = Frame::Data(Data {
            stream_id: 3,
            payload: Bytes::from_static(b"hello"),
            end_stream: true,
            pad_len: 4,
        });
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        let head = Head::decode(&buf[..HEADER_LEN]).unwrap();
        let decoded = Frame::decode(head, &buf[HEADER_LEN..]).unwrap();
        let Frame::Data(d) = decoded else { panic!("expected data") };
        assert_eq!(d.payload, Bytes::from_static(b"hello"));
        assert!(d.end_stream);
    }

    #[test]
    fn codec_decodes_frames_incrementally_across_chunks() {
        let mut codec = Codec::new(DEFAULT_MAX_FRAME_SIZE);
        let frame = Frame::Ping(Ping {
            ack: false,
            payload: [0; 8],
        });
        let mut full = BytesMut::new();
        frame.encode(&mut full);

        let mut src = BytesMut::new();
        let mut seen = Vec::new();
        // feed one byte at a time up to the header boundary, then the rest.
        src.extend_from_slice(&full[..HEADER_LEN - 1]);
        codec.decode_from(&mut src, |f| seen.push(f)).unwrap();
        assert!(seen.is_empty());
        src.extend_from_slice(&full[HEADER_LEN - 1..]);
        codec.decode_from(&mut src, |f| seen.push(f)).unwrap();
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn codec_rejects_frame_larger_than_max_frame_size() {
        let mut codec = Codec::new(16);
        let head = Head::new(Kind::Data, 0, 1, 17);
        let mut src = BytesMut::new();
        head.encode_into(&mut src);
        src.extend_from_slice(&[0u8; 17]);
        let err = codec.decode_from(&mut src, |_| {}).unwrap_err();
        assert_eq!(err, FrameError::FrameTooLarge(17));
    }
}
