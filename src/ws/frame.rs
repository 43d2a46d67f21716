//! RFC 6455 frame parsing, building, and masking.
//!
//! Mirrors this crate's own [`crate::h2::frame::Codec`] for the incremental
//! decode-from-buffer style: frames arrive in pieces across `recv` calls,
//! so decoding is a state machine fed one `BytesMut` at a time rather than
//! a blocking read.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::RngCore;

use crate::error::{Error, ErrorKind, Result};

const MAX_CONTROL_PAYLOAD: usize = 125;

/// The WebSocket opcode nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_u8(b: u8) -> Result<Self> {
        Ok(match b {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            _ => return Err(Error::new(ErrorKind::ProtoError)),
        })
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    #[must_use]
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// Reserved extension bits carried on a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rsv {
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
}

impl Rsv {
    #[must_use]
    pub fn is_empty(self) -> bool {
        !self.rsv1 && !self.rsv2 && !self.rsv3
    }
}

/// One decoded (and already unmasked) wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub rsv: Rsv,
    pub opcode: Opcode,
    pub payload: Bytes,
}

/// A complete application-level message assembled from one or more frames
/// (a non-control opcode with FIN=0 starts a fragmented message, continued
/// by CONTINUATION frames until one arrives with FIN=1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close { code: Option<u16>, reason: String },
}

fn validate_header(fin: bool, opcode: Opcode, rsv: Rsv, payload_len: usize, rsv_allowed: Rsv) -> Result<()> {
    if (rsv.rsv1 && !rsv_allowed.rsv1) || (rsv.rsv2 && !rsv_allowed.rsv2) || (rsv.rsv3 && !rsv_allowed.rsv3) {
        return Err(Error::new(ErrorKind::ProtoError));
    }
    if opcode.is_control() {
        if !fin || payload_len > MAX_CONTROL_PAYLOAD {
            return Err(Error::new(ErrorKind::ProtoError));
        }
        if opcode == Opcode::Close && payload_len == 1 {
            return Err(Error::new(ErrorKind::ProtoError));
        }
    }
    Ok(())
}

/// XOR `payload` with `mask`, cycling the 4-byte key (used both ways: apply
/// to mask when sending, apply again to unmask when receiving).
pub fn apply_mask(mask: [u8; 4], payload: &mut [u8]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    Head,
    ExtLen { fin: bool, rsv: Rsv, opcode: Opcode, masked: bool, len_bytes: u8 },
    MaskKey { fin: bool, rsv: Rsv, opcode: Opcode, len: usize },
    Payload { fin: bool, rsv: Rsv, opcode: Opcode, mask: Option<[u8; 4]>, len: usize },
}

/// Incremental frame decoder. One instance per connection direction;
/// `decode` is called with however many bytes have arrived and returns
/// `None` if more input is needed.
pub struct FrameDecoder {
    state: DecodeState,
    /// Whether frames from this peer are required to be masked (server
    /// role receives only masked frames from clients; client role receives
    /// only unmasked frames from servers — RFC 6455 §5.1).
    require_masked: bool,
    rsv_allowed: Rsv,
}

impl FrameDecoder {
    #[must_use]
    pub fn new(require_masked: bool) -> Self {
        Self {
            state: DecodeState::Head,
            require_masked,
            rsv_allowed: Rsv::default(),
        }
    }

    /// Allow the given RSV bits through unrejected, because an extension
    /// negotiated them.
    pub fn set_rsv_allowed(&mut self, rsv: Rsv) {
        self.rsv_allowed = rsv;
    }

    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        loop {
            match self.state {
                DecodeState::Head => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    let b0 = src[0];
                    let b1 = src[1];
                    let fin = b0 & 0x80 != 0;
                    let rsv = Rsv {
                        rsv1: b0 & 0x40 != 0,
                        rsv2: b0 & 0x20 != 0,
                        rsv3: b0 & 0x10 != 0,
                    };
                    let opcode = Opcode::from_u8(b0 & 0x0F)?;
                    let masked = b1 & 0x80 != 0;
                    if masked != self.require_masked {
                        return Err(Error::new(ErrorKind::ProtoError));
                    }
                    let plen = b1 & 0x7F;
                    src.advance(2);
                    self.state = match plen {
                        126 => DecodeState::ExtLen { fin, rsv, opcode, masked, len_bytes: 2 },
                        127 => DecodeState::ExtLen { fin, rsv, opcode, masked, len_bytes: 8 },
                        n => DecodeState::MaskKey { fin, rsv, opcode, len: n as usize },
                    };
                }
                DecodeState::ExtLen { fin, rsv, opcode, masked, len_bytes } => {
                    if (src.len() as u8) < len_bytes {
                        return Ok(None);
                    }
                    let len = if len_bytes == 2 {
                        u16::from_be_bytes([src[0], src[1]]) as usize
                    } else {
                        u64::from_be_bytes(src[0..8].try_into().unwrap()) as usize
                    };
                    src.advance(len_bytes as usize);
                    self.state = DecodeState::MaskKey { fin, rsv, opcode, len };
                    let _ = masked;
                }
                DecodeState::MaskKey { fin, rsv, opcode, len } => {
                    if self.require_masked {
                        if src.len() < 4 {
                            return Ok(None);
                        }
                        let mask = [src[0], src[1], src[2], src[3]];
                        src.advance(4);
                        self.state = DecodeState::Payload { fin, rsv, opcode, mask: Some(mask), len };
                    } else {
                        self.state = DecodeState::Payload { fin, rsv, opcode, mask: None, len };
                    }
                }
                DecodeState::Payload { fin, rsv, opcode, mask, len } => {
                    if src.len() < len {
                        return Ok(None);
                    }
                    validate_header(fin, opcode, rsv, len, self.rsv_allowed)?;
                    let mut payload = src.split_to(len);
                    if let Some(mask) = mask {
                        apply_mask(mask, &mut payload);
                    }
                    self.state = DecodeState::Head;
                    return Ok(Some(Frame { fin, rsv, opcode, payload: payload.freeze() }));
                }
            }
        }
    }
}

/// Build one wire frame. `mask` is `Some` for client-originated frames
///, `None` for server-originated ones.
pub fn encode_frame(fin: bool, rsv: Rsv, opcode: Opcode, mut payload: Bytes, masked: bool, dst: &mut BytesMut) {
    let mut b0 = opcode.as_u8();
    if fin {
        b0 |= 0x80;
    }
    if rsv.rsv1 {
        b0 |= 0x40;
    }
    if rsv.rsv2 {
        b0 |= 0x20;
    }
    if rsv.rsv3 {
        b0 |= 0x10;
    }
    dst.put_u8(b0);

    let mask_key = if masked {
        let mut key = [0u8; 4];
        rand::rng().fill_bytes(&mut key);
        Some(key)
    } else {
        None
    };

    let len = payload.len();
    let mask_bit = if masked { 0x80 } else { 0x00 };
    if len <= 125 {
        dst.put_u8(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        dst.put_u8(mask_bit | 126);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(mask_bit | 127);
        dst.put_u64(len as u64);
    }

    if let Some(key) = mask_key {
        dst.put_slice(&key);
        let mut buf = payload.to_vec();
        apply_mask(key, &mut buf);
        dst.put_slice(&buf);
    } else {
        dst.put(&mut payload);
    }
}

/// Encode a complete (unfragmented) application message as a single frame.
pub fn encode_message(msg: &Message, masked: bool, dst: &mut BytesMut) {
    match msg {
        Message::Text(s) => encode_frame(true, Rsv::default(), Opcode::Text, Bytes::copy_from_slice(s.as_bytes()), masked, dst),
        Message::Binary(b) => encode_frame(true, Rsv::default(), Opcode::Binary, b.clone(), masked, dst),
        Message::Ping(b) => encode_frame(true, Rsv::default(), Opcode::Ping, b.clone(), masked, dst),
        Message::Pong(b) => encode_frame(true, Rsv::default(), Opcode::Pong, b.clone(), masked, dst),
        Message::Close { code, reason } => {
            let mut payload = BytesMut::new();
            if let Some(code) = code {
                payload.put_u16(*code);
                payload.put_slice(reason.as_bytes());
            }
            encode_frame(true, Rsv::default(), Opcode::Close, payload.freeze(), masked, dst);
        }
    }
}

/// Parse a CLOSE frame's payload.
pub fn decode_close_payload(payload: &[u8]) -> Result<(Option<u16>, String)> {
    if payload.is_empty() {
        return Ok((None, String::new()));
    }
    if payload.len() < 2 {
        return Err(Error::new(ErrorKind::ProtoError));
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = std::str::from_utf8(&payload[2..])
        .map_err(|_| Error::new(ErrorKind::ProtoError))?
        .to_owned();
    Ok((Some(code), reason))
}

/// Assembles a possibly-fragmented message from successive decoded frames
///.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    in_progress: Option<(Opcode, BytesMut)>,
}

impl MessageAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one decoded frame; returns a complete [`Message`] once
    /// assembled. Control frames always return immediately since they may
    /// not be fragmented.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        if frame.opcode.is_control() {
            return Ok(Some(match frame.opcode {
                Opcode::Ping => Message::Ping(frame.payload),
                Opcode::Pong => Message::Pong(frame.payload),
                Opcode::Close => {
                    let (code, reason) = decode_close_payload(&frame.payload)?;
                    Message::Close { code, reason }
                }
                _ => unreachable!("control opcodes enumerated above"),
            }));
        }

        match frame.opcode {
            Opcode::Continuation => {
                let Some((opcode, mut buf)) = self.in_progress.take() else {
                    return Err(Error::new(ErrorKind::ProtoError));
                };
                buf.extend_from_slice(&frame.payload);
                if frame.fin {
                    Ok(Some(finish_message(opcode, buf.freeze())?))
                } else {
                    self.in_progress = Some((opcode, buf));
                    Ok(None)
                }
            }
            Opcode::Text | Opcode::Binary => {
                if self.in_progress.is_some() {
                    return Err(Error::new(ErrorKind::ProtoError));
                }
                if frame.fin {
                    Ok(Some(finish_message(frame.opcode, frame.payload)?))
                } else {
                    let mut buf = BytesMut::new();
                    buf.extend_from_slice(&frame.payload);
                    self.in_progress = Some((frame.opcode, buf));
                    Ok(None)
                }
            }
            Opcode::Close | Opcode::Ping | Opcode::Pong => unreachable!("handled above"),
        }
    }
}

fn finish_message(opcode: Opcode, payload: Bytes) -> Result<Message> {
    match opcode {
        Opcode::Text => {
            let s = String::from_utf8(payload.to_vec()).map_err(|_| Error::new(ErrorKind::ProtoError))?;
            Ok(Message::Text(s))
        }
        Opcode::Binary => Ok(Message::Binary(payload)),
        _ => unreachable!("only Text/Binary accumulate via MessageAssembler"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_ping_then_pong_then_text_then_binary() {
        let mut src = BytesMut::from(
            &[
                0x89, 0x02, 0x01, 0x02, 0x8a, 0x01, 0x03, 0x01, 0x07, b'H', b'e', b'l', b'l', b'o', b',',
                b' ', 0x80, 0x06, b'W', b'o', b'r', b'l', b'd', b'!', 0x82, 0x03, 0x01, 0x02, 0x03,
            ][..],
        );
        let mut dec = FrameDecoder::new(false);
        let mut assembler = MessageAssembler::new();

        let f1 = dec.decode(&mut src).unwrap().unwrap();
        assert_eq!(assembler.push(f1).unwrap(), Some(Message::Ping(vec![1, 2].into())));

        let f2 = dec.decode(&mut src).unwrap().unwrap();
        assert_eq!(assembler.push(f2).unwrap(), Some(Message::Pong(vec![3].into())));

        let f3 = dec.decode(&mut src).unwrap().unwrap();
        assert_eq!(assembler.push(f3).unwrap(), None);
        let f4 = dec.decode(&mut src).unwrap().unwrap();
        assert_eq!(assembler.push(f4).unwrap(), Some(Message::Text("Hello, World!".into())));

        let f5 = dec.decode(&mut src).unwrap().unwrap();
        assert_eq!(assembler.push(f5).unwrap(), Some(Message::Binary(vec![1, 2, 3].into())));
    }

    #[test]
    fn masked_text_frame_round_trips_spec_scenario_5() {
        let mut dst = BytesMut::new();
        encode_message(&Message::Text("hi".into()), true, &mut dst);
        assert_eq!(dst[0], 0x81); // fin + text
        assert_eq!(dst[1] & 0x80, 0x80); // masked
        assert_eq!(dst[1] & 0x7F, 2);

        let mut dec = FrameDecoder::new(true);
        let frame = dec.decode(&mut dst).unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"hi");
    }

    #[test]
    fn server_rejects_unmasked_client_frame() {
        let mut src = BytesMut::from(&[0x81, 0x02, b'h', b'i'][..]);
        let mut dec = FrameDecoder::new(true);
        assert!(dec.decode(&mut src).is_err());
    }

    #[test]
    fn control_frame_over_125_bytes_is_rejected() {
        let payload = vec![0u8; 126];
        let mut dst = BytesMut::new();
        encode_frame(true, Rsv::default(), Opcode::Ping, payload.into(), false, &mut dst);
        let mut dec = FrameDecoder::new(false);
        assert!(dec.decode(&mut dst).is_err());
    }

    #[test]
    fn close_payload_of_one_byte_is_rejected() {
        assert!(decode_close_payload(&[1]).is_err());
    }

    #[test]
    fn close_payload_decodes_code_and_reason() {
        let mut payload = vec![0x03, 0xE8];
        payload.extend_from_slice(b"bye");
        let (code, reason) = decode_close_payload(&payload).unwrap();
        assert_eq!(code, Some(1000));
        assert_eq!(reason, "bye");
    }

    #[test]
    fn continuation_without_a_started_message_is_rejected() {
        let frame = Frame { fin: true, rsv: Rsv::default(), opcode: Opcode::Continuation, payload: Bytes::new() };
        let mut assembler = MessageAssembler::new();
        assert!(assembler.push(frame).is_err());
    }
}
