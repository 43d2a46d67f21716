//! HTTP/1.x header serialization and body framing as a companion to an
//! external parser collaborator.
//!
//! Request/status-line and header parsing is left to an external
//! collaborator; this module only owns header serialization (with a
//! `Client`/`Server` role split) and the chunked/content-length body
//! state machines sitting on top of it.

use bytes::{BufMut, BytesMut};

use crate::error::{Error, ErrorKind, Result};

/// One HTTP header field pair, independent of the H2-specific
/// [`crate::h2::hpack::Header`] (no pseudo-header / sensitivity concept at
/// this layer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

impl HeaderField {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The request line of a request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
    pub version_1_1: bool,
}

/// The status line of a response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version_1_1: bool,
    pub status: u16,
    pub reason: String,
}

/// Whether a response is body-less independent of any `Content-Length`
/// header present on it.
#[must_use]
pub fn response_has_no_body(status: u16) -> bool {
    (100..200).contains(&status) || status == 204 || status == 304
}

/// `method SP url SP version CRLF`, followed by the serialized header map
/// and a blank line.
pub fn encode_request_head(line: &RequestLine, headers: &[HeaderField], dst: &mut BytesMut) {
    let version = if line.version_1_1 { "HTTP/1.1" } else { "HTTP/1.0" };
    dst.put_slice(line.method.as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(line.target.as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(version.as_bytes());
    dst.put_slice(b"\r\n");
    encode_header_fields(headers, dst);
}

/// `version SP status [SP desc] CRLF`, followed by the serialized header
/// map and a blank line.
pub fn encode_response_head(line: &StatusLine, headers: &[HeaderField], dst: &mut BytesMut) {
    let version = if line.version_1_1 { "HTTP/1.1" } else { "HTTP/1.0" };
    dst.put_slice(version.as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(line.status.to_string().as_bytes());
    if !line.reason.is_empty() {
        dst.put_u8(b' ');
        dst.put_slice(line.reason.as_bytes());
    }
    dst.put_slice(b"\r\n");
    encode_header_fields(headers, dst);
}

fn encode_header_fields(headers: &[HeaderField], dst: &mut BytesMut) {
    for h in headers {
        dst.put_slice(h.name.as_bytes());
        dst.put_slice(b": ");
        dst.put_slice(h.value.as_bytes());
        dst.put_slice(b"\r\n");
    }
    dst.put_slice(b"\r\n");
}

/// How a message body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    ContentLength(u64),
    Chunked,
    /// No body at all: HEAD responses, 1xx/204/304, or a request with
    /// neither `Content-Length` nor `Transfer-Encoding: chunked`.
    None,
}

/// Drives body framing for one in-flight message.
#[derive(Debug)]
pub struct BodyEncoder {
    kind: BodyLength,
    sent: u64,
    complete: bool,
}

impl BodyEncoder {
    #[must_use]
    pub fn new(kind: BodyLength) -> Self {
        let complete = matches!(kind, BodyLength::None);
        Self { kind, sent: 0, complete }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// `send_data(data)`. For `Content-Length` bodies, writes
    /// `data` as-is and counts bytes toward the declared length, marking the
    /// message complete once it is reached. For chunked bodies, wraps
    /// `data` in `<hex-len>\r\n<payload>\r\n`; `send_data(&[])` on a chunked
    /// body instead emits the terminating `"0\r\n\r\n"` chunk.
    pub fn send_data(&mut self, data: &[u8], dst: &mut BytesMut) -> Result<()> {
        if self.complete {
            return Err(Error::new(ErrorKind::InvalidState));
        }
        match self.kind {
            BodyLength::None => {
                if !data.is_empty() {
                    return Err(Error::new(ErrorKind::InvalidState));
                }
                self.complete = true;
            }
            BodyLength::ContentLength(total) => {
                dst.put_slice(data);
                self.sent += data.len() as u64;
                if self.sent >= total {
                    self.complete = true;
                }
            }
            BodyLength::Chunked => {
                if data.is_empty() {
                    dst.put_slice(b"0\r\n\r\n");
                    self.complete = true;
                } else {
                    dst.put_slice(format!("{:x}\r\n", data.len()).as_bytes());
                    dst.put_slice(data);
                    dst.put_slice(b"\r\n");
                    self.sent += data.len() as u64;
                }
            }
        }
        Ok(())
    }
}

/// One decoded chunk-framing event, returned by [`ChunkedDecoder::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkEvent {
    /// `len` bytes of chunk payload were consumed from the front of the
    /// input and appended to the caller's body buffer.
    Data(usize),
    /// The terminating zero-length chunk (and its trailing CRLF, with no
    /// trailer headers) was consumed; the body is complete.
    Done,
    /// Not enough bytes buffered yet to make progress.
    NeedMore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    Size,
    Data(u64),
    DataCrlf,
    TerminatorCrlf,
    Done,
}

/// Parses the wire shape of chunked transfer-encoding bodies (the
/// complementary half of [`BodyEncoder`]'s chunked branch), trailer headers
/// are not supported (an explicit non-goal: trailers are rare and the
/// external parser collaborator already has no opinion on them either).
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: ChunkedState,
}

impl ChunkedDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self { state: ChunkedState::Size }
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == ChunkedState::Done
    }

    /// Consume as much of `src` as forms complete chunk-framing, appending
    /// payload bytes to `body` and returning what happened. Call repeatedly
    /// until [`ChunkEvent::NeedMore`] or [`ChunkEvent::Done`].
    pub fn decode(&mut self, src: &mut BytesMut, body: &mut BytesMut) -> Result<ChunkEvent> {
        loop {
            match self.state {
                ChunkedState::Done => return Ok(ChunkEvent::Done),
                ChunkedState::Size => {
                    let Some(line_end) = find_crlf(src) else {
                        return Ok(ChunkEvent::NeedMore);
                    };
                    let line = &src[..line_end];
                    let size_str = std::str::from_utf8(line)
                        .map_err(|_| Error::new(ErrorKind::ProtoError))?
                        .split(';')
                        .next()
                        .unwrap_or("");
                    let size = u64::from_str_radix(size_str.trim(), 16)
                        .map_err(|_| Error::new(ErrorKind::ProtoError))?;
                    src.split_to(line_end + 2);
                    self.state = if size == 0 {
                        ChunkedState::TerminatorCrlf
                    } else {
                        ChunkedState::Data(size)
                    };
                }
                ChunkedState::Data(remaining) => {
                    if src.is_empty() {
                        return Ok(ChunkEvent::NeedMore);
                    }
                    let take = (remaining as usize).min(src.len());
                    body.extend_from_slice(&src[..take]);
                    src.split_to(take);
                    let remaining = remaining - take as u64;
                    if remaining == 0 {
                        self.state = ChunkedState::DataCrlf;
                        return Ok(ChunkEvent::Data(take));
                    }
                    self.state = ChunkedState::Data(remaining);
                    return Ok(ChunkEvent::Data(take));
                }
                ChunkedState::DataCrlf => {
                    if src.len() < 2 {
                        return Ok(ChunkEvent::NeedMore);
                    }
                    if &src[..2] != b"\r\n" {
                        return Err(Error::new(ErrorKind::ProtoError));
                    }
                    src.split_to(2);
                    self.state = ChunkedState::Size;
                }
                ChunkedState::TerminatorCrlf => {
                    if src.len() < 2 {
                        return Ok(ChunkEvent::NeedMore);
                    }
                    if &src[..2] != b"\r\n" {
                        return Err(Error::new(ErrorKind::ProtoError));
                    }
                    src.split_to(2);
                    self.state = ChunkedState::Done;
                    return Ok(ChunkEvent::Done);
                }
            }
        }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_head_encodes_method_target_version_then_headers() {
        let mut dst = BytesMut::new();
        encode_request_head(
            &RequestLine { method: "GET".into(), target: "/".into(), version_1_1: true },
            &[HeaderField::new("Host", "example.com")],
            &mut dst,
        );
        assert_eq!(&dst[..], b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n");
    }

    #[test]
    fn response_head_omits_reason_when_empty() {
        let mut dst = BytesMut::new();
        encode_response_head(
            &StatusLine { version_1_1: true, status: 204, reason: String::new() },
            &[],
            &mut dst,
        );
        assert_eq!(&dst[..], b"HTTP/1.1 204\r\n\r\n");
    }

    #[test]
    fn no_body_statuses_are_bodyless() {
        assert!(response_has_no_body(100));
        assert!(response_has_no_body(204));
        assert!(response_has_no_body(304));
        assert!(!response_has_no_body(200));
    }

    #[test]
    fn content_length_body_completes_on_declared_length() {
        let mut enc = BodyEncoder::new(BodyLength::ContentLength(5));
        let mut dst = BytesMut::new();
        enc.send_data(b"hel", &mut dst).unwrap();
        assert!(!enc.is_complete());
        enc.send_data(b"lo", &mut dst).unwrap();
        assert!(enc.is_complete());
        assert_eq!(&dst[..], b"hello");
    }

    #[test]
    fn chunked_body_wraps_each_send_and_terminates_on_empty() {
        let mut enc = BodyEncoder::new(BodyLength::Chunked);
        let mut dst = BytesMut::new();
        enc.send_data(b"hi", &mut dst).unwrap();
        assert_eq!(&dst[..], b"2\r\nhi\r\n");
        dst.clear();
        enc.send_data(b"", &mut dst).unwrap();
        assert_eq!(&dst[..], b"0\r\n\r\n");
        assert!(enc.is_complete());
    }

    #[test]
    fn chunked_decoder_round_trips_a_single_chunk_then_terminator() {
        let mut src = BytesMut::from(&b"5\r\nhello\r\n0\r\n\r\n"[..]);
        let mut body = BytesMut::new();
        let mut dec = ChunkedDecoder::new();
        assert_eq!(dec.decode(&mut src, &mut body).unwrap(), ChunkEvent::Data(5));
        assert_eq!(&body[..], b"hello");
        let event = loop {
            match dec.decode(&mut src, &mut body).unwrap() {
                ChunkEvent::NeedMore => continue,
                other => break other,
            }
        };
        assert_eq!(event, ChunkEvent::Done);
    }

    #[test]
    fn chunked_decoder_reports_need_more_on_partial_input() {
        let mut src = BytesMut::from(&b"5\r\nhe"[..]);
        let mut body = BytesMut::new();
        let mut dec = ChunkedDecoder::new();
        assert_eq!(dec.decode(&mut src, &mut body).unwrap(), ChunkEvent::Data(2));
        assert_eq!(dec.decode(&mut src, &mut body).unwrap(), ChunkEvent::NeedMore);
    }
}
