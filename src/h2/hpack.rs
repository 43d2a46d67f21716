//! HPACK codec seam: concrete header compression tables are an explicit
//! non-goal of this crate, so HPACK is consumed through a narrow trait kept
//! behind a thin wrapper rather than inlined into the connection.

use crate::error::Result;

/// One decoded or to-be-encoded header field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
    /// Pseudo-headers (`:method`, `:path`, ...) sort first on encode and are
    /// recognized by a leading colon; ordinary headers keep arrival order.
    pub sensitive: bool,
}

impl Header {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            sensitive: false,
        }
    }

    #[must_use]
    pub fn is_pseudo(&self) -> bool {
        self.name.starts_with(':')
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderError {
    NeedMoreData,
    InvalidRepresentation,
    InvalidIntegerPrefix,
    InvalidTableSizeUpdate,
    InvalidUtf8,
    InvalidHuffmanCode,
    IndexOutOfRange(usize),
}

/// Opaque encode/decode of header lists. A concrete
/// implementation owns the static + dynamic indexed tables; this crate only
/// depends on the seam. `Send` is required so a [`crate::h2::connection::Connection`]
/// can be wrapped in a `Mutex` and shared with a
/// [`crate::h2::stream_proxy::StreamProxy`] living on another thread.
pub trait HpackCodec: Send {
    /// Encode `headers` into `dst`, returning the number of bytes written.
    fn encode(&mut self, headers: &[Header], dst: &mut Vec<u8>) -> Result<usize>;

    /// Decode a complete header block fragment accumulated across
    /// CONTINUATION frames, appending decoded fields to `out`.
    fn decode(&mut self, src: &[u8], out: &mut Vec<Header>) -> std::result::Result<(), DecoderError>;

    /// Applied when `SETTINGS_HEADER_TABLE_SIZE` changes.
    fn set_max_table_size(&mut self, size: u32);
}

/// A codec that performs no compression: headers pass through as literal
/// (never-indexed) representations. Useful for tests and as a default when
/// no HPACK collaborator has been wired in; never used to claim RFC 7541
/// conformance (concrete HPACK tables are this crate's explicit non-goal).
#[derive(Debug, Default)]
pub struct PassthroughHpack {
    max_table_size: u32,
}

impl HpackCodec for PassthroughHpack {
    fn encode(&mut self, headers: &[Header], dst: &mut Vec<u8>) -> Result<usize> {
        let start = dst.len();
        for h in headers {
            dst.push(0); // placeholder representation byte
            encode_len_prefixed(&h.name, dst);
            encode_len_prefixed(&h.value, dst);
        }
        Ok(dst.len() - start)
    }

    fn decode(&mut self, src: &[u8], out: &mut Vec<Header>) -> std::result::Result<(), DecoderError> {
        let mut pos = 0;
        while pos < src.len() {
            if src[pos] != 0 {
                return Err(DecoderError::InvalidRepresentation);
            }
            pos += 1;
            let (name, n) = decode_len_prefixed(&src[pos..])?;
            pos += n;
            let (value, n) = decode_len_prefixed(&src[pos..])?;
            pos += n;
            out.push(Header::new(name, value));
        }
        Ok(())
    }

    fn set_max_table_size(&mut self, size: u32) {
        self.max_table_size = size;
    }
}

fn encode_len_prefixed(s: &str, dst: &mut Vec<u8>) {
    dst.extend_from_slice(&(s.len() as u32).to_be_bytes());
    dst.extend_from_slice(s.as_bytes());
}

fn decode_len_prefixed(src: &[u8]) -> std::result::Result<(String, usize), DecoderError> {
    if src.len() < 4 {
        return Err(DecoderError::NeedMoreData);
    }
    let len = u32::from_be_bytes(src[0..4].try_into().unwrap()) as usize;
    if src.len() < 4 + len {
        return Err(DecoderError::NeedMoreData);
    }
    let s = std::str::from_utf8(&src[4..4 + len])
        .map_err(|_| DecoderError::InvalidUtf8)?
        .to_owned();
    Ok((s, 4 + len))
}
