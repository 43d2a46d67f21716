//! PRIORITY frame and the 5-byte stream-dependency record shared with
//! HEADERS' optional priority field: a 31-bit dependency id with a reserved
//! exclusive bit, plus an 8-bit weight.

use bytes::{BufMut, BytesMut};

use super::{FrameError, Head, Kind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDependency {
    pub dependency_id: u32,
    pub weight: u8,
    pub is_exclusive: bool,
}

impl StreamDependency {
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() != 5 {
            return Err(FrameError::InvalidPayloadLength);
        }
        let raw = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        Ok(Self {
            dependency_id: raw & 0x7fff_ffff,
            is_exclusive: raw & 0x8000_0000 != 0,
            weight: buf[4],
        })
    }

    pub fn encode_into(&self, dst: &mut BytesMut) {
        let mut raw = self.dependency_id & 0x7fff_ffff;
        if self.is_exclusive {
            raw |= 0x8000_0000;
        }
        dst.put_u32(raw);
        dst.put_u8(self.weight);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub stream_id: u32,
    pub dependency: StreamDependency,
}

pub(super) fn decode(head: Head, payload: &[u8]) -> Result<Priority, FrameError> {
    if head.stream_id == 0 {
        return Err(FrameError::InvalidDependencyId);
    }
    let dependency = StreamDependency::decode(payload)?;
    if dependency.dependency_id == head.stream_id {
        // RFC 7540 §5.3.1: a stream cannot depend on itself.
        return Err(FrameError::InvalidDependencyId);
    }
    Ok(Priority {
        stream_id: head.stream_id,
        dependency,
    })
}

pub(super) fn encode(f: &Priority, dst: &mut BytesMut) {
    let head = Head::new(Kind::Priority, 0, f.stream_id, 5);
    head.encode_into(dst);
    f.dependency.encode_into(dst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_round_trips() {
        let f = Priority {
            stream_id: 3,
            dependency: StreamDependency {
                dependency_id: 1,
                weight: 200,
                is_exclusive: true,
            },
        };
        let mut buf = BytesMut::new();
        encode(&f, &mut buf);
        let head = Head::decode(&buf[..super::super::HEADER_LEN]).unwrap();
        let decoded = decode(head, &buf[super::super::HEADER_LEN..]).unwrap();
        assert_eq!(f, decoded);
    }

    #[test]
    fn self_dependent_priority_is_invalid() {
        let head = Head::new(Kind::Priority, 0, 3, 5);
        let mut buf = BytesMut::new();
        StreamDependency {
            dependency_id: 3,
            weight: 0,
            is_exclusive: false,
        }
        .encode_into(&mut buf);
        assert_eq!(decode(head, &buf).unwrap_err(), FrameError::InvalidDependencyId);
    }
}
