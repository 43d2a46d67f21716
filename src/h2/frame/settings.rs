//! SETTINGS frame encode/decode and the negotiated-values configuration
//! struct: `Option<T>` fields defaulting to RFC 7540 defaults, with per-id
//! validation on load.

use bytes::{BufMut, BytesMut};

use super::{flags, FrameError, Head, Kind};

pub const DEFAULT_SETTINGS_HEADER_TABLE_SIZE: u32 = 4_096;
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
pub const MAX_MAX_FRAME_SIZE: u32 = (1 << 24) - 1;
const MAX_INITIAL_WINDOW_SIZE: u32 = (1 << 31) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingId {
    HeaderTableSize,
    EnablePush,
    MaxConcurrentStreams,
    InitialWindowSize,
    MaxFrameSize,
    MaxHeaderListSize,
    EnableConnectProtocol,
    Unknown(u16),
}

impl SettingId {
    fn from_u16(n: u16) -> Self {
        match n {
            1 => Self::HeaderTableSize,
            2 => Self::EnablePush,
            3 => Self::MaxConcurrentStreams,
            4 => Self::InitialWindowSize,
            5 => Self::MaxFrameSize,
            6 => Self::MaxHeaderListSize,
            8 => Self::EnableConnectProtocol,
            other => Self::Unknown(other),
        }
    }

    fn as_u16(self) -> u16 {
        match self {
            Self::HeaderTableSize => 1,
            Self::EnablePush => 2,
            Self::MaxConcurrentStreams => 3,
            Self::InitialWindowSize => 4,
            Self::MaxFrameSize => 5,
            Self::MaxHeaderListSize => 6,
            Self::EnableConnectProtocol => 8,
            Self::Unknown(n) => n,
        }
    }
}

/// Negotiated HTTP/2 settings, either side's view. `None` means "peer default applies".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsConfig {
    pub header_table_size: Option<u32>,
    pub enable_push: Option<u32>,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub max_frame_size: Option<u32>,
    pub max_header_list_size: Option<u32>,
    pub enable_connect_protocol: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub ack: bool,
    pub config: SettingsConfig,
}

impl Settings {
    #[must_use]
    pub fn ack() -> Self {
        Self {
            ack: true,
            config: SettingsConfig::default(),
        }
    }

    pub fn set_initial_window_size(&mut self, size: Option<u32>) {
        self.config.initial_window_size = size;
    }

    pub fn set_max_frame_size(&mut self, size: Option<u32>) {
        if let Some(val) = size {
            debug_assert!((DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&val));
        }
        self.config.max_frame_size = size;
    }

    fn for_each_setting(&self, mut f: impl FnMut(SettingId, u32)) {
        let c = &self.config;
        if let Some(v) = c.header_table_size {
            f(SettingId::HeaderTableSize, v);
        }
        if let Some(v) = c.enable_push {
            f(SettingId::EnablePush, v);
        }
        if let Some(v) = c.max_concurrent_streams {
            f(SettingId::MaxConcurrentStreams, v);
        }
        if let Some(v) = c.initial_window_size {
            f(SettingId::InitialWindowSize, v);
        }
        if let Some(v) = c.max_frame_size {
            f(SettingId::MaxFrameSize, v);
        }
        if let Some(v) = c.max_header_list_size {
            f(SettingId::MaxHeaderListSize, v);
        }
        if let Some(v) = c.enable_connect_protocol {
            f(SettingId::EnableConnectProtocol, v);
        }
    }

    fn payload_len(&self) -> u32 {
        let mut n = 0u32;
        self.for_each_setting(|_, _| n += 6);
        n
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let flag = if self.ack { flags::ACK } else { 0 };
        let head = Head::new(Kind::Settings, flag, 0, self.payload_len());
        head.encode_into(dst);
        self.encode_payload(dst);
    }

    /// Encode just the id/value pairs, with no frame header — the shape
    /// carried (base64url, no padding) in an HTTP/1 `HTTP2-Settings` upgrade
    /// header.
    pub(crate) fn encode_payload(&self, dst: &mut BytesMut) {
        self.for_each_setting(|id, value| {
            dst.put_u16(id.as_u16());
            dst.put_u32(value);
        });
    }
}

pub(super) fn decode(head: Head, payload: &[u8]) -> Result<Settings, FrameError> {
    if head.is_set(flags::ACK) {
        if !payload.is_empty() {
            return Err(FrameError::InvalidPayloadLength);
        }
        return Ok(Settings::ack());
    }
    if payload.len() % 6 != 0 {
        return Err(FrameError::InvalidPayloadLength);
    }
    let mut settings = Settings::default();
    for raw in payload.chunks(6) {
        let id = SettingId::from_u16(u16::from_be_bytes([raw[0], raw[1]]));
        let value = u32::from_be_bytes(raw[2..6].try_into().unwrap());
        match id {
            SettingId::HeaderTableSize => settings.config.header_table_size = Some(value),
            SettingId::EnablePush => match value {
                0 | 1 => settings.config.enable_push = Some(value),
                _ => return Err(FrameError::InvalidSettingValue),
            },
            SettingId::MaxConcurrentStreams => settings.config.max_concurrent_streams = Some(value),
            SettingId::InitialWindowSize => {
                if value > MAX_INITIAL_WINDOW_SIZE {
                    return Err(FrameError::InvalidInitialWindowSize);
                }
                settings.config.initial_window_size = Some(value);
            }
            SettingId::MaxFrameSize => {
                if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) {
                    return Err(FrameError::InvalidSettingValue);
                }
                settings.config.max_frame_size = Some(value);
            }
            SettingId::MaxHeaderListSize => settings.config.max_header_list_size = Some(value),
            SettingId::EnableConnectProtocol => match value {
                0 | 1 => settings.config.enable_connect_protocol = Some(value),
                _ => return Err(FrameError::InvalidSettingValue),
            },
            SettingId::Unknown(n) => {
                tracing::trace!(id = n, value, "ignoring unknown SETTINGS id");
            }
        }
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::h2::error::Reason;

    #[test]
    fn settings_round_trip_preserves_values() {
        let mut settings = Settings::default();
        settings.config.initial_window_size = Some(1000);
        settings.config.max_frame_size = Some(20_000);
        settings.config.enable_push = Some(0);

        let mut buf = BytesMut::new();
        settings.encode(&mut buf);
        let head = Head::decode(&buf[..super::super::HEADER_LEN]).unwrap();
        let decoded = decode(head, &buf[super::super::HEADER_LEN..]).unwrap();
        assert_eq!(decoded, settings);
    }

    #[test]
    fn ack_settings_must_be_empty() {
        let head = Head::new(Kind::Settings, flags::ACK, 0, 6);
        let err = decode(head, &[0, 1, 0, 0, 0, 1]).unwrap_err();
        assert_eq!(err, FrameError::InvalidPayloadLength);
    }

    #[test]
    fn initial_window_size_overflow_is_rejected() {
        let head = Head::new(Kind::Settings, 0, 0, 6);
        let mut payload = Vec::new();
        payload.extend_from_slice(&4u16.to_be_bytes());
        payload.extend_from_slice(&(1u32 << 31).to_be_bytes());
        let err = decode(head, &payload).unwrap_err();
        assert_eq!(err, FrameError::InvalidInitialWindowSize);
        assert_eq!(err.reason(), Reason::FLOW_CONTROL_ERROR);
    }

    #[test]
    fn max_frame_size_boundaries() {
        let build = |value: u32| {
            let head = Head::new(Kind::Settings, 0, 0, 6);
            let mut payload = Vec::new();
            payload.extend_from_slice(&5u16.to_be_bytes());
            payload.extend_from_slice(&value.to_be_bytes());
            decode(head, &payload)
        };
        assert_eq!(build(16383).unwrap_err(), FrameError::InvalidSettingValue);
        assert!(build(MAX_MAX_FRAME_SIZE).is_ok());
        assert_eq!(build(MAX_MAX_FRAME_SIZE + 1).unwrap_err(), FrameError::InvalidSettingValue);
    }
}
