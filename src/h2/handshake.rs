//! h2c upgrade and TLS-ALPN handshake state machine, driving a connection's
//! "connecting" and "open" phases from `parse_input_data` calls on a
//! reactor callback rather than polling a future.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::{Buf, Bytes, BytesMut};

use crate::h2::connection::{Role, PREFACE};
use crate::h2::error::{H2Error, Initiator, Reason};
use crate::h2::frame::{Codec, Frame, Settings, SettingsConfig, WindowUpdate, DEFAULT_MAX_FRAME_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Upgrading,
    WaitingPreface,
    WaitingFirstSettings,
    Complete,
    Failed,
}

/// Emitted by [`Handshake::parse_input_data`] once the handshake resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeEvent {
    Complete(SettingsConfig),
}

/// Drives a connection through the `UPGRADING`/`HANDSHAKE` substates (spec
/// §3 "H2 Connection" lifecycle, §4.I). Owned by the connection during
/// setup and discarded once [`HandshakeEvent::Complete`] fires.
pub struct Handshake {
    role: Role,
    state: State,
    local_settings: SettingsConfig,
    codec: Codec,
}

impl Handshake {
    #[must_use]
    pub fn new(role: Role, local_settings: SettingsConfig) -> Self {
        Self {
            role,
            state: State::Idle,
            local_settings,
            codec: Codec::new(DEFAULT_MAX_FRAME_SIZE),
        }
    }

    /// `start(is_server, is_ssl)`. `is_server` is implied by the
    /// role this handshake was constructed with. For a TLS connection with
    /// ALPN having selected `h2`, pass `is_ssl = true`: a client moves
    /// straight to sending the preface, SETTINGS, and an initial
    /// connection-level WINDOW_UPDATE; a server moves to waiting for that
    /// same preface. For cleartext client connections, returns the h2c
    /// upgrade request instead; call [`Handshake::on_upgrade_confirmed`]
    /// once the peer's `101 Switching Protocols` arrives.
    pub fn start(&mut self, is_ssl: bool) -> Bytes {
        match self.role {
            Role::Client if is_ssl => {
                self.state = State::WaitingFirstSettings;
                self.client_preface_and_settings()
            }
            Role::Client => {
                self.state = State::Upgrading;
                self.h2c_upgrade_request()
            }
            Role::Server => {
                self.state = State::WaitingPreface;
                Bytes::new()
            }
        }
    }

    /// Called once the client has received the `101 Switching Protocols`
    /// response to the h2c upgrade request. Stream id 1 is reserved for the
    /// upgraded request itself, so the caller's connection must start its
    /// own `next_outgoing_stream_id` at 3 rather than 1.
    pub fn on_upgrade_confirmed(&mut self) -> Bytes {
        debug_assert_eq!(self.state, State::Upgrading);
        self.state = State::WaitingFirstSettings;
        self.client_preface_and_settings()
    }

    fn client_preface_and_settings(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(PREFACE);
        Settings {
            ack: false,
            config: self.local_settings.clone(),
        }
        .encode(&mut buf);
        Frame::WindowUpdate(WindowUpdate {
            stream_id: 0,
            increment: 65_535,
        })
        .encode(&mut buf);
        buf.freeze()
    }

    fn h2c_upgrade_request(&self) -> Bytes {
        let mut payload = BytesMut::new();
        Settings {
            ack: false,
            config: self.local_settings.clone(),
        }
        .encode_payload(&mut payload);
        let encoded = URL_SAFE_NO_PAD.encode(&payload);
        let request = format!(
            "GET / HTTP/1.1\r\n\
             Connection: Upgrade, HTTP2-Settings\r\n\
             Upgrade: h2c\r\n\
             HTTP2-Settings: {encoded}\r\n\
             \r\n"
        );
        Bytes::from(request.into_bytes())
    }

    /// `parse_input_data(buf, len) → bytes_consumed`, expressed
    /// against a `BytesMut` the caller advances in place rather than
    /// returning a raw consumed count, matching [`Codec::decode_from`]'s
    /// convention elsewhere in this crate.
    pub fn parse_input_data(&mut self, src: &mut BytesMut) -> Result<Option<HandshakeEvent>, H2Error> {
        match self.state {
            State::WaitingPreface => {
                if src.len() < PREFACE.len() {
                    return Ok(None);
                }
                if &src[..PREFACE.len()] != PREFACE {
                    self.state = State::Failed;
                    return Err(H2Error::connection(Reason::PROTOCOL_ERROR, Initiator::Remote));
                }
                src.advance(PREFACE.len());
                self.state = State::WaitingFirstSettings;
                self.parse_input_data(src)
            }
            State::WaitingFirstSettings => {
                let mut first = None;
                self.codec
                    .decode_from(src, |frame| {
                        if first.is_none() {
                            first = Some(frame);
                        }
                    })
                    .map_err(|_| H2Error::connection(Reason::PROTOCOL_ERROR, Initiator::Remote))?;
                match first {
                    Some(Frame::Settings(s)) => {
                        self.state = State::Complete;
                        Ok(Some(HandshakeEvent::Complete(s.config)))
                    }
                    Some(_) => {
                        self.state = State::Failed;
                        Err(H2Error::connection(Reason::PROTOCOL_ERROR, Initiator::Remote))
                    }
                    None => Ok(None),
                }
            }
            State::Idle | State::Upgrading | State::Complete | State::Failed => Ok(None),
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == State::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_tls_waits_for_preface_then_first_settings() {
        let mut hs = Handshake::new(Role::Server, SettingsConfig::default());
        let sent = hs.start(true);
        assert!(sent.is_empty());

        let mut buf = BytesMut::from(&PREFACE[..]);
        assert_eq!(hs.parse_input_data(&mut buf).unwrap(), None);
        assert!(buf.is_empty());

        let mut settings_bytes = BytesMut::new();
        Settings::default().encode(&mut settings_bytes);
        let event = hs.parse_input_data(&mut settings_bytes).unwrap().unwrap();
        assert_eq!(event, HandshakeEvent::Complete(SettingsConfig::default()));
        assert!(hs.is_complete());
    }

    #[test]
    fn server_rejects_wrong_preface() {
        let mut hs = Handshake::new(Role::Server, SettingsConfig::default());
        hs.start(true);
        let mut buf = BytesMut::from(&b"NOTAPREFACEXXXXXXXXXXXXX"[..]);
        let err = hs.parse_input_data(&mut buf).unwrap_err();
        assert_eq!(err.reason(), Reason::PROTOCOL_ERROR);
    }

    #[test]
    fn server_rejects_non_settings_first_frame() {
        let mut hs = Handshake::new(Role::Server, SettingsConfig::default());
        hs.start(true);
        let mut buf = BytesMut::from(&PREFACE[..]);
        hs.parse_input_data(&mut buf).unwrap();

        let mut ping_bytes = BytesMut::new();
        Frame::Ping(crate::h2::frame::Ping { ack: false, payload: [0; 8] }).encode(&mut ping_bytes);
        let err = hs.parse_input_data(&mut ping_bytes).unwrap_err();
        assert_eq!(err.reason(), Reason::PROTOCOL_ERROR);
    }

    #[test]
    fn client_cleartext_emits_h2c_upgrade_request() {
        let mut hs = Handshake::new(Role::Client, SettingsConfig::default());
        let req = hs.start(false);
        let text = String::from_utf8(req.to_vec()).unwrap();
        assert!(text.starts_with("GET / HTTP/1.1\r\n"));
        assert!(text.contains("Upgrade: h2c\r\n"));
        assert!(text.contains("HTTP2-Settings: "));
    }

    #[test]
    fn client_upgrade_confirmed_emits_preface_and_settings() {
        let mut hs = Handshake::new(Role::Client, SettingsConfig::default());
        hs.start(false);
        let bytes = hs.on_upgrade_confirmed();
        assert!(bytes.starts_with(PREFACE));
    }

    #[test]
    fn matches_upgrade_request_shape() {
        // upgrade request carries HTTP2-Settings as base64url (no
        // padding) of the raw SETTINGS payload.
        let mut hs = Handshake::new(Role::Client, SettingsConfig::default());
        let req = hs.start(false);
        let text = String::from_utf8(req.to_vec()).unwrap();
        let header_line = text
            .lines()
            .find(|l| l.starts_with("HTTP2-Settings: "))
            .unwrap();
        let value = header_line.trim_start_matches("HTTP2-Settings: ");
        assert!(!value.contains('='));
        assert!(URL_SAFE_NO_PAD.decode(value).is_ok());
    }
}
